use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{FromRequestParts, Path, State},
    http::{HeaderMap, request::Parts},
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, warn};

use crate::channels::PaymentMethod;
use crate::checkout::{Checkout, CheckoutPreview, SubmittedPayment};
use crate::doku::{DokuClient, SignedHeaders};
use crate::error::{
    ApiError, ApiErrorWithMeta, CheckoutError, E_BAD_NOTIFICATION, E_BAD_PAYMENT_METHOD,
    E_BAD_SIGNATURE, E_MISSING_USER, E_SWEEP_FORBIDDEN,
};
use crate::gateway::GatewayNotification;
use crate::reconcile::{CallbackOutcome, Reconciler};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::types::{OrderStatus, UserContext};

/// Path the gateway delivers payment notifications to.
pub const NOTIFICATION_PATH: &str = "/payments/notifications";

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// Prices games and opens payments.
    pub checkout: Arc<Checkout>,
    /// Settles orders.
    pub reconciler: Arc<Reconciler>,
    /// Verifies notification signatures; `None` accepts unsigned notifications.
    pub notification_verifier: Option<Arc<DokuClient>>,
    /// Operator token for `POST /payments/sweep`; `None` refuses every call.
    pub sweep_token: Option<String>,
}

/// Header carrying the operator token for the on-demand sweep.
pub const SWEEP_TOKEN_HEADER: &str = "x-sweep-token";

/// The request to pay for a game.
#[derive(Deserialize)]
pub struct SubmitPaymentRequest {
    /// One of `QRIS`, `VIRTUAL_ACCOUNT`, `EWALLET`, `RETAIL`.
    pub payment_method: Option<String>,
}

/// The response for an order status check.
#[derive(Serialize)]
pub struct OrderStatusResponse {
    /// The business order id.
    pub order_id: String,
    /// The order's status.
    pub status: OrderStatus,
}

/// The response after an expiry sweep.
#[derive(Serialize)]
pub struct SweepResponse {
    /// How many orders were expired.
    pub expired: u64,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/games/{slug}/checkout",
            get(checkout_preview_handler).post(submit_payment_handler),
        )
        .route("/orders/{order_id}/status", get(order_status_handler))
        .route(NOTIFICATION_PATH, post(notification_handler))
        .route("/payments/sweep", post(sweep_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// The authenticating proxy in front of this service forwards the session's
// user in these headers.
impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = ApiErrorWithMeta;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let meta = parts
            .extensions
            .get::<RequestMeta>()
            .cloned()
            .unwrap_or_else(RequestMeta::fresh);
        let id = header(&parts.headers, "x-user-id").and_then(|v| v.parse::<i64>().ok());
        let Some(id) = id else {
            return Err(ApiError::Unauthenticated("login required".into())
                .with_meta(meta)
                .with_code(E_MISSING_USER)
                .with_redirect("/login"));
        };
        Ok(UserContext {
            id,
            name: header(&parts.headers, "x-user-name").unwrap_or_default().to_string(),
            email: header(&parts.headers, "x-user-email").unwrap_or_default().to_string(),
        })
    }
}

async fn checkout_preview_handler(
    State(st): State<AppState>,
    Path(slug): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    user: UserContext,
) -> Result<ApiOk<CheckoutPreview>, ApiErrorWithMeta> {
    let preview = st
        .checkout
        .preview(&slug, &user)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("checkout preview", preview, meta))
}

async fn submit_payment_handler(
    State(st): State<AppState>,
    Path(slug): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    user: UserContext,
    Json(req): Json<SubmitPaymentRequest>,
) -> Result<ApiOk<SubmittedPayment>, ApiErrorWithMeta> {
    let method = req
        .payment_method
        .as_deref()
        .and_then(PaymentMethod::parse)
        .ok_or_else(|| {
            ApiError::BadRequest("payment_method must be one of QRIS, VIRTUAL_ACCOUNT, EWALLET, RETAIL".into())
                .with_meta(meta.clone())
                .with_code(E_BAD_PAYMENT_METHOD)
        })?;

    let payment = st
        .checkout
        .submit(&slug, &user, method)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::created("payment created", payment, meta))
}

async fn order_status_handler(
    State(st): State<AppState>,
    Path(order_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    user: UserContext,
) -> Result<ApiOk<OrderStatusResponse>, ApiErrorWithMeta> {
    let status = st
        .reconciler
        .order_status(&order_id, &user)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok(
        "order status",
        OrderStatusResponse { order_id, status },
        meta,
    ))
}

async fn notification_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ApiOk<CallbackOutcome>, ApiErrorWithMeta> {
    if let Some(verifier) = &st.notification_verifier {
        let signed = SignedHeaders {
            client_id: header(&headers, "client-id").unwrap_or_default().to_string(),
            request_id: header(&headers, "request-id").unwrap_or_default().to_string(),
            timestamp: header(&headers, "request-timestamp").unwrap_or_default().to_string(),
            signature: header(&headers, "signature").unwrap_or_default().to_string(),
        };
        if !verifier.verify_notification(&signed, NOTIFICATION_PATH, &body) {
            warn!(request_id = %signed.request_id, "rejected notification with bad signature");
            return Err(ApiError::Unauthenticated("invalid signature".into())
                .with_meta(meta)
                .with_code(E_BAD_SIGNATURE));
        }
    }

    let notification: GatewayNotification = serde_json::from_slice(&body).map_err(|e| {
        ApiError::BadRequest(format!("malformed notification: {e}"))
            .with_meta(meta.clone())
            .with_code(E_BAD_NOTIFICATION)
    })?;

    let outcome = st
        .reconciler
        .handle_callback(&notification)
        .await
        .map_err(|e| match e {
            CheckoutError::Validation(_) => e.into_api(meta.clone()).with_code(E_BAD_NOTIFICATION),
            e => e.into_api(meta.clone()),
        })?;

    Ok(ApiOk::ok("notification processed", outcome, meta))
}

async fn sweep_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
) -> Result<ApiOk<SweepResponse>, ApiErrorWithMeta> {
    let presented = header(&headers, SWEEP_TOKEN_HEADER);
    let allowed = matches!(
        (st.sweep_token.as_deref(), presented),
        (Some(expected), Some(given)) if expected == given
    );
    if !allowed {
        warn!("rejected sweep request without a valid operator token");
        return Err(ApiError::Forbidden("sweep requires the operator token".into())
            .with_meta(meta)
            .with_code(E_SWEEP_FORBIDDEN));
    }

    let expired = st
        .reconciler
        .sweep_expired()
        .await
        .map_err(|e| e.into_api(meta.clone()))?;

    Ok(ApiOk::ok("sweep finished", SweepResponse { expired }, meta))
}
