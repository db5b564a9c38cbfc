use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::gateway::GatewayError;
use crate::responses::RequestMeta;

pub const E_GAME_NOT_FOUND: &str = "GAME_NOT_FOUND";
pub const E_ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";
pub const E_NOT_ORDER_OWNER: &str = "NOT_ORDER_OWNER";
pub const E_ALREADY_OWNED: &str = "ALREADY_OWNED";
pub const E_DUPLICATE_CHECKOUT: &str = "DUPLICATE_CHECKOUT";
pub const E_BAD_PAYMENT_METHOD: &str = "BAD_PAYMENT_METHOD";
pub const E_BAD_NOTIFICATION: &str = "BAD_NOTIFICATION";
pub const E_BAD_SIGNATURE: &str = "BAD_SIGNATURE";
pub const E_MISSING_USER: &str = "MISSING_USER";
pub const E_SWEEP_FORBIDDEN: &str = "SWEEP_FORBIDDEN";
pub const E_PAYMENT_FAILED: &str = "PAYMENT_FAILED";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// Failures of the checkout and settlement core.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("order belongs to another user")]
    Unauthorized,
    #[error("game already owned")]
    AlreadyOwned { slug: String },
    #[error("checkout {0} is already in progress")]
    DuplicateCheckout(String),
    #[error("payment gateway failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthenticated(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// The payment provider failed; the detail is logged, never returned.
    BadGateway(anyhow::Error),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
    redirect: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
            redirect: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    /// Tells the web layer where to send the buyer instead of an error page.
    pub fn with_redirect(mut self, to: impl Into<String>) -> Self {
        self.redirect = Some(to.into());
        self
    }
}

impl CheckoutError {
    /// Converts a core failure into the HTTP error shown to the caller.
    pub fn into_api(self, meta: RequestMeta) -> ApiErrorWithMeta {
        match self {
            CheckoutError::NotFound(what @ "game") => ApiError::NotFound(format!("{what} not found"))
                .with_meta(meta)
                .with_code(E_GAME_NOT_FOUND)
                .with_redirect("/games"),
            CheckoutError::NotFound(what) => ApiError::NotFound(format!("{what} not found"))
                .with_meta(meta)
                .with_code(E_ORDER_NOT_FOUND),
            CheckoutError::Unauthorized => {
                ApiError::Forbidden("order belongs to another user".into())
                    .with_meta(meta)
                    .with_code(E_NOT_ORDER_OWNER)
            }
            CheckoutError::AlreadyOwned { slug } => {
                ApiError::Conflict("you already own this game".into())
                    .with_meta(meta)
                    .with_code(E_ALREADY_OWNED)
                    .with_redirect(format!("/games/{slug}"))
            }
            CheckoutError::DuplicateCheckout(_) => {
                ApiError::Conflict("this checkout is already in progress".into())
                    .with_meta(meta)
                    .with_code(E_DUPLICATE_CHECKOUT)
            }
            CheckoutError::Validation(msg) => ApiError::BadRequest(msg)
                .with_meta(meta)
                .with_code(E_BAD_PAYMENT_METHOD),
            CheckoutError::Gateway(e) => ApiError::BadGateway(e.into())
                .with_meta(meta)
                .with_code(E_PAYMENT_FAILED),
            CheckoutError::Storage(e) => ApiError::Internal(e)
                .with_meta(meta)
                .with_code(E_DB_FAILURE),
        }
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(e) => {
                error!(request_id = %self.meta.request_id, "payment gateway error: {:?}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "payment processing failed".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!(request_id = %self.meta.request_id, "internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }
        if let Some(redirect) = self.redirect {
            body["redirect"] = json!(redirect);
        }

        (status, Json(body)).into_response()
    }
}
