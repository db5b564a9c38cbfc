use axum::{
    Json,
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Debug, Serialize)]
pub struct RequestMeta {
    pub request_id: String,
    pub request_at: String, // RFC3339
    pub timestamp: i64,     // unix seconds
}

impl RequestMeta {
    /// Meta for a request that never went through [`meta_middleware`].
    pub fn fresh() -> Self {
        Self::new(None)
    }

    fn new(request_id: Option<String>) -> Self {
        let now: DateTime<Utc> = Utc::now();
        RequestMeta {
            request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            request_at: now.to_rfc3339(),
            timestamp: now.timestamp(),
        }
    }
}

// Middleware: attaches RequestMeta into request extensions and echoes the id.
// An id forwarded by the proxy is kept so logs line up across hops.
pub async fn meta_middleware(mut req: Request<Body>, next: Next) -> Response {
    let forwarded = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_owned);
    let meta = RequestMeta::new(forwarded);
    let request_id = meta.request_id.clone();
    req.extensions_mut().insert(meta);

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

#[derive(Serialize)]
pub struct SuccessEnvelope<T> {
    pub message: String,
    pub data: T,
    pub meta: RequestMeta,
}

pub struct ApiOk<T> {
    status: StatusCode,
    body: SuccessEnvelope<T>,
}

impl<T> ApiOk<T> {
    fn with_status(status: StatusCode, message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self {
            status,
            body: SuccessEnvelope {
                message: message.into(),
                data,
                meta,
            },
        }
    }

    pub fn ok(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::OK, message, data, meta)
    }

    pub fn created(message: impl Into<String>, data: T, meta: RequestMeta) -> Self {
        Self::with_status(StatusCode::CREATED, message, data, meta)
    }
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
