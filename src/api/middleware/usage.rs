use axum::{extract::Request, middleware::Next, response::Response};

use crate::api::error::AppError;

/// Allow/deny decision made by the surrounding account/quota layer. The
/// pipeline consumes it as a request extension and never queries any quota
/// store itself.
#[derive(Clone, Debug)]
pub struct UsageDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl UsageDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Rejects requests whose usage decision is a deny. A missing decision means
/// no quota layer is deployed in front and the request proceeds.
pub async fn require_usage_allowance(req: Request, next: Next) -> Result<Response, AppError> {
    if let Some(decision) = req.extensions().get::<UsageDecision>() {
        if !decision.allowed {
            let reason = decision
                .reason
                .clone()
                .unwrap_or_else(|| "compression quota exhausted".to_string());
            return Err(AppError::UsageDenied(reason));
        }
    }
    Ok(next.run(req).await)
}
