//! HTTP error mapping.
//!
//! Every failure leaves the service as
//! `{"success": false, "error": <kind>, "message": ..., ...details}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::types::TreasuryError;

#[derive(Debug)]
pub struct ApiError(pub TreasuryError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TreasuryError::Validation(_)
            | TreasuryError::InsufficientFunds { .. }
            | TreasuryError::BelowFundingFloor { .. } => StatusCode::BAD_REQUEST,
            TreasuryError::Paused => StatusCode::FORBIDDEN,
            TreasuryError::Connectivity { .. } => StatusCode::SERVICE_UNAVAILABLE,
            TreasuryError::Chain(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "success": false,
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });

        let details = match &self.0 {
            TreasuryError::Connectivity { attempted, last_error } => json!({
                "attempted": attempted,
                "lastError": last_error,
            }),
            TreasuryError::InsufficientFunds {
                available,
                requested,
                gas_estimate,
                total_needed,
                max_withdrawable,
            } => json!({
                "available": available,
                "requested": requested,
                "gasEstimate": gas_estimate,
                "totalNeeded": total_needed,
                "maxWithdrawable": max_withdrawable,
            }),
            TreasuryError::BelowFundingFloor { required, current } => json!({
                "required": required,
                "current": current,
            }),
            TreasuryError::Chain(fault) => json!({
                "kind": fault.kind,
                "code": fault.code,
                "reason": fault.reason,
                "txHash": fault.tx_hash.map(|h| h.to_string()),
            }),
            TreasuryError::Validation(_) | TreasuryError::Paused => Value::Null,
        };

        if let (Some(body), Value::Object(details)) = (body.as_object_mut(), details) {
            body.extend(details);
        }
        body
    }
}

impl From<TreasuryError> for ApiError {
    fn from(err: TreasuryError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TreasuryError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
