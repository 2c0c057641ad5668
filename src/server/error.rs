use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::auth::AuthError;
use crate::docstore::DocError;
use crate::markets::InvalidMarket;
use crate::storage::StoreError;
use crate::trading::{FormError, LedgerError, TradeError};

/// A response-shaped error: every internal error kind maps onto one of the
/// documented status codes with its message as the body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::MissingHeader => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            AuthError::Expired
            | AuthError::Revoked
            | AuthError::Unverified
            | AuthError::AdminRejected => StatusCode::UNAUTHORIZED,
            AuthError::Malformed | AuthError::CertificateFetch(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

impl From<FormError> for ApiError {
    fn from(err: FormError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<InvalidMarket> for ApiError {
    fn from(err: InvalidMarket) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::PortfolioMissing(_) => StatusCode::NOT_FOUND,
            LedgerError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            LedgerError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            LedgerError::Corrupt(_) | LedgerError::Doc(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        match err {
            TradeError::Ledger(inner) => inner.into(),
            TradeError::MarketNotFound(_) => Self::not_found(err.to_string()),
            TradeError::Contention => Self::new(StatusCode::CONFLICT, err.to_string()),
            TradeError::Mismatch(_) | TradeError::ConfirmationTooLate => {
                Self::bad_request(err.to_string())
            }
            TradeError::Unauthorized => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            TradeError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Contention(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DocError> for ApiError {
    fn from(err: DocError) -> Self {
        let status = match &err {
            DocError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_contract() {
        assert_eq!(ApiError::from(AuthError::MissingHeader).status.as_u16(), 407);
        assert_eq!(ApiError::from(AuthError::Expired).status.as_u16(), 401);
        assert_eq!(ApiError::from(TradeError::Contention).status.as_u16(), 409);
        assert_eq!(
            ApiError::from(TradeError::MarketNotFound("x".into())).status.as_u16(),
            404
        );
        assert_eq!(ApiError::from(TradeError::ConfirmationTooLate).status.as_u16(), 400);
        assert_eq!(
            ApiError::from(LedgerError::InsufficientFunds { cash: 1.0, price: 2.0 })
                .status
                .as_u16(),
            400
        );
        assert_eq!(
            ApiError::from(LedgerError::PortfolioMissing("p".into())).status.as_u16(),
            404
        );
    }
}
