use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Failures of the checkout and settlement core.
///
/// Validation variants are raised before any external call or write.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid customer: {0}")]
    InvalidCustomer(String),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Payment of {received} does not cover the expected {expected}")]
    UnderpaidMismatch { expected: Decimal, received: Decimal },

    #[error("Payment intent has expired")]
    IntentExpired,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Payment provider error: {0}")]
    UpstreamPaymentError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

impl CheckoutError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyCart => "EMPTY_CART",
            Self::InvalidCustomer(_) => "INVALID_CUSTOMER",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            Self::InvalidCoupon(_) => "INVALID_COUPON",
            Self::UnderpaidMismatch { .. } => "UNDERPAID_MISMATCH",
            Self::IntentExpired => "INTENT_EXPIRED",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::UpstreamPaymentError(_) => "UPSTREAM_PAYMENT_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::PersistenceError(err.to_string())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamPaymentError(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::EmptyCart
            | Self::InvalidCustomer(_)
            | Self::InvalidQuantity
            | Self::InvalidAmount
            | Self::UnsupportedCurrency(_)
            | Self::InvalidCoupon(_) => StatusCode::BAD_REQUEST,
            Self::UnderpaidMismatch { .. } => StatusCode::CONFLICT,
            Self::IntentExpired => StatusCode::GONE,
            Self::OrderNotFound => StatusCode::NOT_FOUND,
            Self::UpstreamPaymentError(_) => StatusCode::BAD_GATEWAY,
            Self::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
            Self::Checkout(err) => (err.status(), err.code()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        };

        // Don't expose internal error details to clients
        let error = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            match &self {
                Self::Checkout(CheckoutError::UpstreamPaymentError(_)) => {
                    "Payment provider unavailable".to_string()
                }
                _ => "Internal server error".to_string(),
            }
        } else {
            match &self {
                Self::Checkout(err) => err.to_string(),
                Self::NotFound(msg) | Self::BadRequest(msg) | Self::Unauthorized(msg) => {
                    msg.clone()
                }
                _ => self.to_string(),
            }
        };

        (status, Json(ErrorBody { error, code })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
