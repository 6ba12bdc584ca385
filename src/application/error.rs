use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::{conversion::ConversionError, fetch::FetchError},
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

pub const RATE_LIMITED_MESSAGE: &str =
    "Requests from your address are too frequent. Please wait a moment before trying again.";

/// Every way a conversion request can end without an artifact.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Argument(#[from] DomainError),
    #[error("too many requests from {address}")]
    RateLimited { address: String },
    #[error("authentication failed with status {status}")]
    Auth {
        status: StatusCode,
        location: Option<String>,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Template used to render an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPage {
    /// Static usage page listing the accepted arguments.
    Help,
    /// Generic error page showing the cause.
    Error,
}

/// How one [`GatewayError`] variant is presented over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMapping {
    pub status: StatusCode,
    pub page: ErrorPage,
    pub public_message: &'static str,
}

impl GatewayError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn mapping(&self) -> ErrorMapping {
        let (status, page, public_message) = match self {
            GatewayError::Argument(_) => (
                StatusCode::BAD_REQUEST,
                ErrorPage::Help,
                "Invalid or missing request arguments",
            ),
            GatewayError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorPage::Error,
                RATE_LIMITED_MESSAGE,
            ),
            GatewayError::Auth { status, .. } => {
                (*status, ErrorPage::Error, "Authentication failed")
            }
            GatewayError::Fetch(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorPage::Error,
                "Failed to retrieve the comment stream",
            ),
            GatewayError::Conversion(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorPage::Error,
                "Failed to convert the comment stream",
            ),
            GatewayError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorPage::Error,
                "Internal server error",
            ),
        };
        ErrorMapping {
            status,
            page,
            public_message,
        }
    }

    /// Redirect target to attach as a `Location` header.
    pub fn location(&self) -> Option<&str> {
        match self {
            GatewayError::Auth { location, .. } => location.as_deref(),
            _ => None,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Argument(_) => "argument",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Auth { .. } => "auth",
            GatewayError::Fetch(_) => "fetch",
            GatewayError::Conversion(_) => "conversion",
            GatewayError::Internal(_) => "internal",
        }
    }

    pub fn report(&self, source: &'static str) -> ErrorReport {
        ErrorReport::from_error(source, self.mapping().status, self)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
