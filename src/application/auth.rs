use async_trait::async_trait;
use axum::http::StatusCode;

pub const DEFAULT_VERIFY_PATH: &str = "/cookie_verify";

/// What the verifier needs to know about the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_address: String,
    /// Every `Cookie` header value of the incoming request, in order.
    pub cookies: Vec<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(client_address: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            ..Self::default()
        }
    }

    /// Cookie headers folded into a single header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            None
        } else {
            Some(self.cookies.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Allowed,
    Denied {
        status: StatusCode,
        /// Redirect target handed back to the caller, when the verifier gave one.
        location: Option<String>,
    },
}

impl AuthOutcome {
    pub fn denied(status: StatusCode) -> Self {
        Self::Denied {
            status,
            location: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthOutcome::Allowed)
    }
}

/// Delegates the session check to an external verifier.
///
/// The call never fails: every transport problem is folded into a
/// [`AuthOutcome::Denied`] carrying the best status available.
#[async_trait]
pub trait AuthDelegate: Send + Sync {
    async fn verify(&self, context: &RequestContext) -> AuthOutcome;
}
