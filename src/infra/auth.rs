use async_trait::async_trait;
use axum::http::{
    StatusCode,
    header::{COOKIE, LOCATION, USER_AGENT},
};
use reqwest::{Client, redirect};
use tracing::{debug, warn};
use url::Url;

use crate::{
    application::auth::{AuthDelegate, AuthOutcome, RequestContext},
    config::AuthSettings,
};

use super::error::InfraError;

/// Asks the verification endpoint whether the caller's cookies grant access.
#[derive(Debug, Clone)]
pub struct HttpAuthVerifier {
    client: Client,
    endpoint: Url,
    default_user_agent: String,
}

impl HttpAuthVerifier {
    pub fn new(settings: &AuthSettings, default_user_agent: &str) -> Result<Self, InfraError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        let endpoint = settings
            .verify_origin
            .join(&settings.verify_path)
            .map_err(|err| {
                InfraError::http_client(format!(
                    "invalid verifier endpoint `{}{}`: {err}",
                    settings.verify_origin, settings.verify_path
                ))
            })?;

        Ok(Self {
            client,
            endpoint,
            default_user_agent: default_user_agent.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl AuthDelegate for HttpAuthVerifier {
    async fn verify(&self, context: &RequestContext) -> AuthOutcome {
        let endpoint = &self.endpoint;
        let user_agent = context
            .user_agent
            .as_deref()
            .unwrap_or(&self.default_user_agent);
        let mut request = self
            .client
            .get(endpoint.clone())
            .header(USER_AGENT, user_agent)
            .header("X-Forwarded-For", &context.client_address);
        if let Some(cookie) = context.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    target = "danmaku_gateway::auth",
                    endpoint = %endpoint,
                    status = response.status().as_u16(),
                    "Verifier accepted caller"
                );
                AuthOutcome::Allowed
            }
            Ok(response) => {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                AuthOutcome::Denied {
                    status: response.status(),
                    location,
                }
            }
            Err(err) => {
                warn!(
                    target = "danmaku_gateway::auth",
                    endpoint = %endpoint,
                    timeout = err.is_timeout(),
                    error = %err,
                    "Verifier request failed"
                );
                AuthOutcome::denied(err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;

    use super::*;

    fn settings(origin: &str) -> AuthSettings {
        AuthSettings {
            enabled: true,
            verify_path: "/cookie_verify".to_string(),
            verify_origin: Url::parse(origin).expect("origin"),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        }
    }

    fn context() -> RequestContext {
        RequestContext {
            client_address: "203.0.113.9".to_string(),
            cookies: vec!["sid=abc".to_string(), "lang=en".to_string()],
            user_agent: None,
        }
    }

    #[test]
    fn endpoint_joins_origin_and_path() {
        let verifier =
            HttpAuthVerifier::new(&settings("http://127.0.0.1:7777"), "ua").expect("verifier");
        assert_eq!(
            verifier.endpoint().as_str(),
            "http://127.0.0.1:7777/cookie_verify"
        );
    }

    #[tokio::test]
    async fn success_forwards_cookies_and_client_address() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/cookie_verify")
                .header("cookie", "sid=abc; lang=en")
                .header("x-forwarded-for", "203.0.113.9")
                .header("user-agent", "gateway-default");
            then.status(200).body("OK");
        });

        let verifier = HttpAuthVerifier::new(&settings(&server.base_url()), "gateway-default")
            .expect("verifier");
        let outcome = verifier.verify(&context()).await;

        mock.assert();
        assert_eq!(outcome, AuthOutcome::Allowed);
    }

    #[tokio::test]
    async fn caller_user_agent_is_preferred() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method("GET")
                .path("/cookie_verify")
                .header("user-agent", "Mozilla/5.0");
            then.status(204);
        });

        let verifier = HttpAuthVerifier::new(&settings(&server.base_url()), "default")
            .expect("verifier");
        let mut context = context();
        context.user_agent = Some("Mozilla/5.0".to_string());

        assert!(verifier.verify(&context).await.is_allowed());
        mock.assert();
    }

    #[tokio::test]
    async fn redirect_is_not_followed_and_location_is_kept() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/cookie_verify");
            then.status(302).header("Location", "https://login.example/?next=1");
        });

        let verifier =
            HttpAuthVerifier::new(&settings(&server.base_url()), "ua").expect("verifier");
        let outcome = verifier.verify(&context()).await;

        assert_eq!(
            outcome,
            AuthOutcome::Denied {
                status: StatusCode::FOUND,
                location: Some("https://login.example/?next=1".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn error_status_without_location_is_denied() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/cookie_verify");
            then.status(403);
        });

        let verifier =
            HttpAuthVerifier::new(&settings(&server.base_url()), "ua").expect("verifier");

        assert_eq!(
            verifier.verify(&context()).await,
            AuthOutcome::denied(StatusCode::FORBIDDEN)
        );
    }

    #[tokio::test]
    async fn timeout_is_denied_with_internal_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/cookie_verify");
            then.status(200).delay(Duration::from_secs(3));
        });

        let mut settings = settings(&server.base_url());
        settings.request_timeout = Duration::from_millis(200);
        let verifier = HttpAuthVerifier::new(&settings, "ua").expect("verifier");

        assert_eq!(
            verifier.verify(&context()).await,
            AuthOutcome::denied(StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
