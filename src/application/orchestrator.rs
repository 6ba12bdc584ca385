//! Per-request control flow of the conversion endpoint.
//!
//! A request moves through `rate check -> validate -> auth check -> fetch (or
//! local skip) -> dispatch` and stops at the first failing stage. Every stage
//! failure is turned into a [`GatewayError`]; nothing escapes the request.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::{
    application::{
        auth::{AuthDelegate, AuthOutcome, RequestContext},
        conversion::{ConversionDispatcher, InputHandle},
        error::GatewayError,
        fetch::ResourceFetcher,
        rate_limit::RateLimiter,
    },
    domain::parameters::{InputSource, RequestParameters},
};

/// A single call to the conversion endpoint as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub context: RequestContext,
    /// Raw query string, still percent-encoded.
    pub query: Option<String>,
}

/// Successful outcome, ready to be written as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedArtifact {
    pub filename: String,
    pub body: String,
}

#[derive(Clone)]
pub struct RequestOrchestrator {
    rate_limiter: Arc<RateLimiter>,
    /// `None` runs the variant without cookie verification.
    auth: Option<Arc<dyn AuthDelegate>>,
    fetcher: Arc<dyn ResourceFetcher>,
    dispatcher: ConversionDispatcher,
}

impl RequestOrchestrator {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        auth: Option<Arc<dyn AuthDelegate>>,
        fetcher: Arc<dyn ResourceFetcher>,
        dispatcher: ConversionDispatcher,
    ) -> Self {
        Self {
            rate_limiter,
            auth,
            fetcher,
            dispatcher,
        }
    }

    pub async fn handle(&self, request: ConvertRequest) -> Result<ConvertedArtifact, GatewayError> {
        let ConvertRequest { context, query } = request;
        let address = context.client_address.as_str();

        if !self.rate_limiter.admit(address) {
            counter!("gateway_requests_rate_limited_total").increment(1);
            info!(
                target = "danmaku_gateway::orchestrator",
                client = %address,
                window_seconds = self.rate_limiter.window().as_secs(),
                "Request rejected by rate limiter"
            );
            return Err(GatewayError::RateLimited {
                address: address.to_string(),
            });
        }

        // Validation precedes every network or worker-pool action.
        let parameters = RequestParameters::from_query(query.as_deref().unwrap_or_default())?;

        if let Some(auth) = &self.auth {
            match auth.verify(&context).await {
                AuthOutcome::Allowed => {
                    debug!(
                        target = "danmaku_gateway::orchestrator",
                        client = %address,
                        "Caller verified"
                    );
                }
                AuthOutcome::Denied { status, location } => {
                    counter!("gateway_auth_denied_total").increment(1);
                    info!(
                        target = "danmaku_gateway::orchestrator",
                        client = %address,
                        status = status.as_u16(),
                        redirect = location.is_some(),
                        "Caller denied by verifier"
                    );
                    return Err(GatewayError::Auth { status, location });
                }
            }
        }

        let input = match parameters.source() {
            InputSource::LocalFile(path) => {
                debug!(
                    target = "danmaku_gateway::orchestrator",
                    path = %path.display(),
                    "Using local comment file"
                );
                InputHandle::LocalPath(path.to_path_buf())
            }
            InputSource::Remote(url) => {
                debug!(
                    target = "danmaku_gateway::orchestrator",
                    url,
                    "Fetching comment stream"
                );
                let text = self
                    .fetcher
                    .fetch(url, Some(address))
                    .await
                    .inspect_err(|err| {
                        counter!("gateway_fetch_failures_total").increment(1);
                        warn!(
                            target = "danmaku_gateway::orchestrator",
                            url,
                            error = %err,
                            "Comment stream fetch failed"
                        );
                    })?;
                debug!(
                    target = "danmaku_gateway::orchestrator",
                    url,
                    bytes = text.len(),
                    "Comment stream fetched"
                );
                InputHandle::Text(text)
            }
        };

        let filename = parameters.output_filename().to_string();
        let body = self.dispatcher.submit(input, parameters).await?;

        info!(
            target = "danmaku_gateway::orchestrator",
            client = %address,
            filename = %filename,
            bytes = body.len(),
            "Conversion completed"
        );

        Ok(ConvertedArtifact { filename, body })
    }
}
