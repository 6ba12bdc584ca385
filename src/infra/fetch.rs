use async_trait::async_trait;
use axum::http::header::ORIGIN;
use reqwest::{Client, redirect};
use thiserror::Error;
use tracing::debug;

use crate::{
    application::fetch::{AllowList, FetchError, ResourceFetcher},
    config::FetchSettings,
};

use super::error::InfraError;

#[derive(Debug, Error)]
#[error("redirect to `{url}` leaves the allow-list")]
struct RedirectOutsideAllowList {
    url: String,
}

/// Retrieves allow-listed comment streams over HTTP.
///
/// Every redirect hop is checked against the same allow-list as the initial URL.
#[derive(Debug, Clone)]
pub struct HttpResourceFetcher {
    client: Client,
    allow_list: AllowList,
    origin_header: String,
}

impl HttpResourceFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, InfraError> {
        let allow_list = AllowList::new(settings.allowed_origins.iter().cloned());
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .redirect(redirect_policy(allow_list.clone(), settings.max_redirects))
            .gzip(true)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            allow_list,
            origin_header: settings.origin_header.clone(),
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, url: &str, forwarded_for: Option<&str>) -> Result<String, FetchError> {
        self.allow_list.check(url)?;

        let mut request = self.client.get(url).header(ORIGIN, &self.origin_header);
        if let Some(address) = forwarded_for {
            request = request.header("X-Forwarded-For", address);
        }

        let response = request
            .send()
            .await
            .map_err(|err| classify(url, &err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|err| classify(url, &err))?;
        debug!(
            target = "danmaku_gateway::fetch",
            url,
            status = status.as_u16(),
            bytes = bytes.len(),
            "Fetched comment stream"
        );

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn redirect_policy(allow_list: AllowList, max_redirects: usize) -> redirect::Policy {
    redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error("too many redirects")
        } else if !allow_list.permits(attempt.url().as_str()) {
            let url = attempt.url().to_string();
            attempt.error(RedirectOutsideAllowList { url })
        } else {
            attempt.follow()
        }
    })
}

fn classify(url: &str, err: &reqwest::Error) -> FetchError {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(blocked) = inner.downcast_ref::<RedirectOutsideAllowList>() {
            return FetchError::DomainRestricted {
                url: blocked.url.clone(),
            };
        }
        source = inner.source();
    }

    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::transport(url, err.to_string())
    }
}
