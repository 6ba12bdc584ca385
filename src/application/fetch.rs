use async_trait::async_trait;
use thiserror::Error;

pub const DEFAULT_ALLOWED_ORIGINS: [&str; 3] = [
    "http://comment.bilibili.tv/",
    "http://comment.bilibili.cn/",
    "http://www.bilidown.tv/",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetching `{url}` is not allowed: origin is not on the allow-list")]
    DomainRestricted { url: String },
    #[error("timeout fetching `{url}`")]
    Timeout { url: String },
    #[error("failed to fetch `{url}`: {message}")]
    Transport { url: String, message: String },
    #[error("upstream responded to `{url}` with status {status}")]
    UpstreamStatus { url: String, status: u16 },
}

impl FetchError {
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Origin prefixes a remote comment stream may be retrieved from.
///
/// Matching is a plain prefix comparison on the URL as given, so entries
/// should end with `/` to pin the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    origins: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    pub fn permits(&self, url: &str) -> bool {
        self.origins.iter().any(|origin| url.starts_with(origin.as_str()))
    }

    /// Fails without touching the network when `url` is outside the list.
    pub fn check(&self, url: &str) -> Result<(), FetchError> {
        if self.permits(url) {
            Ok(())
        } else {
            Err(FetchError::DomainRestricted {
                url: url.to_string(),
            })
        }
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_ORIGINS)
    }
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Retrieve the document at `url` as text, decoding leniently.
    ///
    /// Implementations must reject URLs outside their allow-list before any
    /// network activity.
    async fn fetch(&self, url: &str, forwarded_for: Option<&str>) -> Result<String, FetchError>;
}
