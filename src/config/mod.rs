//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::{
    auth::DEFAULT_VERIFY_PATH, conversion::DEFAULT_WORKERS, fetch::DEFAULT_ALLOWED_ORIGINS,
    rate_limit::DEFAULT_WINDOW,
};

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "danmaku-gateway";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 7777;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_ORIGIN_HEADER: &str = "http://www.bilidown.tv";
const DEFAULT_MAX_REDIRECTS: usize = 16;
const DEFAULT_CONVERSION_COMMAND: &str = "danmaku2ass";
const DEFAULT_CACHE_SECS: u64 = 60;
pub(crate) const DEFAULT_USER_AGENT: &str =
    concat!("danmaku-gateway/", env!("CARGO_PKG_VERSION"));

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub rate_limit: RateLimitSettings,
    pub auth: AuthSettings,
    pub fetch: FetchSettings,
    pub conversion: ConversionSettings,
    pub response: ResponseSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub debug: bool,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub enabled: bool,
    pub verify_path: String,
    /// Defaults to the gateway's own listen address.
    pub verify_origin: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub allowed_origins: Vec<String>,
    pub origin_header: String,
    pub user_agent: String,
    pub max_redirects: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub workers: NonZeroUsize,
    pub command: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResponseSettings {
    pub cache_enabled: bool,
    pub cache_max_age: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("GATEWAY")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("fetch.allowed_origins")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    rate_limit: RawRateLimitSettings,
    auth: RawAuthSettings,
    fetch: RawFetchSettings,
    conversion: RawConversionSettings,
    response: RawResponseSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(debug) = overrides.debug {
            self.server.debug = Some(debug);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(enabled) = overrides.auth_enabled {
            self.auth.enabled = Some(enabled);
        }
        if let Some(path) = overrides.auth_verify_path.as_ref() {
            self.auth.verify_path = Some(path.clone());
        }
        if let Some(origin) = overrides.auth_verify_origin.as_ref() {
            self.auth.verify_origin = Some(origin.clone());
        }
        if let Some(workers) = overrides.conversion_workers {
            self.conversion.workers = Some(workers);
        }
        if let Some(command) = overrides.conversion_command.as_ref() {
            self.conversion.command = Some(command.clone());
        }
        if let Some(enabled) = overrides.response_cache_enabled {
            self.response.cache_enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            rate_limit,
            auth,
            fetch,
            conversion,
            response,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging, server.debug)?;
        let rate_limit = build_rate_limit_settings(rate_limit)?;
        let auth = build_auth_settings(auth, server.addr)?;
        let fetch = build_fetch_settings(fetch)?;
        let conversion = build_conversion_settings(conversion)?;
        let response = build_response_settings(response)?;

        Ok(Self {
            server,
            logging,
            rate_limit,
            auth,
            fetch,
            conversion,
            response,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.host", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = positive_seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        debug: server.debug.unwrap_or(false),
        graceful_shutdown,
    })
}

fn build_logging_settings(
    logging: RawLoggingSettings,
    debug: bool,
) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None if debug => LevelFilter::DEBUG,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window = match rate_limit.window_seconds {
        Some(seconds) => positive_seconds(seconds, "rate_limit.window_seconds")?,
        None => DEFAULT_WINDOW,
    };
    Ok(RateLimitSettings { window })
}

fn build_auth_settings(
    auth: RawAuthSettings,
    listen_addr: SocketAddr,
) -> Result<AuthSettings, LoadError> {
    let verify_path = auth
        .verify_path
        .unwrap_or_else(|| DEFAULT_VERIFY_PATH.to_string());
    if !verify_path.starts_with('/') {
        return Err(LoadError::invalid(
            "auth.verify_path",
            "path must start with `/`",
        ));
    }

    let verify_origin = match auth.verify_origin {
        Some(value) => parse_http_url(&value, "auth.verify_origin")?,
        None => local_origin(listen_addr)?,
    };

    Ok(AuthSettings {
        enabled: auth.enabled.unwrap_or(true),
        verify_path,
        verify_origin,
        connect_timeout: positive_seconds(
            auth.connect_timeout_seconds
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            "auth.connect_timeout_seconds",
        )?,
        request_timeout: positive_seconds(
            auth.request_timeout_seconds
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            "auth.request_timeout_seconds",
        )?,
    })
}

fn build_fetch_settings(fetch: RawFetchSettings) -> Result<FetchSettings, LoadError> {
    let allowed_origins = fetch.allowed_origins.unwrap_or_else(|| {
        DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|origin| origin.to_string())
            .collect()
    });
    if allowed_origins.is_empty() || allowed_origins.iter().any(|origin| origin.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "fetch.allowed_origins",
            "at least one non-empty origin prefix is required",
        ));
    }

    let origin_header = non_empty(
        fetch.origin_header,
        DEFAULT_ORIGIN_HEADER,
        "fetch.origin_header",
    )?;
    let user_agent = non_empty(fetch.user_agent, DEFAULT_USER_AGENT, "fetch.user_agent")?;

    Ok(FetchSettings {
        allowed_origins,
        origin_header,
        user_agent,
        max_redirects: fetch.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
        connect_timeout: positive_seconds(
            fetch
                .connect_timeout_seconds
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            "fetch.connect_timeout_seconds",
        )?,
        request_timeout: positive_seconds(
            fetch
                .request_timeout_seconds
                .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS),
            "fetch.request_timeout_seconds",
        )?,
    })
}

fn build_conversion_settings(
    conversion: RawConversionSettings,
) -> Result<ConversionSettings, LoadError> {
    let workers = conversion.workers.unwrap_or(DEFAULT_WORKERS as u32);
    let workers = usize::try_from(workers)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("conversion.workers", "must be greater than zero"))?;

    let command = conversion
        .command
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERSION_COMMAND));
    if command.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "conversion.command",
            "path must not be empty",
        ));
    }

    Ok(ConversionSettings { workers, command })
}

fn build_response_settings(response: RawResponseSettings) -> Result<ResponseSettings, LoadError> {
    let cache_seconds = non_zero_u32(
        response.cache_seconds.unwrap_or(DEFAULT_CACHE_SECS),
        "response.cache_seconds",
    )?;
    Ok(ResponseSettings {
        cache_enabled: response.cache_enabled.unwrap_or(true),
        cache_max_age: Duration::from_secs(cache_seconds.get().into()),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    debug: Option<bool>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    enabled: Option<bool>,
    verify_path: Option<String>,
    verify_origin: Option<String>,
    connect_timeout_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFetchSettings {
    allowed_origins: Option<Vec<String>>,
    origin_header: Option<String>,
    user_agent: Option<String>,
    max_redirects: Option<usize>,
    connect_timeout_seconds: Option<u64>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConversionSettings {
    workers: Option<u32>,
    command: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResponseSettings {
    cache_enabled: Option<bool>,
    cache_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`; expected http or https"),
        )),
    }
}

/// `http://` origin reaching this process, with a wildcard bind mapped to loopback.
fn local_origin(mut addr: SocketAddr) -> Result<Url, LoadError> {
    if addr.ip().is_unspecified() {
        let loopback: IpAddr = match addr.ip() {
            IpAddr::V4(_) => Ipv4Addr::LOCALHOST.into(),
            IpAddr::V6(_) => Ipv6Addr::LOCALHOST.into(),
        };
        addr.set_ip(loopback);
    }
    Url::parse(&format!("http://{addr}")).map_err(|err| {
        LoadError::invalid(
            "auth.verify_origin",
            format!("cannot derive origin from `{addr}`: {err}"),
        )
    })
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
