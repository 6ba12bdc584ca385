use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(
    name = "danmaku-gateway",
    version,
    about = "Danmaku to ASS subtitle conversion gateway"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "GATEWAY_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the conversion HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Render full error chains on error pages and log at debug level.
    #[arg(
        long = "debug",
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: Option<bool>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the per-address rate limit window.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Toggle cookie verification before conversion.
    #[arg(
        long = "auth-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub auth_enabled: Option<bool>,

    /// Override the path of the cookie verification endpoint.
    #[arg(long = "auth-verify-path", value_name = "PATH")]
    pub auth_verify_path: Option<String>,

    /// Send verification requests to this origin instead of the request's Host.
    #[arg(long = "auth-verify-origin", value_name = "URL")]
    pub auth_verify_origin: Option<String>,

    /// Override the number of conversion worker threads.
    #[arg(long = "conversion-workers", value_name = "COUNT")]
    pub conversion_workers: Option<u32>,

    /// Override the converter executable.
    #[arg(
        long = "conversion-command",
        value_name = "PATH",
        value_hint = ValueHint::ExecutablePath
    )]
    pub conversion_command: Option<PathBuf>,

    /// Toggle short-lived cache headers on converted artifacts.
    #[arg(
        long = "response-cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub response_cache_enabled: Option<bool>,
}
