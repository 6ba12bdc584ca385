use clap::Parser;

use super::*;

#[test]
fn defaults_cover_every_section() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr, "127.0.0.1:7777".parse().expect("addr"));
    assert!(!settings.server.debug);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.rate_limit.window, Duration::from_secs(20));
    assert!(settings.auth.enabled);
    assert_eq!(settings.auth.verify_path, "/cookie_verify");
    assert_eq!(settings.auth.verify_origin.as_str(), "http://127.0.0.1:7777/");
    assert_eq!(settings.auth.connect_timeout, Duration::from_secs(60));
    assert_eq!(settings.fetch.allowed_origins.len(), 3);
    assert_eq!(settings.fetch.origin_header, "http://www.bilidown.tv");
    assert_eq!(settings.fetch.max_redirects, 16);
    assert_eq!(settings.fetch.request_timeout, Duration::from_secs(60));
    assert_eq!(settings.conversion.workers.get(), 8);
    assert_eq!(settings.conversion.command, PathBuf::from("danmaku2ass"));
    assert!(settings.response.cache_enabled);
    assert_eq!(settings.response.cache_max_age, Duration::from_secs(60));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.auth.enabled = Some(true);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        auth_enabled: Some(false),
        conversion_workers: Some(2),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(!settings.auth.enabled);
    assert_eq!(settings.conversion.workers.get(), 2);
}

#[test]
fn debug_mode_lowers_default_log_level() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        debug: Some(true),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.server.debug);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.conversion.workers = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "conversion.workers",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.rate_limit.window_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "rate_limit.window_seconds",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "server.port",
            ..
        })
    ));
}

#[test]
fn verify_path_must_be_absolute() {
    let mut raw = RawSettings::default();
    raw.auth.verify_path = Some("cookie_verify".to_string());

    let err = Settings::from_raw(raw).expect_err("relative path rejected");
    assert!(err.to_string().contains("auth.verify_path"));
}

#[test]
fn verify_origin_requires_http_scheme() {
    let mut raw = RawSettings::default();
    raw.auth.verify_origin = Some("ftp://127.0.0.1".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.auth.verify_origin = Some("http://127.0.0.1:8080".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.verify_origin.as_str(), "http://127.0.0.1:8080/");
}

#[test]
fn verify_origin_follows_the_listen_address() {
    let mut raw = RawSettings::default();
    raw.server.host = Some("0.0.0.0".to_string());
    raw.server.port = Some(9000);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.verify_origin.as_str(), "http://127.0.0.1:9000/");

    let mut raw = RawSettings::default();
    raw.server.host = Some("::".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.verify_origin.as_str(), "http://[::1]:7777/");
}

#[test]
fn empty_allow_list_is_rejected() {
    let mut raw = RawSettings::default();
    raw.fetch.allowed_origins = Some(Vec::new());

    let err = Settings::from_raw(raw).expect_err("empty allow-list");
    assert!(err.to_string().contains("fetch.allowed_origins"));
}

#[test]
fn ipv6_hosts_are_bracketed() {
    let mut raw = RawSettings::default();
    raw.server.host = Some("::1".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.server.addr.is_ipv6());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["danmaku-gateway"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "danmaku-gateway",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--server-port",
        "8080",
        "--debug",
        "--auth-enabled",
        "false",
        "--conversion-command",
        "/usr/local/bin/danmaku2ass",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.debug, Some(true));
            assert_eq!(serve.overrides.auth_enabled, Some(false));
            assert_eq!(
                serve.overrides.conversion_command,
                Some(PathBuf::from("/usr/local/bin/danmaku2ass"))
            );
        }
    }
}
