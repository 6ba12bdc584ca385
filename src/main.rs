use std::{net::SocketAddr, process, sync::Arc};

use danmaku_gateway::{
    application::{
        auth::AuthDelegate,
        conversion::{ConversionDispatcher, WorkerPool},
        error::AppError,
        orchestrator::RequestOrchestrator,
        rate_limit::RateLimiter,
    },
    config,
    infra::{
        auth::HttpAuthVerifier,
        error::InfraError,
        fetch::HttpResourceFetcher,
        http::{self, HttpState},
        telemetry,
        transformer::CommandTransformer,
    },
    presentation::views::PageContext,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

// Request handling stays on this single thread; only conversions run on the worker pool.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let transformer = Arc::new(CommandTransformer::new(settings.conversion.command.clone()));
    let (dispatcher, pool) = ConversionDispatcher::start(settings.conversion.workers, transformer)
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let auth: Option<Arc<dyn AuthDelegate>> = if settings.auth.enabled {
        Some(Arc::new(HttpAuthVerifier::new(
            &settings.auth,
            &settings.fetch.user_agent,
        )?))
    } else {
        None
    };
    let fetcher = Arc::new(HttpResourceFetcher::new(&settings.fetch)?);
    let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.window));
    let orchestrator = RequestOrchestrator::new(rate_limiter, auth, fetcher, dispatcher);

    let state = HttpState {
        orchestrator: Arc::new(orchestrator),
        pages: PageContext {
            allowed_origins: settings.fetch.allowed_origins.clone().into(),
            debug: settings.server.debug,
        },
        cache_max_age: settings
            .response
            .cache_enabled
            .then_some(settings.response.cache_max_age),
        verify_path: settings
            .auth
            .enabled
            .then(|| settings.auth.verify_path.clone()),
    };

    let result = serve_http(&settings, state).await;
    drain_workers(pool, &settings).await;
    result
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        addr = %settings.server.addr,
        workers = settings.conversion.workers.get(),
        auth_enabled = settings.auth.enabled,
        cache_enabled = settings.response.cache_enabled,
        debug = settings.server.debug,
        "Conversion gateway listening"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

/// Wait for queued conversions to finish, bounded by the graceful shutdown timeout.
async fn drain_workers(pool: WorkerPool, settings: &config::Settings) {
    let timeout = settings.server.graceful_shutdown;
    let (done, stopped) = tokio::sync::oneshot::channel();
    // Detached: a stuck conversion must not hold the process open.
    let spawned = std::thread::Builder::new()
        .name("convert-drain".to_string())
        .spawn(move || {
            pool.join();
            let _ = done.send(());
        });
    if let Err(err) = spawned {
        warn!(error = %err, "Could not wait for conversion workers");
        return;
    }

    match tokio::time::timeout(timeout, stopped).await {
        Ok(Ok(())) => info!("Conversion workers stopped"),
        Ok(Err(_)) => warn!("Conversion worker drain ended without reporting"),
        Err(_) => warn!(
            timeout_secs = timeout.as_secs(),
            "Conversion workers still busy at shutdown; exiting anyway"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received; draining connections");
}
