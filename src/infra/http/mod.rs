mod convert;
mod middleware;

use std::{sync::Arc, time::Duration};

use axum::{
    Router, middleware as axum_middleware,
    response::{IntoResponse, Redirect},
    routing::get,
};

use crate::{
    application::orchestrator::RequestOrchestrator,
    presentation::views::{CONVERT_PATH, PageContext},
};

/// Path served by earlier deployments; kept as an alias of [`CONVERT_PATH`].
pub const LEGACY_CONVERT_PATH: &str = "/danmaku2ass";

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub pages: PageContext,
    /// `Some` adds `Cache-Control`/`Expires` to converted artifacts.
    pub cache_max_age: Option<Duration>,
    /// Local cookie verification route, mounted only when verification is enabled.
    pub verify_path: Option<String>,
}

pub fn build_router(state: HttpState) -> Router {
    let mut router = Router::new()
        .route(CONVERT_PATH, get(convert::convert))
        .route(LEGACY_CONVERT_PATH, get(convert::convert));

    if let Some(path) = state.verify_path.as_deref() {
        router = router.route(path, get(cookie_verify));
    }

    router
        .fallback(redirect_to_convert)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn cookie_verify() -> &'static str {
    "OK"
}

async fn redirect_to_convert() -> impl IntoResponse {
    Redirect::permanent(CONVERT_PATH)
}
