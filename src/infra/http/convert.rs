use std::{net::SocketAddr, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, EXPIRES, USER_AGENT},
    },
    response::{IntoResponse, Response},
};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::warn;

use crate::{
    application::{
        auth::RequestContext,
        error::GatewayError,
        orchestrator::{ConvertRequest, ConvertedArtifact},
    },
    presentation::views::render_error_response,
};

use super::HttpState;

const UNKNOWN_CLIENT: &str = "unknown";
const BYTE_ORDER_MARK: char = '\u{feff}';
const IMF_FIXDATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

pub(super) async fn convert(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let (parts, _body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let context = request_context(&parts.headers, peer);
    let convert_request = ConvertRequest {
        context,
        query: parts.uri.query().map(str::to_string),
    };

    match state.orchestrator.handle(convert_request).await {
        Ok(artifact) => artifact_response(artifact, &state),
        Err(error) => render_error_response(&error, &state.pages),
    }
}

fn request_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestContext {
    RequestContext {
        client_address: client_address(headers, peer),
        cookies: headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect(),
        user_agent: header_text(headers, USER_AGENT.as_str()),
    }
}

/// Address of the caller as reported by the fronting proxy.
///
/// `X-Real-Ip` wins, then the last `X-Forwarded-For` hop, then the TCP peer.
pub(crate) fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(real_ip) = header_text(headers, "x-real-ip") {
        return real_ip;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit(',').map(str::trim).find(|hop| !hop.is_empty()));
    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn artifact_response(artifact: ConvertedArtifact, state: &HttpState) -> Response {
    let ConvertedArtifact { filename, body } = artifact;

    let disposition = format!("attachment; filename=\"{filename}\"");
    let disposition = match HeaderValue::from_bytes(disposition.as_bytes()) {
        Ok(value) => value,
        Err(err) => {
            let error = GatewayError::internal(format!(
                "output filename `{filename}` cannot be sent as a header: {err}"
            ));
            return render_error_response(&error, &state.pages);
        }
    };

    let mut payload = String::with_capacity(body.len() + BYTE_ORDER_MARK.len_utf8());
    payload.push(BYTE_ORDER_MARK);
    payload.push_str(&body);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_DISPOSITION, disposition);

    if let Some(max_age) = state.cache_max_age {
        builder = builder.header(CACHE_CONTROL, format!("public, max-age={}", max_age.as_secs()));
        match expires_at(OffsetDateTime::now_utc(), max_age) {
            Some(expires) => builder = builder.header(EXPIRES, expires),
            None => warn!(
                target = "danmaku_gateway::http",
                max_age_secs = max_age.as_secs(),
                "Could not format Expires header"
            ),
        }
    }

    builder
        .body(Body::from(payload))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn expires_at(now: OffsetDateTime, max_age: Duration) -> Option<String> {
    now.checked_add(time::Duration::try_from(max_age).ok()?)?
        .format(IMF_FIXDATE)
        .ok()
}
