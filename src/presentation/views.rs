use std::sync::Arc;

use askama::{Error as AskamaError, Template};
use axum::{
    http::{HeaderValue, StatusCode, header::LOCATION},
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::error::{ErrorPage, ErrorReport, GatewayError},
    domain::parameters::{
        DEFAULT_COMMENT_DURATION, DEFAULT_FONT_FACE, DEFAULT_FONT_SIZE, DEFAULT_OUTPUT_FILENAME,
        DEFAULT_TEXT_OPACITY,
    },
};

pub const CONVERT_PATH: &str = "/convert";

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }

    fn into_response(self) -> Response {
        let mut response =
            (StatusCode::INTERNAL_SERVER_ERROR, self.public_message).into_response();
        ErrorReport::from_error(self.source, StatusCode::INTERNAL_SERVER_ERROR, &self)
            .attach(&mut response);
        response
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, TemplateRenderError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Deployment facts shown on rendered pages.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub allowed_origins: Arc<[String]>,
    /// Show the full error chain instead of the top-level cause only.
    pub debug: bool,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub status_code: u16,
    pub reason: &'static str,
    pub message: &'static str,
    pub detail: Option<String>,
    pub causes: Vec<String>,
    pub usage_path: &'static str,
}

#[derive(Template)]
#[template(path = "usage.html")]
pub struct UsageTemplate {
    pub problem: Option<String>,
    pub endpoint: &'static str,
    pub allowed_origins: Vec<String>,
    pub default_font_face: &'static str,
    pub default_font_size: f64,
    pub default_text_opacity: f64,
    pub default_comment_duration: f64,
    pub default_output_filename: &'static str,
}

impl UsageTemplate {
    pub fn new(context: &PageContext, problem: Option<String>) -> Self {
        Self {
            problem,
            endpoint: CONVERT_PATH,
            allowed_origins: context.allowed_origins.to_vec(),
            default_font_face: DEFAULT_FONT_FACE,
            default_font_size: DEFAULT_FONT_SIZE,
            default_text_opacity: DEFAULT_TEXT_OPACITY,
            default_comment_duration: DEFAULT_COMMENT_DURATION,
            default_output_filename: DEFAULT_OUTPUT_FILENAME,
        }
    }
}

/// Render the page a failed conversion request gets back.
///
/// Status, template and public message come from [`GatewayError::mapping`];
/// a verifier redirect is passed on as a `Location` header.
pub fn render_error_response(error: &GatewayError, context: &PageContext) -> Response {
    let mapping = error.mapping();
    let report = error.report("presentation::views::render_error_response");

    let mut response = match mapping.page {
        ErrorPage::Help => render_template_response(
            UsageTemplate::new(context, Some(error.to_string())),
            mapping.status,
        ),
        ErrorPage::Error => {
            let (detail, causes) = describe(error, &report, context.debug);
            let template = ErrorTemplate {
                status_code: mapping.status.as_u16(),
                reason: mapping.status.canonical_reason().unwrap_or("Error"),
                message: mapping.public_message,
                detail,
                causes,
                usage_path: CONVERT_PATH,
            };
            render_template_response(template, mapping.status)
        }
    };

    if let Some(location) = error.location() {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(LOCATION, value);
            }
            Err(_) => {
                tracing::warn!(
                    target = "danmaku_gateway::http",
                    location,
                    "Dropping unrepresentable redirect location"
                );
            }
        }
    }

    report.attach(&mut response);
    response
}

fn describe(
    error: &GatewayError,
    report: &ErrorReport,
    debug: bool,
) -> (Option<String>, Vec<String>) {
    match error {
        // The fixed message says everything the caller needs.
        GatewayError::RateLimited { .. } => (None, Vec::new()),
        _ if debug => (
            report.messages.first().cloned(),
            report.messages.iter().skip(1).cloned().collect(),
        ),
        _ => (report.messages.first().cloned(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::{
        application::{
            conversion::{ConversionError, TransformError},
            fetch::FetchError,
        },
        domain::error::DomainError,
    };

    fn context(debug: bool) -> PageContext {
        PageContext {
            allowed_origins: Arc::from(vec!["http://comment.bilibili.tv/".to_string()]),
            debug,
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[tokio::test]
    async fn argument_errors_render_the_help_page() {
        let error = GatewayError::from(DomainError::invalid("w", "must be a positive integer"));
        let response = render_error_response(&error, &context(false));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["content-type"],
            "text/html; charset=utf-8"
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());

        let body = body_text(response).await;
        assert!(body.contains("Danmaku2ASS gateway"));
        assert!(body.contains("must be a positive integer"));
        assert!(body.contains("http://comment.bilibili.tv/"));
    }

    #[tokio::test]
    async fn fetch_errors_show_the_cause() {
        let error = GatewayError::from(FetchError::Timeout {
            url: "http://comment.bilibili.tv/1.xml".into(),
        });
        let response = render_error_response(&error, &context(false));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(body.contains("Failed to retrieve the comment stream"));
        assert!(body.contains("timeout fetching"));
    }

    #[tokio::test]
    async fn debug_mode_lists_the_error_chain() {
        let error = GatewayError::from(ConversionError::from(TransformError::new(
            "converter exited with status 2",
        )));

        let body = body_text(render_error_response(&error, &context(true))).await;
        assert!(body.contains("Caused by"));

        let body = body_text(render_error_response(&error, &context(false))).await;
        assert!(!body.contains("Caused by"));
    }

    #[tokio::test]
    async fn auth_denials_forward_location() {
        let error = GatewayError::Auth {
            status: StatusCode::FOUND,
            location: Some("https://login.example/".into()),
        };
        let response = render_error_response(&error, &context(false));

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "https://login.example/");
        let body = body_text(response).await;
        assert!(body.contains("Authentication failed"));
    }

    #[tokio::test]
    async fn rate_limit_page_shows_fixed_message_only() {
        let error = GatewayError::RateLimited {
            address: "10.9.8.7".into(),
        };
        let response = render_error_response(&error, &context(true));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_text(response).await;
        assert!(body.contains("too frequent"));
        assert!(!body.contains("10.9.8.7"));
    }
}
