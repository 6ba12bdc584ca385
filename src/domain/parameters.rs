//! Validated rendering options for a single conversion request.
//!
//! [`RequestParameters`] can only be obtained through [`RequestParameters::from_query`],
//! which checks every argument before returning. A request either yields a
//! complete snapshot or a [`DomainError`] naming the first offending argument.

use std::{
    collections::HashMap,
    num::{NonZeroU16, NonZeroU32},
    path::Path,
};

use super::error::DomainError;

pub const DEFAULT_FONT_FACE: &str = "SimHei";
pub const DEFAULT_FONT_SIZE: f64 = 25.0;
pub const DEFAULT_TEXT_OPACITY: f64 = 1.0;
pub const DEFAULT_COMMENT_DURATION: f64 = 5.0;
pub const DEFAULT_OUTPUT_FILENAME: &str = "comments.ass";

const LOCAL_FILE_PREFIX: &str = "file:///";

/// Where the comment stream for a request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource<'a> {
    /// Read directly by the transformation step; no network fetch happens.
    LocalFile(&'a Path),
    /// Must be retrieved through the resource fetcher.
    Remote(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestParameters {
    url: String,
    width: NonZeroU32,
    height: NonZeroU16,
    reserve_blank: u32,
    font_face: String,
    font_size: f64,
    text_opacity: f64,
    comment_duration: f64,
    reduce_comments: bool,
    output_filename: String,
}

impl RequestParameters {
    /// Parse and validate the raw (still percent-encoded) query string.
    ///
    /// Repeated arguments resolve to their last occurrence and values are
    /// trimmed of surrounding whitespace.
    pub fn from_query(query: &str) -> Result<Self, DomainError> {
        let args: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.trim().to_string()))
            .collect();
        Self::from_args(&args)
    }

    fn from_args(args: &HashMap<String, String>) -> Result<Self, DomainError> {
        let url = required(args, "url")?;
        if url.is_empty() {
            return Err(DomainError::invalid("url", "must not be empty"));
        }

        let width = parse_int(required(args, "w")?, "w")?;
        let width = u32::try_from(width)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| DomainError::invalid("w", "must be a positive integer"))?;

        let height = parse_int(required(args, "h")?, "h")?;
        let height = u16::try_from(height)
            .ok()
            .and_then(NonZeroU16::new)
            .ok_or_else(|| DomainError::invalid("h", "must be between 1 and 65535"))?;

        let reserve_blank = match optional(args, "p") {
            Some(raw) => u32::try_from(parse_int(raw, "p")?)
                .map_err(|_| DomainError::invalid("p", "must be a non-negative integer"))?,
            None => 0,
        };

        let font_face = optional(args, "fn").unwrap_or(DEFAULT_FONT_FACE).to_string();

        let font_size = match optional(args, "fs") {
            Some(raw) => {
                let value = parse_float(raw, "fs")?;
                if value <= 0.0 {
                    return Err(DomainError::invalid("fs", "must be greater than zero"));
                }
                value
            }
            None => DEFAULT_FONT_SIZE,
        };

        let text_opacity = match optional(args, "a") {
            Some(raw) => {
                let value = parse_float(raw, "a")?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(DomainError::invalid("a", "must be between 0 and 1"));
                }
                value
            }
            None => DEFAULT_TEXT_OPACITY,
        };

        let comment_duration = match optional(args, "l") {
            Some(raw) => parse_float(raw, "l")?,
            None => DEFAULT_COMMENT_DURATION,
        };

        let reduce_comments = args.contains_key("r");

        let output_filename = match optional(args, "o") {
            Some(raw) => validate_filename(raw)?,
            None => DEFAULT_OUTPUT_FILENAME.to_string(),
        };

        Ok(Self {
            url: url.to_string(),
            width,
            height,
            reserve_blank,
            font_face,
            font_size,
            text_opacity,
            comment_duration,
            reduce_comments,
            output_filename,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> InputSource<'_> {
        if self.url.starts_with(LOCAL_FILE_PREFIX) {
            // Keep the leading slash: `file:///tmp/in.xml` -> `/tmp/in.xml`.
            InputSource::LocalFile(Path::new(&self.url[LOCAL_FILE_PREFIX.len() - 1..]))
        } else {
            InputSource::Remote(&self.url)
        }
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u16 {
        self.height.get()
    }

    pub fn reserve_blank(&self) -> u32 {
        self.reserve_blank
    }

    pub fn font_face(&self) -> &str {
        &self.font_face
    }

    pub fn font_size(&self) -> f64 {
        self.font_size
    }

    pub fn text_opacity(&self) -> f64 {
        self.text_opacity
    }

    pub fn comment_duration(&self) -> f64 {
        self.comment_duration
    }

    pub fn reduce_comments(&self) -> bool {
        self.reduce_comments
    }

    pub fn output_filename(&self) -> &str {
        &self.output_filename
    }
}

fn required<'a>(
    args: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, DomainError> {
    args.get(name)
        .map(String::as_str)
        .ok_or_else(|| DomainError::missing(name))
}

fn optional<'a>(args: &'a HashMap<String, String>, name: &'static str) -> Option<&'a str> {
    args.get(name).map(String::as_str)
}

fn parse_int(raw: &str, name: &'static str) -> Result<i64, DomainError> {
    raw.parse::<i64>()
        .map_err(|err| DomainError::invalid(name, format!("`{raw}` is not an integer: {err}")))
}

fn parse_float(raw: &str, name: &'static str) -> Result<f64, DomainError> {
    let value = raw
        .parse::<f64>()
        .map_err(|err| DomainError::invalid(name, format!("`{raw}` is not a number: {err}")))?;
    if !value.is_finite() {
        return Err(DomainError::invalid(name, "must be a finite number"));
    }
    Ok(value)
}

// The filename ends up inside a quoted `Content-Disposition` parameter.
fn validate_filename(raw: &str) -> Result<String, DomainError> {
    if raw.is_empty() {
        return Err(DomainError::invalid("o", "must not be empty"));
    }
    if raw
        .chars()
        .any(|ch| ch.is_control() || ch == '"' || ch == '\\')
    {
        return Err(DomainError::invalid(
            "o",
            "must not contain quotes, backslashes or control characters",
        ));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_query_applies_defaults() {
        let params = RequestParameters::from_query("url=file:///tmp/in.xml&w=1&h=1")
            .expect("valid parameters");

        assert_eq!(params.width(), 1);
        assert_eq!(params.height(), 1);
        assert_eq!(params.reserve_blank(), 0);
        assert_eq!(params.font_face(), DEFAULT_FONT_FACE);
        assert_eq!(params.font_size(), DEFAULT_FONT_SIZE);
        assert_eq!(params.text_opacity(), DEFAULT_TEXT_OPACITY);
        assert_eq!(params.comment_duration(), DEFAULT_COMMENT_DURATION);
        assert!(!params.reduce_comments());
        assert_eq!(params.output_filename(), DEFAULT_OUTPUT_FILENAME);
    }

    #[test]
    fn full_query_is_decoded() {
        let params = RequestParameters::from_query(
            "url=http%3A%2F%2Fcomment.bilibili.tv%2F123.xml&w=1920&h=1080&p=40\
             &fn=Noto%20Sans&fs=36.5&a=0.8&l=6&r&o=video.ass",
        )
        .expect("valid parameters");

        assert_eq!(params.url(), "http://comment.bilibili.tv/123.xml");
        assert_eq!(params.width(), 1920);
        assert_eq!(params.height(), 1080);
        assert_eq!(params.reserve_blank(), 40);
        assert_eq!(params.font_face(), "Noto Sans");
        assert_eq!(params.font_size(), 36.5);
        assert_eq!(params.text_opacity(), 0.8);
        assert_eq!(params.comment_duration(), 6.0);
        assert!(params.reduce_comments());
        assert_eq!(params.output_filename(), "video.ass");
    }

    #[test]
    fn last_occurrence_wins_and_values_are_trimmed() {
        let params = RequestParameters::from_query("url=file:///a&w=5&w=%2010%20&h=2")
            .expect("valid parameters");
        assert_eq!(params.width(), 10);
    }

    #[test]
    fn missing_required_arguments_are_reported() {
        let err = RequestParameters::from_query("w=1&h=1").expect_err("url is required");
        assert_eq!(err, DomainError::missing("url"));

        let err = RequestParameters::from_query("url=file:///a&h=1").expect_err("w is required");
        assert_eq!(err.argument(), "w");

        let err = RequestParameters::from_query("url=file:///a&w=1").expect_err("h is required");
        assert_eq!(err.argument(), "h");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            ("url=file:///a&w=0&h=1", "w"),
            ("url=file:///a&w=-4&h=1", "w"),
            ("url=file:///a&w=1&h=0", "h"),
            ("url=file:///a&w=1&h=65536", "h"),
            ("url=file:///a&w=1&h=1&p=-1", "p"),
            ("url=file:///a&w=1&h=1&fs=0", "fs"),
            ("url=file:///a&w=1&h=1&a=1.5", "a"),
            ("url=file:///a&w=1&h=1&a=-0.1", "a"),
            ("url=file:///a&w=1&h=1&l=nan", "l"),
            ("url=file:///a&w=abc&h=1", "w"),
            ("url=file:///a&w=1&h=1&o=%22evil%22", "o"),
            ("url=&w=1&h=1", "url"),
        ];

        for (query, argument) in cases {
            let err = RequestParameters::from_query(query)
                .expect_err(&format!("`{query}` should be rejected"));
            assert_eq!(err.argument(), argument, "query `{query}`");
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let params = RequestParameters::from_query("url=file:///a&w=1&h=65535&a=0&p=0")
            .expect("valid parameters");
        assert_eq!(params.height(), 65535);
        assert_eq!(params.text_opacity(), 0.0);
    }

    #[test]
    fn local_file_urls_keep_absolute_path() {
        let params = RequestParameters::from_query("url=file:///tmp/in.xml&w=1&h=1")
            .expect("valid parameters");
        assert_eq!(
            params.source(),
            InputSource::LocalFile(Path::new("/tmp/in.xml"))
        );

        let params = RequestParameters::from_query("url=http://www.bilidown.tv/c.xml&w=1&h=1")
            .expect("valid parameters");
        assert_eq!(
            params.source(),
            InputSource::Remote("http://www.bilidown.tv/c.xml")
        );
    }
}
