//! HTTP gateway converting danmaku comment streams into ASS subtitles.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
