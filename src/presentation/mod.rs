//! HTML pages rendered for failed conversion requests.

pub mod views;
