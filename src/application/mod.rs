//! Request orchestration and the collaborator contracts it composes.

pub mod auth;
pub mod conversion;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod rate_limit;
