use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("missing required argument `{name}`")]
    MissingArgument { name: &'static str },
    #[error("invalid value for argument `{name}`: {message}")]
    InvalidArgument { name: &'static str, message: String },
}

impl DomainError {
    pub fn missing(name: &'static str) -> Self {
        Self::MissingArgument { name }
    }

    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            message: message.into(),
        }
    }

    /// Name of the query argument that failed validation.
    pub fn argument(&self) -> &'static str {
        match self {
            DomainError::MissingArgument { name } | DomainError::InvalidArgument { name, .. } => {
                name
            }
        }
    }
}
