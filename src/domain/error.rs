use thiserror::Error;

pub const INVALID_IDENTIFIER_MESSAGE: &str =
    "This page id contains non-alphanumeric characters. Please remove them and try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("document id `{id}` contains non-alphanumeric characters")]
    InvalidIdentifier { id: String },
}

impl DomainError {
    pub fn invalid_identifier(id: impl Into<String>) -> Self {
        Self::InvalidIdentifier { id: id.into() }
    }

    /// Message safe to show to the requester.
    pub fn public_message(&self) -> &'static str {
        match self {
            DomainError::InvalidIdentifier { .. } => INVALID_IDENTIFIER_MESSAGE,
        }
    }
}
