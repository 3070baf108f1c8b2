//! Error types for talking to a Moneybird administration.

use std::fmt;

use thiserror::Error;

/// Status code and optional remote description of a failed API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub description: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, description: Option<String>) -> Self {
        Self { status, description }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API error {}", self.status)?;
        if let Some(description) = &self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

/// Errors returned by an [`crate::administration::Administration`].
#[derive(Debug, Error)]
pub enum AdministrationError {
    #[error("invalid resource path '{0}': the resource path must not start with a slash")]
    InvalidResourcePath(String),

    #[error("unauthorized: {0}")]
    Unauthorized(ApiError),

    #[error("not found: {0}")]
    NotFound(ApiError),

    #[error("invalid data: {0}")]
    InvalidData(ApiError),

    #[error("throttled: {0}")]
    Throttled(ApiError),

    #[error("server error: {0}")]
    ServerError(ApiError),

    #[error("unknown status: {0}")]
    UnknownStatus(ApiError),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AdministrationError {
    /// Maps a status code outside the success set to its error kind.
    pub fn from_status(status: u16, description: Option<String>) -> Self {
        let api_error = ApiError::new(status, description);
        match status {
            400 | 401 => Self::Unauthorized(api_error),
            403 | 429 => Self::Throttled(api_error),
            404 | 406 => Self::NotFound(api_error),
            422 => Self::InvalidData(api_error),
            500 => Self::ServerError(api_error),
            _ => Self::UnknownStatus(api_error),
        }
    }

    /// The HTTP status, for errors that came back from the remote API.
    pub fn status(&self) -> Option<u16> {
        self.api_error().map(|e| e.status)
    }

    pub fn description(&self) -> Option<&str> {
        self.api_error().and_then(|e| e.description.as_deref())
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Unauthorized(e)
            | Self::NotFound(e)
            | Self::InvalidData(e)
            | Self::Throttled(e)
            | Self::ServerError(e)
            | Self::UnknownStatus(e) => Some(e),
            Self::InvalidResourcePath(_) | Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}

/// Reasons an incoming webhook is rejected or could not be applied.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("webhook id does not match")]
    WrongWebhookId,

    #[error("webhook token does not match")]
    WrongToken,

    #[error("webhook is for administration {0}")]
    WrongAdministration(String),

    #[error("webhook event '{0}' is not subscribed to")]
    UnknownEvent(String),

    #[error("no resource type for entity type '{0}'")]
    UnknownEntityType(String),

    #[error("webhook without entity or entity id")]
    MissingEntity,

    #[error("refusing insecure webhook endpoint '{0}'")]
    InsecureEndpoint(String),

    #[error(transparent)]
    Administration(#[from] AdministrationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
