//! Error types for the render pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning a request into image bytes
#[derive(Error, Debug)]
pub enum Error {
    /// A query parameter failed validation; carries the parameter name
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The metadata endpoint answered with a non-success status
    #[error("remote is {0}")]
    ContentNotFound(u16),

    /// The metadata endpoint could not be reached or misbehaved
    #[error("upstream lookup failed: {0}")]
    Upstream(String),

    /// The content root element never appeared in the embed document
    #[error("content root `{0}` did not appear")]
    ContentUnavailable(String),

    /// Failed to launch the browser or open a page
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Failed to measure or capture content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error outside the metadata lookup (fonts, interception)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status the caller sees for this error.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidParameter(_) => 400,
            Error::ContentNotFound(status) => *status,
            _ => 500,
        }
    }

    /// Short diagnostic body. Never includes internal detail for 5xx.
    pub fn body(&self) -> String {
        match self {
            Error::InvalidParameter(field) => format!("400 {field}"),
            Error::ContentNotFound(status) => format!("remote is {status}"),
            _ => "500".to_string(),
        }
    }

    /// Whether the failure happened inside a browser session.
    pub fn is_render_failure(&self) -> bool {
        !matches!(
            self,
            Error::InvalidParameter(_)
                | Error::ContentNotFound(_)
                | Error::Upstream(_)
                | Error::ConfigError(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::NetworkError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::InvalidParameter("scale").status(), 400);
        assert_eq!(Error::InvalidParameter("scale").body(), "400 scale");
        assert_eq!(Error::ContentNotFound(404).status(), 404);
        assert_eq!(Error::ContentNotFound(404).body(), "remote is 404");
        assert_eq!(Error::ContentUnavailable("article".into()).status(), 500);
        assert_eq!(Error::RenderError("boom".into()).body(), "500");
    }

    #[test]
    fn render_failure_classification() {
        assert!(Error::ContentUnavailable("article".into()).is_render_failure());
        assert!(Error::LoadError("navigation".into()).is_render_failure());
        assert!(!Error::ContentNotFound(404).is_render_failure());
        assert!(!Error::InvalidParameter("lang").is_render_failure());
    }
}
