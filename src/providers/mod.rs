use std::fmt;

pub mod direct;
pub mod harbor;

/// Normalized "this image was pushed" fact, independent of which upstream
/// provider reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Repository name as the registry reports it, e.g. "library/debian".
    pub repository_full_name: String,
    /// Fully qualified image reference to write into the deployment,
    /// e.g. "cr.example.com/library/debian:v2".
    pub image_reference: String,
}

#[derive(Debug)]
pub enum ParseError {
    Json(serde_json::Error),
    MissingField(&'static str),
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Json(err) => Some(err),
            ParseError::MissingField(_) => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Json(err) => write!(f, "invalid JSON payload: {}", err),
            ParseError::MissingField(field) => write!(f, "missing required field: {}", field),
        }
    }
}

/// One implementation per upstream webhook shape. Parsing a payload may
/// legitimately produce zero events (e.g. a registry event type this service
/// ignores); a malformed payload is always an error, never "no events".
pub trait Provider {
    const NAME: &'static str;

    fn parse(body: &[u8]) -> Result<Vec<PushEvent>, ParseError>;
}
