use std::error;
use std::fmt;

#[derive(Debug)]
pub enum DecodeError {
    Empty,
    Json(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "Empty body"),
            DecodeError::Json(err) => write!(f, "Invalid body: {}", err),
        }
    }
}

impl error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            DecodeError::Empty => None,
            DecodeError::Json(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingNodeId,
    MissingSequence,
    OutOfRange(&'static str, i64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValidationError::MissingNodeId => write!(f, "Missing node id"),
            ValidationError::MissingSequence => write!(f, "Missing sequence"),
            ValidationError::OutOfRange(field, value) => {
                write!(f, "Field {} out of range: {}", field, value)
            }
        }
    }
}

impl error::Error for ValidationError {}
