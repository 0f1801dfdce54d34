use std::path::PathBuf;

pub type WhiskersResult<T> = std::result::Result<T, WhiskersError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Expected '{expected}', found '{found}'")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected EOF{expected_what}")]
    UnexpectedEOF {
        /// Describes what was expected, e.g., "(expected '}}')"
        expected_what: String,
    },
    #[error("Invalid identifier starting with '{at_char}'")]
    InvalidIdentifier { at_char: String },
    #[error("{open} doesn't match {close}")]
    MismatchedBlock { open: String, close: String },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("Parser error: {0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

/// What a duplicate registration collided with.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegistrationKind {
    Helper,
    Partial,
}

impl std::fmt::Display for RegistrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Helper => f.write_str("Helper"),
            Self::Partial => f.write_str("Partial"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WhiskersError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Invalid variable reference {reference} (not in {known:?})")]
    InvalidReference {
        reference: String,
        known: Vec<String>,
    },
    /// A name collision on registration. Registration functions panic with
    /// this message; only the `try_` variants return it.
    #[error("{kind} {name} already registered")]
    AlreadyRegistered {
        kind: RegistrationKind,
        name: String,
    },
    #[error("Partial not found: {name}")]
    MissingPartial { name: String },
    #[error("Helper not found: {name}")]
    MissingHelper { name: String },
    #[error("Rendering error: {message}")]
    Render { message: String },
    #[error("Helper {name} failed: {message}")]
    Helper { name: String, message: String },
    #[error("Could not read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WhiskersError {
    pub fn render<T: Into<String>>(message: T) -> Self {
        Self::Render {
            message: message.into(),
        }
    }

    /// Convenience for helper implementations reporting their own failure.
    pub fn helper<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self::Helper {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_error_display_includes_position() {
        let err = ParseError {
            line: 2,
            column: 7,
            kind: ParseErrorKind::unexpected_eof(Some("}}".to_string())),
        };
        assert_eq!(
            err.to_string(),
            "Parse error at line 2, column 7: Unexpected EOF (expected '}}')"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_already_registered_message() {
        let err = WhiskersError::AlreadyRegistered {
            kind: RegistrationKind::Partial,
            name: "header".to_string(),
        };
        assert_eq!(err.to_string(), "Partial header already registered");
    }
}
