use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsrError {
    #[error("invalid unit '{unit}' (expected one of word, wp, char, phone, word_char)")]
    InvalidUnit { unit: String },
    #[error("missing resource ({context}): {path}")]
    MissingResource { context: &'static str, path: String },
    #[error("configuration mismatch: {message}")]
    ConfigMismatch { message: String },
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
    #[error("alignment failed: {message}")]
    Alignment { message: String },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error while {context}: {source}")]
    Csv {
        context: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("YAML parse error while {context}: {source}")]
    Yaml {
        context: &'static str,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl AsrError {
    pub fn invalid_unit(unit: impl Into<String>) -> Self {
        Self::InvalidUnit { unit: unit.into() }
    }

    pub fn missing(context: &'static str, path: impl AsRef<std::path::Path>) -> Self {
        Self::MissingResource {
            context,
            path: path.as_ref().display().to_string(),
        }
    }

    pub fn config_mismatch(message: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn alignment(message: impl Into<String>) -> Self {
        Self::Alignment {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn csv(context: &'static str, source: csv::Error) -> Self {
        Self::Csv { context, source }
    }

    pub(crate) fn yaml(context: &'static str, source: serde_yaml::Error) -> Self {
        Self::Yaml { context, source }
    }

    pub fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Misconfiguration errors abort the whole run; alignment errors only
    /// affect the utterance being scored.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Alignment { .. })
    }
}

/// Reads a file that must exist at construction time.
pub(crate) fn read_required(
    context: &'static str,
    path: &std::path::Path,
) -> Result<String, AsrError> {
    if !path.is_file() {
        return Err(AsrError::missing(context, path));
    }
    std::fs::read_to_string(path).map_err(|e| AsrError::io(context, e))
}
