use thiserror::Error;

use crate::oracle::ExtractionError;

/// Failures surfaced by the upload and optimizer flows.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Failed to parse exam content")]
    ExtractionParse(#[source] serde_json::Error),

    #[error("Model request failed")]
    Oracle(#[source] anyhow::Error),

    #[error("{message}")]
    Persistence {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl FlowError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Wrap a store failure under a fixed user-facing message.
    pub fn persistence(message: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Persistence { message, source }
    }
}

impl From<ExtractionError> for FlowError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Request(source) => Self::Oracle(source),
            ExtractionError::Parse(source) => Self::ExtractionParse(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn persistence_keeps_message_and_source() {
        let err = FlowError::persistence("Failed to save questions")(anyhow!("409 from store"));
        assert_eq!(err.to_string(), "Failed to save questions");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("409 from store"));
    }

    #[test]
    fn extraction_errors_map_by_kind() {
        let parse = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        assert!(matches!(
            FlowError::from(ExtractionError::Parse(parse)),
            FlowError::ExtractionParse(_)
        ));
        assert!(matches!(
            FlowError::from(ExtractionError::Request(anyhow!("timeout"))),
            FlowError::Oracle(_)
        ));
    }
}
