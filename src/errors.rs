//! Typed error hierarchy for the visualizer engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `VisualizeError`: resolution, dispatch and config store failures
//! - `ManifestError`: bundle upload and manifest parsing failures
//! - `ProcessingError`: derived-file generation failures

use thiserror::Error;

/// Errors from visualizer resolution and dispatch.
#[derive(Debug, Error)]
pub enum VisualizeError {
    #[error("Visualizer '{shortname}' not found or inactive")]
    VisualizerNotFound { shortname: String },

    #[error("No visualizer available for {resource}")]
    NoVisualizer { resource: String },

    #[error("Unknown visualizer implementation '{key}'")]
    UnknownImplementation { key: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while reading an uploaded visualizer bundle.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest.json not found in bundle")]
    MissingManifest,

    #[error("Invalid manifest.json: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Invalid manifest field '{key}': {message}")]
    InvalidField { key: String, message: String },

    #[error("Failed to read bundle archive: {0}")]
    Archive(String),

    #[error("Bundle I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a processing run.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Conversion failed after {attempts} attempt(s): {message}")]
    ConversionFailed { attempts: u32, message: String },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Source resource {resource_id} is not available")]
    SourceUnavailable { resource_id: String },

    #[error("Processing I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type VisualizeResult<T> = std::result::Result<T, VisualizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visualizer_not_found_carries_shortname() {
        let err = VisualizeError::VisualizerNotFound {
            shortname: "pdf".to_string(),
        };
        match &err {
            VisualizeError::VisualizerNotFound { shortname } => assert_eq!(shortname, "pdf"),
            _ => panic!("Expected VisualizerNotFound"),
        }
        assert!(err.to_string().contains("pdf"));
    }

    #[test]
    fn manifest_error_wraps_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ManifestError::Malformed(json_err);
        assert!(matches!(err, ManifestError::Malformed(_)));
        assert!(err.to_string().starts_with("Invalid manifest.json"));
    }

    #[test]
    fn processing_error_conversion_failed_reports_attempts() {
        let err = ProcessingError::ConversionFailed {
            attempts: 3,
            message: "exit status 1".into(),
        };
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn io_error_converts_into_processing_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ProcessingError = io_err.into();
        match err {
            ProcessingError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&VisualizeError::LockPoisoned);
        assert_std_error(&ManifestError::MissingManifest);
        assert_std_error(&ProcessingError::SourceUnavailable {
            resource_id: "x".into(),
        });
    }
}
