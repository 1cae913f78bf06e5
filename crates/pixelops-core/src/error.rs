use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Rejected synchronously before entering the pipeline.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A scheduled recompute step failed for one pixel.
    #[error("aggregation failed for pixel {pixel_id}: {source}")]
    Aggregation {
        pixel_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// One diagnostic check could not load its inputs.
    #[error("diagnostic check {check} failed for pixel {pixel_id}: {source}")]
    DiagnosticCheck {
        check: &'static str,
        pixel_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
