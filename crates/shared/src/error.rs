use thiserror::Error;

/// Why an inbound delivery could not be turned into a usable message. The
/// router maps every variant to "log and drop"; none of these abort the
/// process.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("delivery contains no records")]
    EmptyFrame,
    #[error("final record is shorter than its fixed prefix")]
    TruncatedRecord,
    #[error("invalid envelope JSON: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("invalid body JSON: {0}")]
    Body(#[source] serde_json::Error),
    #[error("action is missing the `{0}` parameter")]
    MissingParam(&'static str),
}
