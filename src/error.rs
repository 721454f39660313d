use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    /// Image bytes could not be read from their source.
    #[error("failed to read image: {0}")]
    ImageRead(String),

    /// A demo profile's remote image could not be fetched. Recoverable: the
    /// flow stays at the details step.
    #[error("failed to load demo profile: {0}")]
    DemoFetch(String),

    /// Provider-side failure. Absorbed into the fallback result inside the
    /// verifier; surfaces only from defensive paths.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, VerifyError>;
