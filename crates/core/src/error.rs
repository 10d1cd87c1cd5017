#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity denied: {0}")]
    CapacityDenied(String),

    #[error("transient cloud error after retries: {0}")]
    Transient(String),

    #[error("license-violating operation refused: {0}")]
    LicenseViolation(String),

    #[error("cloud provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, Error>;
