use thiserror::Error;

/// Errors produced while framing, decrypting, or validating wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame type {0} is not one of identity/iv/data")]
    UnknownFrameType(u8),
    #[error("no AES key available for this unit")]
    MissingAesKey,
    #[error("AES decrypt failed")]
    Decrypt,
    #[error("plaintext was not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("plaintext was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("value {value} for {field} is outside allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("scene {0} is not compatible with this device")]
    IncompatibleScene(u32),
}
