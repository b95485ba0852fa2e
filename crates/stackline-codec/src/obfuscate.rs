use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Serialize, de::DeserializeOwned};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("stored value is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("stored value is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("stored blob is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mask a text value for storage.
pub fn obfuscate(plain: &str) -> String {
    BASE64.encode(plain.as_bytes())
}

/// Reverse `obfuscate`.
pub fn reveal(stored: &str) -> Result<String, CodecError> {
    let bytes = BASE64.decode(stored.trim())?;
    Ok(String::from_utf8(bytes)?)
}

/// Serialize a value to JSON and mask the result.
pub fn obfuscate_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_string(value)?;
    Ok(obfuscate(&json))
}

/// Reverse `obfuscate_json`.
pub fn reveal_json<T: DeserializeOwned>(stored: &str) -> Result<T, CodecError> {
    let json = reveal(stored)?;
    Ok(serde_json::from_str(&json)?)
}
