use serde::de::DeserializeOwned;
use serde::Serialize;

pub use crate::file_format::{FileExtensionError, FileFormat};
pub use crate::shared::Shared;

#[macro_use]
pub mod macros;
pub mod file_format;
pub mod key_index_vec;
pub mod log_setup;
pub mod shared;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("YAML serialization failed")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON serialization failed")]
    Json(#[from] serde_json::Error),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

pub fn is_debug() -> bool {
    cfg!(debug_assertions)
}

pub fn serialize<T: Serialize>(value: &T, format: FileFormat) -> SerdeFormatResult<String> {
    let serialized = match format {
        FileFormat::Yaml => serde_yml::to_string(value)?,
        FileFormat::Json => serde_json::to_string_pretty(value)?,
    };

    Ok(serialized)
}

pub fn deserialize<T: DeserializeOwned + 'static>(
    serialized: &str,
    format: FileFormat,
) -> SerdeFormatResult<T> {
    match format {
        FileFormat::Yaml => Ok(serde_yml::from_str(serialized)?),
        FileFormat::Json => Ok(serde_json::from_str(serialized)?),
    }
}
