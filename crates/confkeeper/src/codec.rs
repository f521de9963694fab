//! Marshalling seam between the in-memory model and the bytes on disk.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Converts a model to bytes for persisting, and boot file bytes into the
/// operations that rebuild the model.
pub trait ConfigCodec {
    type Model;
    type Operation;
    type Error: std::error::Error + Send + Sync + 'static;

    fn marshal(&self, model: &Self::Model) -> Result<Vec<u8>, Self::Error>;

    fn parse(&self, data: &[u8]) -> Result<Vec<Self::Operation>, Self::Error>;
}

#[derive(Debug, Error)]
pub enum YamlCodecError {
    #[error("failed to serialize yaml: {0}")]
    Serialize(String),

    #[error("failed to parse yaml: {0}")]
    Parse(String),

    #[error("configuration is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Stores a model as a YAML sequence of operations.
pub struct YamlCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> YamlCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for YamlCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConfigCodec for YamlCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    type Model = Vec<T>;
    type Operation = T;
    type Error = YamlCodecError;

    fn marshal(&self, model: &Vec<T>) -> Result<Vec<u8>, YamlCodecError> {
        serde_saphyr::to_string(model)
            .map(String::into_bytes)
            .map_err(|e| YamlCodecError::Serialize(e.to_string()))
    }

    fn parse(&self, data: &[u8]) -> Result<Vec<T>, YamlCodecError> {
        let text = std::str::from_utf8(data)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_saphyr::from_str(text).map_err(|e| YamlCodecError::Parse(e.to_string()))
    }
}
