//! Codecs for the opaque pass-through payload chain strategies persist
//! between links.

use std::marker::PhantomData;

use ordo_types::execution::PassThroughData;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum PassThroughError {
    #[error("failed to encode pass-through data: {0}")]
    Encode(String),

    #[error("failed to decode pass-through data: {0}")]
    Decode(String),
}

/// Converts a strategy-scoped value to and from `PassThroughData`.
pub trait PassThroughCodec<T> {
    fn encode(&self, value: &T) -> Result<PassThroughData, PassThroughError>;

    fn decode(&self, data: &PassThroughData) -> Result<T, PassThroughError>;
}

/// JSON codec for any serde type.
///
/// Decoding empty data yields `T::default()`, so a chain that never stored
/// anything reads back its initial state.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PassThroughCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn encode(&self, value: &T) -> Result<PassThroughData, PassThroughError> {
        serde_json::to_vec(value)
            .map(PassThroughData::new)
            .map_err(|e| PassThroughError::Encode(e.to_string()))
    }

    fn decode(&self, data: &PassThroughData) -> Result<T, PassThroughError> {
        if data.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_slice(data.as_bytes()).map_err(|e| PassThroughError::Decode(e.to_string()))
    }
}
