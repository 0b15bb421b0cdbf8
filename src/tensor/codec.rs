//! MessagePack wire codec
//!
//! Requests and responses are msgpack maps keyed by field name. A tensor is a
//! nested map `{shape, dtype, buffer}`; any other leaf is a plain scalar or
//! string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DType, Tensor};
use crate::error::{WorldBridgeError, Result};

/// Tensor as it arrives on the wire, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct TensorEnvelope {
    pub shape: Vec<i64>,
    pub dtype: String,
    #[serde(with = "serde_bytes")]
    pub buffer: Vec<u8>,
}

impl TensorEnvelope {
    /// Validate shape, dtype and buffer length
    pub fn into_tensor(self) -> Result<Tensor> {
        let dtype = DType::from_name(&self.dtype).ok_or_else(|| {
            WorldBridgeError::malformed_tensor(format!("Unknown dtype '{}'", self.dtype))
        })?;
        let shape = self
            .shape
            .iter()
            .map(|&dim| {
                usize::try_from(dim).map_err(|_| {
                    WorldBridgeError::malformed_tensor(format!("Negative dimension {} in shape", dim))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Tensor::new(shape, dtype, self.buffer)
    }
}

impl From<&Tensor> for TensorEnvelope {
    fn from(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().iter().map(|&dim| dim as i64).collect(),
            dtype: tensor.dtype().name().to_string(),
            buffer: tensor.as_bytes().to_vec(),
        }
    }
}

/// Encode any value as a named msgpack map
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value)
        .map_err(|e| WorldBridgeError::io(format!("Failed to encode msgpack payload: {}", e)))
}

pub fn encode_tensor(tensor: &Tensor) -> Result<Vec<u8>> {
    encode(tensor)
}

/// Decode a standalone tensor envelope; never returns a partial tensor
pub fn decode_tensor(bytes: &[u8]) -> Result<Tensor> {
    let envelope: TensorEnvelope = rmp_serde::from_slice(bytes)
        .map_err(|e| WorldBridgeError::malformed_tensor(format!("Invalid tensor envelope: {}", e)))?;
    envelope.into_tensor()
}

/// Recursion budget of the untyped pass; a tensor list nests four containers deep
pub const MAX_NESTING_DEPTH: usize = 32;

/// Decode a request map into a parameter struct
///
/// Every name in `required` must be a key of the map. Unknown keys are ignored.
pub fn decode_params<P: DeserializeOwned>(payload: &[u8], required: &[&str]) -> Result<P> {
    let value = rmpv::decode::read_value_with_max_depth(&mut &payload[..], MAX_NESTING_DEPTH)
        .map_err(|e| WorldBridgeError::malformed_request(format!("Payload is not msgpack: {}", e)))?;

    let entries = match value {
        rmpv::Value::Map(entries) => entries,
        other => {
            return Err(WorldBridgeError::malformed_request(format!(
                "Expected a map of parameters, got {}",
                value_kind(&other)
            )));
        }
    };

    for name in required {
        if !entries.iter().any(|(key, _)| key.as_str() == Some(name)) {
            return Err(WorldBridgeError::missing_parameter(*name));
        }
    }

    rmp_serde::from_slice(payload)
        .map_err(|e| WorldBridgeError::invalid_parameter(format!("Parameter type mismatch: {}", e)))
}

fn value_kind(value: &rmpv::Value) -> &'static str {
    match value {
        rmpv::Value::Nil => "nil",
        rmpv::Value::Boolean(_) => "boolean",
        rmpv::Value::Integer(_) => "integer",
        rmpv::Value::F32(_) | rmpv::Value::F64(_) => "float",
        rmpv::Value::String(_) => "string",
        rmpv::Value::Binary(_) => "binary",
        rmpv::Value::Array(_) => "array",
        rmpv::Value::Map(_) => "map",
        rmpv::Value::Ext(..) => "extension",
    }
}
