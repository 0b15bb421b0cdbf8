//! N-dimensional numeric arrays that cross the process boundary
//!
//! A [`Tensor`] is a shape, an element type and a contiguous row-major byte
//! buffer. The buffer is kept little-endian regardless of the host so that a
//! decoder on any architecture reads the same values.

pub mod codec;

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::error::{WorldBridgeError, Result};

pub use codec::{TensorEnvelope, decode_params, decode_tensor, encode, encode_tensor};

/// Byte order of every tensor buffer on the wire
pub const WIRE_BYTE_ORDER: &str = "little";

/// Byte order of the running process
pub fn native_byte_order() -> &'static str {
    if cfg!(target_endian = "little") { "little" } else { "big" }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl DType {
    pub const ALL: [DType; 10] = [
        DType::Int8,
        DType::UInt8,
        DType::Int16,
        DType::UInt16,
        DType::Int32,
        DType::UInt32,
        DType::Int64,
        DType::UInt64,
        DType::Float32,
        DType::Float64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::UInt8 => "uint8",
            DType::Int16 => "int16",
            DType::UInt16 => "uint16",
            DType::Int32 => "int32",
            DType::UInt32 => "uint32",
            DType::Int64 => "int64",
            DType::UInt64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dtype| dtype.name() == name)
    }

    pub fn element_size(&self) -> usize {
        match self {
            DType::Int8 | DType::UInt8 => 1,
            DType::Int16 | DType::UInt16 => 2,
            DType::Int32 | DType::UInt32 | DType::Float32 => 4,
            DType::Int64 | DType::UInt64 | DType::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust scalar types that map onto a [`DType`]
pub trait Element: Copy {
    const DTYPE: DType;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn as_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn as_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Immutable N-dimensional array
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    buffer: Vec<u8>,
}

impl Tensor {
    /// Build a tensor from raw little-endian bytes, checking the length invariant
    pub fn new(shape: Vec<usize>, dtype: DType, buffer: Vec<u8>) -> Result<Self> {
        let count = element_count(&shape).ok_or_else(|| {
            WorldBridgeError::malformed_tensor(format!("Shape {:?} overflows", shape))
        })?;
        let expected = count.checked_mul(dtype.element_size()).ok_or_else(|| {
            WorldBridgeError::malformed_tensor(format!("Shape {:?} overflows", shape))
        })?;
        if buffer.len() != expected {
            return Err(WorldBridgeError::malformed_tensor(format!(
                "Buffer holds {} bytes, shape {:?} of {} needs {}",
                buffer.len(), shape, dtype, expected
            )));
        }
        Ok(Self { shape, dtype, buffer })
    }

    pub fn from_values<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let mut buffer = Vec::with_capacity(values.len() * T::DTYPE.element_size());
        for &value in values {
            value.write_le(&mut buffer);
        }
        Self::new(shape, T::DTYPE, buffer)
    }

    /// Build a float64 tensor from any array, in logical row-major order
    pub fn from_array<S, D>(array: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let mut buffer = Vec::with_capacity(array.len() * DType::Float64.element_size());
        for &value in array.iter() {
            value.write_le(&mut buffer);
        }
        Self {
            shape: array.shape().to_vec(),
            dtype: DType::Float64,
            buffer,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.buffer.len() / self.dtype.element_size()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Typed copy of the elements; `None` when `T` is not this tensor's dtype
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if T::DTYPE != self.dtype {
            return None;
        }
        Some(
            self.buffer
                .chunks_exact(self.dtype.element_size())
                .map(T::read_le)
                .collect(),
        )
    }

    /// Elements cast to float64, without rescaling
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn cast<T: Element>(buffer: &[u8]) -> Vec<f64> {
            buffer
                .chunks_exact(std::mem::size_of::<T>())
                .map(|chunk| T::read_le(chunk).as_f64())
                .collect()
        }

        match self.dtype {
            DType::Int8 => cast::<i8>(&self.buffer),
            DType::UInt8 => cast::<u8>(&self.buffer),
            DType::Int16 => cast::<i16>(&self.buffer),
            DType::UInt16 => cast::<u16>(&self.buffer),
            DType::Int32 => cast::<i32>(&self.buffer),
            DType::UInt32 => cast::<u32>(&self.buffer),
            DType::Int64 => cast::<i64>(&self.buffer),
            DType::UInt64 => cast::<u64>(&self.buffer),
            DType::Float32 => cast::<f32>(&self.buffer),
            DType::Float64 => cast::<f64>(&self.buffer),
        }
    }

    pub fn to_array(&self) -> Result<ArrayD<f64>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.to_f64_vec())
            .map_err(|e| WorldBridgeError::malformed_tensor(format!("Tensor shape conversion failed: {}", e)))
    }

    pub fn into_parts(self) -> (Vec<usize>, DType, Vec<u8>) {
        (self.shape, self.dtype, self.buffer)
    }
}

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Tensor", 3)?;
        state.serialize_field("shape", &self.shape)?;
        state.serialize_field("dtype", self.dtype.name())?;
        state.serialize_field("buffer", serde_bytes::Bytes::new(&self.buffer))?;
        state.end()
    }
}
