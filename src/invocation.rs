//! Timed operation invocation
//!
//! An [`Operation`] declares its parameter struct and its output. The
//! [`invoke_timed`] wrapper decodes the request into the parameters, runs the
//! operation under a wall clock and encodes the output, without knowing the
//! shape of either.

use std::time::{Duration, Instant};

use crate::error::Result;

pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// Encoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A msgpack document
    Packed(Vec<u8>),
    /// Opaque bytes such as an audio container or an image
    Raw { bytes: Vec<u8>, content_type: &'static str },
}

impl Payload {
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Packed(_) => MSGPACK_CONTENT_TYPE,
            Payload::Raw { content_type, .. } => content_type,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Packed(bytes) | Payload::Raw { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Packed(bytes) | Payload::Raw { bytes, .. } => bytes,
        }
    }
}

/// Parameters decoded from a request body
pub trait FromPayload<'p>: Sized {
    fn from_payload(payload: &'p [u8]) -> Result<Self>;
}

/// Output encoded into a response body
pub trait IntoPayload {
    fn into_payload(self) -> Result<Payload>;
}

/// Operations without parameters ignore the body
impl FromPayload<'_> for () {
    fn from_payload(_payload: &[u8]) -> Result<Self> {
        Ok(())
    }
}

/// Implement [`FromPayload`] for a msgpack parameter struct with the given required keys
#[macro_export]
macro_rules! packed_params {
    ($ty:ty, [$($required:literal),* $(,)?]) => {
        impl $crate::invocation::FromPayload<'_> for $ty {
            fn from_payload(payload: &[u8]) -> $crate::error::Result<Self> {
                $crate::tensor::decode_params(payload, &[$($required),*])
            }
        }
    };
}

/// Implement [`IntoPayload`] for types serialised as msgpack maps
#[macro_export]
macro_rules! packed_output {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::invocation::IntoPayload for $ty {
                fn into_payload(self) -> $crate::error::Result<$crate::invocation::Payload> {
                    $crate::tensor::encode(&self).map($crate::invocation::Payload::Packed)
                }
            }
        )*
    };
}

/// A named unit of work
pub trait Operation {
    const NAME: &'static str;
    type Params<'p>: FromPayload<'p>;
    type Output: IntoPayload;

    fn run(&self, params: Self::Params<'_>) -> Result<Self::Output>;
}

/// Elapsed compute time of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub elapsed: Duration,
}

impl Timing {
    /// Whole milliseconds, rounded down
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }

    /// `Server-Timing` header value
    pub fn server_timing_header(&self) -> String {
        format!("cpu;dur={}", self.elapsed_ms())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedResponse {
    pub payload: Payload,
    pub timing: Timing,
}

/// Decode, run and encode one operation; only `run` is timed
pub fn invoke_timed<O: Operation>(operation: &O, body: &[u8]) -> Result<TimedResponse> {
    let params = <O::Params<'_> as FromPayload<'_>>::from_payload(body).inspect_err(|e| {
        log::warn!("{}: rejected request ({}): {}", O::NAME, e.kind(), e);
    })?;

    let start = Instant::now();
    let output = operation.run(params).inspect_err(|e| {
        log::warn!("{}: failed ({}): {}", O::NAME, e.kind(), e);
    })?;
    let timing = Timing { elapsed: start.elapsed() };

    let payload = output.into_payload()?;
    log::debug!(
        "{}: {} bytes in, {} bytes out, {}ms",
        O::NAME,
        body.len(),
        payload.as_bytes().len(),
        timing.elapsed_ms()
    );
    Ok(TimedResponse { payload, timing })
}
