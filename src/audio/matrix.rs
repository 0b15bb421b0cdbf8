//! Decoded sample matrix and its format metadata

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use serde::Serialize;

use crate::error::{WorldBridgeError, Result};
use crate::tensor::{DType, Tensor};

/// Samples laid out `[channels, frames]`, values nominally in [-1.0, 1.0]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMatrix {
    samples: Array2<f64>,
}

impl AudioMatrix {
    pub fn new(samples: Array2<f64>) -> Self {
        Self { samples }
    }

    pub fn from_mono(samples: Array1<f64>) -> Self {
        Self {
            samples: samples.insert_axis(Axis(0)),
        }
    }

    /// Build from frame-interleaved samples, as produced by decoders
    pub fn from_interleaved(interleaved: Vec<f64>, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(WorldBridgeError::corrupt_audio("Stream reports zero channels"));
        }
        let frames = interleaved.len() / channels;
        let by_frame = Array2::from_shape_vec((frames, channels), interleaved).map_err(|e| {
            WorldBridgeError::corrupt_audio(format!("Partial frame at end of stream: {}", e))
        })?;
        Ok(Self {
            samples: by_frame.reversed_axes().as_standard_layout().into_owned(),
        })
    }

    /// Interpret a tensor as audio: rank 1 is one channel, rank 2 is `[channels, frames]`
    ///
    /// Float tensors are taken as-is, integer tensors as full-scale PCM.
    pub fn from_pcm_tensor(tensor: &Tensor) -> Result<Self> {
        let scale = match tensor.dtype() {
            DType::Float32 | DType::Float64 => 1.0,
            DType::Int16 => 32768.0,
            DType::Int32 => 2_147_483_648.0,
            other => {
                return Err(WorldBridgeError::invalid_sample_data(format!(
                    "Cannot write samples of dtype {}",
                    other
                )));
            }
        };

        let shape = matrix_shape(tensor).ok_or_else(|| {
            WorldBridgeError::invalid_sample_data(format!(
                "Audio must be [frames] or [channels, frames] with at least one channel, got shape {:?}",
                tensor.shape()
            ))
        })?;
        let values: Vec<f64> = tensor.to_f64_vec().into_iter().map(|x| x / scale).collect();
        let samples = Array2::from_shape_vec(shape, values)
            .map_err(|e| WorldBridgeError::invalid_sample_data(e.to_string()))?;
        Ok(Self { samples })
    }

    /// Interpret an analysis input: any numeric dtype, values taken as-is
    pub fn from_signal_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = matrix_shape(tensor).ok_or_else(|| {
            WorldBridgeError::invalid_parameter(format!(
                "Signal must be [frames] or [channels, frames] with at least one channel, got shape {:?}",
                tensor.shape()
            ))
        })?;
        let samples = Array2::from_shape_vec(shape, tensor.to_f64_vec())
            .map_err(|e| WorldBridgeError::invalid_parameter(e.to_string()))?;
        Ok(Self { samples })
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn frames(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    /// Average of all channels
    pub fn to_mono(&self) -> Array1<f64> {
        if self.channels() == 1 {
            return self.samples.row(0).to_owned();
        }
        self.samples
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.frames()))
    }

    /// Frame-interleaved copy, as consumed by encoders
    pub fn interleaved(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.t().into_iter().copied()
    }

    /// Float64 tensor of shape `[channels, frames]`
    pub fn to_tensor(&self) -> Tensor {
        Tensor::from_array(&self.samples)
    }
}

/// `[channels, frames]` for rank 1 and rank 2 tensors with at least one channel
fn matrix_shape(tensor: &Tensor) -> Option<(usize, usize)> {
    match *tensor.shape() {
        [frames] => Some((1, frames)),
        [channels, frames] if channels > 0 => Some((channels, frames)),
        _ => None,
    }
}

/// Read-only description of a decoded stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioInfo {
    #[serde(rename = "samplerate")]
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: u64,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub format: String,
    pub subtype: String,
    pub endian: String,
    pub format_info: String,
    pub subtype_info: String,
    pub sections: u32,
    pub extra_info: String,
    pub extra: BTreeMap<String, String>,
}

impl AudioInfo {
    pub fn new(sample_rate: u32, channels: usize, frames: u64, format: &str, subtype: &str) -> Self {
        let duration_seconds = if sample_rate > 0 {
            frames as f64 / sample_rate as f64
        } else {
            0.0
        };
        Self {
            sample_rate,
            channels,
            frames,
            duration_seconds,
            format: format.to_string(),
            subtype: subtype.to_string(),
            endian: "FILE".to_string(),
            format_info: String::new(),
            subtype_info: String::new(),
            sections: 1,
            extra_info: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_is_channel_major() {
        let matrix = AudioMatrix::from_interleaved(vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2).unwrap();
        assert_eq!(matrix.channels(), 2);
        assert_eq!(matrix.frames(), 3);
        assert_eq!(matrix.samples().row(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(matrix.samples().row(1).to_vec(), vec![-1.0, -2.0, -3.0]);
        assert_eq!(matrix.interleaved().collect::<Vec<_>>(), vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);

        let tensor = matrix.to_tensor();
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.to_f64_vec(), vec![1.0, 2.0, 3.0, -1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_partial_frame_is_corrupt() {
        let err = AudioMatrix::from_interleaved(vec![0.0; 5], 2).unwrap_err();
        assert_eq!(err.kind(), "CorruptAudio");
    }

    #[test]
    fn test_pcm_tensor_scaling() {
        let tensor = Tensor::from_values(vec![2], &[16384i16, -32768]).unwrap();
        let matrix = AudioMatrix::from_pcm_tensor(&tensor).unwrap();
        assert_eq!(matrix.channels(), 1);
        assert_eq!(matrix.samples().row(0).to_vec(), vec![0.5, -1.0]);
    }

    #[test]
    fn test_pcm_tensor_rejects_bad_input() {
        let bytes = Tensor::from_values(vec![2], &[1u8, 2]).unwrap();
        assert_eq!(AudioMatrix::from_pcm_tensor(&bytes).unwrap_err().kind(), "InvalidSampleData");

        let cube = Tensor::from_values(vec![1, 1, 1], &[0.0f64]).unwrap();
        assert_eq!(AudioMatrix::from_pcm_tensor(&cube).unwrap_err().kind(), "InvalidSampleData");
    }

    #[test]
    fn test_signal_tensor_is_not_rescaled() {
        let tensor = Tensor::from_values(vec![1, 2], &[100i16, -5]).unwrap();
        let matrix = AudioMatrix::from_signal_tensor(&tensor).unwrap();
        assert_eq!(matrix.samples().row(0).to_vec(), vec![100.0, -5.0]);

        let empty_channels = Tensor::from_values::<f64>(vec![0, 4], &[]).unwrap();
        assert_eq!(AudioMatrix::from_signal_tensor(&empty_channels).unwrap_err().kind(), "InvalidParameter");
    }

    #[test]
    fn test_to_mono() {
        let samples = Array2::from_shape_vec((2, 2), vec![1.0, 0.0, 0.0, 1.0]).unwrap();
        let matrix = AudioMatrix::new(samples);
        assert_eq!(matrix.to_mono().to_vec(), vec![0.5, 0.5]);

        let mono = AudioMatrix::from_mono(Array1::from(vec![0.1, 0.2]));
        assert_eq!(mono.to_mono().to_vec(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_info_duration() {
        let info = AudioInfo::new(16000, 1, 8000, "WAV", "PCM_16");
        assert!((info.duration_seconds - 0.5).abs() < f64::EPSILON);
        assert_eq!(info.sections, 1);
    }
}
