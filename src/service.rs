//! Operations exposed over the wire
//!
//! Each operation is a small struct borrowing the shared [`Service`], with an
//! explicit parameter struct decoded by name. The transport only sees
//! [`Operation`] and never the shapes of parameters or results.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioCodec, AudioInfo, AudioMatrix};
use crate::config::Config;
use crate::error::{WorldBridgeError, Result};
use crate::invocation::{FromPayload, IntoPayload, Operation, Payload};
use crate::processing::{AnalysisPipeline, PitchTrack, VocoderFeatureSet};
use crate::render::PlotRenderer;
use crate::tensor::{native_byte_order, Tensor, TensorEnvelope, WIRE_BYTE_ORDER};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const PNG: &str = "image/png";

/// Read-only components shared by every request
#[derive(Debug, Clone)]
pub struct Service {
    config: Arc<Config>,
    pipeline: AnalysisPipeline,
    codec: AudioCodec,
    renderer: PlotRenderer,
}

impl Service {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            pipeline: AnalysisPipeline::new(config.analysis.clone()),
            codec: AudioCodec::new(config.limits.clone()),
            renderer: PlotRenderer::new(config.limits.clone()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &AnalysisPipeline {
        &self.pipeline
    }

    pub fn codec(&self) -> &AudioCodec {
        &self.codec
    }

    pub fn environment(&self) -> Environment<'_> {
        Environment { service: self }
    }

    pub fn list_formats(&self) -> ListFormats<'_> {
        ListFormats { service: self }
    }

    pub fn list_subtypes<'s>(&'s self, format: &'s str) -> ListSubtypes<'s> {
        ListSubtypes { service: self, format }
    }

    pub fn decode_audio(&self) -> DecodeAudio<'_> {
        DecodeAudio { service: self }
    }

    pub fn encode_audio(&self) -> EncodeAudio<'_> {
        EncodeAudio { service: self }
    }

    pub fn pitch_fast(&self) -> PitchFast<'_> {
        PitchFast { service: self }
    }

    pub fn pitch_precise(&self) -> PitchPrecise<'_> {
        PitchPrecise { service: self }
    }

    pub fn analyze_full(&self) -> AnalyzeFull<'_> {
        AnalyzeFull { service: self }
    }

    pub fn synthesize(&self) -> Synthesize<'_> {
        Synthesize { service: self }
    }

    pub fn render_plot(&self) -> RenderPlot<'_> {
        RenderPlot { service: self }
    }
}

// Parameters

/// Signal plus sample rate, shared by the analysis operations
#[derive(Debug, Deserialize)]
pub struct SignalParams {
    pub data: TensorEnvelope,
    pub fs: f64,
}
crate::packed_params!(SignalParams, ["data", "fs"]);

#[derive(Debug, Deserialize)]
pub struct EncodeParams {
    pub data: TensorEnvelope,
    pub fs: f64,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}
crate::packed_params!(EncodeParams, ["data", "fs"]);

#[derive(Debug, Deserialize)]
pub struct SynthesisParams {
    pub f0: TensorEnvelope,
    pub sp: TensorEnvelope,
    pub ap: TensorEnvelope,
    pub fs: f64,
}
crate::packed_params!(SynthesisParams, ["f0", "sp", "ap", "fs"]);

fn log_scale_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PlotParams {
    pub figlist: Vec<TensorEnvelope>,
    #[serde(default = "log_scale_default")]
    pub log: bool,
}
crate::packed_params!(PlotParams, ["figlist"]);

/// Request body taken verbatim as a container
#[derive(Debug, Clone, Copy)]
pub struct RawAudio<'p>(pub &'p [u8]);

impl<'p> FromPayload<'p> for RawAudio<'p> {
    fn from_payload(payload: &'p [u8]) -> Result<Self> {
        Ok(Self(payload))
    }
}

// Outputs

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub name: String,
    pub version: String,
    pub byteorder: String,
    pub wire_byteorder: String,
    pub max_payload_bytes: u64,
    pub frame_period_ms: f64,
}

/// Tag to description
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TagList(pub BTreeMap<String, String>);

#[derive(Debug, Clone, Serialize)]
pub struct DecodedAudio {
    pub fs: u32,
    pub info: AudioInfo,
    pub data: Tensor,
}

#[derive(Debug, Clone, Serialize)]
pub struct PitchOutput {
    pub t: Tensor,
    pub f0: Tensor,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureOutput {
    pub t: Tensor,
    pub f0: Tensor,
    pub sp: Tensor,
    pub ap: Tensor,
}

/// Bare tensor on the wire
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct SignalOutput(pub Tensor);

crate::packed_output!(EnvironmentInfo, TagList, DecodedAudio, PitchOutput, FeatureOutput, SignalOutput);

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio(pub Vec<u8>);

impl IntoPayload for EncodedAudio {
    fn into_payload(self) -> Result<Payload> {
        Ok(Payload::Raw { bytes: self.0, content_type: OCTET_STREAM })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotImage(pub Vec<u8>);

impl IntoPayload for PlotImage {
    fn into_payload(self) -> Result<Payload> {
        Ok(Payload::Raw { bytes: self.0, content_type: PNG })
    }
}

impl From<PitchTrack> for PitchOutput {
    fn from(track: PitchTrack) -> Self {
        Self {
            t: Tensor::from_array(&track.time_axis),
            f0: Tensor::from_array(&track.f0),
        }
    }
}

impl TryFrom<VocoderFeatureSet> for FeatureOutput {
    type Error = WorldBridgeError;

    fn try_from(features: VocoderFeatureSet) -> Result<Self> {
        let sp = features
            .spectral_envelope
            .ok_or_else(|| WorldBridgeError::missing_parameter("sp"))?;
        let ap = features
            .aperiodicity
            .ok_or_else(|| WorldBridgeError::missing_parameter("ap"))?;
        Ok(Self {
            t: Tensor::from_array(&features.time_axis),
            f0: Tensor::from_array(&features.f0),
            sp: Tensor::from_array(&sp),
            ap: Tensor::from_array(&ap),
        })
    }
}

// Operations

pub struct Environment<'s> {
    service: &'s Service,
}

impl Operation for Environment<'_> {
    const NAME: &'static str = "environment";
    type Params<'p> = ();
    type Output = EnvironmentInfo;

    fn run(&self, _params: ()) -> Result<EnvironmentInfo> {
        let config = self.service.config();
        Ok(EnvironmentInfo {
            name: crate::NAME.to_string(),
            version: crate::VERSION.to_string(),
            byteorder: native_byte_order().to_string(),
            wire_byteorder: WIRE_BYTE_ORDER.to_string(),
            max_payload_bytes: config.max_payload_bytes() as u64,
            frame_period_ms: config.frame_period_ms(),
        })
    }
}

pub struct ListFormats<'s> {
    service: &'s Service,
}

impl Operation for ListFormats<'_> {
    const NAME: &'static str = "list_audio_formats";
    type Params<'p> = ();
    type Output = TagList;

    fn run(&self, _params: ()) -> Result<TagList> {
        Ok(TagList(self.service.codec.list_formats()))
    }
}

pub struct ListSubtypes<'s> {
    service: &'s Service,
    format: &'s str,
}

impl Operation for ListSubtypes<'_> {
    const NAME: &'static str = "list_audio_subtypes";
    type Params<'p> = ();
    type Output = TagList;

    fn run(&self, _params: ()) -> Result<TagList> {
        self.service.codec.list_subtypes(self.format).map(TagList)
    }
}

pub struct DecodeAudio<'s> {
    service: &'s Service,
}

impl Operation for DecodeAudio<'_> {
    const NAME: &'static str = "decode_audio";
    type Params<'p> = RawAudio<'p>;
    type Output = DecodedAudio;

    fn run(&self, params: RawAudio<'_>) -> Result<DecodedAudio> {
        let (audio, info) = self.service.codec.decode(params.0)?;
        Ok(DecodedAudio {
            fs: info.sample_rate,
            data: audio.to_tensor(),
            info,
        })
    }
}

pub struct EncodeAudio<'s> {
    service: &'s Service,
}

impl Operation for EncodeAudio<'_> {
    const NAME: &'static str = "encode_audio";
    type Params<'p> = EncodeParams;
    type Output = EncodedAudio;

    fn run(&self, params: EncodeParams) -> Result<EncodedAudio> {
        let sample_rate = integral_sample_rate(params.fs)?;
        let audio = AudioMatrix::from_pcm_tensor(&params.data.into_tensor()?)?;
        self.service
            .codec
            .encode(&audio, sample_rate, params.format.as_deref(), params.subtype.as_deref())
            .map(EncodedAudio)
    }
}

pub struct PitchFast<'s> {
    service: &'s Service,
}

impl Operation for PitchFast<'_> {
    const NAME: &'static str = "pitch_fast";
    type Params<'p> = SignalParams;
    type Output = PitchOutput;

    fn run(&self, params: SignalParams) -> Result<PitchOutput> {
        let audio = AudioMatrix::from_signal_tensor(&params.data.into_tensor()?)?;
        let track = self.service.pipeline.extract_pitch_fast(&audio, params.fs)?;
        Ok(track.into())
    }
}

pub struct PitchPrecise<'s> {
    service: &'s Service,
}

impl Operation for PitchPrecise<'_> {
    const NAME: &'static str = "pitch_precise";
    type Params<'p> = SignalParams;
    type Output = PitchOutput;

    fn run(&self, params: SignalParams) -> Result<PitchOutput> {
        let audio = AudioMatrix::from_signal_tensor(&params.data.into_tensor()?)?;
        let track = self.service.pipeline.extract_pitch_precise(&audio, params.fs)?;
        Ok(track.into())
    }
}

pub struct AnalyzeFull<'s> {
    service: &'s Service,
}

impl Operation for AnalyzeFull<'_> {
    const NAME: &'static str = "analyze_full";
    type Params<'p> = SignalParams;
    type Output = FeatureOutput;

    fn run(&self, params: SignalParams) -> Result<FeatureOutput> {
        let audio = AudioMatrix::from_signal_tensor(&params.data.into_tensor()?)?;
        self.service.pipeline.extract_full(&audio, params.fs)?.try_into()
    }
}

pub struct Synthesize<'s> {
    service: &'s Service,
}

impl Operation for Synthesize<'_> {
    const NAME: &'static str = "synthesize";
    type Params<'p> = SynthesisParams;
    type Output = SignalOutput;

    fn run(&self, params: SynthesisParams) -> Result<SignalOutput> {
        let f0 = params.f0.into_tensor()?;
        let f0 = f0
            .to_array()?
            .into_dimensionality::<Ix1>()
            .map_err(|_| shape_error("f0", 1, f0.shape()))?;
        let features = VocoderFeatureSet {
            time_axis: Array1::zeros(0),
            f0,
            spectral_envelope: Some(feature_matrix("sp", params.sp)?),
            aperiodicity: Some(feature_matrix("ap", params.ap)?),
        };
        let audio = self.service.pipeline.synthesize(&features, params.fs)?;
        Ok(SignalOutput(Tensor::from_array(&audio.to_mono())))
    }
}

pub struct RenderPlot<'s> {
    service: &'s Service,
}

impl Operation for RenderPlot<'_> {
    const NAME: &'static str = "render_plot";
    type Params<'p> = PlotParams;
    type Output = PlotImage;

    fn run(&self, params: PlotParams) -> Result<PlotImage> {
        let figures = params
            .figlist
            .into_iter()
            .map(TensorEnvelope::into_tensor)
            .collect::<Result<Vec<_>>>()?;
        self.service.renderer.render(&figures, params.log).map(PlotImage)
    }
}

fn feature_matrix(name: &str, envelope: TensorEnvelope) -> Result<Array2<f64>> {
    let tensor = envelope.into_tensor()?;
    tensor
        .to_array()?
        .into_dimensionality::<Ix2>()
        .map_err(|_| shape_error(name, 2, tensor.shape()))
}

fn shape_error(name: &str, rank: usize, shape: &[usize]) -> WorldBridgeError {
    WorldBridgeError::invalid_feature_shape(format!(
        "{} must have rank {}, got shape {:?}",
        name, rank, shape
    ))
}

/// Containers store whole-number sample rates
fn integral_sample_rate(fs: f64) -> Result<u32> {
    if !fs.is_finite() || fs < 1.0 || fs > u32::MAX as f64 || fs.fract() != 0.0 {
        return Err(WorldBridgeError::invalid_parameter(format!(
            "Sample rate must be a positive whole number, got {}",
            fs
        )));
    }
    Ok(fs as u32)
}
