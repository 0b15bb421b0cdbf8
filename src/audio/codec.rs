//! Container decoding and encoding
//!
//! Every payload goes through a [`BoundedSpool`] first, so a decode never
//! holds more than the configured in-memory threshold plus the sample matrix.

use std::io::{ErrorKind, Read, Write};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::formats::{decoded_subtype, Container, FormatTable, WritableSubtype};
use super::matrix::{AudioInfo, AudioMatrix};
use crate::config::LimitsConfig;
use crate::error::{WorldBridgeError, Result};
use crate::spool::BoundedSpool;

impl MediaSource for BoundedSpool {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len())
    }
}

/// Audio decoder/encoder bound to the process limits and format table
#[derive(Debug, Clone)]
pub struct AudioCodec {
    limits: LimitsConfig,
    table: FormatTable,
}

impl AudioCodec {
    pub fn new(limits: LimitsConfig) -> Self {
        Self {
            limits,
            table: FormatTable::probe(),
        }
    }

    pub fn table(&self) -> &FormatTable {
        &self.table
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Decode an in-memory container
    ///
    /// Bodies above the spool's memory threshold are copied to disk, so the
    /// extra copy held in memory never exceeds `spool_memory_bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<(AudioMatrix, AudioInfo)> {
        let spool = BoundedSpool::with_contents(&self.limits, bytes)?;
        self.decode_spool(spool)
    }

    /// Decode a container streamed from a reader
    pub fn decode_reader<R: Read>(&self, mut reader: R) -> Result<(AudioMatrix, AudioInfo)> {
        let mut spool = BoundedSpool::from_limits(&self.limits);
        std::io::copy(&mut reader, &mut spool)?;
        spool.rewind()?;
        self.decode_spool(spool)
    }

    /// Decode a filled spool; the spool is consumed and released on return
    pub fn decode_spool(&self, mut spool: BoundedSpool) -> Result<(AudioMatrix, AudioInfo)> {
        if spool.is_empty() {
            return Err(WorldBridgeError::corrupt_audio("Audio payload is empty"));
        }

        let container = sniff(&mut spool)?;
        let entry = self.table.find_container(container).ok_or_else(|| {
            WorldBridgeError::unsupported_format(format!("{} decoding is not available", container.tag()))
        })?;

        let mut hint = Hint::new();
        hint.with_extension(container.extension());
        let mss = MediaSourceStream::new(Box::new(spool), Default::default());

        let probed = get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| WorldBridgeError::corrupt_audio(format!("Failed to probe {} stream: {}", container.tag(), e)))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| WorldBridgeError::corrupt_audio("Stream contains no audio track"))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| WorldBridgeError::corrupt_audio("Track is missing a sample rate"))?;

        let mut decoder = get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    WorldBridgeError::unsupported_format(format!("Unsupported codec: {}", what))
                }
                other => WorldBridgeError::corrupt_audio(format!("Failed to create decoder: {}", other)),
            })?;

        let mut channels = params.channels.map(|c| c.count());
        let mut interleaved: Vec<f64> = Vec::new();
        let mut decoded_packets = 0usize;
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => {
                    return Err(WorldBridgeError::corrupt_audio(format!("Failed to read packet: {}", err)));
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(buffer) => {
                    let spec = *buffer.spec();
                    let count = spec.channels.count();
                    match channels {
                        Some(known) if known != count => {
                            return Err(WorldBridgeError::corrupt_audio(format!(
                                "Channel count changed mid-stream from {} to {}",
                                known, count
                            )));
                        }
                        _ => channels = Some(count),
                    }

                    let mut samples = SampleBuffer::<f64>::new(buffer.capacity() as u64, spec);
                    samples.copy_interleaved_ref(buffer);
                    interleaved.extend_from_slice(samples.samples());
                    decoded_packets += 1;
                }
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::warn!("Skipping undecodable packet: {}", msg);
                    skipped_packets += 1;
                }
                Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
                Err(err) => {
                    return Err(WorldBridgeError::corrupt_audio(format!("Failed to decode packet: {}", err)));
                }
            }
        }

        if decoded_packets == 0 && skipped_packets > 0 {
            return Err(WorldBridgeError::corrupt_audio(format!(
                "None of {} packets could be decoded",
                skipped_packets
            )));
        }

        let channels = channels.unwrap_or(1);
        let matrix = AudioMatrix::from_interleaved(interleaved, channels)?;

        let mut info = AudioInfo::new(
            sample_rate,
            matrix.channels(),
            matrix.frames() as u64,
            entry.tag(),
            decoded_subtype(params.codec, params.bits_per_sample),
        );
        info.format_info = entry.description.to_string();
        if let Some(descriptor) = get_codecs().get_codec(params.codec) {
            info.subtype_info = descriptor.long_name.to_string();
            info.extra.insert("codec".to_string(), descriptor.short_name.to_string());
        }
        if let Some(bits) = params.bits_per_sample {
            info.extra.insert("bits_per_sample".to_string(), bits.to_string());
        }

        log::debug!(
            "Decoded {} {}: {} ch, {} frames @ {} Hz",
            info.format,
            info.subtype,
            info.channels,
            info.frames,
            info.sample_rate
        );
        Ok((matrix, info))
    }

    /// Encode samples into a container
    ///
    /// `format` defaults to WAV and `subtype` to PCM_16. Samples outside
    /// [-1.0, 1.0] are clipped for integer subtypes.
    pub fn encode(
        &self,
        audio: &AudioMatrix,
        sample_rate: u32,
        format: Option<&str>,
        subtype: Option<&str>,
    ) -> Result<Vec<u8>> {
        let (container, subtype) = self.table.writable(format, subtype)?;
        if sample_rate == 0 {
            return Err(WorldBridgeError::invalid_parameter("Sample rate must be positive"));
        }
        let channels = u16::try_from(audio.channels()).map_err(|_| {
            WorldBridgeError::invalid_sample_data(format!("{} channels cannot be written", audio.channels()))
        })?;
        if audio.samples().iter().any(|x| !x.is_finite()) {
            return Err(WorldBridgeError::invalid_sample_data("Samples contain NaN or infinity"));
        }

        let mut spool = BoundedSpool::from_limits(&self.limits);
        write_wav(&mut spool, audio, subtype.wav_spec(channels, sample_rate), subtype)?;
        let bytes = spool.read_to_vec()?;

        log::debug!(
            "Encoded {} ch x {} frames as {}/{} ({} bytes)",
            channels,
            audio.frames(),
            container.tag(),
            subtype.tag(),
            bytes.len()
        );
        Ok(bytes)
    }

    pub fn list_formats(&self) -> std::collections::BTreeMap<String, String> {
        self.table.formats()
    }

    pub fn list_subtypes(&self, format: &str) -> Result<std::collections::BTreeMap<String, String>> {
        self.table.subtypes(format)
    }
}

/// Read the leading bytes, then rewind
fn sniff(spool: &mut BoundedSpool) -> Result<Container> {
    let mut head = [0u8; 12];
    let mut filled = 0;
    while filled < head.len() {
        let read = spool.read(&mut head[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    spool.rewind()?;

    Container::sniff(&head[..filled])
        .ok_or_else(|| WorldBridgeError::unsupported_format("Unrecognised audio container"))
}

fn write_wav<W: Write + std::io::Seek>(
    writer: W,
    audio: &AudioMatrix,
    spec: hound::WavSpec,
    subtype: WritableSubtype,
) -> Result<()> {
    let mut wav = hound::WavWriter::new(writer, spec).map_err(hound_error)?;
    for sample in audio.interleaved() {
        match subtype {
            WritableSubtype::PcmU8 => wav.write_sample(quantize(sample, 127.0) as i8),
            WritableSubtype::Pcm16 => wav.write_sample(quantize(sample, 32767.0) as i16),
            WritableSubtype::Pcm24 => wav.write_sample(quantize(sample, 8_388_607.0) as i32),
            WritableSubtype::Pcm32 => wav.write_sample(quantize(sample, 2_147_483_647.0) as i32),
            WritableSubtype::Float => wav.write_sample(sample as f32),
        }
        .map_err(hound_error)?;
    }
    wav.finalize().map_err(hound_error)
}

fn quantize(sample: f64, full_scale: f64) -> f64 {
    (sample.clamp(-1.0, 1.0) * full_scale).round()
}

fn hound_error(err: hound::Error) -> WorldBridgeError {
    match err {
        hound::Error::IoError(io) => io.into(),
        other => WorldBridgeError::invalid_sample_data(format!("WAV encoding failed: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::f64::consts::PI;

    fn codec() -> AudioCodec {
        AudioCodec::new(LimitsConfig::default())
    }

    fn stereo_ramp(frames: usize) -> AudioMatrix {
        AudioMatrix::new(Array2::from_shape_fn((2, frames), |(c, i)| {
            let x = (2.0 * PI * 440.0 * i as f64 / 16000.0).sin() * 0.5;
            if c == 0 { x } else { -x }
        }))
    }

    #[test]
    fn test_pcm16_roundtrip() {
        let codec = codec();
        let audio = stereo_ramp(1600);
        let bytes = codec.encode(&audio, 16000, None, None).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");

        let (decoded, info) = codec.decode(&bytes).unwrap();
        assert_eq!(info.sample_rate, 16000);
        assert_eq!(info.channels, 2);
        assert_eq!(info.frames, 1600);
        assert_eq!(info.format, "WAV");
        assert_eq!(info.subtype, "PCM_16");
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.frames(), 1600);

        let max_err = decoded
            .samples()
            .iter()
            .zip(audio.samples().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 1.0 / 16384.0, "max error {}", max_err);
    }

    #[test]
    fn test_float_roundtrip_is_exact_to_f32() {
        let codec = codec();
        let audio = AudioMatrix::from_mono(ndarray::Array1::from(vec![0.25, -0.125, 0.0, 0.999]));
        let bytes = codec.encode(&audio, 8000, Some("WAV"), Some("FLOAT")).unwrap();
        let (decoded, info) = codec.decode(&bytes).unwrap();
        assert_eq!(info.subtype, "FLOAT");
        assert_eq!(decoded.samples().row(0).to_vec(), vec![0.25, -0.125, 0.0, 0.999f32 as f64]);
    }

    #[test]
    fn test_encode_rejects_unknown_format() {
        let err = codec().encode(&stereo_ramp(10), 16000, Some("XYZ"), None).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_encode_rejects_bad_samples() {
        let audio = AudioMatrix::from_mono(ndarray::Array1::from(vec![0.0, f64::NAN]));
        assert_eq!(codec().encode(&audio, 16000, None, None).unwrap_err().kind(), "InvalidSampleData");
        assert_eq!(
            codec().encode(&stereo_ramp(4), 0, None, None).unwrap_err().kind(),
            "InvalidParameter"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = codec();
        assert_eq!(codec.decode(b"definitely not audio").unwrap_err().kind(), "UnsupportedFormat");
        assert_eq!(codec.decode(&[]).unwrap_err().kind(), "CorruptAudio");
        assert_eq!(
            codec.decode(b"RIFF\x10\x00\x00\x00WAVEjunk").unwrap_err().kind(),
            "CorruptAudio"
        );
    }

    #[test]
    fn test_decode_respects_payload_ceiling() {
        let limits = LimitsConfig { max_payload_bytes: 64, spool_memory_bytes: 16, ..LimitsConfig::default() };
        let codec = AudioCodec::new(limits);
        let err = codec.decode(&[0u8; 65]).unwrap_err();
        assert_eq!(err.kind(), "PayloadTooLarge");

        let err = codec.encode(&stereo_ramp(100), 16000, None, None).unwrap_err();
        assert_eq!(err.kind(), "PayloadTooLarge");
    }

    #[test]
    fn test_decode_spills_bodies_above_memory_threshold() {
        let limits = LimitsConfig { max_payload_bytes: 1 << 20, spool_memory_bytes: 256, ..LimitsConfig::default() };
        let codec = AudioCodec::new(limits.clone());
        let bytes = codec.encode(&stereo_ramp(2000), 16000, None, None).unwrap();
        assert!(BoundedSpool::with_contents(&limits, &bytes).unwrap().is_spilled());

        let (decoded, info) = codec.decode(&bytes).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(decoded.frames(), 2000);
    }

    #[test]
    fn test_decode_reader_spills_large_payloads() {
        let limits = LimitsConfig { max_payload_bytes: 1 << 20, spool_memory_bytes: 256, ..LimitsConfig::default() };
        let codec = AudioCodec::new(limits);
        let bytes = codec.encode(&stereo_ramp(4000), 16000, None, Some("PCM_24")).unwrap();
        let (decoded, info) = codec.decode_reader(&bytes[..]).unwrap();
        assert_eq!(info.subtype, "PCM_24");
        assert_eq!(decoded.frames(), 4000);
    }
}
