//! Format capability table
//!
//! Readable subtypes come from the codecs actually registered in the linked
//! symphonia build. Writable subtypes are the ones `hound` can emit.

use std::collections::BTreeMap;

use symphonia::core::codecs::{
    CodecType, CODEC_TYPE_AAC, CODEC_TYPE_ADPCM_IMA_WAV, CODEC_TYPE_ADPCM_MS, CODEC_TYPE_FLAC,
    CODEC_TYPE_MP3, CODEC_TYPE_PCM_ALAW, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE,
    CODEC_TYPE_PCM_MULAW, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE,
    CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
};
use symphonia::default::get_codecs;

use crate::error::{WorldBridgeError, Result};

/// Containers recognised by their leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wav,
    Flac,
    Ogg,
    Mp3,
    Aac,
}

impl Container {
    pub fn tag(&self) -> &'static str {
        match self {
            Container::Wav => "WAV",
            Container::Flac => "FLAC",
            Container::Ogg => "OGG",
            Container::Mp3 => "MP3",
            Container::Aac => "AAC",
        }
    }

    /// File extension handed to the probe as a hint
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Wav => "wav",
            Container::Flac => "flac",
            Container::Ogg => "ogg",
            Container::Mp3 => "mp3",
            Container::Aac => "aac",
        }
    }

    /// Identify a container from at most the first 12 bytes of a stream
    pub fn sniff(head: &[u8]) -> Option<Self> {
        match head {
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(Container::Wav),
            [b'f', b'L', b'a', b'C', ..] => Some(Container::Flac),
            [b'O', b'g', b'g', b'S', ..] => Some(Container::Ogg),
            [b'I', b'D', b'3', ..] => Some(Container::Mp3),
            // ADTS sync word with layer bits 00
            [0xFF, b1, ..] if b1 & 0xF6 == 0xF0 => Some(Container::Aac),
            // MPEG audio sync word with layer III
            [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 && (b1 >> 1) & 0x03 == 0x01 => Some(Container::Mp3),
            _ => None,
        }
    }
}

/// Subtypes `hound` can write into a WAV container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritableSubtype {
    PcmU8,
    Pcm16,
    Pcm24,
    Pcm32,
    Float,
}

impl WritableSubtype {
    pub const ALL: [WritableSubtype; 5] = [
        WritableSubtype::PcmU8,
        WritableSubtype::Pcm16,
        WritableSubtype::Pcm24,
        WritableSubtype::Pcm32,
        WritableSubtype::Float,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            WritableSubtype::PcmU8 => "PCM_U8",
            WritableSubtype::Pcm16 => "PCM_16",
            WritableSubtype::Pcm24 => "PCM_24",
            WritableSubtype::Pcm32 => "PCM_32",
            WritableSubtype::Float => "FLOAT",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.tag().eq_ignore_ascii_case(tag))
    }

    pub fn bits_per_sample(&self) -> u16 {
        match self {
            WritableSubtype::PcmU8 => 8,
            WritableSubtype::Pcm16 => 16,
            WritableSubtype::Pcm24 => 24,
            WritableSubtype::Pcm32 | WritableSubtype::Float => 32,
        }
    }

    pub fn wav_spec(&self, channels: u16, sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: self.bits_per_sample(),
            sample_format: match self {
                WritableSubtype::Float => hound::SampleFormat::Float,
                _ => hound::SampleFormat::Int,
            },
        }
    }
}

pub const DEFAULT_FORMAT: &str = "WAV";
pub const DEFAULT_SUBTYPE: WritableSubtype = WritableSubtype::Pcm16;

struct KnownSubtype {
    tag: &'static str,
    codec: CodecType,
    writable: Option<WritableSubtype>,
}

struct KnownFormat {
    container: Container,
    description: &'static str,
    subtypes: &'static [KnownSubtype],
}

const KNOWN_FORMATS: &[KnownFormat] = &[
    KnownFormat {
        container: Container::Wav,
        description: "WAV (Microsoft)",
        subtypes: &[
            KnownSubtype { tag: "PCM_U8", codec: CODEC_TYPE_PCM_U8, writable: Some(WritableSubtype::PcmU8) },
            KnownSubtype { tag: "PCM_16", codec: CODEC_TYPE_PCM_S16LE, writable: Some(WritableSubtype::Pcm16) },
            KnownSubtype { tag: "PCM_24", codec: CODEC_TYPE_PCM_S24LE, writable: Some(WritableSubtype::Pcm24) },
            KnownSubtype { tag: "PCM_32", codec: CODEC_TYPE_PCM_S32LE, writable: Some(WritableSubtype::Pcm32) },
            KnownSubtype { tag: "FLOAT", codec: CODEC_TYPE_PCM_F32LE, writable: Some(WritableSubtype::Float) },
            KnownSubtype { tag: "DOUBLE", codec: CODEC_TYPE_PCM_F64LE, writable: None },
            KnownSubtype { tag: "ULAW", codec: CODEC_TYPE_PCM_MULAW, writable: None },
            KnownSubtype { tag: "ALAW", codec: CODEC_TYPE_PCM_ALAW, writable: None },
            KnownSubtype { tag: "IMA_ADPCM", codec: CODEC_TYPE_ADPCM_IMA_WAV, writable: None },
            KnownSubtype { tag: "MS_ADPCM", codec: CODEC_TYPE_ADPCM_MS, writable: None },
        ],
    },
    KnownFormat {
        container: Container::Flac,
        description: "FLAC (Free Lossless Audio Codec)",
        subtypes: &[
            KnownSubtype { tag: "PCM_S8", codec: CODEC_TYPE_FLAC, writable: None },
            KnownSubtype { tag: "PCM_16", codec: CODEC_TYPE_FLAC, writable: None },
            KnownSubtype { tag: "PCM_24", codec: CODEC_TYPE_FLAC, writable: None },
        ],
    },
    KnownFormat {
        container: Container::Ogg,
        description: "OGG (OGG Container format)",
        subtypes: &[KnownSubtype { tag: "VORBIS", codec: CODEC_TYPE_VORBIS, writable: None }],
    },
    KnownFormat {
        container: Container::Mp3,
        description: "MPEG-1/2 Audio",
        subtypes: &[KnownSubtype { tag: "MPEG_LAYER_III", codec: CODEC_TYPE_MP3, writable: None }],
    },
    KnownFormat {
        container: Container::Aac,
        description: "AAC (ADTS)",
        subtypes: &[KnownSubtype { tag: "AAC", codec: CODEC_TYPE_AAC, writable: None }],
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct SubtypeEntry {
    pub tag: &'static str,
    pub description: String,
    pub readable: bool,
    pub writable: Option<WritableSubtype>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatEntry {
    pub container: Container,
    pub description: &'static str,
    pub subtypes: Vec<SubtypeEntry>,
}

impl FormatEntry {
    pub fn tag(&self) -> &'static str {
        self.container.tag()
    }

    pub fn is_writable(&self) -> bool {
        self.subtypes.iter().any(|s| s.writable.is_some())
    }
}

/// Formats and subtypes this process can read or write
#[derive(Debug, Clone)]
pub struct FormatTable {
    formats: Vec<FormatEntry>,
}

impl FormatTable {
    /// Build the table from the linked codec registry
    pub fn probe() -> Self {
        let registry = get_codecs();
        let formats = KNOWN_FORMATS
            .iter()
            .filter_map(|known| {
                let subtypes: Vec<SubtypeEntry> = known
                    .subtypes
                    .iter()
                    .filter_map(|sub| {
                        let descriptor = registry.get_codec(sub.codec);
                        if descriptor.is_none() && sub.writable.is_none() {
                            return None;
                        }
                        let description = match descriptor {
                            Some(d) => d.long_name.to_string(),
                            None => format!("{} (write only)", sub.tag),
                        };
                        Some(SubtypeEntry {
                            tag: sub.tag,
                            description,
                            readable: descriptor.is_some(),
                            writable: sub.writable,
                        })
                    })
                    .collect();

                if subtypes.is_empty() {
                    None
                } else {
                    Some(FormatEntry {
                        container: known.container,
                        description: known.description,
                        subtypes,
                    })
                }
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Format table: {}",
            formats.iter().map(|f| f.tag()).collect::<Vec<_>>().join(", ")
        );
        Self { formats }
    }

    pub fn entries(&self) -> &[FormatEntry] {
        &self.formats
    }

    /// Case-insensitive lookup
    pub fn find(&self, format: &str) -> Option<&FormatEntry> {
        self.formats.iter().find(|f| f.tag().eq_ignore_ascii_case(format))
    }

    pub fn find_container(&self, container: Container) -> Option<&FormatEntry> {
        self.formats.iter().find(|f| f.container == container)
    }

    /// Format tag to description
    pub fn formats(&self) -> BTreeMap<String, String> {
        self.formats
            .iter()
            .map(|f| (f.tag().to_string(), f.description.to_string()))
            .collect()
    }

    /// Subtype tag to description for one format
    pub fn subtypes(&self, format: &str) -> Result<BTreeMap<String, String>> {
        let entry = self.find(format).ok_or_else(|| {
            WorldBridgeError::unsupported_format(format!("Unknown format '{}'", format))
        })?;
        Ok(entry
            .subtypes
            .iter()
            .map(|s| (s.tag.to_string(), s.description.clone()))
            .collect())
    }

    /// Resolve the subtype to write for a format/subtype request
    pub fn writable(&self, format: Option<&str>, subtype: Option<&str>) -> Result<(Container, WritableSubtype)> {
        let format = format.unwrap_or(DEFAULT_FORMAT);
        let entry = self
            .find(format)
            .filter(|entry| entry.is_writable())
            .ok_or_else(|| {
                WorldBridgeError::unsupported_format(format!("Format '{}' is not writable", format))
            })?;

        let subtype = match subtype {
            None => DEFAULT_SUBTYPE,
            Some(tag) => entry
                .subtypes
                .iter()
                .filter_map(|s| s.writable)
                .find(|w| w.tag().eq_ignore_ascii_case(tag))
                .ok_or_else(|| {
                    WorldBridgeError::unsupported_format(format!(
                        "Subtype '{}' is not writable as {}",
                        tag,
                        entry.tag()
                    ))
                })?,
        };
        Ok((entry.container, subtype))
    }
}

/// Subtype tag for a decoded stream
pub fn decoded_subtype(codec: CodecType, bits_per_sample: Option<u32>) -> &'static str {
    if codec == CODEC_TYPE_FLAC {
        return match bits_per_sample {
            Some(bits) if bits <= 8 => "PCM_S8",
            Some(bits) if bits > 16 => "PCM_24",
            _ => "PCM_16",
        };
    }
    KNOWN_FORMATS
        .iter()
        .flat_map(|f| f.subtypes.iter())
        .find(|s| s.codec == codec)
        .map(|s| s.tag)
        .unwrap_or("UNKNOWN")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_containers() {
        assert_eq!(Container::sniff(b"RIFF\x24\x00\x00\x00WAVEfmt "), Some(Container::Wav));
        assert_eq!(Container::sniff(b"fLaC\x00\x00\x00\x22"), Some(Container::Flac));
        assert_eq!(Container::sniff(b"OggS\x00\x02"), Some(Container::Ogg));
        assert_eq!(Container::sniff(b"ID3\x04\x00"), Some(Container::Mp3));
        assert_eq!(Container::sniff(&[0xFF, 0xFB, 0x90, 0x64]), Some(Container::Mp3));
        assert_eq!(Container::sniff(&[0xFF, 0xF1, 0x50, 0x80]), Some(Container::Aac));
        assert_eq!(Container::sniff(b"RIFF\x24\x00\x00\x00AVI "), None);
        assert_eq!(Container::sniff(b"hello world!"), None);
        assert_eq!(Container::sniff(&[]), None);
    }

    #[test]
    fn test_table_reflects_linked_codecs() {
        let table = FormatTable::probe();
        let formats = table.formats();
        assert!(formats.contains_key("WAV"));
        assert!(formats.contains_key("FLAC"));

        let wav = table.subtypes("wav").unwrap();
        assert!(wav.contains_key("PCM_16"));
        assert!(wav.contains_key("FLOAT"));

        let err = table.subtypes("AIFF").unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_writable_resolution() {
        let table = FormatTable::probe();
        assert_eq!(table.writable(None, None).unwrap(), (Container::Wav, WritableSubtype::Pcm16));
        assert_eq!(
            table.writable(Some("wav"), Some("float")).unwrap(),
            (Container::Wav, WritableSubtype::Float)
        );
        assert_eq!(table.writable(Some("FLAC"), None).unwrap_err().kind(), "UnsupportedFormat");
        assert_eq!(table.writable(Some("WAV"), Some("ULAW")).unwrap_err().kind(), "UnsupportedFormat");
        assert_eq!(table.writable(Some("XYZ"), None).unwrap_err().kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_decoded_subtype_names() {
        assert_eq!(decoded_subtype(CODEC_TYPE_PCM_S16LE, Some(16)), "PCM_16");
        assert_eq!(decoded_subtype(CODEC_TYPE_FLAC, Some(24)), "PCM_24");
        assert_eq!(decoded_subtype(CODEC_TYPE_FLAC, Some(8)), "PCM_S8");
        assert_eq!(decoded_subtype(CODEC_TYPE_VORBIS, None), "VORBIS");
    }
}
