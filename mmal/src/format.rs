// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Elementary stream format descriptors.
//!
//! Each port carries one [`EsFormat`]. Clients edit it through
//! [`crate::Port::format_mut`] and push it to the implementation with
//! [`crate::Port::format_commit`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A four-character code identifying an encoding or an event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// The "unset" code.
    pub const UNKNOWN: FourCc = FourCc([0; 4]);

    /// Builds a code from its four characters.
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(*code)
    }

    /// Whether this is [`FourCc::UNKNOWN`].
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Common encodings.
pub mod encoding {
    use super::FourCc;

    pub const H264: FourCc = FourCc::new(b"H264");
    pub const MP4A: FourCc = FourCc::new(b"MP4A");
    pub const I420: FourCc = FourCc::new(b"I420");
    pub const RGBA: FourCc = FourCc::new(b"RGBA");
    pub const PCM_S16LE: FourCc = FourCc::new(b"s16l");
    /// Opaque handles instead of pixel memory.
    pub const OPAQUE: FourCc = FourCc::new(b"OPQV");
}

/// Elementary stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EsType {
    #[default]
    Unknown,
    Control,
    Audio,
    Video,
    Subpicture,
}

/// A rational number (frame rates, aspect ratios).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

/// A rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Video-specific format fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub crop: Rect,
    pub frame_rate: Rational,
    pub par: Rational,
}

/// Audio-specific format fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub block_align: u32,
}

/// Subpicture-specific format fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubpictureFormat {
    pub x_offset: u32,
    pub y_offset: u32,
}

/// Stream-specific part of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EsSpecific {
    #[default]
    None,
    Video(VideoFormat),
    Audio(AudioFormat),
    Subpicture(SubpictureFormat),
}

/// Complete description of an elementary stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EsFormat {
    pub es_type: EsType,
    pub encoding: FourCc,
    pub encoding_variant: FourCc,
    pub bitrate: u32,
    pub flags: u32,
    pub es: EsSpecific,
    pub extradata: Vec<u8>,
}

/// Groups of fields that differ between two formats.
///
/// Returned by [`EsFormat::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatChanges {
    pub es_type: bool,
    pub encoding: bool,
    pub bitrate: bool,
    pub flags: bool,
    pub es_specific: bool,
    pub extradata: bool,
}

impl FormatChanges {
    /// Whether nothing differs.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl EsFormat {
    /// Creates a video format of the given encoding and size.
    ///
    /// # Examples
    ///
    /// ```
    /// use mmal::format::{encoding, EsFormat};
    ///
    /// let format = EsFormat::new_video(encoding::I420, 640, 480);
    /// assert_eq!(format.video().unwrap().width, 640);
    /// ```
    pub fn new_video(encoding: FourCc, width: u32, height: u32) -> Self {
        Self {
            es_type: EsType::Video,
            encoding,
            es: EsSpecific::Video(VideoFormat {
                width,
                height,
                crop: Rect {
                    x: 0,
                    y: 0,
                    width: width as i32,
                    height: height as i32,
                },
                frame_rate: Rational::new(0, 1),
                par: Rational::new(1, 1),
            }),
            ..Default::default()
        }
    }

    /// Creates an audio format.
    pub fn new_audio(encoding: FourCc, channels: u32, sample_rate: u32) -> Self {
        Self {
            es_type: EsType::Audio,
            encoding,
            es: EsSpecific::Audio(AudioFormat {
                channels,
                sample_rate,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Video fields, if this is a video format.
    pub fn video(&self) -> Option<&VideoFormat> {
        match &self.es {
            EsSpecific::Video(video) => Some(video),
            _ => None,
        }
    }

    /// Mutable video fields, if this is a video format.
    pub fn video_mut(&mut self) -> Option<&mut VideoFormat> {
        match &mut self.es {
            EsSpecific::Video(video) => Some(video),
            _ => None,
        }
    }

    /// Audio fields, if this is an audio format.
    pub fn audio(&self) -> Option<&AudioFormat> {
        match &self.es {
            EsSpecific::Audio(audio) => Some(audio),
            _ => None,
        }
    }

    /// Reports which groups of fields differ from `other`.
    pub fn compare(&self, other: &EsFormat) -> FormatChanges {
        FormatChanges {
            es_type: self.es_type != other.es_type,
            encoding: self.encoding != other.encoding
                || self.encoding_variant != other.encoding_variant,
            bitrate: self.bitrate != other.bitrate,
            flags: self.flags != other.flags,
            es_specific: self.es != other.es,
            extradata: self.extradata != other.extradata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_reports_size_change_as_es_specific() {
        let small = EsFormat::new_video(encoding::I420, 320, 240);
        let large = EsFormat::new_video(encoding::I420, 640, 480);
        let changes = small.compare(&large);
        assert!(changes.es_specific);
        assert!(!changes.encoding);
        assert!(small.compare(&small.clone()).is_empty());
    }

    #[test]
    fn fourcc_displays_printable_characters() {
        assert_eq!(encoding::H264.to_string(), "H264");
        assert_eq!(FourCc::UNKNOWN.to_string(), "....");
    }

    #[test]
    fn format_serializes_to_json() {
        let format = EsFormat::new_audio(encoding::PCM_S16LE, 2, 48000);
        let json = serde_json::to_string(&format).unwrap();
        let back: EsFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back.audio().unwrap().sample_rate, 48000);
    }
}
