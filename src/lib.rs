//! # scdkit
//!
//! Reader, re-muxer and in-place patcher for SCD audio containers.
//!
//! An SCD file wraps one or more audio entries (Ogg Vorbis or MS-ADPCM)
//! behind a table of absolute offsets. This library can:
//!
//! - **Re-encode**: replace every audio entry from a WAV source, rebuilding the
//!   Vorbis seek table, header obfuscation and loop fields
//! - **Edit loops in place**: rewrite the sample-accurate loop of a Vorbis entry
//!   without touching the audio
//! - **Patch volume**: overwrite the per-entry volume multipliers
//! - **Tag WAVs**: read and write `smpl` loop chunks, with fallbacks for
//!   `LoopStart`/`LoopEnd` text tags
//!
//! ## Example
//!
//! ```no_run
//! use scdkit::{CommandTranscoder, LoopPatcher, ScdEncoder, TranscoderConfig};
//! use std::path::Path;
//!
//! // Move the loop of an existing track
//! LoopPatcher::write_file(Path::new("music.scd"), 88200, 1_323_000).unwrap();
//!
//! // Or rebuild the container from a new WAV
//! let encoder = ScdEncoder::new(CommandTranscoder::new(TranscoderConfig::from_env()));
//! let bytes = encoder
//!     .encode(Path::new("music.scd"), Path::new("new.wav"), 10, false)
//!     .unwrap();
//! std::fs::write("out.scd", bytes).unwrap();
//! ```
//!
//! ## Loop conventions
//!
//! Loop points are kept with an *exclusive* end, which may equal the total
//! sample count. Sources that store an inclusive end (`total - 1`) are fixed
//! up by [`normalize_loop`]; nothing else is adjusted.

pub mod binary;
pub mod container;
pub mod encoder;
mod error;
pub mod msadpcm;
pub mod patch;
pub mod transcoder;
pub mod vorbis;
pub mod wav;

pub use container::{
    codec_of, first_real_entry, read_info, read_info_file, Codec, EntryRange, LoopUnit,
    ScdContainer, ScdInfo, SENTINEL_CODEC,
};
pub use encoder::{AudioTranscoder, ScdEncoder, MAX_QUALITY};
pub use error::{Error, Result};
pub use msadpcm::mux_msadpcm_entry;
pub use patch::{db_to_multiplier, read_volumes, LoopPatcher, VolumePatcher};
pub use transcoder::{CommandTranscoder, TranscoderConfig};
pub use vorbis::mux_vorbis_entry;
pub use wav::{WavLoopChunk, WavLoopInfo};

use serde::Serialize;

/// Loop region in samples, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoopPoints {
    pub start: u32,
    pub end: u32,
}

impl LoopPoints {
    /// Create loop points, rejecting `end <= start`.
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if end <= start {
            return Err(Error::range(format!(
                "loop end ({}) must be greater than loop start ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// Length of the loop region in samples.
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Basic stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioMetadata {
    pub sample_rate: u32,
    pub channels: u32,
    /// Total sample frames; 0 when unknown.
    pub total_samples: u32,
}

impl AudioMetadata {
    /// Metadata if both sample rate and channel count are known.
    pub fn known(sample_rate: u32, channels: u32, total_samples: u32) -> Option<Self> {
        if sample_rate == 0 || channels == 0 {
            return None;
        }
        Some(Self {
            sample_rate,
            channels,
            total_samples,
        })
    }
}

/// Reconcile a raw loop with the stream length.
///
/// An end of exactly `total_samples - 1` is read as an inclusive end and
/// promoted to `total_samples`. The end is then clamped to
/// `[1, total_samples]` and the start to `[0, end - 1]`. A `total_samples`
/// of 0 means the length is unknown; only the ordering is enforced then.
pub fn normalize_loop(raw_start: u32, raw_end: u32, total_samples: u32) -> LoopPoints {
    if total_samples == 0 {
        let end = raw_end.max(1);
        return LoopPoints {
            start: raw_start.min(end - 1),
            end,
        };
    }

    let mut end = raw_end;
    if end == total_samples - 1 {
        end = total_samples;
    }
    let end = end.clamp(1, total_samples);
    let start = raw_start.min(end - 1);

    LoopPoints { start, end }
}
