//! WAV loop metadata.
//!
//! Loops are read from, in order of preference:
//!
//! 1. a standard `smpl` chunk (first sample loop record)
//! 2. `LoopStart=`/`LoopEnd=` text in a `LIST` chunk (Audacity and friends)
//! 3. literal `LoopStart`/`LoopEnd` tags followed by digits anywhere in the file
//!
//! Writing always produces a `smpl` chunk.
//!
//! smpl chunk layout (offsets from the chunk id):
//! ```text
//! 0x00 "smpl"           0x04 chunk size
//! 0x08 manufacturer     0x0C product          0x10 sample period (ns)
//! 0x14 MIDI unity note  0x18 MIDI pitch frac  0x1C SMPTE format
//! 0x20 SMPTE offset     0x24 loop count       0x28 sampler data size
//! 0x2C first loop: cue id, type, start, end, fraction, play count
//! ```

use crate::binary::{read_u16, read_u32, write_len, write_u32};
use crate::{AudioMetadata, Error, LoopPoints, Result};
use encoding_rs::{UTF_8, WINDOWS_1252};
use regex::Regex;
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Smallest file accepted as a WAV (canonical 44-byte header).
pub const MIN_WAV_SIZE: usize = 44;

/// smpl header bytes after the chunk id and size.
const SMPL_HEADER_SIZE: usize = 36;
/// One sample loop record.
const SMPL_LOOP_SIZE: usize = 24;
/// Offset of the first loop record from the chunk id.
const SMPL_FIRST_LOOP: usize = 8 + SMPL_HEADER_SIZE;

const MIDI_UNITY_NOTE: u32 = 60;

/// Loop and format information read from a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WavLoopInfo {
    pub loop_points: Option<LoopPoints>,
    pub metadata: Option<AudioMetadata>,
}

/// Reader/writer for WAV loop metadata.
pub struct WavLoopChunk;

impl WavLoopChunk {
    /// Read loop points and stream parameters from WAV bytes.
    pub fn read(data: &[u8]) -> Result<WavLoopInfo> {
        if data.len() < MIN_WAV_SIZE {
            return Err(Error::format(format!(
                "WAV of {} bytes is shorter than a {}-byte header",
                data.len(),
                MIN_WAV_SIZE
            )));
        }

        let metadata = read_metadata(data);

        let loop_points = if let Some(lp) = read_smpl_loop(data) {
            tracing::debug!(start = lp.start, end = lp.end, "loop from smpl chunk");
            Some(lp)
        } else if let Some(lp) = read_list_loop(data) {
            tracing::debug!(start = lp.start, end = lp.end, "loop from LIST text tags");
            Some(lp)
        } else if let Some(lp) = read_tag_loop(data) {
            tracing::debug!(start = lp.start, end = lp.end, "loop from raw tags");
            Some(lp)
        } else {
            None
        };

        Ok(WavLoopInfo {
            loop_points,
            metadata,
        })
    }

    /// Read loop points and stream parameters from a WAV file.
    pub fn read_file(path: &Path) -> Result<WavLoopInfo> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }
        let data = fs::read(path)?;
        Self::read(&data)
    }

    /// Store a forward loop in the file's `smpl` chunk.
    pub fn write(path: &Path, start: u32, end: u32) -> Result<()> {
        if end <= start {
            return Err(Error::range(format!(
                "loop end ({}) must be greater than loop start ({})",
                end, start
            )));
        }
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let data = fs::read(path)?;
        let updated = Self::write_bytes(&data, start, end)?;
        fs::write(path, updated)?;

        tracing::info!(path = %path.display(), start, end, "wrote smpl loop");
        Ok(())
    }

    /// Return a copy of `data` carrying a forward loop in its `smpl` chunk.
    ///
    /// An existing chunk with room for one loop record is overwritten in
    /// place; a smaller one is dropped and a fresh chunk is appended.
    pub fn write_bytes(data: &[u8], start: u32, end: u32) -> Result<Vec<u8>> {
        let loop_points = LoopPoints::new(start, end)?;

        if data.len() < MIN_WAV_SIZE {
            return Err(Error::format("invalid WAV file: shorter than 44 bytes"));
        }

        let sample_rate = read_metadata(data)
            .map(|m| m.sample_rate)
            .or_else(|| read_u32(data, 0x18).ok().filter(|&r| r > 0))
            .ok_or_else(|| Error::format("sample rate not found in WAV header"))?;

        let mut buffer = data.to_vec();

        if let Some(offset) = find_chunk(data, b"smpl") {
            let chunk_size = read_u32(data, offset + 4)? as usize;
            let required = SMPL_HEADER_SIZE + SMPL_LOOP_SIZE;

            if chunk_size >= required && offset + 8 + required <= data.len() {
                fill_smpl(&mut buffer, offset, sample_rate, loop_points)?;
                return Ok(buffer);
            }

            tracing::warn!(
                chunk_size,
                "existing smpl chunk has no room for a loop record, replacing it"
            );
            let padded = chunk_size + (chunk_size & 1);
            let chunk_end = (offset + 8).saturating_add(padded).min(buffer.len());
            buffer.drain(offset..chunk_end);
        }

        if buffer.len() % 2 == 1 {
            buffer.push(0);
        }
        let chunk_start = buffer.len();
        buffer.resize(chunk_start + 8 + SMPL_HEADER_SIZE + SMPL_LOOP_SIZE, 0);
        buffer[chunk_start..chunk_start + 4].copy_from_slice(b"smpl");
        write_len(&mut buffer, SMPL_HEADER_SIZE + SMPL_LOOP_SIZE, chunk_start + 4)?;
        write_u32(&mut buffer, MIDI_UNITY_NOTE, chunk_start + 0x14)?;
        fill_smpl(&mut buffer, chunk_start, sample_rate, loop_points)?;

        let riff_size = buffer.len() - 8;
        write_len(&mut buffer, riff_size, 4)?;

        Ok(buffer)
    }
}

/// Nanoseconds per sample, rounded, never below 1.
fn sample_period(sample_rate: u32) -> u32 {
    ((1_000_000_000.0 / f64::from(sample_rate)).round() as u32).max(1)
}

fn fill_smpl(buf: &mut [u8], offset: usize, sample_rate: u32, lp: LoopPoints) -> Result<()> {
    write_u32(buf, sample_period(sample_rate), offset + 0x10)?;
    write_u32(buf, 1, offset + 0x24)?; // loop count
    write_u32(buf, 0, offset + 0x28)?; // sampler data

    let first = offset + SMPL_FIRST_LOOP;
    write_u32(buf, 0, first)?; // cue point id
    write_u32(buf, 0, first + 4)?; // forward
    write_u32(buf, lp.start, first + 8)?;
    write_u32(buf, lp.end, first + 12)?;
    write_u32(buf, 0, first + 16)?; // fraction
    write_u32(buf, 0, first + 20)?; // play count, 0 = infinite
    Ok(())
}

fn is_riff(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Offsets of every top-level chunk with the given id.
fn riff_chunks(data: &[u8], id: &[u8; 4]) -> Vec<usize> {
    let mut found = Vec::new();
    if !is_riff(data) {
        return found;
    }

    let mut pos = 12;
    while pos + 8 <= data.len() {
        if &data[pos..pos + 4] == id {
            found.push(pos);
        }
        let size = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        match pos.checked_add(8 + size + (size & 1)) {
            Some(next) if next > pos => pos = next,
            _ => break,
        }
    }

    found
}

/// Locate a chunk by walking the RIFF structure, falling back to a raw
/// byte search for files whose chunk sizes do not add up.
pub fn find_chunk(data: &[u8], id: &[u8; 4]) -> Option<usize> {
    riff_chunks(data, id)
        .first()
        .copied()
        .or_else(|| crate::binary::find_pattern(data, id, if is_riff(data) { 12 } else { 0 }))
}

fn read_metadata(data: &[u8]) -> Option<AudioMetadata> {
    let fmt = find_chunk(data, b"fmt ");

    let (channels, sample_rate) = match fmt {
        Some(f) => (read_u16(data, f + 10).ok()?, read_u32(data, f + 12).ok()?),
        None => (read_u16(data, 0x16).ok()?, read_u32(data, 0x18).ok()?),
    };
    let channels = u32::from(channels);

    let total_samples = fmt
        .zip(find_chunk(data, b"data"))
        .and_then(|(f, d)| {
            let byte_rate = u64::from(read_u32(data, f + 16).ok()?);
            let bits = u64::from(read_u16(data, f + 22).ok()?);
            let declared = u64::from(read_u32(data, d + 4).ok()?);
            let available = data.len().saturating_sub(d + 8) as u64;
            let bytes = declared.min(available);

            if bits > 0 && channels > 0 {
                Some(bytes * 8 / (bits * u64::from(channels)))
            } else if byte_rate > 0 && sample_rate > 0 {
                Some(bytes * u64::from(sample_rate) / byte_rate)
            } else {
                None
            }
        })
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0);

    AudioMetadata::known(sample_rate, channels, total_samples)
}

fn read_smpl_loop(data: &[u8]) -> Option<LoopPoints> {
    let offset = find_chunk(data, b"smpl")?;
    if offset + 8 + SMPL_HEADER_SIZE > data.len() {
        return None;
    }

    // Some writers put the loop count in the SMPTE format slot.
    let loop_count = read_u32(data, offset + 0x24).ok()?;
    let legacy_count = read_u32(data, offset + 0x1C).ok()?;
    if loop_count == 0 && legacy_count == 0 {
        return None;
    }

    let first = offset + SMPL_FIRST_LOOP;
    let start = read_u32(data, first + 8).ok()?;
    let end = read_u32(data, first + 12).ok()?;
    LoopPoints::new(start, end).ok()
}

fn loop_regexes() -> &'static (Regex, Regex) {
    static REGEXES: OnceLock<(Regex, Regex)> = OnceLock::new();
    REGEXES.get_or_init(|| {
        (
            Regex::new(r"(?i)LoopStart[=:\s]+(\d+)").expect("valid regex"),
            Regex::new(r"(?i)LoopEnd[=:\s]+(\d+)").expect("valid regex"),
        )
    })
}

/// Decode `LIST` text as UTF-8, falling back to Windows-1252 for bytes
/// that are not valid UTF-8.
fn decode_list_text(body: &[u8]) -> Cow<'_, str> {
    UTF_8
        .decode_without_bom_handling_and_without_replacement(body)
        .unwrap_or_else(|| WINDOWS_1252.decode_without_bom_handling(body).0)
}

fn read_list_loop(data: &[u8]) -> Option<LoopPoints> {
    let mut lists = riff_chunks(data, b"LIST");
    if lists.is_empty() {
        lists.extend(crate::binary::find_pattern(data, b"LIST", 0));
    }

    lists.into_iter().find_map(|offset| {
        let size = read_u32(data, offset + 4).ok()? as usize;
        let end = (offset + 8).saturating_add(size).min(data.len());
        let body = data.get(offset + 8..end)?;

        let text = decode_list_text(body);

        let (start_re, end_re) = loop_regexes();
        let start = start_re.captures(&text)?.get(1)?.as_str().parse().ok()?;
        let end = end_re.captures(&text)?.get(1)?.as_str().parse().ok()?;
        LoopPoints::new(start, end).ok()
    })
}

fn read_tag_loop(data: &[u8]) -> Option<LoopPoints> {
    let start = crate::binary::find_tag_value("LoopStart", data)?;
    let end = crate::binary::find_tag_value("LoopEnd", data)?;
    LoopPoints::new(u32::try_from(start).ok()?, u32::try_from(end).ok()?).ok()
}

/// Loop spanning the whole `data` chunk: `0..data_size / block_align`.
pub fn full_loop_points(wav: &[u8]) -> Option<LoopPoints> {
    let fmt = find_chunk(wav, b"fmt ")?;
    let data = find_chunk(wav, b"data")?;

    let block_align = u32::from(read_u16(wav, fmt + 20).ok()?);
    let data_size = read_u32(wav, data + 4).ok()?;
    if block_align == 0 || data_size as usize >= wav.len() {
        return None;
    }

    LoopPoints::new(0, data_size / block_align).ok()
}
