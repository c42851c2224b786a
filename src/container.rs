//! SCD container table structure.
//!
//! SCD layout (fields used here, all little-endian):
//! ```text
//! 0x0E  u16  offset of the tables region
//! 0x10  u32  total container size
//! 0x50  u32  offset of the volume pointer table
//! tables + 0x04  u16  entry count
//! tables + 0x0C  u32  offset of the entry-offset table
//! entry table    u32 * N  absolute entry offsets, ascending
//! ```
//!
//! Each entry starts with a 0x20-byte metadata header:
//! ```text
//! +0x00 u32 stream size      +0x04 u8  channels     +0x08 u32 sample rate
//! +0x0C u32 codec tag        +0x10 u32 loop start   +0x14 u32 loop end   (bytes)
//! +0x18 u32 extra data size  +0x1C u32 aux chunk count
//! ```
//! With an aux chunk, `+0x28`/`+0x2C` hold the sample-accurate loop and
//! `+0x30` the marker count, followed by marker positions at `+0x34`.

use crate::binary::{read_u16, read_u32, read_u8};
use crate::{AudioMetadata, Error, LoopPoints, Result};
use serde::Serialize;
use std::fs;
use std::ops::Range;
use std::path::Path;

/// Smallest buffer that can hold the fixed header fields.
pub const MIN_CONTAINER_SIZE: usize = 0x20;

pub(crate) const TABLES_OFFSET_FIELD: usize = 0x0E;
pub(crate) const TOTAL_SIZE_FIELD: usize = 0x10;

/// Codec tag marking an entry that carries no audio stream.
pub const SENTINEL_CODEC: u32 = 0xFFFF_FFFF;

/// Entry metadata offsets, relative to the entry start.
pub(crate) mod meta {
    pub const STREAM_SIZE: usize = 0x00;
    pub const CHANNELS: usize = 0x04;
    pub const SAMPLE_RATE: usize = 0x08;
    pub const CODEC: usize = 0x0C;
    pub const LOOP_START_BYTES: usize = 0x10;
    pub const LOOP_END_BYTES: usize = 0x14;
    pub const EXTRA_DATA_SIZE: usize = 0x18;
    pub const AUX_CHUNK_COUNT: usize = 0x1C;
    pub const EXTRA_DATA: usize = 0x20;
    pub const AUX_CHUNK_SIZE: usize = 0x24;
    pub const AUX_LOOP_START: usize = 0x28;
    pub const AUX_LOOP_END: usize = 0x2C;
    pub const MARK_COUNT: usize = 0x30;
    pub const MARKS: usize = 0x34;
}

/// Audio codec of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Vorbis,
    MsAdpcm,
    /// Any other tag, or no real entry at all (`None`).
    Unknown(Option<u32>),
}

impl Codec {
    pub const VORBIS_TAG: u32 = 0x6;
    pub const MS_ADPCM_TAG: u32 = 0xC;

    pub fn from_tag(tag: u32) -> Self {
        match tag {
            Self::VORBIS_TAG => Codec::Vorbis,
            Self::MS_ADPCM_TAG => Codec::MsAdpcm,
            other => Codec::Unknown(Some(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Vorbis => "Ogg Vorbis",
            Codec::MsAdpcm => "MS-ADPCM",
            Codec::Unknown(_) => "Unknown",
        }
    }
}

/// Byte range of one entry inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRange {
    pub index: usize,
    pub begin: usize,
    pub end: usize,
}

impl EntryRange {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.begin..self.end
    }

    /// Codec tag of the entry; `None` when the entry is too short to carry one.
    pub fn codec_tag(&self, buf: &[u8]) -> Option<u32> {
        if self.len() < meta::CODEC + 4 {
            return None;
        }
        read_u32(buf, self.begin + meta::CODEC).ok()
    }

    /// Whether the entry carries an audio stream.
    pub fn is_real(&self, buf: &[u8]) -> bool {
        matches!(self.codec_tag(buf), Some(tag) if tag != SENTINEL_CODEC)
    }
}

/// Parsed table structure of an SCD buffer.
#[derive(Debug, Clone)]
pub struct ScdContainer {
    pub tables_offset: usize,
    pub entry_count: usize,
    pub entry_table_offset: usize,
    pub entries: Vec<EntryRange>,
}

impl ScdContainer {
    /// Locate the entry table and compute every entry's byte range.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < MIN_CONTAINER_SIZE {
            return Err(Error::format(format!(
                "buffer of {} bytes is too small for an SCD container",
                buf.len()
            )));
        }

        let tables_offset = read_u16(buf, TABLES_OFFSET_FIELD)? as usize;
        let entry_count = read_u16(buf, tables_offset + 0x04)? as usize;
        let entry_table_offset = read_u32(buf, tables_offset + 0x0C)? as usize;

        let offsets = (0..entry_count)
            .map(|i| read_u32(buf, entry_table_offset + i * 4).map(|v| v as usize))
            .collect::<Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(entry_count);
        for (index, &begin) in offsets.iter().enumerate() {
            let end = offsets.get(index + 1).copied().unwrap_or(buf.len());
            if begin > end || end > buf.len() {
                return Err(Error::format(format!(
                    "entry {} has invalid range 0x{:X}..0x{:X} (container is {} bytes)",
                    index,
                    begin,
                    end,
                    buf.len()
                )));
            }
            entries.push(EntryRange { index, begin, end });
        }

        Ok(ScdContainer {
            tables_offset,
            entry_count,
            entry_table_offset,
            entries,
        })
    }

    /// First entry whose codec tag is not the sentinel.
    pub fn first_real(&self, buf: &[u8]) -> Option<EntryRange> {
        self.entries.iter().copied().find(|e| e.is_real(buf))
    }

    /// Codec of the first real entry.
    pub fn codec(&self, buf: &[u8]) -> Codec {
        self.first_real(buf)
            .and_then(|e| e.codec_tag(buf))
            .map_or(Codec::Unknown(None), Codec::from_tag)
    }

    /// Offset where the entry data begins; everything before it is header.
    pub fn data_start(&self) -> Option<usize> {
        self.entries.first().map(|e| e.begin)
    }
}

/// Codec of the first real entry in `buf`.
pub fn codec_of(buf: &[u8]) -> Result<Codec> {
    let container = ScdContainer::parse(buf)?;
    Ok(container.codec(buf))
}

/// Copy of the first real entry's bytes.
pub fn first_real_entry(buf: &[u8]) -> Result<Option<Vec<u8>>> {
    let container = ScdContainer::parse(buf)?;
    Ok(container
        .first_real(buf)
        .map(|entry| buf[entry.range()].to_vec()))
}

/// Unit of reported loop points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopUnit {
    /// Sample indices from the aux chunk.
    Samples,
    /// Coarse byte offsets into the Vorbis audio stream.
    Bytes,
}

/// Summary of an SCD file's first real entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScdInfo {
    pub codec: Codec,
    pub entry_count: usize,
    pub audio_entries: usize,
    pub loop_points: Option<LoopPoints>,
    pub loop_unit: Option<LoopUnit>,
    pub metadata: Option<AudioMetadata>,
}

/// Read codec, loop points and audio metadata from an SCD buffer.
pub fn read_info(buf: &[u8]) -> Result<ScdInfo> {
    let container = ScdContainer::parse(buf)?;
    let codec = container.codec(buf);
    let audio_entries = container.entries.iter().filter(|e| e.is_real(buf)).count();

    let mut info = ScdInfo {
        codec,
        entry_count: container.entry_count,
        audio_entries,
        loop_points: None,
        loop_unit: None,
        metadata: None,
    };

    let Some(range) = container.first_real(buf) else {
        return Ok(info);
    };
    let entry = &buf[range.range()];

    let channels = read_u8(entry, meta::CHANNELS)?;
    let sample_rate = read_u32(entry, meta::SAMPLE_RATE)?;

    match codec {
        Codec::Vorbis => {
            let has_aux = read_u32(entry, meta::AUX_CHUNK_COUNT)? > 0;
            let (start, end, unit) = if has_aux {
                (
                    read_u32(entry, meta::AUX_LOOP_START)?,
                    read_u32(entry, meta::AUX_LOOP_END)?,
                    LoopUnit::Samples,
                )
            } else {
                (
                    read_u32(entry, meta::LOOP_START_BYTES)?,
                    read_u32(entry, meta::LOOP_END_BYTES)?,
                    LoopUnit::Bytes,
                )
            };

            if end > start {
                info.loop_points = Some(LoopPoints { start, end });
                info.loop_unit = Some(unit);
            }

            let total_samples = if has_aux { end } else { 0 };
            info.metadata = AudioMetadata::known(sample_rate, u32::from(channels), total_samples);
        }
        Codec::MsAdpcm => {
            info.metadata = AudioMetadata::known(sample_rate, u32::from(channels), 0);
        }
        Codec::Unknown(_) => {}
    }

    Ok(info)
}

/// Read [`ScdInfo`] from an SCD file.
pub fn read_info_file(path: &Path) -> Result<ScdInfo> {
    if !path.exists() {
        return Err(Error::file_not_found(path));
    }
    let data = fs::read(path)?;
    read_info(&data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::binary::{write_u32, write_uint, Width};

    /// Header with the tables region at 0x30 and the entry table at 0x40.
    pub(crate) fn container(entries: &[Vec<u8>]) -> Vec<u8> {
        let data_start = 0x40 + entries.len() * 4;
        let mut buf = vec![0u8; data_start];
        write_uint(&mut buf, 0x30, Width::U16, TABLES_OFFSET_FIELD).unwrap();
        write_uint(&mut buf, entries.len() as u32, Width::U16, 0x34).unwrap();
        write_u32(&mut buf, 0x40, 0x3C).unwrap();

        let mut offset = data_start;
        for (i, entry) in entries.iter().enumerate() {
            write_u32(&mut buf, offset as u32, 0x40 + i * 4).unwrap();
            offset += entry.len();
        }
        for entry in entries {
            buf.extend_from_slice(entry);
        }
        let total = buf.len() as u32;
        write_u32(&mut buf, total, TOTAL_SIZE_FIELD).unwrap();
        buf
    }

    pub(crate) fn entry(codec: u32, len: usize) -> Vec<u8> {
        let mut e = vec![0u8; len];
        write_u32(&mut e, codec, meta::CODEC).unwrap();
        e
    }

    #[test]
    fn test_parse_entry_ranges() {
        let buf = container(&[entry(SENTINEL_CODEC, 0x20), entry(0x6, 0x40)]);
        let scd = ScdContainer::parse(&buf).unwrap();

        assert_eq!(scd.entry_count, 2);
        assert_eq!(scd.entry_table_offset, 0x40);
        assert_eq!(scd.entries[0].range(), 0x48..0x68);
        assert_eq!(scd.entries[1].range(), 0x68..buf.len());
        assert_eq!(scd.data_start(), Some(0x48));
    }

    #[test]
    fn test_codec_skips_sentinel_entries() {
        let buf = container(&[entry(SENTINEL_CODEC, 0x20), entry(0xC, 0x40)]);
        assert_eq!(codec_of(&buf).unwrap(), Codec::MsAdpcm);

        let first = first_real_entry(&buf).unwrap().unwrap();
        assert_eq!(first.len(), 0x40);
    }

    #[test]
    fn test_codec_unknown_without_real_entries() {
        let buf = container(&[entry(SENTINEL_CODEC, 0x20)]);
        assert_eq!(codec_of(&buf).unwrap(), Codec::Unknown(None));
        assert!(first_real_entry(&buf).unwrap().is_none());
    }

    #[test]
    fn test_too_small_is_format_error() {
        assert!(matches!(
            ScdContainer::parse(&[0u8; 0x1F]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_descending_offsets_rejected() {
        let mut buf = container(&[entry(0x6, 0x20), entry(0x6, 0x20)]);
        write_u32(&mut buf, 0x10, 0x44).unwrap();
        assert!(matches!(ScdContainer::parse(&buf), Err(Error::Format(_))));
    }

    #[test]
    fn test_read_info_vorbis_aux_loop() {
        let mut e = entry(0x6, 0x60);
        write_uint(&mut e, 2, Width::U8, meta::CHANNELS).unwrap();
        write_u32(&mut e, 44100, meta::SAMPLE_RATE).unwrap();
        write_u32(&mut e, 1, meta::AUX_CHUNK_COUNT).unwrap();
        write_u32(&mut e, 1000, meta::AUX_LOOP_START).unwrap();
        write_u32(&mut e, 5000, meta::AUX_LOOP_END).unwrap();
        let buf = container(&[e]);

        let info = read_info(&buf).unwrap();
        assert_eq!(info.codec, Codec::Vorbis);
        assert_eq!(info.loop_points, Some(LoopPoints { start: 1000, end: 5000 }));
        assert_eq!(info.loop_unit, Some(LoopUnit::Samples));
        let meta = info.metadata.unwrap();
        assert_eq!((meta.sample_rate, meta.channels, meta.total_samples), (44100, 2, 5000));
    }

    #[test]
    fn test_read_info_vorbis_byte_loop() {
        let mut e = entry(0x6, 0x40);
        write_uint(&mut e, 1, Width::U8, meta::CHANNELS).unwrap();
        write_u32(&mut e, 48000, meta::SAMPLE_RATE).unwrap();
        write_u32(&mut e, 0, meta::LOOP_START_BYTES).unwrap();
        write_u32(&mut e, 0x800, meta::LOOP_END_BYTES).unwrap();
        let buf = container(&[e]);

        let info = read_info(&buf).unwrap();
        assert_eq!(info.loop_points, Some(LoopPoints { start: 0, end: 0x800 }));
        assert_eq!(info.loop_unit, Some(LoopUnit::Bytes));
        assert_eq!(info.metadata.unwrap().total_samples, 0);
    }
}
