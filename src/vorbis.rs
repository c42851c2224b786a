//! Ogg Vorbis entry re-muxing.
//!
//! A Vorbis entry stores the transcoded Ogg file split in two: the header
//! pages (identification, comment and setup packets), optionally XOR'd with
//! the entry's encode byte, followed by the untouched audio pages. In front of
//! them sit the metadata header, the optional aux chunk and a seek table:
//!
//! ```text
//! 0x00                 metadata header (0x20 bytes)
//! 0x20                 aux chunk (aux size bytes, optional)
//! extra                seek header (0x20 bytes)
//!   extra + 0x02  u8   encode byte (XOR key, 0 = plain)
//!   extra + 0x10  u32  seek table size in bytes
//!   extra + 0x14  u32  Vorbis header size
//! extra + 0x20         seek table (u32 byte offsets into the audio pages)
//!                      Vorbis header pages
//!                      Ogg audio pages
//! ```

use crate::binary::{
    find_pattern, find_tag_value, read_u32, read_u64, read_u8, write_len, write_u32, write_u8,
};
use crate::container::meta;
use crate::{Error, LoopPoints, Result};

const OGG_SIGNATURE: &[u8; 4] = b"OggS";

/// Setup header packet: type 5 followed by "vorbis".
const SETUP_SIGNATURE: &[u8; 7] = b"\x05vorbis";

const HEADER_TYPE_CONTINUATION: u8 = 0x01;

/// Minimum granule distance between two seek table entries.
pub const SEEK_INTERVAL: u64 = 2048;

/// Granule value of a page on which no packet ends.
const GRANULE_UNSET: u64 = u64::MAX;

/// Channel count and sample rate inside the identification header page.
const ID_CHANNELS: usize = 0x27;
const ID_SAMPLE_RATE: usize = 0x28;

const SEEK_HEADER_SIZE: usize = 0x20;
const SEEK_ENCODE_BYTE: usize = 0x02;
const SEEK_TABLE_SIZE: usize = 0x10;
const SEEK_VORBIS_HEADER_SIZE: usize = 0x14;

/// Entry lengths are padded to this boundary.
pub const ENTRY_ALIGNMENT: usize = 16;

/// Position of an Ogg page and its granule position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OggPage {
    pub offset: usize,
    pub granule_position: u64,
}

impl OggPage {
    fn read(ogg: &[u8], offset: usize) -> Self {
        OggPage {
            offset,
            granule_position: read_u64(ogg, offset + 0x06).unwrap_or(0),
        }
    }

    fn has_granule(&self) -> bool {
        self.granule_position != GRANULE_UNSET
    }
}

/// Full length of the page at `offset` (header, segment table and body).
fn page_length(ogg: &[u8], offset: usize) -> Option<usize> {
    let segments = *ogg.get(offset + 26)? as usize;
    let table = ogg.get(offset + 27..offset + 27 + segments)?;
    Some(27 + segments + table.iter().map(|&s| s as usize).sum::<usize>())
}

/// Offsets of every Ogg page at or after `from`.
///
/// Pages are followed by their length; when a length does not lead to the
/// next capture pattern the walk resynchronises with a byte search.
pub fn page_offsets(ogg: &[u8], from: usize) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut next = find_pattern(ogg, OGG_SIGNATURE, from);

    while let Some(pos) = next {
        offsets.push(pos);
        next = match page_length(ogg, pos).map(|len| pos + len) {
            Some(end) if end == ogg.len() => None,
            Some(end) if end > ogg.len() => {
                tracing::warn!(offset = pos, "Ogg page runs past the end of the stream");
                None
            }
            Some(end) if ogg[end..].starts_with(OGG_SIGNATURE) => Some(end),
            _ => find_pattern(ogg, OGG_SIGNATURE, pos + 4),
        };
    }

    offsets
}

/// Size of the Vorbis header pages: offset of the first page after the
/// setup header that is not a continuation of it.
pub fn vorbis_header_size(ogg: &[u8]) -> Result<usize> {
    let setup = find_pattern(ogg, SETUP_SIGNATURE, 0)
        .ok_or_else(|| Error::format("transcoded stream has no Vorbis setup header"))?;

    let mut pos = setup;
    loop {
        let page = find_pattern(ogg, OGG_SIGNATURE, pos)
            .ok_or_else(|| Error::format("no audio pages follow the Vorbis setup header"))?;
        if read_u8(ogg, page + 0x05)? != HEADER_TYPE_CONTINUATION {
            return Ok(page);
        }
        pos = page + 4;
    }
}

/// Map a sample loop onto byte offsets relative to the first audio page.
fn byte_loop(
    pages: &[OggPage],
    header_size: usize,
    stream_size: usize,
    lp: LoopPoints,
) -> (usize, usize) {
    let first_page_at = |sample: u32| {
        pages
            .iter()
            .filter(|p| p.has_granule())
            .find(|p| p.granule_position >= u64::from(sample))
            .map(|p| p.offset - header_size)
    };

    let start = first_page_at(lp.start).unwrap_or(0);

    let last_granule = pages
        .iter()
        .rev()
        .find(|p| p.has_granule())
        .map_or(0, |p| p.granule_position);

    // Ends at or past the final granule loop over the whole stream.
    let end = if last_granule > 0 && u64::from(lp.end) >= last_granule {
        stream_size
    } else {
        first_page_at(lp.end).unwrap_or(stream_size)
    };

    let start = start.min(stream_size);
    let end = end.min(stream_size);
    if end <= start {
        (start, stream_size)
    } else {
        (start, end)
    }
}

/// Seek table: audio-relative page offsets spaced at least
/// [`SEEK_INTERVAL`] granules apart, starting with 0.
fn seek_table(pages: &[OggPage], header_size: usize) -> Vec<usize> {
    let mut seek = vec![0];
    let (Some(first), Some(last)) = (pages.first(), pages.last()) else {
        return seek;
    };
    if first.offset == last.offset {
        return seek;
    }

    let mut previous = if first.has_granule() {
        first.granule_position
    } else {
        0
    };

    for page in &pages[1..pages.len() - 1] {
        if !page.has_granule() {
            continue;
        }
        if page.granule_position.saturating_sub(previous) >= SEEK_INTERVAL {
            seek.push(page.offset - header_size);
            previous = page.granule_position;
        }
    }

    if seek.len() == pages.len() - 1 {
        seek.push(last.offset - header_size);
    }

    seek
}

/// Write the sample-accurate loop and marker table of the aux chunk.
fn write_aux_loop(
    entry: &mut [u8],
    source_wav: &[u8],
    loop_points: Option<LoopPoints>,
    aux_end: usize,
) -> Result<()> {
    let (start, end) = loop_points.map_or((u32::MAX, u32::MAX), |lp| (lp.start, lp.end));
    write_u32(entry, start, meta::AUX_LOOP_START)?;
    write_u32(entry, end, meta::AUX_LOOP_END)?;

    let marks = read_u32(entry, meta::MARK_COUNT)? as usize;
    let table_end = marks
        .checked_mul(4)
        .and_then(|n| n.checked_add(meta::MARKS))
        .filter(|&n| n <= aux_end)
        .ok_or_else(|| {
            Error::format(format!("{} markers do not fit the aux chunk", marks))
        })?;

    let mark_value = |index: usize| {
        find_tag_value(&format!("MARK{}", index + 1), source_wav)
            .and_then(|v| u32::try_from(v).ok())
    };

    if marks == 1 {
        write_u32(entry, mark_value(0).unwrap_or(start), meta::MARKS)?;
    } else {
        for (i, pos) in (meta::MARKS..table_end).step_by(4).enumerate() {
            write_u32(entry, mark_value(i).unwrap_or(0), pos)?;
        }
    }

    Ok(())
}

/// Rebuild a Vorbis entry around freshly transcoded Ogg bytes.
///
/// `template` supplies the metadata header, aux chunk, seek header and
/// encode byte. Marker positions are taken from `MARK<n>` tags in
/// `source_wav`. Without loop points the byte loop fields are cleared and
/// the aux loop is marked unset (`0xFFFFFFFF`).
pub fn mux_vorbis_entry(
    template: &[u8],
    ogg: &[u8],
    source_wav: &[u8],
    loop_points: Option<LoopPoints>,
) -> Result<Vec<u8>> {
    let mut entry = template.to_vec();

    let header_size = vorbis_header_size(ogg)?;
    let pages: Vec<OggPage> = page_offsets(ogg, header_size)
        .into_iter()
        .map(|offset| OggPage::read(ogg, offset))
        .collect();

    let stream_size = ogg.len() - header_size;
    write_len(&mut entry, stream_size, meta::STREAM_SIZE)?;

    let (loop_start, loop_end) = match loop_points {
        Some(lp) => byte_loop(&pages, header_size, stream_size, lp),
        None => (0, 0),
    };
    write_len(&mut entry, loop_start, meta::LOOP_START_BYTES)?;
    write_len(&mut entry, loop_end, meta::LOOP_END_BYTES)?;

    write_u8(&mut entry, read_u8(ogg, ID_CHANNELS)?, meta::CHANNELS)?;
    write_u32(&mut entry, read_u32(ogg, ID_SAMPLE_RATE)?, meta::SAMPLE_RATE)?;

    let mut extra = meta::EXTRA_DATA;
    let mut aux_size = 0;
    if read_u32(&entry, meta::AUX_CHUNK_COUNT)? > 0 {
        aux_size = read_u32(&entry, meta::AUX_CHUNK_SIZE)? as usize;
        extra += aux_size;
        write_aux_loop(&mut entry, source_wav, loop_points, extra)?;
    }

    let body_start = extra + SEEK_HEADER_SIZE;
    if entry.len() < body_start {
        return Err(Error::format(format!(
            "template entry of {} bytes ends before its seek header (0x{:X})",
            entry.len(),
            body_start
        )));
    }

    write_len(&mut entry, header_size, extra + SEEK_VORBIS_HEADER_SIZE)?;

    let seek = seek_table(&pages, header_size);
    let seek_bytes = seek.len() * 4;
    write_len(&mut entry, seek_bytes, extra + SEEK_TABLE_SIZE)?;
    write_len(
        &mut entry,
        SEEK_HEADER_SIZE + header_size + aux_size + seek_bytes,
        meta::EXTRA_DATA_SIZE,
    )?;

    let key = entry[extra + SEEK_ENCODE_BYTE];

    let mut out = Vec::with_capacity(body_start + seek_bytes + ogg.len() + ENTRY_ALIGNMENT);
    out.extend_from_slice(&entry[..body_start]);
    for offset in &seek {
        let offset = u32::try_from(*offset)
            .map_err(|_| Error::format("seek offset does not fit a 32-bit field"))?;
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend(ogg[..header_size].iter().map(|b| b ^ key));
    out.extend_from_slice(&ogg[header_size..]);
    out.resize(out.len().next_multiple_of(ENTRY_ALIGNMENT), 0);

    tracing::debug!(
        header_size,
        stream_size,
        pages = pages.len(),
        seek_entries = seek.len(),
        loop_start,
        loop_end,
        encode_byte = key,
        "muxed vorbis entry"
    );

    Ok(out)
}
