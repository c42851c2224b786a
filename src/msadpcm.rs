//! MS-ADPCM entry re-muxing.
//!
//! An MS-ADPCM entry is the 0x20-byte metadata header followed by the
//! WAVEFORMATEX block of the encoded WAV (0x32 bytes, including the
//! coefficient table) and then the raw ADPCM blocks.

use crate::binary::{read_u8, read_u32, write_len, write_u32, write_u8};
use crate::container::meta;
use crate::vorbis::ENTRY_ALIGNMENT;
use crate::wav::find_chunk;
use crate::{Error, Result};

/// Offset of the format block inside a canonical ADPCM WAV.
const FORMAT_BLOCK: usize = 0x14;
const FORMAT_BLOCK_SIZE: usize = 0x32;

const WAV_CHANNELS: usize = 0x16;
const WAV_SAMPLE_RATE: usize = 0x18;

/// Rebuild an MS-ADPCM entry from an encoded WAV.
///
/// Only the stream size, channel count and sample rate of `template` are
/// updated; its loop fields are kept as they are.
pub fn mux_msadpcm_entry(template: &[u8], adpcm_wav: &[u8]) -> Result<Vec<u8>> {
    if template.len() < meta::EXTRA_DATA {
        return Err(Error::format(format!(
            "template entry of {} bytes is shorter than its metadata header",
            template.len()
        )));
    }
    if adpcm_wav.len() < FORMAT_BLOCK + FORMAT_BLOCK_SIZE {
        return Err(Error::format("ADPCM WAV is too short for its format block"));
    }

    let data_offset = find_chunk(adpcm_wav, b"data")
        .map(|pos| pos + 8)
        .filter(|&pos| pos <= adpcm_wav.len())
        .ok_or_else(|| Error::format("ADPCM WAV has no data chunk"))?;
    let audio = &adpcm_wav[data_offset..];

    let mut header = template[..meta::EXTRA_DATA].to_vec();
    write_len(&mut header, audio.len(), meta::STREAM_SIZE)?;
    write_u8(&mut header, read_u8(adpcm_wav, WAV_CHANNELS)?, meta::CHANNELS)?;
    write_u32(&mut header, read_u32(adpcm_wav, WAV_SAMPLE_RATE)?, meta::SAMPLE_RATE)?;

    let mut entry = Vec::with_capacity(
        (meta::EXTRA_DATA + FORMAT_BLOCK_SIZE + audio.len()).next_multiple_of(ENTRY_ALIGNMENT),
    );
    entry.extend_from_slice(&header);
    entry.extend_from_slice(&adpcm_wav[FORMAT_BLOCK..FORMAT_BLOCK + FORMAT_BLOCK_SIZE]);
    entry.extend_from_slice(audio);
    entry.resize(entry.len().next_multiple_of(ENTRY_ALIGNMENT), 0);

    tracing::debug!(
        data_offset,
        stream_size = audio.len(),
        entry_size = entry.len(),
        "muxed ms-adpcm entry"
    );

    Ok(entry)
}
