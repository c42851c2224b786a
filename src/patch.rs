//! In-place edits of an existing container.
//!
//! Both patchers change fixed-size fields only, so the container keeps its
//! length and entry table.

use std::fs;
use std::path::Path;

use crate::binary::{read_f32, read_u32, write_f32, write_u32};
use crate::container::{meta, Codec, ScdContainer};
use crate::{Error, LoopPoints, Result};

/// Rewrites the sample-accurate loop of a Vorbis entry.
pub struct LoopPatcher;

impl LoopPatcher {
    /// Set the aux chunk loop of the first real entry to `start..end`.
    ///
    /// Marker 0, when present, is moved to the new start. Entries without
    /// an aux chunk fail with [`Error::MissingAuxChunk`]; such files must be
    /// re-encoded instead.
    pub fn write(buf: &mut [u8], start: u32, end: u32) -> Result<()> {
        let lp = LoopPoints::new(start, end)?;

        let container = ScdContainer::parse(buf)?;
        let range = container
            .first_real(buf)
            .ok_or_else(|| Error::format("container has no audio entries"))?;

        match container.codec(buf) {
            Codec::Vorbis => {}
            other => {
                return Err(Error::Unsupported(format!(
                    "only Vorbis supports sample-accurate in-place loop editing (entry is {})",
                    other.as_str()
                )))
            }
        }

        let entry = &mut buf[range.range()];
        if read_u32(entry, meta::AUX_CHUNK_COUNT)? == 0 {
            return Err(Error::MissingAuxChunk);
        }
        if entry.len() < meta::MARK_COUNT + 4 {
            return Err(Error::format(format!(
                "entry of {} bytes is too short for its aux loop",
                entry.len()
            )));
        }

        write_u32(entry, lp.start, meta::AUX_LOOP_START)?;
        write_u32(entry, lp.end, meta::AUX_LOOP_END)?;

        let marks = read_u32(entry, meta::MARK_COUNT)?;
        if marks > 0 && write_u32(entry, lp.start, meta::MARKS).is_err() {
            tracing::warn!(marks, "marker table is truncated, leaving markers untouched");
        }

        tracing::debug!(
            entry = range.index,
            offset = range.begin,
            start = lp.start,
            end = lp.end,
            "patched loop"
        );
        Ok(())
    }

    /// Patch the loop of an SCD file on disk.
    pub fn write_file(path: &Path, start: u32, end: u32) -> Result<()> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let mut data = fs::read(path)?;
        Self::write(&mut data, start, end)?;
        fs::write(path, &data)?;

        tracing::info!(path = %path.display(), start, end, "loop written");
        Ok(())
    }
}

/// Pointer to the volume table.
pub const VOLUME_TABLE_FIELD: usize = 0x50;

/// Upper bound on volume table entries.
pub const MAX_VOLUME_ENTRIES: usize = 1024;

/// Offset of the volume float inside each table record.
const VOLUME_FIELD: usize = 0x08;

/// Absolute volume offset used when the table yields nothing.
pub const FALLBACK_VOLUME_OFFSET: usize = 0x128;

/// Offsets of every volume float reachable from the table at 0x50.
///
/// The walk ends at the first zero or out-of-range pointer.
fn volume_slots(buf: &[u8]) -> Result<Vec<usize>> {
    if buf.len() < VOLUME_TABLE_FIELD + 4 {
        return Err(Error::format(format!(
            "buffer of {} bytes has no volume table pointer",
            buf.len()
        )));
    }

    let root = read_u32(buf, VOLUME_TABLE_FIELD)? as usize;
    let mut slots = Vec::new();
    if root == 0 {
        return Ok(slots);
    }

    for i in 0..MAX_VOLUME_ENTRIES {
        let Ok(pointer) = read_u32(buf, root + i * 4) else {
            break;
        };
        let slot = pointer as usize + VOLUME_FIELD;
        if pointer == 0 || slot + 4 > buf.len() {
            break;
        }
        slots.push(slot);
    }

    Ok(slots)
}

/// Rewrites the volume multipliers of every entry.
pub struct VolumePatcher;

impl VolumePatcher {
    /// Write `multiplier` into every volume slot and return how many were set.
    ///
    /// If the table yields no slots, the single float at 0x128 is written
    /// instead.
    pub fn patch(buf: &mut [u8], multiplier: f32) -> Result<usize> {
        let slots = volume_slots(buf)?;

        if slots.is_empty() {
            return match write_f32(buf, multiplier, FALLBACK_VOLUME_OFFSET) {
                Ok(()) => {
                    tracing::debug!(
                        offset = FALLBACK_VOLUME_OFFSET,
                        "volume table empty, patched fallback offset"
                    );
                    Ok(1)
                }
                Err(_) => Err(Error::format("no volume entries patched")),
            };
        }

        for &slot in &slots {
            write_f32(buf, multiplier, slot)?;
        }
        Ok(slots.len())
    }

    /// Patch the volume of an SCD file on disk.
    pub fn patch_file(path: &Path, multiplier: f32) -> Result<usize> {
        if !path.exists() {
            return Err(Error::file_not_found(path));
        }

        let mut data = fs::read(path)?;
        let patched = Self::patch(&mut data, multiplier)?;
        fs::write(path, &data)?;

        tracing::info!(path = %path.display(), multiplier, patched, "volume written");
        Ok(patched)
    }
}

/// Current volume multipliers, in table order.
pub fn read_volumes(buf: &[u8]) -> Result<Vec<f32>> {
    let slots = volume_slots(buf)?;
    if slots.is_empty() {
        return Ok(read_f32(buf, FALLBACK_VOLUME_OFFSET).into_iter().collect());
    }
    slots.into_iter().map(|slot| read_f32(buf, slot)).collect()
}

/// Convert a gain in decibels to a linear multiplier.
pub fn db_to_multiplier(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::tests::{container, entry};
    use crate::container::SENTINEL_CODEC;

    fn aux_entry(marks: u32) -> Vec<u8> {
        let mut e = entry(Codec::VORBIS_TAG, 0x80);
        write_u32(&mut e, 1, meta::AUX_CHUNK_COUNT).unwrap();
        write_u32(&mut e, 0x20, meta::AUX_CHUNK_SIZE).unwrap();
        write_u32(&mut e, 10, meta::AUX_LOOP_START).unwrap();
        write_u32(&mut e, 20, meta::AUX_LOOP_END).unwrap();
        write_u32(&mut e, marks, meta::MARK_COUNT).unwrap();
        for (i, b) in e.iter_mut().enumerate().skip(meta::MARKS) {
            *b = i as u8;
        }
        e
    }

    #[test]
    fn test_loop_patch_touches_only_aux_loop() {
        let original = container(&[entry(SENTINEL_CODEC, 0x20), aux_entry(0)]);
        let mut buf = original.clone();
        LoopPatcher::write(&mut buf, 1000, 5000).unwrap();

        let begin = ScdContainer::parse(&buf).unwrap().entries[1].begin;
        let patched = begin + meta::AUX_LOOP_START..begin + meta::MARK_COUNT;
        for (i, (a, b)) in original.iter().zip(&buf).enumerate() {
            if !patched.contains(&i) {
                assert_eq!(a, b, "byte 0x{:X} changed", i);
            }
        }
        assert_eq!(read_u32(&buf, begin + meta::AUX_LOOP_START).unwrap(), 1000);
        assert_eq!(read_u32(&buf, begin + meta::AUX_LOOP_END).unwrap(), 5000);
        assert_eq!(buf.len(), original.len());
    }

    #[test]
    fn test_loop_patch_realigns_first_marker() {
        let mut buf = container(&[aux_entry(2)]);
        LoopPatcher::write(&mut buf, 4410, 88200).unwrap();

        let begin = ScdContainer::parse(&buf).unwrap().entries[0].begin;
        assert_eq!(read_u32(&buf, begin + meta::MARKS).unwrap(), 4410);
        assert_ne!(read_u32(&buf, begin + meta::MARKS + 4).unwrap(), 4410);
    }

    #[test]
    fn test_loop_patch_rejects_adpcm() {
        let mut buf = container(&[entry(Codec::MS_ADPCM_TAG, 0x40)]);
        assert!(matches!(
            LoopPatcher::write(&mut buf, 0, 100),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_loop_patch_requires_aux_chunk() {
        let mut buf = container(&[entry(Codec::VORBIS_TAG, 0x40)]);
        assert!(matches!(
            LoopPatcher::write(&mut buf, 0, 100),
            Err(Error::MissingAuxChunk)
        ));
    }

    #[test]
    fn test_loop_patch_rejects_reversed_loop() {
        let original = container(&[aux_entry(0)]);
        let mut buf = original.clone();
        assert!(matches!(
            LoopPatcher::write(&mut buf, 500, 500),
            Err(Error::Range(_))
        ));
        assert_eq!(buf, original);
    }

    #[test]
    fn test_loop_patch_short_entry_is_untouched() {
        let mut short = entry(Codec::VORBIS_TAG, 0x2C);
        write_u32(&mut short, 1, meta::AUX_CHUNK_COUNT).unwrap();
        let original = container(&[short]);
        let mut buf = original.clone();

        assert!(matches!(
            LoopPatcher::write(&mut buf, 100, 200),
            Err(Error::Format(_))
        ));
        assert_eq!(buf, original);
    }

    /// Volume table at 0x60 pointing at 0x10-byte records from 0x140.
    fn volume_container(records: usize, terminated: bool) -> Vec<u8> {
        let mut buf = vec![0u8; 0x200];
        write_u32(&mut buf, 0x60, VOLUME_TABLE_FIELD).unwrap();
        for i in 0..records {
            let record = 0x140 + i * 0x10;
            write_u32(&mut buf, record as u32, 0x60 + i * 4).unwrap();
            write_f32(&mut buf, 1.0, record + VOLUME_FIELD).unwrap();
        }
        if !terminated {
            write_u32(&mut buf, 0x1000, 0x60 + records * 4).unwrap();
        }
        buf
    }

    #[test]
    fn test_volume_patch_stops_at_terminator() {
        let mut buf = volume_container(3, true);
        assert_eq!(VolumePatcher::patch(&mut buf, 0.5).unwrap(), 3);
        assert_eq!(read_volumes(&buf).unwrap(), vec![0.5, 0.5, 0.5]);
        assert_eq!(read_f32(&buf, FALLBACK_VOLUME_OFFSET).unwrap(), 0.0);
    }

    #[test]
    fn test_volume_patch_stops_at_out_of_range_pointer() {
        let mut buf = volume_container(2, false);
        assert_eq!(VolumePatcher::patch(&mut buf, 2.0).unwrap(), 2);
    }

    #[test]
    fn test_volume_patch_fallback() {
        let mut buf = vec![0u8; 0x200];
        assert_eq!(VolumePatcher::patch(&mut buf, 0.25).unwrap(), 1);
        assert_eq!(read_f32(&buf, FALLBACK_VOLUME_OFFSET).unwrap(), 0.25);
        assert_eq!(read_volumes(&buf).unwrap(), vec![0.25]);
    }

    #[test]
    fn test_volume_patch_nothing_to_patch() {
        let mut buf = vec![0u8; 0x100];
        assert!(matches!(
            VolumePatcher::patch(&mut buf, 0.25),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            VolumePatcher::patch(&mut [0u8; 0x40], 0.25),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_db_to_multiplier() {
        assert!((db_to_multiplier(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_multiplier(-6.0) - 0.501_187).abs() < 1e-5);
        assert!((db_to_multiplier(20.0) - 10.0).abs() < 1e-4);
    }
}
