//! Full re-encode of an SCD container from a WAV source.
//!
//! The WAV is transcoded once through an [`AudioTranscoder`], every audio
//! entry is rebuilt around the result by the codec's muxer, and the
//! container is reassembled with a fresh offset table.

use std::fs;
use std::path::Path;

use crate::binary::write_len;
use crate::container::{Codec, ScdContainer, TOTAL_SIZE_FIELD};
use crate::msadpcm::mux_msadpcm_entry;
use crate::vorbis::mux_vorbis_entry;
use crate::wav::{full_loop_points, WavLoopChunk};
use crate::{normalize_loop, Error, LoopPoints, Result};

/// Highest Vorbis quality level; the lowest is 0.
pub const MAX_QUALITY: i32 = 10;

/// Produces encoded audio from WAV bytes.
pub trait AudioTranscoder {
    /// Encode to an Ogg Vorbis stream at `quality` (0-10).
    fn encode_vorbis(
        &self,
        wav: &[u8],
        loop_points: Option<LoopPoints>,
        quality: u8,
    ) -> Result<Vec<u8>>;

    /// Encode to an MS-ADPCM WAV file.
    fn encode_adpcm(&self, wav: &[u8]) -> Result<Vec<u8>>;
}

impl<T: AudioTranscoder + ?Sized> AudioTranscoder for &T {
    fn encode_vorbis(
        &self,
        wav: &[u8],
        loop_points: Option<LoopPoints>,
        quality: u8,
    ) -> Result<Vec<u8>> {
        (**self).encode_vorbis(wav, loop_points, quality)
    }

    fn encode_adpcm(&self, wav: &[u8]) -> Result<Vec<u8>> {
        (**self).encode_adpcm(wav)
    }
}

fn validate_quality(quality: i32) -> Result<u8> {
    if !(0..=MAX_QUALITY).contains(&quality) {
        return Err(Error::range(format!(
            "quality {} is outside 0-{}",
            quality, MAX_QUALITY
        )));
    }
    Ok(quality as u8)
}

/// Loop points to encode with: the WAV's own loop, normalized against its
/// length, or the whole `data` chunk when `full_loop` is set.
pub fn resolve_loop(wav: &[u8], full_loop: bool) -> Result<Option<LoopPoints>> {
    let info = WavLoopChunk::read(wav)?;

    let mut loop_points = match (info.loop_points, info.metadata) {
        (Some(lp), Some(meta)) if meta.total_samples > 0 => {
            Some(normalize_loop(lp.start, lp.end, meta.total_samples))
        }
        (lp, _) => lp,
    };

    if full_loop {
        match full_loop_points(wav) {
            Some(full) => loop_points = Some(full),
            None => tracing::warn!(
                "full loop needs a usable fmt and data chunk, keeping the WAV's own loop"
            ),
        }
    }

    Ok(loop_points)
}

/// Copy the header, lay the entries out back to back and rewrite the
/// offset table and total size.
fn reassemble(scd: &[u8], container: &ScdContainer, entries: &[Vec<u8>]) -> Result<Vec<u8>> {
    let data_start = container.data_start().unwrap_or(scd.len());
    let table_end = container.entry_table_offset + container.entry_count * 4;
    if !entries.is_empty() && table_end > data_start {
        return Err(Error::format(format!(
            "entry table (ends 0x{:X}) overlaps entry data (0x{:X})",
            table_end, data_start
        )));
    }

    let body: usize = entries.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(data_start + body);
    out.extend_from_slice(&scd[..data_start]);

    let mut offsets = Vec::with_capacity(entries.len());
    for entry in entries {
        offsets.push(out.len());
        out.extend_from_slice(entry);
    }

    for (i, &offset) in offsets.iter().enumerate() {
        write_len(&mut out, offset, container.entry_table_offset + i * 4)?;
    }
    let total = out.len();
    write_len(&mut out, total, TOTAL_SIZE_FIELD)?;

    Ok(out)
}

/// Rebuilds SCD containers from WAV sources.
pub struct ScdEncoder<T> {
    transcoder: T,
}

impl<T: AudioTranscoder> ScdEncoder<T> {
    pub fn new(transcoder: T) -> Self {
        Self { transcoder }
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    /// Re-encode `source` with the audio of `wav` and return the new bytes.
    pub fn encode(
        &self,
        source: &Path,
        wav: &Path,
        quality: i32,
        full_loop: bool,
    ) -> Result<Vec<u8>> {
        validate_quality(quality)?;
        for path in [source, wav] {
            if !path.exists() {
                return Err(Error::file_not_found(path));
            }
        }

        let scd = fs::read(source)?;
        let wav_data = fs::read(wav)?;
        self.encode_bytes(&scd, &wav_data, quality, full_loop)
    }

    /// Re-encode and write the result to `output`, returning its size.
    pub fn encode_to_file(
        &self,
        source: &Path,
        wav: &Path,
        output: &Path,
        quality: i32,
        full_loop: bool,
    ) -> Result<usize> {
        let bytes = self.encode(source, wav, quality, full_loop)?;
        fs::write(output, &bytes)?;

        tracing::info!(
            source = %source.display(),
            output = %output.display(),
            size = bytes.len(),
            "encoded"
        );
        Ok(bytes.len())
    }

    /// Re-encode an in-memory container.
    ///
    /// Every real entry gets the same transcoded stream and loop points;
    /// entries of an unknown codec and sentinel entries are copied as-is.
    pub fn encode_bytes(
        &self,
        scd: &[u8],
        wav: &[u8],
        quality: i32,
        full_loop: bool,
    ) -> Result<Vec<u8>> {
        let quality = validate_quality(quality)?;
        let container = ScdContainer::parse(scd)?;
        let codec = container.codec(scd);
        let loop_points = resolve_loop(wav, full_loop)?;

        let has_audio = container.first_real(scd).is_some();
        let stream = match codec {
            Codec::Vorbis if has_audio => {
                Some(self.transcoder.encode_vorbis(wav, loop_points, quality)?)
            }
            Codec::MsAdpcm if has_audio => Some(self.transcoder.encode_adpcm(wav)?),
            Codec::Unknown(tag) if has_audio => {
                tracing::warn!(?tag, "unsupported codec, entries copied unchanged");
                None
            }
            _ => None,
        };

        let mut entries = Vec::with_capacity(container.entries.len());
        for range in &container.entries {
            let original = &scd[range.range()];
            let rebuilt = match (&stream, codec) {
                (Some(ogg), Codec::Vorbis) if range.is_real(scd) => {
                    mux_vorbis_entry(original, ogg, wav, loop_points)?
                }
                (Some(adpcm), Codec::MsAdpcm) if range.is_real(scd) => {
                    mux_msadpcm_entry(original, adpcm)?
                }
                _ => original.to_vec(),
            };
            tracing::debug!(
                entry = range.index,
                before = original.len(),
                after = rebuilt.len(),
                "entry rebuilt"
            );
            entries.push(rebuilt);
        }

        let out = reassemble(scd, &container, &entries)?;
        tracing::debug!(
            codec = codec.as_str(),
            entries = entries.len(),
            ?loop_points,
            size = out.len(),
            "container reassembled"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{read_u32, write_u32};
    use crate::container::tests::{container, entry};
    use crate::container::{meta, SENTINEL_CODEC};
    use crate::msadpcm::tests::adpcm_wav;
    use crate::vorbis::tests::{template, vorbis_stream};
    use crate::wav::find_chunk;
    use crate::wav::tests::pcm_wav;
    use std::cell::RefCell;

    #[derive(Default)]
    struct StubTranscoder {
        calls: RefCell<Vec<(Option<LoopPoints>, u8)>>,
        fail: bool,
    }

    impl AudioTranscoder for StubTranscoder {
        fn encode_vorbis(
            &self,
            _wav: &[u8],
            loop_points: Option<LoopPoints>,
            quality: u8,
        ) -> Result<Vec<u8>> {
            if self.fail {
                return Err(Error::tool_failed("oggenc", "exit status 1"));
            }
            self.calls.borrow_mut().push((loop_points, quality));
            Ok(vorbis_stream(2, 44100, &[4096, 8192, 12000]))
        }

        fn encode_adpcm(&self, _wav: &[u8]) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push((None, 0));
            Ok(adpcm_wav(44100, 2, 300))
        }
    }

    fn looped_wav(start: u32, end: u32, frames: u32) -> Vec<u8> {
        WavLoopChunk::write_bytes(&pcm_wav(44100, 2, frames), start, end).unwrap()
    }

    fn entry_at(buf: &[u8], index: usize) -> Vec<u8> {
        let scd = ScdContainer::parse(buf).unwrap();
        buf[scd.entries[index].range()].to_vec()
    }

    #[test]
    fn test_quality_bounds() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[template(0x20, 0, 0)]);
        let wav = looped_wav(1000, 5000, 10000);

        for bad in [-1, 11] {
            assert!(matches!(
                encoder.encode_bytes(&scd, &wav, bad, false),
                Err(Error::Range(_))
            ));
        }
        for good in [0, 10] {
            assert!(encoder.encode_bytes(&scd, &wav, good, false).is_ok());
        }
        let qualities: Vec<u8> = encoder.transcoder().calls.borrow().iter().map(|c| c.1).collect();
        assert_eq!(qualities, vec![0, 10]);
    }

    #[test]
    fn test_vorbis_aux_loop() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[entry(SENTINEL_CODEC, 0x20), template(0x20, 0, 0)]);
        let wav = looped_wav(1000, 5000, 10000);

        let out = encoder.encode_bytes(&scd, &wav, 10, false).unwrap();
        let rebuilt = entry_at(&out, 1);

        assert_eq!(read_u32(&rebuilt, meta::AUX_LOOP_START).unwrap(), 1000);
        assert_eq!(read_u32(&rebuilt, meta::AUX_LOOP_END).unwrap(), 5000);
        assert_eq!(entry_at(&out, 0), entry_at(&scd, 0));
        assert_eq!(
            encoder.transcoder().calls.borrow().as_slice(),
            &[(Some(LoopPoints { start: 1000, end: 5000 }), 10)]
        );
    }

    #[test]
    fn test_inclusive_wav_end_is_normalized() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[template(0x20, 0, 0)]);
        let wav = looped_wav(0, 9999, 10000);

        let out = encoder.encode_bytes(&scd, &wav, 5, false).unwrap();
        assert_eq!(read_u32(&entry_at(&out, 0), meta::AUX_LOOP_END).unwrap(), 10000);
    }

    #[test]
    fn test_full_loop_overrides_wav_loop() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[template(0x20, 0, 0)]);
        let wav = looped_wav(100, 200, 6000);

        let out = encoder.encode_bytes(&scd, &wav, 10, true).unwrap();
        let rebuilt = entry_at(&out, 0);
        assert_eq!(read_u32(&rebuilt, meta::AUX_LOOP_START).unwrap(), 0);
        assert_eq!(read_u32(&rebuilt, meta::AUX_LOOP_END).unwrap(), 6000);
    }

    #[test]
    fn test_full_loop_keeps_wav_loop_for_unsized_data() {
        let mut wav = looped_wav(100, 200, 1000);
        let data = find_chunk(&wav, b"data").unwrap();
        write_u32(&mut wav, u32::MAX, data + 4).unwrap();

        let lp = resolve_loop(&wav, true).unwrap();
        assert_eq!(lp, Some(LoopPoints::new(100, 200).unwrap()));

        let mut r#unsized = pcm_wav(44100, 2, 1000);
        let data = find_chunk(&r#unsized, b"data").unwrap();
        write_u32(&mut r#unsized, u32::MAX, data + 4).unwrap();
        assert_eq!(resolve_loop(&r#unsized, true).unwrap(), None);
    }

    #[test]
    fn test_multiple_entries_share_one_transcode() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[template(0x20, 0, 0), template(0, 0, 0x3A)]);
        let wav = looped_wav(1000, 5000, 10000);

        let out = encoder.encode_bytes(&scd, &wav, 10, false).unwrap();
        let parsed = ScdContainer::parse(&out).unwrap();

        assert_eq!(encoder.transcoder().calls.borrow().len(), 1);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].begin, parsed.entries[0].end);
        assert_eq!(parsed.entries[1].end, out.len());
        assert_eq!(read_u32(&out, TOTAL_SIZE_FIELD).unwrap() as usize, out.len());
        assert!(parsed.entries.iter().all(|e| e.len() % 16 == 0));
    }

    #[test]
    fn test_msadpcm_entry() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let mut adpcm = entry(Codec::MS_ADPCM_TAG, 0x40);
        write_u32(&mut adpcm, 0x400, meta::LOOP_END_BYTES).unwrap();
        let scd = container(&[adpcm]);

        let out = encoder.encode_bytes(&scd, &pcm_wav(44100, 2, 100), 10, false).unwrap();
        let rebuilt = entry_at(&out, 0);

        assert_eq!(read_u32(&rebuilt, meta::STREAM_SIZE).unwrap(), 300);
        assert_eq!(read_u32(&rebuilt, meta::SAMPLE_RATE).unwrap(), 44100);
        assert_eq!(read_u32(&rebuilt, meta::LOOP_END_BYTES).unwrap(), 0x400);
        assert_eq!(read_u32(&rebuilt, meta::CODEC).unwrap(), Codec::MS_ADPCM_TAG);
    }

    #[test]
    fn test_unknown_codec_copied() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let scd = container(&[entry(0x3, 0x40)]);

        let out = encoder.encode_bytes(&scd, &pcm_wav(44100, 2, 100), 10, false).unwrap();
        assert_eq!(out, scd);
        assert!(encoder.transcoder().calls.borrow().is_empty());
    }

    #[test]
    fn test_transcoder_failure_aborts() {
        let encoder = ScdEncoder::new(StubTranscoder {
            fail: true,
            ..Default::default()
        });
        let scd = container(&[template(0x20, 0, 0)]);
        let result = encoder.encode_bytes(&scd, &pcm_wav(44100, 2, 100), 10, false);
        assert!(matches!(result, Err(Error::TranscoderFailed { .. })));
    }

    #[test]
    fn test_missing_input_file() {
        let encoder = ScdEncoder::new(StubTranscoder::default());
        let result = encoder.encode(
            Path::new("/nonexistent/music.scd"),
            Path::new("/nonexistent/music.wav"),
            10,
            false,
        );
        assert!(matches!(result, Err(Error::FileNotFound { .. })));

        let result = encoder.encode(
            Path::new("/nonexistent/music.scd"),
            Path::new("/nonexistent/music.wav"),
            11,
            false,
        );
        assert!(matches!(result, Err(Error::Range(_))));
    }
}
