//! [`AudioTranscoder`] backed by the `oggenc` and `adpcmencode3` command-line
//! encoders.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::encoder::AudioTranscoder;
use crate::{Error, LoopPoints, Result};

pub const OGGENC: &str = "oggenc";
pub const ADPCM_ENCODER: &str = "adpcmencode3";

/// Environment variable overriding the `oggenc` location.
pub const OGGENC_ENV: &str = "SCDKIT_OGGENC";
/// Environment variable overriding the `adpcmencode3` location.
pub const ADPCM_ENCODER_ENV: &str = "SCDKIT_ADPCMENCODE";

/// Explicit encoder locations. Unset tools are looked up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscoderConfig {
    pub oggenc: Option<PathBuf>,
    pub adpcm_encoder: Option<PathBuf>,
}

impl TranscoderConfig {
    /// Read tool locations from `SCDKIT_OGGENC` and `SCDKIT_ADPCMENCODE`.
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            oggenc: var(OGGENC_ENV),
            adpcm_encoder: var(ADPCM_ENCODER_ENV),
        }
    }
}

/// Resolve a tool, preferring an existing configured path over `PATH`.
fn tool_path(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(tool = name, path = %path.display(), "configured tool missing, searching PATH");
    }
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

fn run(name: &str, program: &Path, args: &[OsString]) -> Result<()> {
    tracing::debug!(tool = name, program = %program.display(), ?args, "running encoder");

    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::tool_not_found(name)
        } else {
            Error::Io(e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => format!("exited with {}", output.status),
            text => text.to_string(),
        };
        return Err(Error::tool_failed(name, message));
    }
    Ok(())
}

/// Runs the external encoders inside a scratch directory that is removed
/// when the call returns.
#[derive(Debug, Clone, Default)]
pub struct CommandTranscoder {
    config: TranscoderConfig,
}

impl CommandTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Write `wav` to a scratch directory, run the encoder and read `output`.
    fn transcode(
        &self,
        name: &str,
        configured: Option<&Path>,
        wav: &[u8],
        output: &str,
        args: impl FnOnce(&Path, &Path) -> Vec<OsString>,
    ) -> Result<Vec<u8>> {
        let program = tool_path(name, configured)?;

        let scratch = tempfile::Builder::new().prefix("scdkit-").tempdir()?;
        let input = scratch.path().join("input.wav");
        let output = scratch.path().join(output);
        fs::write(&input, wav)?;

        run(name, &program, &args(&input, &output))?;

        if !output.exists() {
            return Err(Error::tool_failed(
                name,
                format!("no output written to {}", output.display()),
            ));
        }
        Ok(fs::read(&output)?)
    }
}

impl AudioTranscoder for CommandTranscoder {
    fn encode_vorbis(
        &self,
        wav: &[u8],
        loop_points: Option<LoopPoints>,
        quality: u8,
    ) -> Result<Vec<u8>> {
        self.transcode(OGGENC, self.config.oggenc.as_deref(), wav, "output.ogg", |input, output| {
            oggenc_args(input, output, loop_points, quality)
        })
    }

    fn encode_adpcm(&self, wav: &[u8]) -> Result<Vec<u8>> {
        self.transcode(
            ADPCM_ENCODER,
            self.config.adpcm_encoder.as_deref(),
            wav,
            "output.wav",
            |input, output| vec![input.into(), output.into()],
        )
    }
}

/// `oggenc` arguments; loops are passed as `LoopStart`/`LoopEnd` comments
/// with an inclusive end.
fn oggenc_args(
    input: &Path,
    output: &Path,
    loop_points: Option<LoopPoints>,
    quality: u8,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        input.into(),
        "-s".into(),
        "0".into(),
        "-q".into(),
        quality.to_string().into(),
    ];
    if let Some(lp) = loop_points {
        args.push("-c".into());
        args.push(format!("LoopStart={}", lp.start).into());
        args.push("-c".into());
        args.push(format!("LoopEnd={}", lp.end - 1).into());
    }
    args.push("-o".into());
    args.push(output.into());
    args
}
