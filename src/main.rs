//! scdkit - SCD audio container toolkit
//!
//! Command-line front end: inspect containers, rebuild them from WAV files,
//! and edit loop points or volume in place.

use anyhow::{Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use scdkit::{
    db_to_multiplier, read_info, read_volumes, CommandTranscoder, LoopPatcher, LoopUnit,
    ScdEncoder, ScdInfo, TranscoderConfig, VolumePatcher, WavLoopChunk, MAX_QUALITY,
};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct Options {
    // Encode options
    encode_wav: Option<PathBuf>, // -e <wav>
    output: Option<PathBuf>,     // -o <path>
    quality: Option<i32>,        // -Q <n>
    full_loop: bool,             // -f

    // In-place edits
    loop_patch: Option<(u32, u32)>, // -l <start>:<end>
    wav_loop: Option<(u32, u32)>,   // -w <start>:<end>
    volume: Option<f32>,            // -m <x>
    volume_db: Option<f64>,         // -d <dB>

    // Encoder locations
    oggenc: Option<PathBuf>, // --oggenc <path>
    adpcm: Option<PathBuf>,  // --adpcm <path>

    // Output options
    json: bool,    // -j
    quiet: bool,   // -q
    verbose: bool, // -V

    // Files
    files: Vec<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(&args[1..])?;
    init_logging(opts.verbose);
    run(opts)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "scdkit=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Value following a flag, or exit with an error.
fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> &'a str {
    *i += 1;
    if *i >= args.len() {
        eprintln!("{}: {} requires an argument", "error".red().bold(), flag);
        std::process::exit(1);
    }
    &args[*i]
}

/// Parse `<start>:<end>` sample positions.
fn parse_loop(value: &str) -> Result<(u32, u32)> {
    let (start, end) = value
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid loop '{}': expected <start>:<end>", value))?;
    let start = start
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid loop start: {}", start))?;
    let end = end
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid loop end: {}", end))?;
    Ok((start, end))
}

/// Volume multiplier; must be finite and greater than zero.
fn parse_multiplier(value: &str) -> Result<f32> {
    let multiplier: f32 = value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid volume multiplier: {}", value))?;
    if !multiplier.is_finite() || multiplier <= 0.0 {
        anyhow::bail!("volume multiplier must be greater than 0: {}", value);
    }
    Ok(multiplier)
}

/// Gain in dB whose multiplier fits an `f32`.
fn parse_db(value: &str) -> Result<f64> {
    let db: f64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid dB value: {}", value))?;
    let multiplier = db_to_multiplier(db);
    if !db.is_finite() || !multiplier.is_finite() || multiplier <= 0.0 {
        anyhow::bail!("dB value out of range: {}", value);
    }
    Ok(db)
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];

        if arg.starts_with('-') && arg.len() > 1 {
            let flag = &arg[1..];

            match flag {
                "e" => opts.encode_wav = Some(PathBuf::from(next_value(args, &mut i, "-e"))),
                "o" => opts.output = Some(PathBuf::from(next_value(args, &mut i, "-o"))),
                "Q" => {
                    let val = next_value(args, &mut i, "-Q");
                    opts.quality = Some(
                        val.parse()
                            .map_err(|_| anyhow::anyhow!("invalid quality: {}", val))?,
                    );
                }
                "l" => opts.loop_patch = Some(parse_loop(next_value(args, &mut i, "-l"))?),
                "w" => opts.wav_loop = Some(parse_loop(next_value(args, &mut i, "-w"))?),
                "m" => {
                    opts.volume = Some(parse_multiplier(next_value(args, &mut i, "-m"))?);
                }
                "d" => {
                    opts.volume_db = Some(parse_db(next_value(args, &mut i, "-d"))?);
                }
                "-oggenc" => {
                    opts.oggenc = Some(PathBuf::from(next_value(args, &mut i, "--oggenc")))
                }
                "-adpcm" => opts.adpcm = Some(PathBuf::from(next_value(args, &mut i, "--adpcm"))),
                "f" => opts.full_loop = true,
                "j" | "-json" => opts.json = true,
                "q" => opts.quiet = true,
                "V" | "-verbose" => opts.verbose = true,
                "v" | "-version" => {
                    print_version();
                    std::process::exit(0);
                }
                "h" | "-help" => {
                    print_usage();
                    std::process::exit(0);
                }
                // Combined short flags like -fq
                _ if flag.chars().all(|c| "fjqV".contains(c)) => {
                    for c in flag.chars() {
                        match c {
                            'f' => opts.full_loop = true,
                            'j' => opts.json = true,
                            'q' => opts.quiet = true,
                            'V' => opts.verbose = true,
                            _ => {}
                        }
                    }
                }
                // Attached quality, e.g. -Q8
                _ if flag.starts_with('Q') => {
                    let val = &flag[1..];
                    opts.quality = Some(
                        val.parse()
                            .map_err(|_| anyhow::anyhow!("invalid quality: {}", val))?,
                    );
                }
                _ => {
                    eprintln!("{}: unknown option: -{}", "warning".yellow().bold(), flag);
                }
            }
        } else {
            opts.files.push(PathBuf::from(arg));
        }

        i += 1;
    }

    Ok(opts)
}

fn run(opts: Options) -> Result<()> {
    if opts.files.is_empty() {
        eprintln!("{}: no files specified", "error".red().bold());
        std::process::exit(1);
    }

    if let Some(wav) = &opts.encode_wav {
        cmd_encode(&opts.files, wav, &opts)
    } else if let Some((start, end)) = opts.loop_patch {
        cmd_loop(&opts.files, start, end, &opts)
    } else if let Some((start, end)) = opts.wav_loop {
        cmd_wav_loop(&opts.files, start, end, &opts)
    } else if opts.volume.is_some() || opts.volume_db.is_some() {
        let multiplier = match (opts.volume, opts.volume_db) {
            (Some(m), _) => m,
            (_, Some(d)) => db_to_multiplier(d),
            _ => unreachable!(),
        };
        cmd_volume(&opts.files, multiplier, &opts)
    } else {
        cmd_info(&opts.files, &opts)
    }
}

// =============================================================================
// Batch helpers
// =============================================================================

fn file_label(file: &Path) -> &str {
    file.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
}

/// Progress bar for batches of more than one file.
fn batch_progress(files: &[PathBuf], opts: &Options) -> Result<ProgressBar> {
    if files.len() < 2 || opts.quiet || opts.json {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

/// Run `action` on every file, reporting each outcome.
fn for_each_file<F>(files: &[PathBuf], opts: &Options, mut action: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<String>,
{
    let pb = batch_progress(files, opts)?;
    let mut failed = 0;

    for file in files {
        let name = file_label(file);
        pb.set_message(name.to_string());

        match action(file.as_path()) {
            Ok(detail) => {
                if !opts.quiet {
                    pb.suspend(|| println!("  {} {} ({})", "✓".green(), name, detail));
                }
            }
            Err(e) => {
                failed += 1;
                pb.suspend(|| eprintln!("  {} {} - {:#}", "✗".red(), name, e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed", failed, files.len());
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn output_path(source: &Path, opts: &Options, batch: bool) -> PathBuf {
    match &opts.output {
        Some(dir) if batch => dir.join(source.file_name().unwrap_or_default()),
        Some(path) => path.clone(),
        None => source.with_extension("new.scd"),
    }
}

fn cmd_encode(files: &[PathBuf], wav: &Path, opts: &Options) -> Result<()> {
    let mut config = TranscoderConfig::from_env();
    if opts.oggenc.is_some() {
        config.oggenc = opts.oggenc.clone();
    }
    if opts.adpcm.is_some() {
        config.adpcm_encoder = opts.adpcm.clone();
    }

    let quality = opts.quality.unwrap_or(MAX_QUALITY);
    let encoder = ScdEncoder::new(CommandTranscoder::new(config));
    let batch = files.len() > 1;
    if batch {
        if let Some(dir) = &opts.output {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create output directory {}", dir.display()))?;
        }
    }

    if !opts.quiet {
        println!(
            "{} Encoding {} into {} file(s) (quality {}{})",
            "scdkit".green().bold(),
            file_label(wav),
            files.len(),
            quality,
            if opts.full_loop { ", full loop" } else { "" }
        );
        println!();
    }

    for_each_file(files, opts, |file| {
        let output = output_path(file, opts, batch);
        let size = encoder
            .encode_to_file(file, wav, &output, quality, opts.full_loop)
            .with_context(|| format!("failed to encode {}", file.display()))?;
        Ok(format!("{} bytes -> {}", size, output.display()))
    })
}

fn cmd_loop(files: &[PathBuf], start: u32, end: u32, opts: &Options) -> Result<()> {
    for_each_file(files, opts, |file| {
        LoopPatcher::write_file(file, start, end)
            .with_context(|| format!("failed to patch loop of {}", file.display()))?;
        Ok(format!("loop {}..{}", start, end))
    })
}

fn cmd_wav_loop(files: &[PathBuf], start: u32, end: u32, opts: &Options) -> Result<()> {
    for_each_file(files, opts, |file| {
        WavLoopChunk::write(file, start, end)
            .with_context(|| format!("failed to write smpl loop to {}", file.display()))?;
        Ok(format!("smpl loop {}..{}", start, end))
    })
}

fn cmd_volume(files: &[PathBuf], multiplier: f32, opts: &Options) -> Result<()> {
    if !opts.quiet {
        println!(
            "{} Setting volume x{:.3} ({:+.1} dB) on {} file(s)",
            "scdkit".green().bold(),
            multiplier,
            20.0 * f64::from(multiplier).log10(),
            files.len()
        );
        println!();
    }

    for_each_file(files, opts, |file| {
        let patched = VolumePatcher::patch_file(file, multiplier)
            .with_context(|| format!("failed to patch volume of {}", file.display()))?;
        Ok(format!("{} volume entr{}", patched, if patched == 1 { "y" } else { "ies" }))
    })
}

#[derive(Serialize)]
struct FileReport {
    file: String,
    #[serde(flatten)]
    info: ScdInfo,
    volumes: Vec<f32>,
}

fn load_report(file: &Path) -> Result<FileReport> {
    let data =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let info = read_info(&data).with_context(|| format!("failed to parse {}", file.display()))?;
    let volumes = read_volumes(&data).unwrap_or_default();
    Ok(FileReport {
        file: file.display().to_string(),
        info,
        volumes,
    })
}

fn cmd_info(files: &[PathBuf], opts: &Options) -> Result<()> {
    if opts.json {
        let mut reports = Vec::new();
        for file in files {
            match load_report(file) {
                Ok(report) => reports.push(report),
                Err(e) => eprintln!("{} - {:#}", file_label(file).red(), e),
            }
        }
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for file in files {
        match load_report(file) {
            Ok(report) => print_info(file_label(file), &report, opts),
            Err(e) => eprintln!("{} - {:#}", file_label(file).red(), e),
        }
    }
    Ok(())
}

fn print_info(filename: &str, report: &FileReport, opts: &Options) {
    let info = &report.info;
    let (loop_start, loop_end) = info
        .loop_points
        .map_or((String::from("-"), String::from("-")), |lp| {
            (lp.start.to_string(), lp.end.to_string())
        });

    if opts.quiet {
        // Quiet mode: tab-separated output
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            filename,
            info.codec.as_str(),
            info.audio_entries,
            loop_start,
            loop_end,
            report.volumes.first().copied().unwrap_or(1.0)
        );
        return;
    }

    println!("{}", filename.cyan().bold());
    println!(
        "  Codec:       {} ({} of {} entries with audio)",
        info.codec.as_str(),
        info.audio_entries,
        info.entry_count
    );
    if let Some(meta) = info.metadata {
        println!(
            "  Format:      {} Hz, {} channel(s)",
            meta.sample_rate, meta.channels
        );
    }
    match (info.loop_points, info.loop_unit) {
        (Some(lp), Some(LoopUnit::Samples)) => {
            println!("  Loop:        {} - {} samples", lp.start.to_string().green(), lp.end)
        }
        (Some(lp), _) => println!(
            "  Loop:        {} - {} bytes {}",
            lp.start,
            lp.end,
            "(no aux chunk, re-encode to edit)".yellow()
        ),
        (None, _) => println!("  Loop:        none"),
    }
    if !report.volumes.is_empty() {
        let volumes: Vec<String> = report.volumes.iter().map(|v| format!("{:.3}", v)).collect();
        println!("  Volume:      {}", volumes.join(", "));
    }
    println!();
}

// =============================================================================
// Help / Version
// =============================================================================

fn print_version() {
    println!("scdkit version {}", VERSION);
    println!("SCD audio container toolkit");
}

fn print_usage() {
    println!("{} version {}", "scdkit".green().bold(), VERSION);
    println!("Rebuild SCD audio containers and edit their loops and volume");
    println!();
    println!("{}", "USAGE:".cyan().bold());
    println!("    scdkit [OPTIONS] <FILES>...");
    println!();
    println!("{}", "OPTIONS:".cyan().bold());
    println!("    -e <wav>          Rebuild each SCD from this WAV file");
    println!("    -o <path>         Output file (directory when encoding several files)");
    println!(
        "    -Q <0-{}>         Vorbis quality (default {})",
        MAX_QUALITY, MAX_QUALITY
    );
    println!("    -f                Loop the whole WAV, ignoring its loop tags");
    println!("    -l <start>:<end>  Set the loop in place (Vorbis with aux chunk only)");
    println!("    -w <start>:<end>  Write a smpl loop into WAV files");
    println!("    -m <x>            Set the volume multiplier");
    println!("    -d <dB>           Set the volume in dB");
    println!("    -j                JSON output");
    println!("    -q                Quiet mode (less output)");
    println!("    -V                Verbose logging");
    println!("    -v                Show version");
    println!("    -h                Show this help");
    println!("    --oggenc <path>   Path to oggenc");
    println!("    --adpcm <path>    Path to adpcmencode3");
    println!();
    println!("{}", "EXAMPLES:".cyan().bold());
    println!("    scdkit music.scd                         Show container info");
    println!("    scdkit -j *.scd                          Show info as JSON");
    println!("    scdkit -e new.wav -o out.scd music.scd   Rebuild from a WAV");
    println!("    scdkit -l 88200:1323000 music.scd        Move the loop");
    println!("    scdkit -d -3 *.scd                       Set volume to -3 dB");
    println!("    scdkit -w 0:441000 track.wav             Tag a WAV with a loop");
    println!();
    println!("{}", "ENVIRONMENT:".cyan().bold());
    println!("    SCDKIT_OGGENC       Location of oggenc");
    println!("    SCDKIT_ADPCMENCODE  Location of adpcmencode3");
    println!("    RUST_LOG            Log filter (default: warn)");
}
