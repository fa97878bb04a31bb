// Command-line front end for Oxipatch.
//
// Uses explicit subcommands and long-form options on top of the file-level
// apply helper and the header parser.

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use log::{debug, error};

use crate::backend::BackendRegistry;
use crate::decompress::session::{INPUT_READ_SIZE, POLL_READ_SIZE};
use crate::engine::{
    ApplyOptions, DEFAULT_CHUNK_SIZE, DEFAULT_STEP_SIZE, MAX_CHUNK_SIZE, Outcome,
};
use crate::error::PatchError;
use crate::io::{self, FileApplyStats, IoError};
use crate::patch::header::{HEADER_LEN, PatchHeader, SizeWidth};

/// Exit code when the patch file holds no valid patch.
const EXIT_NO_PATCH: i32 = 2;

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

fn parse_sha256(s: &str) -> Result<[u8; 32], String> {
    let s = s.trim();
    if s.len() != 64 || !s.is_ascii() {
        return Err(format!("expected 64 hex digits, got '{s}'"));
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
            .map_err(|e| format!("invalid hex in '{s}': {e}"))?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Bounded-memory bsdiff patch applier.
#[derive(Parser, Debug)]
#[command(
    name = "oxipatch",
    version,
    about = "Bounded-memory bsdiff patch applier",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Apply a patch to an old image, writing the new image.
    Apply(ApplyArgs),
    /// Print the patch header.
    Header(HeaderArgs),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Old image the patch was made against.
    #[arg(long, short = 's', value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// Patch file.
    #[arg(long, value_hint = ValueHint::FilePath, conflicts_with = "patch_pos")]
    patch: Option<PathBuf>,

    /// Output file for the new image.
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath, conflicts_with = "output_pos")]
    output: Option<PathBuf>,

    /// Decode buffer size (accepts K/M suffixes).
    #[arg(long = "chunk-size", value_parser = parse_byte_size, default_value_t = DEFAULT_CHUNK_SIZE as u64)]
    chunk_size: u64,

    /// Bytes combined and written per storage call (accepts K/M suffixes).
    #[arg(long = "step-size", value_parser = parse_byte_size, default_value_t = DEFAULT_STEP_SIZE as u64)]
    step_size: u64,

    /// Read only the low 16 bits of the header size field.
    #[arg(long = "legacy-size")]
    legacy_size: bool,

    /// Erase the target range of the output before writing.
    #[arg(long)]
    erase: bool,

    /// Largest new image the output file may grow to (accepts K/M/G suffixes).
    #[arg(long = "max-size", value_parser = parse_byte_size, default_value_t = io::DEFAULT_MAX_OUTPUT_SIZE)]
    max_size: u64,

    /// Fail unless the new image has this SHA-256 (hex).
    #[arg(long = "expect-sha256", value_parser = parse_sha256)]
    expect_sha256: Option<[u8; 32]>,

    /// Patch file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    patch_pos: Option<PathBuf>,

    /// Output file (positional form).
    #[arg(value_hint = ValueHint::FilePath)]
    output_pos: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HeaderArgs {
    /// Patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,
}

// ---------------------------------------------------------------------------
// Resolved command + options (flattened from Cli)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Apply,
    Header,
    Config,
}

struct Options {
    command: Command,
    force: bool,
    quiet: bool,
    verbose: u8,
    json_output: bool,
    old_file: Option<PathBuf>,
    patch_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
    chunk_size: u64,
    step_size: u64,
    legacy_size: bool,
    erase: bool,
    max_size: u64,
    expect_sha256: Option<[u8; 32]>,
}

fn resolve_options(cli: Cli) -> Options {
    let mut opts = Options {
        command: Command::Config,
        force: cli.force,
        quiet: cli.quiet,
        verbose: cli.verbose.min(3),
        json_output: cli.json_output,
        old_file: None,
        patch_file: None,
        output_file: None,
        chunk_size: DEFAULT_CHUNK_SIZE as u64,
        step_size: DEFAULT_STEP_SIZE as u64,
        legacy_size: false,
        erase: false,
        max_size: io::DEFAULT_MAX_OUTPUT_SIZE,
        expect_sha256: None,
    };

    match cli.command {
        Cmd::Apply(args) => {
            opts.command = Command::Apply;
            opts.old_file = Some(args.old);
            opts.patch_file = args.patch.or(args.patch_pos);
            opts.output_file = args.output.or(args.output_pos);
            opts.chunk_size = args.chunk_size;
            opts.step_size = args.step_size;
            opts.legacy_size = args.legacy_size;
            opts.erase = args.erase;
            opts.max_size = args.max_size;
            opts.expect_sha256 = args.expect_sha256;
        }
        Cmd::Header(args) => {
            opts.command = Command::Header;
            opts.patch_file = Some(args.input);
        }
        Cmd::Config => {}
    }
    opts
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("oxipatch".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let opts = resolve_options(cli);
        let _ = build_apply_options(&opts);
    }
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

// ---------------------------------------------------------------------------
// Config command
// ---------------------------------------------------------------------------

fn cmd_config() -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("oxipatch version {version} (Rust)");

    let file_io = cfg!(feature = "file-io") as u8;
    let ptr_size = std::mem::size_of::<*const ()>();
    let algorithms: Vec<String> = BackendRegistry::default()
        .ids()
        .map(|id| id.to_string())
        .collect();

    eprintln!("FILE_IO={file_io}");
    eprintln!("ALGORITHMS={}", algorithms.join(","));
    eprintln!("HEADER_LEN={HEADER_LEN}");
    eprintln!("DEFAULT_CHUNK_SIZE={DEFAULT_CHUNK_SIZE}");
    eprintln!("DEFAULT_STEP_SIZE={DEFAULT_STEP_SIZE}");
    eprintln!("MAX_CHUNK_SIZE={MAX_CHUNK_SIZE}");
    eprintln!("DEFAULT_MAX_OUTPUT_SIZE={}", io::DEFAULT_MAX_OUTPUT_SIZE);
    eprintln!("INPUT_READ_SIZE={INPUT_READ_SIZE}");
    eprintln!("POLL_READ_SIZE={POLL_READ_SIZE}");
    eprintln!("sizeof(usize)={ptr_size}");

    0
}

// ---------------------------------------------------------------------------
// Build ApplyOptions from CLI options
// ---------------------------------------------------------------------------

fn build_apply_options(opts: &Options) -> Result<ApplyOptions, String> {
    let chunk_size = usize::try_from(opts.chunk_size)
        .map_err(|_| format!("chunk size {} too large", opts.chunk_size))?;
    let step_size = usize::try_from(opts.step_size)
        .map_err(|_| format!("step size {} too large", opts.step_size))?;

    let options = ApplyOptions {
        chunk_size,
        step_size,
        size_width: if opts.legacy_size {
            SizeWidth::Legacy16
        } else {
            SizeWidth::Full
        },
        erase_target: opts.erase,
        ..ApplyOptions::default()
    };
    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

// ---------------------------------------------------------------------------
// Apply command
// ---------------------------------------------------------------------------

fn cmd_apply(opts: &Options) -> i32 {
    let apply_opts = match build_apply_options(opts) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("oxipatch: {e}");
            return 1;
        }
    };

    let (Some(old), Some(patch), Some(output)) = (
        opts.old_file.as_deref(),
        opts.patch_file.as_deref(),
        opts.output_file.as_deref(),
    ) else {
        eprintln!("oxipatch: apply needs an old image, a patch and an output file");
        return 1;
    };

    if output.exists() {
        if !opts.force {
            eprintln!(
                "oxipatch: output file exists, use -f to overwrite: {}",
                output.display()
            );
            return 1;
        }
        // Creating the output truncates it before any input is read.
        if [old, patch].iter().any(|input| same_file(input, output)) {
            eprintln!(
                "oxipatch: output would overwrite an input file: {}",
                output.display()
            );
            return 1;
        }
    }

    debug!(
        "applying {} to {} (chunk {}, step {})",
        patch.display(),
        old.display(),
        apply_opts.chunk_size,
        apply_opts.step_size
    );

    let stats = match io::apply_file_with_limit(old, patch, output, apply_opts, opts.max_size) {
        Ok(stats) => stats,
        Err(e) => {
            error!("apply failed: {e}");
            eprintln!("oxipatch: {}", describe_failure(&e));
            return 1;
        }
    };

    if stats.outcome == Outcome::NoPatch {
        if !opts.quiet {
            eprintln!("oxipatch: no valid patch in {}", patch.display());
        }
        report_json(opts, &stats);
        return EXIT_NO_PATCH;
    }

    if let Some(expected) = opts.expect_sha256 {
        if stats.output_sha256 != Some(expected) {
            eprintln!(
                "oxipatch: SHA-256 mismatch: expected {}, got {}",
                io::to_hex(&expected),
                stats
                    .output_sha256
                    .as_ref()
                    .map_or_else(|| "unavailable".to_string(), |d| io::to_hex(d))
            );
            if let Err(e) = std::fs::remove_file(output) {
                eprintln!("oxipatch: could not remove {}: {e}", output.display());
            }
            return 1;
        }
    }

    if opts.verbose > 0 && !opts.quiet {
        if let Some(applied) = stats.outcome.stats() {
            eprintln!(
                "oxipatch: applied: output size: {}, control triples: {}, diff: {}, extra: {}",
                stats.output_size, applied.control_triples, applied.diff_bytes, applied.extra_bytes
            );
        }
        if let Some(digest) = &stats.output_sha256 {
            eprintln!("oxipatch: output SHA-256: {}", io::to_hex(digest));
        }
    }
    report_json(opts, &stats);

    0
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn describe_failure(e: &IoError) -> String {
    match e {
        IoError::Patch(PatchError::InvalidHeader(msg)) => format!("invalid patch header: {msg}"),
        IoError::Patch(e @ PatchError::Integrity(_)) => {
            format!("{e} (patch does not match this old image?)")
        }
        other => other.to_string(),
    }
}

fn report_json(opts: &Options, stats: &FileApplyStats) {
    if !opts.json_output {
        return;
    }
    let applied = stats.outcome.stats().copied().unwrap_or_default();
    let json = serde_json::json!({
        "command": "apply",
        "applied": matches!(stats.outcome, Outcome::Applied(_)),
        "old_size": stats.old_size,
        "patch_size": stats.patch_size,
        "output_size": stats.output_size,
        "control_triples": applied.control_triples,
        "diff_bytes": applied.diff_bytes,
        "extra_bytes": applied.extra_bytes,
        "patch_bytes": applied.patch_bytes,
        "output_sha256": stats.output_sha256.as_ref().map(|d| io::to_hex(d)),
    });
    eprintln!("{json:#}");
}

// ---------------------------------------------------------------------------
// Header command
// ---------------------------------------------------------------------------

fn read_header_bytes(path: &Path) -> Result<([u8; HEADER_LEN], u64), String> {
    let data = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let buf = data
        .get(..HEADER_LEN)
        .and_then(|b| <[u8; HEADER_LEN]>::try_from(b).ok())
        .ok_or_else(|| {
            format!(
                "{}: {} bytes is too short for a patch header",
                path.display(),
                data.len()
            )
        })?;
    Ok((buf, data.len() as u64))
}

fn cmd_header(opts: &Options) -> i32 {
    let Some(path) = opts.patch_file.as_deref() else {
        eprintln!("oxipatch: header needs a patch file");
        return 1;
    };
    let (buf, file_size) = match read_header_bytes(path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("oxipatch: {e}");
            return 1;
        }
    };

    let legacy = PatchHeader::parse(&buf, SizeWidth::Legacy16);
    let header = match (PatchHeader::parse(&buf, SizeWidth::Full), &legacy) {
        (Ok(h), _) => h,
        (Err(PatchError::MagicMismatch { found }), _) => {
            if !opts.quiet {
                eprintln!(
                    "oxipatch: no valid patch in {} (magic {found:02X?})",
                    path.display()
                );
            }
            return EXIT_NO_PATCH;
        }
        (Err(e), Ok(h)) => {
            eprintln!("oxipatch: warning: {e}; showing 16-bit size only");
            *h
        }
        (Err(e), Err(_)) => {
            eprintln!("oxipatch: {}: {e}", path.display());
            return 1;
        }
    };
    let legacy_size = legacy.map(|h| h.target_size).ok();

    if opts.json_output {
        let json = serde_json::json!({
            "command": "header",
            "file_size": file_size,
            "target_size": header.target_size,
            "legacy_target_size": legacy_size,
            "window_sz2": header.window_sz2,
            "lookahead_sz2": header.lookahead_sz2,
        });
        eprintln!("{json:#}");
    }

    println!("Patch file:           {}", path.display());
    println!("Patch size:           {file_size}");
    println!("Magic:                {}", String::from_utf8_lossy(&header.magic));
    println!("Target size:          {}", header.target_size);
    if let Some(size) = legacy_size {
        if size != header.target_size {
            println!("Target size (16-bit): {size}");
        }
    }
    println!(
        "Window:               2^{} = {} bytes",
        header.window_sz2,
        1u32 << header.window_sz2
    );
    println!(
        "Lookahead:            2^{} = {} bytes",
        header.lookahead_sz2,
        1u32 << header.lookahead_sz2
    );

    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();
    let opts = resolve_options(cli);

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(opts.verbose)),
    )
    .format_timestamp(None)
    .format_target(false)
    .init();

    let exit_code = match opts.command {
        Command::Apply => cmd_apply(&opts),
        Command::Header => cmd_header(&opts),
        Command::Config => cmd_config(),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
