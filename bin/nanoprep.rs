//! Annotate, trim, orient and classify primer structure in long-read FASTQ.
//!
//! Each read is searched for a 5' and a 3' primer near its ends, in both
//! orientations, and for stray primers in its body. Reads are then classified
//! as fusion, full-length or truncated and written to per-class outputs, with
//! the annotation appended to the read identifier.
//!
//! # Features
//!
//! - **Parallel processing**: batches of reads are processed on a rayon pool
//!   while a single writer thread owns every output
//! - **Approximate matching**: primers are located with a bounded edit-distance
//!   aligner at a configurable percent identity
//! - **Homopolymer detection**: poly(A)/poly(T) runs declared in the primer
//!   descriptor (e.g. `A{100}ACGT...`) are measured next to the primers
//! - **Trimming and orientation**: primers and runs can be cut, and reads
//!   flipped so they all read 5' to 3' on one strand
//! - **Filtering**: short or low-quality reads are skipped before annotation or
//!   sent to `<stem>_<suffix>` outputs after trimming
//! - **Re-processing**: with `--disable-annot` the annotation already present
//!   in the identifiers is used as is
//! - **Reports**: a summary on stderr and an optional JSON report that can be
//!   fed back in with `--config`
//!
//! # Algorithm
//!
//! 1. Resolve parameters: defaults, then `--mode`, then `--config`, then the
//!    remaining options
//! 2. Index the input and split it into batches
//! 3. For each read: skip, annotate, classify, trim, orient, filter
//! 4. Route each read by class and pass/filter status to its output
//! 5. Merge the per-batch counters and report
//!
//! # Usage
//!
//! ```bash
//! nanoprep reads.fastq.gz \
//!   --mode standard \
//!   --output-full-length out/full_length.fq.gz \
//!   --output-truncated out/truncated.fq.gz \
//!   --output-fusion out/fusion.fq.gz \
//!   --report out/report.json \
//!   -t 8
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls logging verbosity (e.g., `debug`, `info`, `warn`)
//! - `RAYON_NUM_THREADS`: Overrides default thread count

use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use log::{debug, error, info};

use nanoprep::annotate::{FusionMode, SearchWindow};
use nanoprep::config::{Params, ParamsPatch, PRESET_NAMES};
use nanoprep::pipeline;
use nanoprep::report::Report;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "nanoprep")]
#[command(version, about = "Annotate, trim, orient and classify primer structure in long-read FASTQ")]
struct Args {
    /// Input FASTQ file (gzip supported)
    input: PathBuf,

    /// Named parameter preset
    #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(PRESET_NAMES))]
    mode: Option<String>,

    /// JSON config file; overrides the preset, overridden by other options
    #[arg(long)]
    config: Option<PathBuf>,

    // Annotation
    /// 5' sense primer, optionally prefixed by a polymer descriptor such as T{100}
    #[arg(long, help_heading = "Annotation")]
    p5_sense: Option<String>,

    /// 3' sense primer, optionally prefixed by a polymer descriptor such as A{100}
    #[arg(long, help_heading = "Annotation")]
    p3_sense: Option<String>,

    /// 5' search window; negative bounds count from the read end
    #[arg(long, num_args = 2, value_names = ["START", "END"], allow_negative_numbers = true, help_heading = "Annotation")]
    isl5: Option<Vec<i64>>,

    /// 3' search window; END 0 with a negative START runs to the read end
    #[arg(long, num_args = 2, value_names = ["START", "END"], allow_negative_numbers = true, help_heading = "Annotation")]
    isl3: Option<Vec<i64>>,

    /// Identity cutoff for both primer windows
    #[arg(long, allow_negative_numbers = true, help_heading = "Annotation")]
    pid_isl: Option<f64>,

    /// Identity cutoff for the 5' window (default: --pid-isl)
    #[arg(long, allow_negative_numbers = true, help_heading = "Annotation")]
    pid5: Option<f64>,

    /// Identity cutoff for the 3' window (default: --pid-isl)
    #[arg(long, allow_negative_numbers = true, help_heading = "Annotation")]
    pid3: Option<f64>,

    /// Identity cutoff for primers in the read body (fusion detection)
    #[arg(long, allow_negative_numbers = true, help_heading = "Annotation")]
    pid_body: Option<f64>,

    /// Decimal places percent identities are rounded to
    #[arg(long, help_heading = "Annotation")]
    pid_precision: Option<u32>,

    /// Homopolymer sliding window width
    #[arg(long, help_heading = "Annotation")]
    poly_w: Option<usize>,

    /// Minimum matching bases in a homopolymer window
    #[arg(long, help_heading = "Annotation")]
    poly_k: Option<usize>,

    /// Keep the annotation already present in the read identifiers
    #[arg(long, overrides_with = "enable_annot", help_heading = "Annotation")]
    disable_annot: bool,

    /// Annotate reads even if the preset or config disables it
    #[arg(long, overrides_with = "disable_annot", help_heading = "Annotation")]
    enable_annot: bool,

    /// Locate end primers even in reads already marked as fusions
    #[arg(long, overrides_with = "stop_at_fusion", help_heading = "Annotation")]
    annotate_past_fusion: bool,

    /// Stop annotating a read once a primer is found in its body
    #[arg(long, overrides_with = "annotate_past_fusion", help_heading = "Annotation")]
    stop_at_fusion: bool,

    // Processing
    /// Skip reads shorter than this before annotation
    #[arg(long, help_heading = "Processing")]
    skip_short: Option<usize>,

    /// Skip reads with a lower mean quality before annotation
    #[arg(long, help_heading = "Processing")]
    skip_lowq: Option<f64>,

    /// Filter reads shorter than this after trimming
    #[arg(long, help_heading = "Processing")]
    filter_short: Option<usize>,

    /// Filter reads with a lower mean quality after trimming
    #[arg(long, help_heading = "Processing")]
    filter_lowq: Option<f64>,

    /// Trim located primers
    #[arg(long, overrides_with = "no_trim_adapter", help_heading = "Processing")]
    trim_adapter: bool,

    /// Keep located primers in the reads
    #[arg(long, overrides_with = "trim_adapter", help_heading = "Processing")]
    no_trim_adapter: bool,

    /// Trim homopolymer runs together with the primers (needs --trim-adapter)
    #[arg(long, overrides_with = "no_trim_poly", help_heading = "Processing")]
    trim_poly: bool,

    /// Keep homopolymer runs in the reads
    #[arg(long, overrides_with = "trim_poly", help_heading = "Processing")]
    no_trim_poly: bool,

    /// Target strand: 1 sense, -1 antisense, 0 leave as is
    #[arg(long, allow_negative_numbers = true, help_heading = "Processing")]
    orientation: Option<i8>,

    // Output
    /// Output for fusion reads ('-' for stdout)
    #[arg(long, help_heading = "Output")]
    output_fusion: Option<String>,

    /// Output for truncated reads ('-' for stdout)
    #[arg(long, help_heading = "Output")]
    output_truncated: Option<String>,

    /// Output for full-length reads ('-' for stdout) [default: -]
    #[arg(long, help_heading = "Output")]
    output_full_length: Option<String>,

    /// Suffix naming filtered outputs; without it filtered reads are dropped
    #[arg(long, help_heading = "Output")]
    suffix_filtered: Option<String>,

    /// JSON report file
    #[arg(long, help_heading = "Output")]
    report: Option<PathBuf>,

    /// Number of threads (default: half of available cores)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Target number of reads per batch
    #[arg(long)]
    batch_size: Option<usize>,
}

/// A `--flag`/`--no-flag` pair: unset unless one of them was given.
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn window(bounds: &Option<Vec<i64>>) -> Option<SearchWindow> {
    match bounds.as_deref() {
        Some(&[start, end]) => Some(SearchWindow::new(start, end)),
        _ => None,
    }
}

impl Args {
    /// Everything set on the command line, as the top configuration layer.
    fn to_patch(&self) -> ParamsPatch {
        let fusion_mode = toggle(self.annotate_past_fusion, self.stop_at_fusion).map(|past| {
            if past {
                FusionMode::Always
            } else {
                FusionMode::ShortCircuit
            }
        });
        ParamsPatch {
            disable_annot: toggle(self.disable_annot, self.enable_annot),
            p5_sense: self.p5_sense.clone(),
            p3_sense: self.p3_sense.clone(),
            isl5: window(&self.isl5),
            isl3: window(&self.isl3),
            pid_isl: self.pid_isl,
            pid5: self.pid5,
            pid3: self.pid3,
            pid_body: self.pid_body,
            pid_precision: self.pid_precision,
            poly_w: self.poly_w,
            poly_k: self.poly_k,
            fusion_mode,
            skip_short: self.skip_short,
            skip_lowq: self.skip_lowq,
            filter_short: self.filter_short,
            filter_lowq: self.filter_lowq,
            trim_adapter: toggle(self.trim_adapter, self.no_trim_adapter),
            trim_poly: toggle(self.trim_poly, self.no_trim_poly),
            orientation: self.orientation,
            output_fusion: self.output_fusion.clone(),
            output_truncated: self.output_truncated.clone(),
            output_full_length: self.output_full_length.clone(),
            suffix_filtered: self.suffix_filtered.clone(),
            report: self.report.clone(),
            threads: self.threads,
            batch_size: self.batch_size,
        }
    }
}

/// Validate command-line arguments that parameter resolution cannot check
fn validate_args(args: &Args) -> Result<()> {
    debug!("Validating command-line arguments");

    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", args.input);
    }
    debug!("Input file exists: {:?}", args.input);

    if let Some(config) = &args.config {
        if !config.exists() {
            anyhow::bail!("Config file does not exist: {:?}", config);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    validate_args(&args)?;

    let params = match Params::resolve(args.mode.as_deref(), args.config.as_deref(), args.to_patch())
    {
        Ok(params) => params,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("=== nanoprep started ===");
    info!("Input file: {:?}", args.input);
    if let Some(mode) = &args.mode {
        info!("Preset: {}", mode);
    }
    info!("Threads: {}", params.threads);
    if params.disable_annot {
        info!("Annotation disabled; using annotations from read identifiers");
    } else {
        info!("5' primer: {}", params.p5_sense.as_deref().unwrap_or_default());
        info!("3' primer: {}", params.p3_sense.as_deref().unwrap_or_default());
        info!(
            "Identity cutoffs: 5' {}, 3' {}, body {}",
            params.pid5(),
            params.pid3(),
            params.pid_body
        );
    }
    info!(
        "Trimming: adapter={}, poly={}; orientation: {}",
        params.trim_adapter, params.trim_poly, params.orientation
    );
    debug!("Resolved parameters: {:?}", params);

    let start = Local::now();
    let annotator = params.annotator_config()?;
    let options = params.pipeline_options();

    let counters = pipeline::run(&args.input, annotator.as_ref(), &options)?;
    let stop = Local::now();

    info!("Processing complete");
    counters.write_summary(&mut std::io::stderr())?;

    if let Some(path) = &params.report {
        info!("Writing report to: {:?}", path);
        Report::new(start, stop, &args.input, &counters, &params).write_json(path)?;
    }

    info!("=== nanoprep finished ===");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_options_leave_patch_empty() {
        let args = Args::parse_from(["nanoprep", "reads.fq"]);
        assert_eq!(args.to_patch(), ParamsPatch::default());
    }

    #[test]
    fn test_options_become_patch() {
        let args = Args::parse_from([
            "nanoprep",
            "reads.fq",
            "--mode",
            "standard",
            "--isl3",
            "-80",
            "0",
            "--orientation",
            "-1",
            "--trim-adapter",
            "--annotate-past-fusion",
            "--output-truncated",
            "out/trunc.fq.gz",
            "-t",
            "3",
        ]);
        assert_eq!(args.mode.as_deref(), Some("standard"));
        let patch = args.to_patch();
        assert_eq!(patch.isl3, Some(SearchWindow::new(-80, 0)));
        assert_eq!(patch.isl5, None);
        assert_eq!(patch.orientation, Some(-1));
        assert_eq!(patch.trim_adapter, Some(true));
        assert_eq!(patch.trim_poly, None);
        assert_eq!(patch.fusion_mode, Some(FusionMode::Always));
        assert_eq!(patch.output_truncated.as_deref(), Some("out/trunc.fq.gz"));
        assert_eq!(patch.threads, Some(3));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Args::try_parse_from(["nanoprep", "reads.fq", "--mode", "nope"]).is_err());
    }

    #[test]
    fn test_command_line_overrides_preset() {
        let args = Args::parse_from(["nanoprep", "reads.fq", "--mode", "standard", "--pid5", "0.9"]);
        let params = Params::resolve(args.mode.as_deref(), None, args.to_patch()).unwrap();
        assert_eq!(params.pid5(), 0.9);
        assert_eq!(params.pid3(), 0.7);
        assert!(params.trim_poly);
    }

    #[test]
    fn test_negated_flags_override_preset() {
        let args = Args::parse_from([
            "nanoprep",
            "reads.fq",
            "--mode",
            "standard",
            "--no-trim-adapter",
            "--no-trim-poly",
        ]);
        let patch = args.to_patch();
        assert_eq!(patch.trim_adapter, Some(false));
        assert_eq!(patch.trim_poly, Some(false));
        let params = Params::resolve(args.mode.as_deref(), None, patch).unwrap();
        assert!(!params.trim_adapter);
        assert!(!params.trim_poly);
        params.validate().unwrap();
    }

    #[test]
    fn test_last_of_a_flag_pair_wins() {
        let args = Args::parse_from([
            "nanoprep",
            "reads.fq",
            "--trim-poly",
            "--no-trim-poly",
            "--disable-annot",
            "--enable-annot",
            "--stop-at-fusion",
            "--annotate-past-fusion",
        ]);
        let patch = args.to_patch();
        assert_eq!(patch.trim_poly, Some(false));
        assert_eq!(patch.disable_annot, Some(false));
        assert_eq!(patch.fusion_mode, Some(FusionMode::Always));

        let args = Args::parse_from(["nanoprep", "reads.fq", "--stop-at-fusion"]);
        assert_eq!(args.to_patch().fusion_mode, Some(FusionMode::ShortCircuit));
    }
}
