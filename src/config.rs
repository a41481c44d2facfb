//! Run parameters: defaults, presets, JSON config files, and validation.
//!
//! Parameters are layered, later layers winning:
//!
//! 1. built-in defaults ([`Params::default`])
//! 2. a named preset (`--mode`)
//! 3. a JSON config file (`--config`)
//! 4. command-line options
//!
//! Every layer above the defaults is a [`ParamsPatch`]. The `params` object
//! of a JSON report is itself a valid config file, so a run can be repeated
//! from its report.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::align::Aligner;
use crate::annotate::{AnnotatorConfig, FusionMode, SearchWindow};
use crate::error::ConfigError;
use crate::pipeline::{OutputPlan, OutputTarget, PipelineOptions};
use crate::polymer::{parse_primer, PrimerEnd};
use crate::process::Orientation;

/// Presets selectable with `--mode`.
pub const PRESET_NAMES: [&str; 2] = ["standard", "annotate"];

const STANDARD_P5: &str = "TCGGTGTCTTTGTGTTTCTGTTGGTGCTGATATTGCTGGG";
const STANDARD_P3: &str = "A{100}GAAGATAGAGCGACAGGCAAGTCACAAAGACACCGACAAC";

/// Primers shorter than this are accepted with a warning.
const SHORT_PRIMER_WARNING: usize = 10;

/// Default worker count: `RAYON_NUM_THREADS`, or half the available cores.
pub fn default_threads() -> usize {
    std::env::var("RAYON_NUM_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| (num_cpus::get() / 2).max(1))
}

/// Fully resolved parameters of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Keep the annotation already present in the read identifiers
    pub disable_annot: bool,
    pub p5_sense: Option<String>,
    pub p3_sense: Option<String>,
    pub isl5: SearchWindow,
    pub isl3: SearchWindow,
    /// Identity cutoff for both window searches unless `pid5`/`pid3` are given
    pub pid_isl: f64,
    pub pid5: Option<f64>,
    pub pid3: Option<f64>,
    /// Identity cutoff for primers found in the read body (fusion detection)
    pub pid_body: f64,
    /// Decimal places percent identities are rounded to
    pub pid_precision: u32,
    pub poly_w: usize,
    pub poly_k: usize,
    pub fusion_mode: FusionMode,
    pub skip_short: usize,
    pub skip_lowq: f64,
    pub filter_short: usize,
    pub filter_lowq: f64,
    pub trim_adapter: bool,
    pub trim_poly: bool,
    /// 0: leave as is, 1: sense, -1: antisense
    pub orientation: i8,
    pub output_fusion: Option<String>,
    pub output_truncated: Option<String>,
    pub output_full_length: Option<String>,
    pub suffix_filtered: Option<String>,
    pub report: Option<PathBuf>,
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            disable_annot: false,
            p5_sense: None,
            p3_sense: None,
            isl5: SearchWindow::new(0, 130),
            isl3: SearchWindow::new(-60, 0),
            pid_isl: 0.7,
            pid5: None,
            pid3: None,
            pid_body: 0.7,
            pid_precision: 2,
            poly_w: 6,
            poly_k: 4,
            fusion_mode: FusionMode::ShortCircuit,
            skip_short: 0,
            skip_lowq: 0.0,
            filter_short: 0,
            filter_lowq: 0.0,
            trim_adapter: false,
            trim_poly: false,
            orientation: 0,
            output_fusion: None,
            output_truncated: None,
            output_full_length: Some("-".to_string()),
            suffix_filtered: None,
            report: None,
            threads: default_threads(),
            batch_size: 1_000_000,
        }
    }
}

/// A partial set of parameters, used for presets, config files and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParamsPatch {
    pub disable_annot: Option<bool>,
    pub p5_sense: Option<String>,
    pub p3_sense: Option<String>,
    pub isl5: Option<SearchWindow>,
    pub isl3: Option<SearchWindow>,
    pub pid_isl: Option<f64>,
    pub pid5: Option<f64>,
    pub pid3: Option<f64>,
    pub pid_body: Option<f64>,
    pub pid_precision: Option<u32>,
    pub poly_w: Option<usize>,
    pub poly_k: Option<usize>,
    pub fusion_mode: Option<FusionMode>,
    pub skip_short: Option<usize>,
    pub skip_lowq: Option<f64>,
    pub filter_short: Option<usize>,
    pub filter_lowq: Option<f64>,
    pub trim_adapter: Option<bool>,
    pub trim_poly: Option<bool>,
    pub orientation: Option<i8>,
    pub output_fusion: Option<String>,
    pub output_truncated: Option<String>,
    pub output_full_length: Option<String>,
    pub suffix_filtered: Option<String>,
    pub report: Option<PathBuf>,
    pub threads: Option<usize>,
    pub batch_size: Option<usize>,
}

impl ParamsPatch {
    /// Load a patch from a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Look up a named preset.
pub fn preset(name: &str) -> Result<ParamsPatch, ConfigError> {
    match name {
        // cDNA reads with a 5' primer and a poly(A)-tailed 3' primer
        "standard" => Ok(ParamsPatch {
            p5_sense: Some(STANDARD_P5.to_string()),
            p3_sense: Some(STANDARD_P3.to_string()),
            isl5: Some(SearchWindow::new(0, 130)),
            isl3: Some(SearchWindow::new(-60, -1)),
            pid_isl: Some(0.7),
            pid_body: Some(0.7),
            poly_w: Some(6),
            poly_k: Some(4),
            filter_short: Some(0),
            filter_lowq: Some(7.0),
            trim_adapter: Some(true),
            trim_poly: Some(true),
            orientation: Some(1),
            suffix_filtered: Some("filtered".to_string()),
            ..ParamsPatch::default()
        }),
        // same primers, annotation only
        "annotate" => Ok(ParamsPatch {
            p5_sense: Some(STANDARD_P5.to_string()),
            p3_sense: Some(STANDARD_P3.to_string()),
            isl5: Some(SearchWindow::new(0, 130)),
            isl3: Some(SearchWindow::new(-60, -1)),
            pid_isl: Some(0.7),
            pid_body: Some(0.7),
            trim_adapter: Some(false),
            trim_poly: Some(false),
            orientation: Some(0),
            ..ParamsPatch::default()
        }),
        _ => Err(ConfigError::UnknownPreset {
            name: name.to_string(),
            available: PRESET_NAMES.iter().join(", "),
        }),
    }
}

fn invalid(parameter: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter { parameter: parameter.to_string(), reason: reason.into() }
}

fn check_pid(parameter: &str, pid: f64) -> Result<(), ConfigError> {
    if pid == -1.0 || (0.0..=1.0).contains(&pid) {
        Ok(())
    } else {
        Err(invalid(parameter, format!("{pid} is not in [0, 1] (or -1 for unbounded)")))
    }
}

impl Params {
    /// Overwrite every field the patch sets.
    pub fn apply(&mut self, patch: ParamsPatch) {
        let ParamsPatch {
            disable_annot,
            p5_sense,
            p3_sense,
            isl5,
            isl3,
            pid_isl,
            pid5,
            pid3,
            pid_body,
            pid_precision,
            poly_w,
            poly_k,
            fusion_mode,
            skip_short,
            skip_lowq,
            filter_short,
            filter_lowq,
            trim_adapter,
            trim_poly,
            orientation,
            output_fusion,
            output_truncated,
            output_full_length,
            suffix_filtered,
            report,
            threads,
            batch_size,
        } = patch;

        if let Some(v) = disable_annot {
            self.disable_annot = v;
        }
        if p5_sense.is_some() {
            self.p5_sense = p5_sense;
        }
        if p3_sense.is_some() {
            self.p3_sense = p3_sense;
        }
        if let Some(v) = isl5 {
            self.isl5 = v;
        }
        if let Some(v) = isl3 {
            self.isl3 = v;
        }
        if let Some(v) = pid_isl {
            self.pid_isl = v;
        }
        if pid5.is_some() {
            self.pid5 = pid5;
        }
        if pid3.is_some() {
            self.pid3 = pid3;
        }
        if let Some(v) = pid_body {
            self.pid_body = v;
        }
        if let Some(v) = pid_precision {
            self.pid_precision = v;
        }
        if let Some(v) = poly_w {
            self.poly_w = v;
        }
        if let Some(v) = poly_k {
            self.poly_k = v;
        }
        if let Some(v) = fusion_mode {
            self.fusion_mode = v;
        }
        if let Some(v) = skip_short {
            self.skip_short = v;
        }
        if let Some(v) = skip_lowq {
            self.skip_lowq = v;
        }
        if let Some(v) = filter_short {
            self.filter_short = v;
        }
        if let Some(v) = filter_lowq {
            self.filter_lowq = v;
        }
        if let Some(v) = trim_adapter {
            self.trim_adapter = v;
        }
        if let Some(v) = trim_poly {
            self.trim_poly = v;
        }
        if let Some(v) = orientation {
            self.orientation = v;
        }
        if output_fusion.is_some() {
            self.output_fusion = output_fusion;
        }
        if output_truncated.is_some() {
            self.output_truncated = output_truncated;
        }
        if output_full_length.is_some() {
            self.output_full_length = output_full_length;
        }
        if suffix_filtered.is_some() {
            self.suffix_filtered = suffix_filtered;
        }
        if report.is_some() {
            self.report = report;
        }
        if let Some(v) = threads {
            self.threads = v;
        }
        if let Some(v) = batch_size {
            self.batch_size = v;
        }
    }

    /// Resolve defaults < preset < config file < command line, then validate.
    pub fn resolve(
        mode: Option<&str>,
        config: Option<&Path>,
        cli: ParamsPatch,
    ) -> Result<Self, ConfigError> {
        let mut params = Params::default();
        if let Some(mode) = mode {
            debug!("Applying preset '{}'", mode);
            params.apply(preset(mode)?);
        }
        if let Some(path) = config {
            debug!("Applying config file {:?}", path);
            params.apply(ParamsPatch::from_json_file(path)?);
        }
        params.apply(cli);
        params.validate()?;
        Ok(params)
    }

    pub fn pid5(&self) -> f64 {
        self.pid5.unwrap_or(self.pid_isl)
    }

    pub fn pid3(&self) -> f64 {
        self.pid3.unwrap_or(self.pid_isl)
    }

    /// Check that the parameters describe a runnable configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trim_poly && !self.trim_adapter {
            return Err(ConfigError::Conflict(
                "--trim-poly is only applicable together with --trim-adapter".to_string(),
            ));
        }
        if Orientation::try_from(self.orientation).is_err() {
            return Err(invalid(
                "orientation",
                format!("{} is not one of 0 (generic), 1 (sense), -1 (antisense)", self.orientation),
            ));
        }

        check_pid("pid-isl", self.pid_isl)?;
        check_pid("pid-body", self.pid_body)?;
        if let Some(pid) = self.pid5 {
            check_pid("pid5", pid)?;
        }
        if let Some(pid) = self.pid3 {
            check_pid("pid3", pid)?;
        }
        if self.pid_precision > 10 {
            return Err(invalid("pid-precision", "must be at most 10 decimal places"));
        }

        if self.poly_w == 0 {
            return Err(invalid("poly-w", "window size must be at least 1"));
        }
        if self.poly_k > self.poly_w {
            return Err(invalid(
                "poly-k",
                format!("{} exceeds the window size poly-w ({})", self.poly_k, self.poly_w),
            ));
        }

        for (name, window) in [("isl5", self.isl5), ("isl3", self.isl3)] {
            if !window.is_well_formed() {
                return Err(invalid(
                    name,
                    format!(
                        "({}, {}) is not a window: bounds must count from the same end with start < end",
                        window.start, window.end
                    ),
                ));
            }
        }

        if !self.disable_annot {
            for (name, primer, end) in [
                ("p5-sense", &self.p5_sense, PrimerEnd::Five),
                ("p3-sense", &self.p3_sense, PrimerEnd::Three),
            ] {
                let Some(primer) = primer else {
                    return Err(invalid(name, "required unless --disable-annot is set"));
                };
                let spec = parse_primer(primer, end)?;
                if spec.sequence.len() < SHORT_PRIMER_WARNING {
                    warn!(
                        "{} primer is very short ({} bp), may cause false matches",
                        end.label(),
                        spec.sequence.len()
                    );
                }
            }
        }

        if self.threads == 0 {
            return Err(invalid("threads", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch-size", "must be at least 1"));
        }
        if matches!(self.suffix_filtered.as_deref(), Some("")) {
            return Err(invalid("suffix-filtered", "must not be empty"));
        }

        debug!("All parameters validated successfully");
        Ok(())
    }

    /// Annotator settings, or `None` when annotation is disabled.
    pub fn annotator_config(&self) -> Result<Option<AnnotatorConfig>, ConfigError> {
        if self.disable_annot {
            return Ok(None);
        }
        let (Some(p5), Some(p3)) = (&self.p5_sense, &self.p3_sense) else {
            return Err(invalid("p5-sense", "both primers are required for annotation"));
        };
        let mut config = AnnotatorConfig::new(p5, p3)?;
        config.isl5 = self.isl5;
        config.isl3 = self.isl3;
        config.pid5 = self.pid5();
        config.pid3 = self.pid3();
        config.pid_body = self.pid_body;
        config.poly_w = self.poly_w;
        config.poly_k = self.poly_k;
        config.fusion_mode = self.fusion_mode;
        config.aligner = Aligner::new(self.pid_precision);
        Ok(Some(config))
    }

    /// Worker, filter and output settings for the batch pipeline.
    pub fn pipeline_options(&self) -> PipelineOptions {
        let target = |path: &Option<String>| path.as_deref().map(OutputTarget::parse);
        PipelineOptions {
            threads: self.threads,
            batch_size: self.batch_size,
            skip_short: self.skip_short,
            skip_lowq: self.skip_lowq,
            filter_short: self.filter_short,
            filter_lowq: self.filter_lowq,
            trim_adapter: self.trim_adapter,
            trim_poly: self.trim_poly,
            orientation: Orientation::try_from(self.orientation).unwrap_or_default(),
            outputs: OutputPlan {
                fusion: target(&self.output_fusion),
                full_length: target(&self.output_full_length),
                truncated: target(&self.output_truncated),
                suffix_filtered: self.suffix_filtered.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn annotating() -> Params {
        Params {
            p5_sense: Some("TCGGTGTCTTTGTGTTTCTG".to_string()),
            p3_sense: Some("A{50}GAAGATAGAGCGACAGGCAA".to_string()),
            threads: 2,
            ..Params::default()
        }
    }

    #[test]
    fn test_defaults_need_primers() {
        let params = Params { threads: 1, ..Params::default() };
        let err = params.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { ref parameter, .. } if parameter == "p5-sense"));

        let params = Params { disable_annot: true, threads: 1, ..Params::default() };
        params.validate().unwrap();
    }

    #[test]
    fn test_standard_preset_is_valid() {
        let params = Params::resolve(Some("standard"), None, ParamsPatch::default()).unwrap();
        assert!(params.trim_adapter && params.trim_poly);
        assert_eq!(params.orientation, 1);
        assert_eq!(params.isl3, SearchWindow::new(-60, -1));
        assert_eq!(params.filter_lowq, 7.0);
        assert_eq!(params.suffix_filtered.as_deref(), Some("filtered"));

        let config = params.annotator_config().unwrap().unwrap();
        assert_eq!(config.p3_sense.len(), 40);
        assert_eq!(config.polymers.len(), 2);
    }

    #[test]
    fn test_unknown_preset_lists_available() {
        let err = Params::resolve(Some("rna"), None, ParamsPatch::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown preset 'rna' (available: standard, annotate)"
        );
    }

    #[test]
    fn test_layering_order() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(&config, r#"{"pid_isl": 0.8, "poly_w": 8, "isl5": [0, 200]}"#).unwrap();

        let cli = ParamsPatch { pid_isl: Some(0.9), ..ParamsPatch::default() };
        let params = Params::resolve(Some("standard"), Some(&config), cli).unwrap();
        // CLI beats config file
        assert_eq!(params.pid_isl, 0.9);
        // config file beats preset
        assert_eq!(params.poly_w, 8);
        assert_eq!(params.isl5, SearchWindow::new(0, 200));
        // preset beats defaults
        assert!(params.trim_adapter);
        assert_eq!(params.pid5(), 0.9);
    }

    #[test]
    fn test_config_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.json");
        std::fs::write(&config, r#"{"pid_isl": 0.8, "primer": "ACGT"}"#).unwrap();
        let err = Params::resolve(None, Some(&config), ParamsPatch::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParse { .. }));
    }

    #[test]
    fn test_missing_config_file() {
        let err = ParamsPatch::from_json_file(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigRead { .. }));
    }

    #[test]
    fn test_serialized_params_are_a_valid_config() {
        let params = Params::resolve(Some("standard"), None, ParamsPatch::default()).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let patch: ParamsPatch = serde_json::from_str(&json).unwrap();
        let mut again = Params::default();
        again.apply(patch);
        assert_eq!(again, params);
    }

    #[test]
    fn test_trim_poly_requires_trim_adapter() {
        let params = Params { trim_poly: true, ..annotating() };
        assert!(matches!(params.validate(), Err(ConfigError::Conflict(_))));
    }

    #[rstest]
    #[case::orientation(Params { orientation: 2, ..annotating() }, "orientation")]
    #[case::pid_isl(Params { pid_isl: 1.5, ..annotating() }, "pid-isl")]
    #[case::pid5(Params { pid5: Some(-0.5), ..annotating() }, "pid5")]
    #[case::pid_body(Params { pid_body: -2.0, ..annotating() }, "pid-body")]
    #[case::poly_w(Params { poly_w: 0, poly_k: 0, ..annotating() }, "poly-w")]
    #[case::poly_k(Params { poly_k: 7, ..annotating() }, "poly-k")]
    #[case::isl5(Params { isl5: SearchWindow::new(130, 0), ..annotating() }, "isl5")]
    #[case::isl3(Params { isl3: SearchWindow::new(-10, -60), ..annotating() }, "isl3")]
    #[case::threads(Params { threads: 0, ..annotating() }, "threads")]
    #[case::batch_size(Params { batch_size: 0, ..annotating() }, "batch-size")]
    #[case::suffix(Params { suffix_filtered: Some(String::new()), ..annotating() }, "suffix-filtered")]
    fn test_invalid_parameter(#[case] params: Params, #[case] expected: &str) {
        match params.validate() {
            Err(ConfigError::InvalidParameter { parameter, .. }) => assert_eq!(parameter, expected),
            other => panic!("expected invalid {expected}, got {other:?}"),
        }
    }

    #[test]
    fn test_unbounded_pid_sentinel_accepted() {
        let params = Params { pid_body: -1.0, ..annotating() };
        params.validate().unwrap();
    }

    #[test]
    fn test_bad_primer_rejected() {
        let params = Params { p5_sense: Some("ACGTZ".to_string()), ..annotating() };
        assert!(matches!(params.validate(), Err(ConfigError::InvalidPrimer { .. })));
    }

    #[test]
    fn test_annotator_config_takes_overrides() {
        let params = Params { pid3: Some(0.85), pid_precision: 3, ..annotating() };
        let config = params.annotator_config().unwrap().unwrap();
        assert_eq!(config.pid5, 0.7);
        assert_eq!(config.pid3, 0.85);
        assert_eq!(config.aligner.precision(), 3);

        let disabled = Params { disable_annot: true, ..annotating() };
        assert!(disabled.annotator_config().unwrap().is_none());
    }

    #[test]
    fn test_pipeline_options_outputs() {
        let params = Params {
            output_fusion: Some("out/fusion.fq".to_string()),
            suffix_filtered: Some("failed".to_string()),
            orientation: -1,
            ..annotating()
        };
        let options = params.pipeline_options();
        assert_eq!(options.orientation, Orientation::Antisense);
        assert_eq!(options.outputs.full_length, Some(OutputTarget::Stdout));
        assert_eq!(
            options.outputs.fusion,
            Some(OutputTarget::File(PathBuf::from("out/fusion.fq")))
        );
        assert_eq!(options.outputs.truncated, None);
        assert_eq!(options.outputs.suffix_filtered.as_deref(), Some("failed"));
    }
}
