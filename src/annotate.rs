//! Primer annotation of a single read.
//!
//! # Algorithm
//!
//! 1. **Fusion**: reads longer than both search windows combined have their
//!    body (between the 5' window end and the 3' window start) searched for
//!    any of the four primer variants. A hit marks the read as a fusion.
//! 2. **5' primer**: the sense 5' primer and its antisense counterpart (the
//!    reverse complement of the 3' sense primer) are aligned in the 5' window;
//!    the rightmost best hit gives `ploc5`, one past the primer.
//! 3. **3' primer**: likewise in the 3' window with the leftmost best hit;
//!    `ploc3` is the first base of the primer.
//! 4. Each located primer adds half its identity, signed by its strand, to the
//!    read's strand score. Both primers found on the same strand make the read
//!    full-length.
//! 5. Homopolymer runs expected on that strand are measured outward from the
//!    primer boundaries.

use log::trace;

use crate::align::{round_to, Aligner, TieBreaking};
use crate::error::ConfigError;
use crate::polymer::{
    extend_from_left_boundary, extend_from_right_boundary, parse_primer, polymer_runs, PolymerRun,
    PrimerEnd,
};
use crate::read::{reverse_complement, Locus, Read};

/// A search region of the read given as a half-open `[start, end)` slice.
///
/// Negative bounds count from the read end. An `end` of 0 together with a
/// negative `start` means "through the last base".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(from = "(i64, i64)", into = "(i64, i64)")]
pub struct SearchWindow {
    pub start: i64,
    pub end: i64,
}

impl From<(i64, i64)> for SearchWindow {
    fn from((start, end): (i64, i64)) -> Self {
        Self { start, end }
    }
}

impl From<SearchWindow> for (i64, i64) {
    fn from(window: SearchWindow) -> Self {
        (window.start, window.end)
    }
}

impl SearchWindow {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    fn runs_to_read_end(&self) -> bool {
        self.end == 0 && self.start < 0
    }

    /// Nominal number of bases covered by the window.
    pub fn width(&self) -> i64 {
        if self.runs_to_read_end() {
            -self.start
        } else {
            self.end - self.start
        }
    }

    /// Whether both bounds count from the same end and `start < end`.
    pub fn is_well_formed(&self) -> bool {
        if self.runs_to_read_end() {
            return true;
        }
        let same_side = (self.start >= 0) == (self.end >= 0) || self.end == 0;
        same_side && self.start < self.end
    }

    /// Absolute half-open range on a read of length `len`, clamped to the read.
    pub fn resolve(&self, len: usize) -> (usize, usize) {
        let clamp = |x: i64| -> usize {
            if x < 0 {
                (len as i64 + x).max(0) as usize
            } else {
                (x as usize).min(len)
            }
        };
        let start = clamp(self.start);
        let end = if self.runs_to_read_end() { len } else { clamp(self.end) };
        (start, end.max(start))
    }
}

/// Whether a fusion hit stops the rest of the annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FusionMode {
    #[default]
    ShortCircuit,
    Always,
}

/// Everything the annotator needs, built once and shared by all workers.
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    pub p5_sense: Vec<u8>,
    pub p3_sense: Vec<u8>,
    /// Reverse complement of the 3' sense primer
    pub p5_anti: Vec<u8>,
    /// Reverse complement of the 5' sense primer
    pub p3_anti: Vec<u8>,
    pub isl5: SearchWindow,
    pub isl3: SearchWindow,
    pub pid5: f64,
    pub pid3: f64,
    pub pid_body: f64,
    pub poly_w: usize,
    pub poly_k: usize,
    pub polymers: Vec<PolymerRun>,
    pub fusion_mode: FusionMode,
    pub aligner: Aligner,
}

impl AnnotatorConfig {
    /// Build a config from primer strings with polymer descriptors.
    ///
    /// Windows default to the first 130 and last 60 bases, all identity
    /// cutoffs to 0.7, and the polymer window to 4 of 6 bases.
    pub fn new(p5_sense: &str, p3_sense: &str) -> Result<Self, ConfigError> {
        let p5 = parse_primer(p5_sense, PrimerEnd::Five)?;
        let p3 = parse_primer(p3_sense, PrimerEnd::Three)?;
        let polymers = polymer_runs(&p5, &p3);
        Ok(Self {
            p5_anti: reverse_complement(&p3.sequence),
            p3_anti: reverse_complement(&p5.sequence),
            p5_sense: p5.sequence,
            p3_sense: p3.sequence,
            isl5: SearchWindow::new(0, 130),
            isl3: SearchWindow::new(-60, 0),
            pid5: 0.7,
            pid3: 0.7,
            pid_body: 0.7,
            poly_w: 6,
            poly_k: 4,
            polymers,
            fusion_mode: FusionMode::ShortCircuit,
            aligner: Aligner::default(),
        })
    }

    fn five_prime_variants(&self) -> [(i8, &[u8]); 2] {
        [(1, self.p5_sense.as_slice()), (-1, self.p5_anti.as_slice())]
    }

    fn three_prime_variants(&self) -> [(i8, &[u8]); 2] {
        [(1, self.p3_sense.as_slice()), (-1, self.p3_anti.as_slice())]
    }

    fn all_variants(&self) -> [(i8, &[u8]); 4] {
        [
            (1, self.p5_sense.as_slice()),
            (1, self.p3_sense.as_slice()),
            (-1, self.p5_anti.as_slice()),
            (-1, self.p3_anti.as_slice()),
        ]
    }
}

/// Replace the read's annotation with a fresh one computed from its sequence.
pub fn annotate(read: &mut Read, config: &AnnotatorConfig) {
    let mut annot = crate::read::Annotation::default();
    let seq = &read.seq;
    let len = seq.len();
    let aligner = &config.aligner;

    let (w5_start, w5_end) = config.isl5.resolve(len);
    let (w3_start, w3_end) = config.isl3.resolve(len);

    if len as i64 > config.isl5.width() + config.isl3.width() && w5_end < w3_start {
        let body = &seq[w5_end..w3_start];
        if aligner
            .best_align(&config.all_variants(), body, config.pid_body, TieBreaking::Left)
            .is_some()
        {
            trace!("{}: primer found in read body", read.id);
            annot.fusion = true;
            if config.fusion_mode == FusionMode::ShortCircuit {
                read.annotation = annot;
                return;
            }
        }
    }

    let mut strand5 = 0i8;
    if let Some((sign, aln)) = aligner.best_align(
        &config.five_prime_variants(),
        &seq[w5_start..w5_end],
        config.pid5,
        TieBreaking::Right,
    ) {
        annot.ploc5 = Locus::At(w5_start + aln.end);
        annot.strand += round_to(f64::from(sign) * aln.pid * 0.5, 2);
        strand5 = sign;
    }

    let mut strand3 = 0i8;
    if let Some((sign, aln)) = aligner.best_align(
        &config.three_prime_variants(),
        &seq[w3_start..w3_end],
        config.pid3,
        TieBreaking::Left,
    ) {
        annot.ploc3 = Locus::At(w3_start + aln.start);
        annot.strand += round_to(f64::from(sign) * aln.pid * 0.5, 2);
        strand3 = sign;
    }

    annot.full_length = strand5 != 0 && strand5 == strand3;

    for run in &config.polymers {
        if f64::from(run.strand) * annot.strand <= 0.0 {
            continue;
        }
        match run.end {
            PrimerEnd::Five => {
                if let Some(boundary) = annot.ploc5.position() {
                    annot.poly5 = extend_from_left_boundary(
                        seq,
                        boundary,
                        run.base,
                        config.poly_w,
                        config.poly_k,
                        run.max_n,
                    )
                    .map_or(Locus::NotFound, Locus::At);
                }
            }
            PrimerEnd::Three => {
                if let Some(boundary) = annot.ploc3.position() {
                    annot.poly3 = extend_from_right_boundary(
                        seq,
                        boundary,
                        run.base,
                        config.poly_w,
                        config.poly_k,
                        run.max_n,
                    )
                    .map_or(Locus::NotFound, Locus::At);
                }
            }
        }
    }

    read.annotation = annot;
}
