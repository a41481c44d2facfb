//! Bounded semi-global ("HW") edit-distance alignment.
//!
//! The whole query must match a contiguous substring of the target; leading
//! and trailing target bases are free. Candidate hits come from a sassy
//! [`Searcher`] over the IUPAC profile, which reports the cost of every target
//! end position within the bound together with a traced start. Of the ends
//! that reach the minimum cost, one is chosen by [`TieBreaking`].
//!
//! Ambiguity codes match every base they stand for, on either side: an `N` in
//! a primer matches any read base and an `N` in a read matches any primer base.
//!
//! # Identity
//!
//! Percent identity is `1 - distance / len(query)`, rounded to the aligner's
//! precision. A cutoff `pid` is turned into a distance bound with
//! [`max_edit_distance`]; the rounded identity of the chosen hit is checked
//! against `pid` once more before it is returned.

use std::cell::RefCell;

use rand::Rng;
use sassy::profiles::Iupac;
use sassy::{Match, Searcher};

/// Letters accepted in primer sequences: nucleotides and IUPAC ambiguity codes.
pub const IUPAC_ALPHABET: &str = "ACGTNRYSWKMBDHV";

/// Bases used to overwrite an already-reported hit in [`Aligner::n_best_aligns`].
const MASK_BASES: &[u8] = b"ACGT";

thread_local! {
    // Searchers keep scratch buffers between calls; one per worker thread.
    static SEARCHER: RefCell<Searcher<Iupac>> = RefCell::new(Searcher::new(false, None));
}

/// Which of several equally good end positions to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreaking {
    /// Smallest end position
    #[default]
    Left,
    /// Element `floor(count / 2)` of the sorted end positions
    Middle,
    /// Largest end position
    Right,
}

impl TieBreaking {
    fn pick<T>(self, sorted: &[T]) -> Option<&T> {
        match self {
            TieBreaking::Left => sorted.first(),
            TieBreaking::Middle => sorted.get(sorted.len() / 2),
            TieBreaking::Right => sorted.last(),
        }
    }
}

/// A single hit of a query on a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Rounded percent identity in [0, 1]
    pub pid: f64,
    pub edit_distance: usize,
    /// Inclusive start on the target
    pub start: usize,
    /// Exclusive end on the target
    pub end: usize,
}

/// Distance bound implied by an identity cutoff.
///
/// A negative `pid` means the search is unbounded and every hit is admitted.
pub fn max_edit_distance(pid: f64, len: usize) -> usize {
    if pid < 0.0 {
        return len;
    }
    // Shave a hair off so 0.3 * 10 does not round up to 4 in floating point.
    let bound = ((1.0 - pid) * len as f64 - 1e-9).ceil();
    if bound <= 0.0 {
        0
    } else {
        (bound as usize).min(len)
    }
}

/// Round `value` to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// Whether every letter of `seq` is a nucleotide or IUPAC code, in either case.
pub fn is_iupac(seq: &[u8]) -> bool {
    seq.iter()
        .all(|b| IUPAC_ALPHABET.as_bytes().contains(&b.to_ascii_uppercase()))
}

#[derive(Debug, Clone, Copy)]
pub struct Aligner {
    precision: u32,
}

impl Default for Aligner {
    fn default() -> Self {
        Self { precision: 2 }
    }
}

impl Aligner {
    pub fn new(precision: u32) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Align `query` within `target` allowing at most `max_ed` edits.
    ///
    /// Returns `None` when the query is empty or not IUPAC, or when no
    /// placement stays within the bound. Hits never end at position 0, so an
    /// empty span in front of the target is not reported. Bases are compared
    /// case-insensitively.
    pub fn align(
        &self,
        query: &[u8],
        target: &[u8],
        max_ed: usize,
        tie: TieBreaking,
    ) -> Option<Alignment> {
        if query.is_empty() || target.is_empty() || !is_iupac(query) {
            return None;
        }
        // No end past 0 costs more than the query length.
        let max_ed = max_ed.min(query.len());
        let hits = SEARCHER.with_borrow_mut(|searcher| searcher.search_all(query, target, max_ed));
        let optimal = optimal_hits(&hits, max_ed);
        let hit = tie.pick(&optimal)?;
        let distance = usize::try_from(hit.cost).ok()?;
        Some(Alignment {
            pid: round_to(1.0 - distance as f64 / query.len() as f64, self.precision),
            edit_distance: distance,
            start: hit.text_start,
            end: hit.text_end,
        })
    }

    /// Align with a distance bound derived from an identity cutoff.
    ///
    /// The rounded identity of the selected hit must still reach `pid`.
    pub fn align_with_pid(
        &self,
        query: &[u8],
        target: &[u8],
        pid: f64,
        tie: TieBreaking,
    ) -> Option<Alignment> {
        let max_ed = max_edit_distance(pid, query.len());
        self.align(query, target, max_ed, tie)
            .filter(|aln| pid < 0.0 || aln.pid >= pid)
    }

    /// Align every candidate and keep the one with the highest identity.
    ///
    /// Only a strictly higher identity replaces the current best, so ties keep
    /// the candidate that came first.
    pub fn best_align<K: Copy>(
        &self,
        queries: &[(K, &[u8])],
        target: &[u8],
        pid: f64,
        tie: TieBreaking,
    ) -> Option<(K, Alignment)> {
        let mut best: Option<(K, Alignment)> = None;
        for &(key, query) in queries {
            let Some(aln) = self.align_with_pid(query, target, pid, tie) else {
                continue;
            };
            match best {
                Some((_, ref current)) if aln.pid <= current.pid => {}
                _ => best = Some((key, aln)),
            }
        }
        best
    }

    /// Report up to `n` successive hits of `query` on `target`.
    ///
    /// After each hit the matched span of a private copy of the target is
    /// overwritten with bases drawn from `rng`, and the search repeats until
    /// `n` hits were found or the query no longer aligns.
    pub fn n_best_aligns<R: Rng>(
        &self,
        query: &[u8],
        target: &[u8],
        pid: f64,
        n: usize,
        tie: TieBreaking,
        rng: &mut R,
    ) -> Vec<Alignment> {
        let mut masked = target.to_vec();
        let mut hits = Vec::with_capacity(n);
        while hits.len() < n {
            let Some(aln) = self.align_with_pid(query, &masked, pid, tie) else {
                break;
            };
            for base in &mut masked[aln.start..aln.end] {
                *base = MASK_BASES[rng.gen_range(0..MASK_BASES.len())];
            }
            hits.push(aln);
        }
        hits
    }
}

/// Hits at the minimum cost, one per end position, sorted by end.
fn optimal_hits(hits: &[Match], max_ed: usize) -> Vec<&Match> {
    let within = |hit: &&Match| {
        hit.text_end > 0 && usize::try_from(hit.cost).is_ok_and(|cost| cost <= max_ed)
    };
    let Some(min_cost) = hits.iter().filter(within).map(|hit| hit.cost).min() else {
        return Vec::new();
    };
    let mut optimal: Vec<&Match> = hits
        .iter()
        .filter(within)
        .filter(|hit| hit.cost == min_cost)
        .collect();
    optimal.sort_by_key(|hit| (hit.text_end, std::cmp::Reverse(hit.text_start)));
    optimal.dedup_by_key(|hit| hit.text_end);
    optimal
}
