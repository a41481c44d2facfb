//! Homopolymer runs next to primer boundaries.
//!
//! Primer strings may carry a polymer descriptor: `PRIMER` followed by `X{n}`
//! on the 5' primer (a run after the 5' primer), or `X{n}` followed by
//! `PRIMER` on the 3' primer (a run before the 3' primer, e.g. a poly(A) tail).
//! Each descriptor also implies the complemented run on the opposite end of an
//! antisense read.

use regex::Regex;

use crate::align::IUPAC_ALPHABET;
use crate::error::ConfigError;
use crate::read::complement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimerEnd {
    Five,
    Three,
}

impl PrimerEnd {
    pub fn label(self) -> &'static str {
        match self {
            PrimerEnd::Five => "5'",
            PrimerEnd::Three => "3'",
        }
    }
}

/// A homopolymer expected next to one primer boundary on reads of one strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolymerRun {
    /// Boundary the run is measured from
    pub end: PrimerEnd,
    /// +1 for sense reads, -1 for antisense reads
    pub strand: i8,
    pub base: u8,
    pub max_n: usize,
}

/// A primer string split into its sequence and optional run descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimerSpec {
    pub sequence: Vec<u8>,
    pub polymer: Option<(u8, usize)>,
}

/// Parse a primer string such as `ACGTACGT` or `A{100}GAAGATAG`.
///
/// The descriptor follows the primer on the 5' end and precedes it on the
/// 3' end. Input is upper-cased first.
pub fn parse_primer(primer: &str, end: PrimerEnd) -> Result<PrimerSpec, ConfigError> {
    let pattern = match end {
        PrimerEnd::Five => format!(
            r"^(?P<p>[{a}]+)(?:(?P<n>[{a}])\{{(?P<max_n>\d+)\}})?$",
            a = IUPAC_ALPHABET
        ),
        PrimerEnd::Three => format!(
            r"^(?:(?P<n>[{a}])\{{(?P<max_n>\d+)\}})?(?P<p>[{a}]+)$",
            a = IUPAC_ALPHABET
        ),
    };
    let re = Regex::new(&pattern)?;

    let upper = primer.trim().to_ascii_uppercase();
    let invalid = |reason: &str| ConfigError::InvalidPrimer {
        end: end.label().to_string(),
        primer: primer.to_string(),
        reason: reason.to_string(),
    };

    let caps = re.captures(&upper).ok_or_else(|| {
        invalid(match end {
            PrimerEnd::Five => "expected nucleotides optionally followed by a run such as A{20}",
            PrimerEnd::Three => "expected nucleotides optionally preceded by a run such as A{20}",
        })
    })?;

    let sequence = caps
        .name("p")
        .map(|m| m.as_str().as_bytes().to_vec())
        .unwrap_or_default();

    let polymer = match (caps.name("n"), caps.name("max_n")) {
        (Some(n), Some(max_n)) => {
            let max_n: usize = max_n
                .as_str()
                .parse()
                .map_err(|_| invalid("run length does not fit in an integer"))?;
            if max_n == 0 {
                return Err(invalid("run length must be at least 1"));
            }
            Some((n.as_str().as_bytes()[0], max_n))
        }
        _ => None,
    };

    Ok(PrimerSpec { sequence, polymer })
}

/// Expand the sense descriptors of both primers into per-strand runs.
///
/// A 5' sense run `X{n}` also appears as `complement(X){n}` before the 3'
/// primer of antisense reads, and vice versa.
pub fn polymer_runs(p5: &PrimerSpec, p3: &PrimerSpec) -> Vec<PolymerRun> {
    let mut runs = Vec::new();
    if let Some((base, max_n)) = p5.polymer {
        runs.push(PolymerRun { end: PrimerEnd::Five, strand: 1, base, max_n });
        runs.push(PolymerRun {
            end: PrimerEnd::Three,
            strand: -1,
            base: complement(base),
            max_n,
        });
    }
    if let Some((base, max_n)) = p3.polymer {
        runs.push(PolymerRun { end: PrimerEnd::Three, strand: 1, base, max_n });
        runs.push(PolymerRun {
            end: PrimerEnd::Five,
            strand: -1,
            base: complement(base),
            max_n,
        });
    }
    runs
}

fn count_base(window: &[u8], base: u8) -> usize {
    window.iter().filter(|b| b.eq_ignore_ascii_case(&base)).count()
}

/// Length of the run of `base` starting at `boundary` and extending right.
///
/// A window of `w` bases slides right from the boundary one base at a time.
/// It is accepted while it lies inside `seq`, holds at least `k` copies of
/// `base`, and reaches no more than `max_n` bases past the boundary. The run
/// length is the reach of the last accepted window.
///
/// If the first window is already rejected the result is `None`, not a
/// partial run of `w - 1` bases.
pub fn extend_from_left_boundary(
    seq: &[u8],
    boundary: usize,
    base: u8,
    w: usize,
    k: usize,
    max_n: usize,
) -> Option<usize> {
    if w == 0 {
        return None;
    }
    let mut run = None;
    let mut i = boundary;
    while i + w <= seq.len() {
        let reach = i + w - boundary;
        if reach > max_n || count_base(&seq[i..i + w], base) < k {
            break;
        }
        run = Some(reach);
        i += 1;
    }
    run
}

/// Length of the run of `base` ending at `boundary` and extending left.
///
/// Mirror image of [`extend_from_left_boundary`]: windows `seq[i - w..i]`
/// slide left from `i = boundary`. No accepted window gives `None`, not `w - 1`.
pub fn extend_from_right_boundary(
    seq: &[u8],
    boundary: usize,
    base: u8,
    w: usize,
    k: usize,
    max_n: usize,
) -> Option<usize> {
    if w == 0 || boundary > seq.len() {
        return None;
    }
    let mut run = None;
    let mut i = boundary;
    while i >= w {
        let reach = boundary - i + w;
        if reach > max_n || count_base(&seq[i - w..i], base) < k {
            break;
        }
        run = Some(reach);
        i -= 1;
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_parse_plain_primer() {
        let spec = parse_primer("tcggtg", PrimerEnd::Five).unwrap();
        assert_eq!(spec.sequence, b"TCGGTG");
        assert_eq!(spec.polymer, None);
    }

    #[test]
    fn test_parse_three_prime_leading_run() {
        let spec = parse_primer("A{100}GAAGATAGAG", PrimerEnd::Three).unwrap();
        assert_eq!(spec.sequence, b"GAAGATAGAG");
        assert_eq!(spec.polymer, Some((b'A', 100)));
    }

    #[test]
    fn test_parse_five_prime_trailing_run() {
        let spec = parse_primer("ACGTACGTT{30}", PrimerEnd::Five).unwrap();
        assert_eq!(spec.sequence, b"ACGTACGT");
        assert_eq!(spec.polymer, Some((b'T', 30)));
    }

    #[rstest]
    #[case::run_on_wrong_side("ACGTT{30}", PrimerEnd::Three)]
    #[case::leading_run_on_five("A{20}ACGT", PrimerEnd::Five)]
    #[case::bad_letter("ACGXT", PrimerEnd::Five)]
    #[case::empty("", PrimerEnd::Three)]
    #[case::only_run("A{20}", PrimerEnd::Three)]
    #[case::zero_run("A{0}ACGT", PrimerEnd::Three)]
    fn test_parse_rejects(#[case] primer: &str, #[case] end: PrimerEnd) {
        let err = parse_primer(primer, end).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrimer { .. }), "{err}");
    }

    #[test]
    fn test_polymer_runs_include_antisense_counterparts() {
        let p5 = parse_primer("ACGT", PrimerEnd::Five).unwrap();
        let p3 = parse_primer("A{100}GGCC", PrimerEnd::Three).unwrap();
        let runs = polymer_runs(&p5, &p3);
        assert_eq!(
            runs,
            vec![
                PolymerRun { end: PrimerEnd::Three, strand: 1, base: b'A', max_n: 100 },
                PolymerRun { end: PrimerEnd::Five, strand: -1, base: b'T', max_n: 100 },
            ]
        );
    }

    #[test]
    fn test_extend_from_right_boundary_poly_a() {
        // 10 As right before position 20
        let seq = b"GCGCGCGCGCAAAAAAAAAAGCGC";
        assert_eq!(extend_from_right_boundary(seq, 20, b'A', 6, 4, 100), Some(12));
        assert_eq!(extend_from_right_boundary(seq, 20, b'A', 6, 6, 100), Some(10));
    }

    #[test]
    fn test_extend_from_left_boundary_poly_t() {
        let seq = b"GCGCTTTTTTTTGCGCGCGC";
        assert_eq!(extend_from_left_boundary(seq, 4, b'T', 6, 6, 100), Some(8));
        assert_eq!(extend_from_left_boundary(seq, 4, b'T', 6, 4, 100), Some(10));
    }

    #[test]
    fn test_max_n_caps_run() {
        let seq = b"AAAAAAAAAAAAAAAAAAAA";
        assert_eq!(extend_from_left_boundary(seq, 0, b'A', 6, 4, 9), Some(9));
        assert_eq!(extend_from_right_boundary(seq, 20, b'A', 6, 4, 9), Some(9));
        // First window already reaches past max_n
        assert_eq!(extend_from_left_boundary(seq, 0, b'A', 6, 4, 5), None);
    }

    #[test]
    fn test_no_run_when_first_window_fails() {
        let seq = b"GCGCGCGCGCGC";
        assert_eq!(extend_from_left_boundary(seq, 2, b'A', 6, 4, 100), None);
        assert_eq!(extend_from_right_boundary(seq, 10, b'A', 6, 4, 100), None);
    }

    #[test]
    fn test_window_must_fit_in_sequence() {
        assert_eq!(extend_from_left_boundary(b"AAAA", 0, b'A', 6, 4, 100), None);
        assert_eq!(extend_from_right_boundary(b"AAAA", 4, b'A', 6, 4, 100), None);
        assert_eq!(extend_from_right_boundary(b"AAAA", 9, b'A', 2, 1, 100), None);
    }

    proptest! {
        #[test]
        fn prop_run_non_decreasing_in_max_n(
            seq in "[AC]{0,60}",
            boundary in 0usize..60,
            w in 1usize..8,
            k in 0usize..8,
            max_n in 0usize..70,
        ) {
            let seq = seq.as_bytes();
            let boundary = boundary.min(seq.len());
            let k = k.min(w);
            let a = extend_from_left_boundary(seq, boundary, b'A', w, k, max_n);
            let b = extend_from_left_boundary(seq, boundary, b'A', w, k, max_n + 1);
            prop_assert!(a.unwrap_or(0) <= b.unwrap_or(0));
            let a = extend_from_right_boundary(seq, boundary, b'A', w, k, max_n);
            let b = extend_from_right_boundary(seq, boundary, b'A', w, k, max_n + 1);
            prop_assert!(a.unwrap_or(0) <= b.unwrap_or(0));
        }
    }
}
