//! Reads, their annotation, and the terminal classification.
//!
//! A [`Read`] is owned by exactly one pipeline stage at a time. Its
//! [`Annotation`] is a structured value; the integer sentinels used in FASTQ
//! identifiers (-1 = not found, 0 = trimmed) only exist in [`crate::fastq`].

use std::fmt;

/// A position or run length on a read, or the reason there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locus {
    /// Never located (wire value -1)
    #[default]
    NotFound,
    /// Located and then removed by trimming (wire value 0)
    Trimmed,
    /// Absolute position on the sequence, or a run length for homopolymers
    At(usize),
}

impl Locus {
    pub fn position(self) -> Option<usize> {
        match self {
            Locus::At(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, Locus::At(_))
    }

    /// Integer encoding used in annotated FASTQ identifiers.
    pub fn to_wire(self) -> i64 {
        match self {
            Locus::NotFound => -1,
            Locus::Trimmed => 0,
            Locus::At(p) => p as i64,
        }
    }

    pub fn from_wire(value: i64) -> Self {
        match value {
            v if v < 0 => Locus::NotFound,
            0 => Locus::Trimmed,
            v => Locus::At(v as usize),
        }
    }

    /// Mirror a position around a sequence of length `len`.
    fn mirrored(self, len: usize) -> Self {
        match self {
            Locus::At(p) => Locus::At(len.saturating_sub(p)),
            other => other,
        }
    }
}

/// Adapter/primer features located on a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Signed confidence in [-1, 1]; 0 means unknown, the sign gives sense/antisense
    pub strand: f64,
    /// 1 if the read is in its original orientation, -1 once flipped
    pub orientation: i8,
    pub full_length: bool,
    pub fusion: bool,
    /// One past the last base of the 5' primer
    pub ploc5: Locus,
    /// First base of the 3' primer
    pub ploc3: Locus,
    /// Homopolymer run length following `ploc5`
    pub poly5: Locus,
    /// Homopolymer run length preceding `ploc3`
    pub poly3: Locus,
}

impl Default for Annotation {
    fn default() -> Self {
        Self {
            strand: 0.0,
            orientation: 1,
            full_length: false,
            fusion: false,
            ploc5: Locus::NotFound,
            ploc3: Locus::NotFound,
            poly5: Locus::NotFound,
            poly3: Locus::NotFound,
        }
    }
}

/// A FASTQ record with its annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct Read {
    /// Identifier without the leading '@' and without annotation tokens
    pub id: String,
    pub seq: Vec<u8>,
    /// Text following '+' on the separator line
    pub comment: String,
    /// Phred+33 encoded, same length as `seq`
    pub qual: Vec<u8>,
    pub annotation: Annotation,
}

impl Read {
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>, qual: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            seq: seq.into(),
            comment: String::new(),
            qual: qual.into(),
            annotation: Annotation::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Mean quality of the read, averaged in error-probability space.
    ///
    /// Each Phred score is converted to an error probability, the probabilities
    /// are averaged, and the mean is converted back to a Phred score. An empty
    /// read has mean quality 0.
    pub fn mean_quality(&self) -> f64 {
        mean_quality(&self.qual)
    }

    /// Reverse-complement the read in place.
    ///
    /// The quality string is reversed, the orientation flag inverted, and the
    /// annotated positions mirrored so they still point at the same bases:
    /// the old 5' boundary becomes the new 3' boundary and vice versa, and the
    /// homopolymer run lengths swap ends. Sentinels pass through unchanged.
    pub fn reverse_complement(&mut self) {
        let len = self.seq.len();
        self.seq = reverse_complement(&self.seq);
        self.qual.reverse();

        let annot = &mut self.annotation;
        annot.orientation = -annot.orientation;
        let (ploc5, ploc3) = (annot.ploc5, annot.ploc3);
        annot.ploc5 = ploc3.mirrored(len);
        annot.ploc3 = ploc5.mirrored(len);
        std::mem::swap(&mut annot.poly5, &mut annot.poly3);
    }
}

/// Mean Phred quality of a Phred+33 quality string.
pub fn mean_quality(qual: &[u8]) -> f64 {
    if qual.is_empty() {
        return 0.0;
    }
    let total: f64 = qual
        .iter()
        .map(|&q| 10f64.powf(-f64::from(q.saturating_sub(33)) / 10.0))
        .sum();
    -10.0 * (total / qual.len() as f64).log10()
}

/// Complement a single nucleotide, handling IUPAC ambiguity codes.
///
/// Case is preserved. Characters outside the IUPAC alphabet pass through.
pub fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'N' => b'N',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        b'n' => b'n',
        b'R' => b'Y',
        b'Y' => b'R',
        b'S' => b'S',
        b'W' => b'W',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'D' => b'H',
        b'H' => b'D',
        b'V' => b'B',
        b'r' => b'y',
        b'y' => b'r',
        b's' => b's',
        b'w' => b'w',
        b'k' => b'm',
        b'm' => b'k',
        b'b' => b'v',
        b'd' => b'h',
        b'h' => b'd',
        b'v' => b'b',
        other => other,
    }
}

/// Reverse complement a DNA sequence.
///
/// ```
/// use nanoprep::read::reverse_complement;
///
/// assert_eq!(reverse_complement(b"ATCG"), b"CGAT");
/// assert_eq!(reverse_complement(b"ANTN"), b"NANT");
/// ```
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// Terminal classification of a processed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadClass {
    Fusion,
    FullLength,
    Truncated,
}

impl ReadClass {
    pub const ALL: [ReadClass; 3] = [ReadClass::Fusion, ReadClass::FullLength, ReadClass::Truncated];

    /// Fusion wins over full-length; anything else is truncated.
    pub fn of(annotation: &Annotation) -> Self {
        if annotation.fusion {
            ReadClass::Fusion
        } else if annotation.full_length {
            ReadClass::FullLength
        } else {
            ReadClass::Truncated
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReadClass::Fusion => "fusion",
            ReadClass::FullLength => "full-length",
            ReadClass::Truncated => "truncated",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ReadClass::Fusion => 0,
            ReadClass::FullLength => 1,
            ReadClass::Truncated => 2,
        }
    }
}

impl fmt::Display for ReadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a read survived the post-trimming length/quality filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassStatus {
    Passed,
    Filtered,
}

impl PassStatus {
    pub const ALL: [PassStatus; 2] = [PassStatus::Passed, PassStatus::Filtered];

    pub fn name(self) -> &'static str {
        match self {
            PassStatus::Passed => "passed",
            PassStatus::Filtered => "filtered",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            PassStatus::Passed => 0,
            PassStatus::Filtered => 1,
        }
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
