//! Trimming and reorientation of annotated reads.

use crate::read::{Locus, Read};

/// Target strand for reorientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Leave reads as they are
    #[default]
    Generic,
    Sense,
    Antisense,
}

impl Orientation {
    pub fn sign(self) -> i8 {
        match self {
            Orientation::Generic => 0,
            Orientation::Sense => 1,
            Orientation::Antisense => -1,
        }
    }
}

impl TryFrom<i8> for Orientation {
    type Error = i8;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Orientation::Generic),
            1 => Ok(Orientation::Sense),
            -1 => Ok(Orientation::Antisense),
            other => Err(other),
        }
    }
}

/// Cut the read at its annotated boundaries.
///
/// With `trim_poly`, a homopolymer run next to a primer is removed together
/// with the primer; otherwise, with `trim_adapter`, only the primer is. Fields
/// whose bases were removed become [`Locus::Trimmed`].
pub fn trim(read: &mut Read, trim_poly: bool, trim_adapter: bool) {
    let len = read.len();
    let annot = &mut read.annotation;

    let mut start = 0;
    match (annot.ploc5, annot.poly5) {
        (Locus::At(ploc), Locus::At(poly)) if trim_poly && poly > 0 => {
            start = ploc + poly;
            annot.ploc5 = Locus::Trimmed;
            annot.poly5 = Locus::Trimmed;
        }
        (Locus::At(ploc), _) if trim_adapter && ploc > 0 => {
            start = ploc;
            annot.ploc5 = Locus::Trimmed;
        }
        _ => {}
    }

    let mut end = len;
    match (annot.ploc3, annot.poly3) {
        (Locus::At(ploc), Locus::At(poly)) if trim_poly && poly > 0 => {
            end = ploc.saturating_sub(poly);
            annot.ploc3 = Locus::Trimmed;
            annot.poly3 = Locus::Trimmed;
        }
        (Locus::At(ploc), _) if trim_adapter && ploc > 0 => {
            end = ploc;
            annot.ploc3 = Locus::Trimmed;
        }
        _ => {}
    }

    let end = end.min(len);
    let start = start.min(end);
    read.seq.truncate(end);
    read.seq.drain(..start);
    read.qual.truncate(end);
    read.qual.drain(..start);
}

/// Flip the read so its strand agrees with `to`.
///
/// Reads of unknown strand, and any read when `to` is generic, are left alone.
/// Returns whether the read was reverse-complemented.
pub fn orient(read: &mut Read, to: Orientation) -> bool {
    let strand = read.annotation.strand;
    if strand == 0.0 || to == Orientation::Generic {
        return false;
    }
    let flip = strand * f64::from(read.annotation.orientation) * f64::from(to.sign()) < 0.0;
    if flip {
        read.reverse_complement();
    }
    flip
}
