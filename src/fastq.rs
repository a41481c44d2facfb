//! FASTQ input and output.
//!
//! Records are strict four-line FASTQ. Annotated records carry their
//! annotation as `key=value` tokens after the identifier:
//!
//! ```text
//! @read_1 strand=0.85 full_length=1 fusion=0 ploc5=64 ploc3=1840 poly5=-1 poly3=22
//! ```
//!
//! Position fields use -1 for "not found" and 0 for "trimmed". The printed
//! strand is multiplied by the orientation, so a flipped sense read reports
//! a negative strand.
//!
//! Batches of a plain-text file are served from a [`FastqIndex`], which stores
//! the byte offset of every 1024th record. Gzip streams cannot seek; they are
//! decoded once from the start and cut into batches with
//! [`FastqReader::read_records`].

use std::fs::File;
use std::io::{BufRead, BufReader, Read as IoRead, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use log::debug;
use regex::{Captures, Regex};

use crate::error::FastqError;
use crate::read::{Annotation, Locus, Read};

/// Records between two seek checkpoints in a [`FastqIndex`].
pub const CHECKPOINT_INTERVAL: usize = 1024;

const ANNOTATION_PATTERN: &str = concat!(
    r"strand=(?P<strand>-?\d+\.\d*) ",
    r"full_length=(?P<full_length>[01]) ",
    r"fusion=(?P<fusion>[01]) ",
    r"ploc5=(?P<ploc5>-?\d+) ",
    r"ploc3=(?P<ploc3>-?\d+) ",
    r"poly5=(?P<poly5>-?\d+) ",
    r"poly3=(?P<poly3>-?\d+)",
);

/// A plain or gzip-compressed input file.
pub enum FileReader {
    Plain(BufReader<File>),
    Gzipped(BufReader<MultiGzDecoder<BufReader<File>>>),
}

impl IoRead for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            FileReader::Plain(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

impl BufRead for FileReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            FileReader::Plain(r) => r.fill_buf(),
            FileReader::Gzipped(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            FileReader::Plain(r) => r.consume(amt),
            FileReader::Gzipped(r) => r.consume(amt),
        }
    }
}

/// Open a FASTQ file, decompressing it if it starts with the gzip magic bytes.
pub fn open_input(path: &Path) -> Result<FileReader, FastqError> {
    let mut buffered = BufReader::new(File::open(path)?);
    let is_gzipped = {
        let peek = buffered.fill_buf()?;
        peek.len() >= 2 && peek[0] == 0x1f && peek[1] == 0x8b
    };
    Ok(if is_gzipped {
        FileReader::Gzipped(BufReader::new(MultiGzDecoder::new(buffered)))
    } else {
        FileReader::Plain(buffered)
    })
}

/// Split annotation tokens out of an identifier.
///
/// Returns the identifier with the tokens removed and the parsed annotation,
/// or the identifier unchanged and `None` if it carries no annotation.
pub fn parse_annotation(header: &str, pattern: &Regex) -> (String, Option<Annotation>) {
    let Some((caps, annotation)) = pattern
        .captures(header)
        .and_then(|caps| annotation_from(&caps).map(|annotation| (caps, annotation)))
    else {
        return (header.to_string(), None);
    };

    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let prefix = header[..whole.start].trim_end();
    let suffix = header[whole.end..].trim_start();
    let id = if prefix.is_empty() || suffix.is_empty() {
        format!("{prefix}{suffix}")
    } else {
        format!("{prefix} {suffix}")
    };
    (id, Some(annotation))
}

fn annotation_from(caps: &Captures<'_>) -> Option<Annotation> {
    let field = |name: &str| caps.name(name).map_or("", |m| m.as_str());
    let locus = |name: &str| field(name).parse::<i64>().ok().map(Locus::from_wire);
    Some(Annotation {
        strand: field("strand").parse().ok()?,
        orientation: 1,
        full_length: field("full_length") == "1",
        fusion: field("fusion") == "1",
        ploc5: locus("ploc5")?,
        ploc3: locus("ploc3")?,
        poly5: locus("poly5")?,
        poly3: locus("poly3")?,
    })
}

/// Render the annotation tokens of a read.
pub fn format_annotation(annotation: &Annotation) -> String {
    // adding 0.0 turns -0.0 into 0.0
    let strand = annotation.strand * f64::from(annotation.orientation) + 0.0;
    format!(
        "strand={:.2} full_length={} fusion={} ploc5={} ploc3={} poly5={} poly3={}",
        strand,
        u8::from(annotation.full_length),
        u8::from(annotation.fusion),
        annotation.ploc5.to_wire(),
        annotation.ploc3.to_wire(),
        annotation.poly5.to_wire(),
        annotation.poly3.to_wire(),
    )
}

/// Write one annotated record.
pub fn write_record<W: Write + ?Sized>(writer: &mut W, read: &Read) -> std::io::Result<()> {
    let space = if read.id.is_empty() { "" } else { " " };
    writeln!(writer, "@{}{}{}", read.id, space, format_annotation(&read.annotation))?;
    writer.write_all(&read.seq)?;
    writeln!(writer, "\n+{}", read.comment)?;
    writer.write_all(&read.qual)?;
    writer.write_all(b"\n")
}

fn strip_newline(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Streaming FASTQ reader.
pub struct FastqReader<R: BufRead> {
    reader: R,
    buffer: String,
    annotation: Regex,
    /// Index of the next record in the file, used in error messages
    record: usize,
}

impl FastqReader<FileReader> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FastqError> {
        Self::new(open_input(path.as_ref())?)
    }
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Result<Self, FastqError> {
        Ok(Self {
            reader,
            buffer: String::with_capacity(512),
            annotation: Regex::new(ANNOTATION_PATTERN)?,
            record: 0,
        })
    }

    /// Number records from `first` instead of 0 in error messages.
    pub fn starting_at(mut self, first: usize) -> Self {
        self.record = first;
        self
    }

    fn read_line(&mut self, expected: &'static str) -> Result<(), FastqError> {
        self.buffer.clear();
        if self.reader.read_line(&mut self.buffer)? == 0 {
            return Err(FastqError::Truncated { record: self.record, expected });
        }
        strip_newline(&mut self.buffer);
        Ok(())
    }

    /// Read the next record, or `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<Read>, FastqError> {
        self.buffer.clear();
        if self.reader.read_line(&mut self.buffer)? == 0 {
            return Ok(None);
        }
        strip_newline(&mut self.buffer);
        let Some(header) = self.buffer.strip_prefix('@') else {
            return Err(FastqError::MissingMarker { record: self.record, line: "header", marker: '@' });
        };
        let (id, annotation) = parse_annotation(header, &self.annotation);

        self.read_line("sequence")?;
        let seq = self.buffer.trim().as_bytes().to_vec();

        self.read_line("separator")?;
        let Some(comment) = self.buffer.strip_prefix('+') else {
            return Err(FastqError::MissingMarker { record: self.record, line: "separator", marker: '+' });
        };
        let comment = comment.to_string();

        self.read_line("quality")?;
        let qual = self.buffer.trim().as_bytes().to_vec();
        if qual.len() != seq.len() {
            return Err(FastqError::LengthMismatch {
                record: self.record,
                seq_len: seq.len(),
                qual_len: qual.len(),
            });
        }

        self.record += 1;
        Ok(Some(Read {
            id,
            seq,
            comment,
            qual,
            annotation: annotation.unwrap_or_default(),
        }))
    }

    /// Read up to `count` records, fewer only at the end of the input.
    pub fn read_records(&mut self, count: usize) -> Result<Vec<Read>, FastqError> {
        let mut reads = Vec::with_capacity(count.min(CHECKPOINT_INTERVAL));
        while reads.len() < count {
            match self.next_record()? {
                Some(read) => reads.push(read),
                None => break,
            }
        }
        Ok(reads)
    }

    /// Skip `n` records without parsing them.
    pub fn skip_records(&mut self, n: usize) -> Result<(), FastqError> {
        const LINES: [&str; 4] = ["header", "sequence", "separator", "quality"];
        for _ in 0..n {
            for expected in LINES {
                self.buffer.clear();
                if self.reader.read_line(&mut self.buffer)? == 0 {
                    return Err(FastqError::Truncated { record: self.record, expected });
                }
            }
            self.record += 1;
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for FastqReader<R> {
    type Item = Result<Read, FastqError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Record count and seek checkpoints of a FASTQ file.
#[derive(Debug, Clone)]
pub struct FastqIndex {
    path: PathBuf,
    total: usize,
    gzipped: bool,
    /// Byte offset of records 0, 1024, 2048, ... (plain files only)
    checkpoints: Vec<u64>,
}

impl FastqIndex {
    /// Scan the file once, counting records and recording checkpoints.
    pub fn build(path: impl AsRef<Path>) -> Result<Self, FastqError> {
        let path = path.as_ref().to_path_buf();
        let mut reader = open_input(&path)?;
        let gzipped = matches!(reader, FileReader::Gzipped(_));

        let mut checkpoints = Vec::new();
        let mut line = Vec::with_capacity(512);
        let mut offset = 0u64;
        let mut lines = 0usize;
        loop {
            if lines % (4 * CHECKPOINT_INTERVAL) == 0 && !gzipped {
                checkpoints.push(offset);
            }
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            offset += n as u64;
            lines += 1;
        }

        if lines % 4 != 0 {
            let expected = match lines % 4 {
                1 => "sequence",
                2 => "separator",
                _ => "quality",
            };
            return Err(FastqError::Truncated { record: lines / 4, expected });
        }

        let total = lines / 4;
        debug!("Indexed {} records in {:?} ({} checkpoints)", total, path, checkpoints.len());
        Ok(Self { path, total, gzipped, checkpoints })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_gzipped(&self) -> bool {
        self.gzipped
    }

    /// Open a reader positioned at record `start`.
    pub fn reader_at(&self, start: usize) -> Result<FastqReader<FileReader>, FastqError> {
        if self.gzipped {
            let mut reader = FastqReader::new(open_input(&self.path)?)?;
            reader.skip_records(start)?;
            return Ok(reader);
        }

        let checkpoint = (start / CHECKPOINT_INTERVAL).min(self.checkpoints.len().saturating_sub(1));
        let offset = self.checkpoints.get(checkpoint).copied().unwrap_or(0);
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let first = checkpoint * CHECKPOINT_INTERVAL;
        let mut reader =
            FastqReader::new(FileReader::Plain(BufReader::new(file)))?.starting_at(first);
        reader.skip_records(start - first)?;
        Ok(reader)
    }

    /// Read records `start .. start + count`, stopping early at the end of the file.
    pub fn read_batch(&self, start: usize, count: usize) -> Result<Vec<Read>, FastqError> {
        if start >= self.total || count == 0 {
            return Ok(Vec::new());
        }
        let count = count.min(self.total - start);
        self.reader_at(start)?.read_records(count)
    }
}
