//! Output demultiplexing.
//!
//! The writer thread is the only owner of output handles. Each read arrives
//! with its class and pass/filter status and is written to the sink that
//! `(class, status)` routes to, or dropped if that combination has no output.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Stdout, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};

use super::RoutedRead;
use crate::fastq::write_record;
use crate::read::{PassStatus, ReadClass};

/// Where a class of reads is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `-` means standard output; anything else is a file path.
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(value))
        }
    }
}

/// Passed-read outputs per class, plus the suffix that names filtered outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputPlan {
    pub fusion: Option<OutputTarget>,
    pub full_length: Option<OutputTarget>,
    pub truncated: Option<OutputTarget>,
    /// Filtered reads of a class go next to its passed output, named
    /// `<stem>_<suffix><ext>`; no filtered output without a suffix
    pub suffix_filtered: Option<String>,
}

impl OutputPlan {
    pub fn passed(&self, class: ReadClass) -> Option<&OutputTarget> {
        match class {
            ReadClass::Fusion => self.fusion.as_ref(),
            ReadClass::FullLength => self.full_length.as_ref(),
            ReadClass::Truncated => self.truncated.as_ref(),
        }
    }

    /// Destination of filtered reads of `class`, if any.
    pub fn filtered(&self, class: ReadClass) -> Option<OutputTarget> {
        let suffix = self.suffix_filtered.as_deref()?;
        match self.passed(class)? {
            OutputTarget::File(path) => Some(OutputTarget::File(filtered_path(path, suffix))),
            OutputTarget::Stdout => {
                warn!(
                    "{} reads go to stdout, so filtered {} reads are not written",
                    class, class
                );
                None
            }
        }
    }
}

/// `out/full.fq.gz` with suffix `filtered` becomes `out/full_filtered.fq.gz`.
pub fn filtered_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let (inner, gz) = match name.strip_suffix(".gz") {
        Some(inner) => (inner.to_string(), ".gz"),
        None => (name, ""),
    };
    let inner_path = Path::new(&inner);
    let stem = inner_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = inner_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_{suffix}{ext}{gz}"))
}

/// An open output stream.
enum Sink {
    Stdout(BufWriter<Stdout>),
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Sink {
    fn open(target: &OutputTarget) -> Result<Self> {
        let path = match target {
            OutputTarget::Stdout => return Ok(Sink::Stdout(BufWriter::new(std::io::stdout()))),
            OutputTarget::File(path) => path,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        let file = BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create output file {:?}", path))?,
        );
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        Ok(if gzipped {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(file)
        })
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Stdout(w) => w as &mut dyn Write,
            Sink::Plain(w) => w as &mut dyn Write,
            Sink::Gzip(w) => w as &mut dyn Write,
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            Sink::Stdout(mut w) => w.flush(),
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish()?.flush(),
        }
    }
}

/// Routing table from `(class, status)` to an open sink.
pub struct Demultiplexer {
    sinks: Vec<Sink>,
    targets: Vec<OutputTarget>,
    routes: [[Option<usize>; 2]; 3],
    written: u64,
}

impl Demultiplexer {
    /// Open every output the plan names. Classes sharing a destination share a sink.
    pub fn open(plan: &OutputPlan) -> Result<Self> {
        let mut sinks = Vec::new();
        let mut targets = Vec::new();
        let mut by_target: HashMap<OutputTarget, usize> = HashMap::new();
        let mut routes = [[None; 2]; 3];

        for class in ReadClass::ALL {
            let destinations = [
                (PassStatus::Passed, plan.passed(class).cloned()),
                (PassStatus::Filtered, plan.filtered(class)),
            ];
            for (status, target) in destinations {
                let Some(target) = target else {
                    continue;
                };
                let slot = match by_target.get(&target) {
                    Some(&slot) => slot,
                    None => {
                        sinks.push(Sink::open(&target)?);
                        targets.push(target.clone());
                        by_target.insert(target.clone(), sinks.len() - 1);
                        sinks.len() - 1
                    }
                };
                debug!("Routing {}/{} reads to {:?}", class, status, target);
                routes[class.index()][status.index()] = Some(slot);
            }
        }

        Ok(Self { sinks, targets, routes, written: 0 })
    }

    /// Output that reads of this class and status go to, if any.
    pub fn route(&self, class: ReadClass, status: PassStatus) -> Option<&OutputTarget> {
        self.routes[class.index()][status.index()].map(|slot| &self.targets[slot])
    }

    /// Write a read to its sink. Returns `false` if its route has no output.
    pub fn write(&mut self, routed: &RoutedRead) -> std::io::Result<bool> {
        let Some(slot) = self.routes[routed.class.index()][routed.status.index()] else {
            return Ok(false);
        };
        write_record(self.sinks[slot].writer(), &routed.read)?;
        self.written += 1;
        Ok(true)
    }

    /// Flush every sink and finish gzip streams. Returns the number of reads written.
    pub fn finish(self) -> Result<u64> {
        for (sink, target) in self.sinks.into_iter().zip(self.targets.iter()) {
            sink.finish().with_context(|| format!("Failed to finish output {:?}", target))?;
        }
        Ok(self.written)
    }
}

/// Drain the channel into the demultiplexer until every sender is dropped.
pub fn run_writer(mut demux: Demultiplexer, receiver: Receiver<RoutedRead>) -> Result<u64> {
    let mut received = 0u64;
    for routed in receiver {
        received += 1;
        demux.write(&routed).with_context(|| {
            format!(
                "Failed to write read {} to {:?}",
                routed.read.id,
                demux.route(routed.class, routed.status)
            )
        })?;
        if received % 100_000 == 0 {
            debug!("Writer received {} reads", received);
        }
    }
    let written = demux.finish()?;
    debug!("Writer done: {} reads received, {} written", received, written);
    Ok(written)
}
