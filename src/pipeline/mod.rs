//! Concurrent batch pipeline.
//!
//! The input is indexed once and split into batches of consecutive records.
//! Batches run on a rayon pool. Plain files are seekable, so every worker
//! loads its own batch; a gzip stream is decoded once by a loader thread that
//! hands batches to the pool over a bounded channel. Each read of a batch is
//! annotated, classified, trimmed, oriented and filtered in order and sent to
//! a single writer thread over a bounded crossbeam channel. Counters are kept
//! per batch and merged after the pool drains.
//!
//! Ordering of reads across batches is not preserved; within a batch it is.

mod writer;

use std::path::Path;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info};
use rayon::prelude::*;

use crate::annotate::{annotate, AnnotatorConfig};
use crate::fastq::FastqIndex;
use crate::process::{orient, trim, Orientation};
use crate::read::{PassStatus, Read, ReadClass};
use crate::report::Counters;

pub use writer::{filtered_path, run_writer, Demultiplexer, OutputPlan, OutputTarget};

/// Reads buffered between workers and the writer.
const CHANNEL_CAPACITY: usize = 4096;

/// Worker, filter and output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub threads: usize,
    pub batch_size: usize,
    /// Reads shorter than this are skipped before annotation
    pub skip_short: usize,
    /// Reads with a lower mean quality are skipped before annotation
    pub skip_lowq: f64,
    /// Reads shorter than this after trimming are filtered
    pub filter_short: usize,
    /// Reads with a lower mean quality after trimming are filtered
    pub filter_lowq: f64,
    pub trim_adapter: bool,
    pub trim_poly: bool,
    pub orientation: Orientation,
    pub outputs: OutputPlan,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            batch_size: 1_000_000,
            skip_short: 0,
            skip_lowq: 0.0,
            filter_short: 0,
            filter_lowq: 0.0,
            trim_adapter: false,
            trim_poly: false,
            orientation: Orientation::Generic,
            outputs: OutputPlan::default(),
        }
    }
}

/// A range of consecutive records processed by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTask {
    pub id: usize,
    pub start: usize,
    pub count: usize,
}

/// A processed read on its way to the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRead {
    pub read: Read,
    pub class: ReadClass,
    pub status: PassStatus,
}

/// What happened to a read in a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Skipped,
    Routed(RoutedRead),
}

/// Split `total` records into batches.
///
/// There are at least `workers` batches, so every worker has something to do,
/// and batches hold at most about `batch_size` records. Empty trailing batches
/// are dropped.
pub fn plan_batches(total: usize, batch_size: usize, workers: usize) -> Vec<BatchTask> {
    let batches = (total / batch_size.max(1) + 1).max(workers);
    let per_batch = total / batches + 1;
    (0..batches)
        .map(|id| BatchTask { id, start: id * per_batch, count: per_batch })
        .filter(|task| task.start < total)
        .map(|task| BatchTask { count: task.count.min(total - task.start), ..task })
        .collect()
}

fn below_quality(read: &Read, cutoff: f64) -> bool {
    cutoff > 0.0 && cutoff > read.mean_quality()
}

/// Run one read through skip, annotate, classify, trim, orient and filter.
///
/// Without an annotator the annotation parsed from the read identifier is kept.
pub fn process_read(
    mut read: Read,
    annotator: Option<&AnnotatorConfig>,
    options: &PipelineOptions,
) -> Outcome {
    if options.skip_short > read.len() || below_quality(&read, options.skip_lowq) {
        return Outcome::Skipped;
    }

    if let Some(config) = annotator {
        annotate(&mut read, config);
    }
    let class = ReadClass::of(&read.annotation);

    if options.trim_poly {
        trim(&mut read, true, true);
    } else if options.trim_adapter {
        trim(&mut read, false, true);
    }
    orient(&mut read, options.orientation);

    let status = if options.filter_short > read.len() || below_quality(&read, options.filter_lowq)
    {
        PassStatus::Filtered
    } else {
        PassStatus::Passed
    };

    Outcome::Routed(RoutedRead { read, class, status })
}

/// Process one loaded batch and hand every surviving read to the writer.
pub fn process_batch(
    task: BatchTask,
    reads: Vec<Read>,
    annotator: Option<&AnnotatorConfig>,
    options: &PipelineOptions,
    sender: &Sender<RoutedRead>,
) -> Result<Counters> {
    debug!("Batch {}: processing {} reads from record {}", task.id, reads.len(), task.start);
    let mut counters = Counters::new();
    for read in reads {
        match process_read(read, annotator, options) {
            Outcome::Skipped => counters.skip(),
            Outcome::Routed(routed) => {
                counters.record(routed.class, routed.status);
                sender
                    .send(routed)
                    .map_err(|_| anyhow!("Writer stopped before batch {} finished", task.id))?;
            }
        }
    }

    debug!("Batch {}: finished", task.id);
    Ok(counters)
}

type LoadedBatch = (BatchTask, Result<Vec<Read>>);

/// Decode the input front to back, sending each planned batch in turn.
///
/// Stops after the first load error or once the workers hang up.
fn load_sequentially(index: &FastqIndex, tasks: &[BatchTask], sender: Sender<LoadedBatch>) {
    let Some(&first) = tasks.first() else {
        return;
    };
    let mut reader = match index.reader_at(0) {
        Ok(reader) => reader,
        Err(e) => {
            let error = anyhow::Error::new(e).context("Failed to open input");
            let _ = sender.send((first, Err(error)));
            return;
        }
    };
    for &task in tasks {
        let batch = reader
            .read_records(task.count)
            .with_context(|| format!("Failed to load batch {}", task.id));
        let failed = batch.is_err();
        if sender.send((task, batch)).is_err() || failed {
            return;
        }
    }
}

/// Process a whole FASTQ file and return the merged counters.
///
/// All outputs are opened before any batch starts, so an unwritable path
/// fails the run up front. A failing batch does not stop the others, except
/// that a gzip stream is not read past a malformed record. The first failure
/// is returned once the pool has drained and the writer has finished.
pub fn run(
    input: &Path,
    annotator: Option<&AnnotatorConfig>,
    options: &PipelineOptions,
) -> Result<Counters> {
    info!("Indexing {:?}", input);
    let index = FastqIndex::build(input).with_context(|| format!("Failed to index {:?}", input))?;
    info!("Found {} records", index.total());

    let demux = Demultiplexer::open(&options.outputs)?;

    let tasks = plan_batches(index.total(), options.batch_size, options.threads);
    info!("Processing {} batches on {} threads", tasks.len(), options.threads);

    let (sender, receiver) = bounded::<RoutedRead>(CHANNEL_CAPACITY);
    let writer_handle = thread::spawn(move || run_writer(demux, receiver));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .build()
        .context("Failed to create thread pool")?;

    let mut results: Vec<(BatchTask, Result<Counters>)> = if index.is_gzipped() {
        debug!("Input is gzip-compressed; decoding it once on a loader thread");
        thread::scope(|scope| {
            let (batch_sender, batch_receiver) = bounded::<LoadedBatch>(options.threads);
            let (index, tasks) = (&index, &tasks);
            scope.spawn(move || load_sequentially(index, tasks, batch_sender));
            pool.install(|| {
                batch_receiver
                    .into_iter()
                    .par_bridge()
                    .map(|(task, batch)| {
                        let counters = batch.and_then(|reads| {
                            process_batch(task, reads, annotator, options, &sender)
                        });
                        (task, counters)
                    })
                    .collect()
            })
        })
    } else {
        pool.install(|| {
            tasks
                .par_iter()
                .map(|&task| {
                    let counters = index
                        .read_batch(task.start, task.count)
                        .with_context(|| format!("Failed to load batch {}", task.id))
                        .and_then(|reads| process_batch(task, reads, annotator, options, &sender));
                    (task, counters)
                })
                .collect()
        })
    };
    results.sort_by_key(|(task, _)| task.id);

    // Dropping the last sender closes the channel and lets the writer finish
    drop(sender);
    let written = writer_handle.join().map_err(|_| anyhow!("Writer thread panicked"))??;
    debug!("Wrote {} reads", written);

    let mut counters = Counters::new();
    let mut first_error = None;
    for (task, result) in results {
        match result {
            Ok(batch) => counters += batch,
            Err(e) => {
                error!("Batch {} failed: {:#}", task.id, e);
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    info!("Processed {} reads", counters.total);
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::tests::{filler, full_length_sense_seq, read_from, test_config, P5};
    use crate::read::Locus;
    use rstest::rstest;

    #[rstest]
    #[case::tiny(10, 1_000_000, 1, vec![(0, 10)])]
    #[case::spread_over_workers(10, 1_000_000, 4, vec![(0, 3), (3, 3), (6, 3), (9, 1)])]
    #[case::many_batches(25, 10, 1, vec![(0, 9), (9, 9), (18, 7)])]
    #[case::empty(0, 10, 4, vec![])]
    fn test_plan_batches(
        #[case] total: usize,
        #[case] batch_size: usize,
        #[case] workers: usize,
        #[case] expected: Vec<(usize, usize)>,
    ) {
        let tasks = plan_batches(total, batch_size, workers);
        let ranges: Vec<(usize, usize)> = tasks.iter().map(|t| (t.start, t.count)).collect();
        assert_eq!(ranges, expected);
        assert_eq!(tasks.iter().map(|t| t.count).sum::<usize>(), total);
    }

    #[test]
    fn test_skip_short_read() {
        let options = PipelineOptions { skip_short: 50, ..PipelineOptions::default() };
        let read = read_from(&filler(30));
        assert_eq!(process_read(read, Some(&test_config()), &options), Outcome::Skipped);
    }

    #[test]
    fn test_skip_low_quality_read() {
        let options = PipelineOptions { skip_lowq: 20.0, ..PipelineOptions::default() };
        let read = Read::new("r", b"ACGT".to_vec(), b"++++".to_vec());
        assert_eq!(process_read(read, None, &options), Outcome::Skipped);
    }

    #[test]
    fn test_full_length_read_is_trimmed_and_passes() {
        let options = PipelineOptions {
            trim_adapter: true,
            trim_poly: true,
            orientation: Orientation::Sense,
            ..PipelineOptions::default()
        };
        let Outcome::Routed(routed) =
            process_read(read_from(&full_length_sense_seq()), Some(&test_config()), &options)
        else {
            panic!("read was skipped");
        };
        assert_eq!(routed.class, ReadClass::FullLength);
        assert_eq!(routed.status, PassStatus::Passed);
        // 30..128 remains: the 5' primer, the poly(A) run of 22 and the 3' primer are cut
        assert_eq!(routed.read.len(), 98);
        assert_eq!(routed.read.annotation.ploc5, Locus::Trimmed);
        assert_eq!(routed.read.annotation.poly3, Locus::Trimmed);
    }

    #[test]
    fn test_short_after_trimming_is_filtered() {
        let options = PipelineOptions {
            trim_adapter: true,
            filter_short: 150,
            ..PipelineOptions::default()
        };
        let Outcome::Routed(routed) =
            process_read(read_from(&full_length_sense_seq()), Some(&test_config()), &options)
        else {
            panic!("read was skipped");
        };
        assert_eq!(routed.class, ReadClass::FullLength);
        assert_eq!(routed.status, PassStatus::Filtered);
    }

    #[test]
    fn test_truncated_read_classification() {
        let seq = format!("{}{P5}{}", filler(10), filler(170));
        let Outcome::Routed(routed) =
            process_read(read_from(&seq), Some(&test_config()), &PipelineOptions::default())
        else {
            panic!("read was skipped");
        };
        assert_eq!(routed.class, ReadClass::Truncated);
        assert_eq!(routed.read.annotation.ploc5, Locus::At(30));
        assert_eq!(routed.read.annotation.ploc3, Locus::NotFound);
    }

    #[test]
    fn test_disabled_annotation_keeps_parsed_annotation() {
        let mut read = read_from(&filler(40));
        read.annotation.fusion = true;
        let Outcome::Routed(routed) = process_read(read, None, &PipelineOptions::default()) else {
            panic!("read was skipped");
        };
        assert_eq!(routed.class, ReadClass::Fusion);
    }

    #[test]
    fn test_process_read_is_deterministic() {
        let options = PipelineOptions {
            trim_adapter: true,
            trim_poly: true,
            orientation: Orientation::Antisense,
            ..PipelineOptions::default()
        };
        let config = test_config();
        let a = process_read(read_from(&full_length_sense_seq()), Some(&config), &options);
        let b = process_read(read_from(&full_length_sense_seq()), Some(&config), &options);
        assert_eq!(a, b);
    }
}
