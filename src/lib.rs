//! Adapter and primer annotation for long-read FASTQ.
//!
//! Reads are searched for a 5' and a 3' primer (in either orientation) near
//! their ends and for stray primers in their bodies. From the hits each read
//! gets a strand score, primer and homopolymer positions, and a class:
//! fusion, full-length or truncated. Annotated reads can then be trimmed,
//! reoriented to a common strand, filtered by length and quality, and
//! demultiplexed by class into separate outputs.
//!
//! The library is organised bottom-up:
//!
//! - [`align`]: bounded semi-global edit-distance alignment
//! - [`polymer`]: primer descriptors and homopolymer run detection
//! - [`read`]: reads, annotations and classes
//! - [`annotate`]: the per-read annotator
//! - [`process`]: trimming and reorientation
//! - [`fastq`]: FASTQ reading, writing and batch indexing
//! - [`config`]: layered run parameters
//! - [`pipeline`]: the concurrent batch pipeline and output demultiplexer
//! - [`report`]: counters and the JSON run report

pub mod align;
pub mod annotate;
pub mod config;
pub mod error;
pub mod fastq;
pub mod pipeline;
pub mod polymer;
pub mod process;
pub mod read;
pub mod report;
