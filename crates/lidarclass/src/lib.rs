//! lidarclass: bounded-memory semantic classification of LAS/LAZ point clouds.
//!
//! A run makes forward passes over the input, each with its own cursor:
//!   1. stats    : strided sample of elevations -> [`GlobalStats`]
//!   2. classify : chunk features + ordered rules -> [`LabelBuffer`]
//!   3. rewrite  : original records with the classification field replaced
//!   4. export   : binary PLY, one coloured vertex per point
//!
//! Passes 3 and 4 may run concurrently. Memory is bounded by the chunk size
//! plus one byte per point for the labels.

pub mod cancel;
pub mod catalog;
pub mod chunk;
pub mod counts;
pub mod error;
pub mod export;
pub mod features;
pub mod labels;
pub mod pipeline;
mod presets;
mod progress;
pub mod rewrite;
pub mod rules;
pub mod source;
pub mod stats;
pub mod summary;

pub use cancel::CancelToken;
pub use catalog::{Class, ColorTable};
pub use counts::ClassCounts;
pub use error::{EngineError, Result, Stage};
pub use labels::{LabelBuffer, LabelBufferBuilder};
pub use pipeline::{run, run_las, scan_stats, ExportMode, LabelSource, Outputs, PipelineConfig};
pub use rules::{RuleClassifier, RuleSet};
pub use source::{Bridge, BridgeError, LasFile, MemoryCloud, MemoryPoint, PointSource};
pub use stats::GlobalStats;
pub use summary::{ClassSummary, RunSummary};
