use crate::source::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

/// Pass of a classification run, used to locate a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Stats,
    Classify,
    Labels,
    Rewrite,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Preflight => "preflight",
            Stage::Stats => "stats",
            Stage::Classify => "classify",
            Stage::Labels => "labels",
            Stage::Rewrite => "rewrite",
            Stage::Export => "export",
        };

        f.write_str(s)
    }
}

/// Every fatal outcome of a run. Offsets are point indices into the source.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{stage}: failed to read source at point {offset}: {source}")]
    SourceRead {
        stage: Stage,
        offset: u64,
        #[source]
        source: BridgeError,
    },

    #[error("source is empty: {reason}")]
    SourceEmpty { reason: String },

    #[error("{stage}: chunk alignment fault at point {offset}: {detail}")]
    ChunkAlignment {
        stage: Stage,
        offset: u64,
        detail: String,
    },

    #[error("{stage}: failed to write {} at point {offset}: {source}", path.display())]
    DestinationWrite {
        stage: Stage,
        path: PathBuf,
        offset: u64,
        #[source]
        source: BridgeError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage}: cancelled at point {offset}")]
    Cancelled { stage: Stage, offset: u64 },
}

impl EngineError {
    #[inline]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::SourceRead { stage, .. }
            | EngineError::ChunkAlignment { stage, .. }
            | EngineError::DestinationWrite { stage, .. }
            | EngineError::Cancelled { stage, .. } => Some(*stage),
            EngineError::SourceEmpty { .. } => Some(Stage::Preflight),
            EngineError::Config(_) => None,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
