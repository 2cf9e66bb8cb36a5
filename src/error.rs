//! Pipeline error types.
//!
//! [`SetupError`] aborts pipeline construction. [`FrameError`] aborts the frame
//! being recorded and names the stage that failed.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

use crate::backend::BackendError;
use crate::pipeline::command_list::{AccessMode, CommandListRef};
use crate::render_graph::GraphError;

/// Stage of the per-frame pipeline, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    MeshPack,
    FrameUpload,
    CommandGeneration,
    Compaction,
    Execution,
    Submission,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MeshPack => "mesh pack",
            Self::FrameUpload => "frame upload",
            Self::CommandGeneration => "command generation",
            Self::Compaction => "compaction",
            Self::Execution => "execution",
            Self::Submission => "submission",
        };
        f.write_str(name)
    }
}

/// Errors that abort pipeline setup.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to reserve storage for {what} ({bytes} bytes)")]
    AllocationFailed { what: &'static str, bytes: u64 },
    #[error("vertex store of {total} vertices is not addressable by a u32 draw range")]
    VertexStoreOverflow { total: u64 },
    #[error("object {index} is invalid: {reason}")]
    InvalidObject { index: usize, reason: String },
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    #[error("shader {label} failed validation: {message}")]
    ShaderValidation { label: String, message: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("render graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("device error during setup: {0}")]
    Backend(#[from] BackendError),
}

/// Errors that abort a frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("{stage} failed: {source}")]
    Device {
        stage: PipelineStage,
        #[source]
        source: BackendError,
    },
    #[error("{0:?} used for {1:?} without registration this frame")]
    UnregisteredAccess(CommandListRef, AccessMode),
    #[error("{mode:?} access cannot be registered for the {stage} stage")]
    InvalidRegistration {
        mode: AccessMode,
        stage: PipelineStage,
    },
    #[error("execution range {range:?} is invalid: {reason}")]
    InvalidRange { range: Range<u32>, reason: String },
    #[error("unknown command list {0:?}")]
    UnknownCommandList(CommandListRef),
    #[error("render graph error: {0}")]
    Graph(#[from] GraphError),
}

impl FrameError {
    /// Attribute a backend failure to `stage`.
    pub fn device(stage: PipelineStage) -> impl FnOnce(BackendError) -> FrameError {
        move |source| FrameError::Device { stage, source }
    }

    /// Stage the error is attributed to, when known.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Device { stage, .. } => Some(*stage),
            Self::InvalidRegistration { stage, .. } => Some(*stage),
            Self::InvalidRange { .. } => Some(PipelineStage::Execution),
            _ => None,
        }
    }
}
