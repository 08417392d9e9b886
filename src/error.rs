//! Engine error types

use thiserror::Error;

use crate::canvas::LayerId;

/// Errors surfaced by the engine's public operations.
///
/// Per-frame draw errors never reach the caller: geometry degeneracies are
/// skipped and counted, GPU failures disable the affected layer. Only
/// operations with an obvious caller (undo, redo, config construction,
/// layer CRUD) return these.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("stroke produced degenerate geometry")]
    GeometryDegenerate,

    #[error("no GPU adapter available (hardware or fallback)")]
    GpuUnavailable,

    #[error("GPU resource allocation failed for layer {layer}")]
    GpuResourceFailure { layer: LayerId },

    #[error("layer {layer} is disabled after a GPU failure")]
    LayerDisabled { layer: LayerId },

    #[error("no such layer: {0}")]
    UnknownLayer(LayerId),

    #[error("the last remaining layer cannot be removed")]
    LastLayer,

    #[error("history snapshot does not match live canvas: {0}")]
    HistoryCorruption(String),

    #[error("pixel buffer size mismatch: {0}")]
    SizeMismatch(String),

    #[error("nothing to {0}")]
    HistoryExhausted(&'static str),

    #[error("invalid configuration: {field} = {value} (expected {expected})")]
    InvalidConfig {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("no stroke in progress")]
    NoActiveStroke,

    #[error("no transform in progress")]
    NoActiveTransform,
}

impl From<EngineError> for String {
    fn from(err: EngineError) -> Self {
        err.to_string()
    }
}
