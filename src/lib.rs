// ============================================================================
// PAINTCORE — GPU stroke rasterization, compositing and undo engine
// ============================================================================
//
// Architecture (leaves first):
//   stroke/     — pointer samples → triangulated ribbon mesh (no GPU types)
//   gpu/        — wgpu device init, per-layer render targets, brush pipeline,
//                 blend-mode compositor, readback
//   canvas.rs   — Layer / LayerStack / BlendMode / DirtyRect data model
//   damage.rs   — dirty-rect accumulation + GPU→CPU region sync
//   history.rs  — linear full-frame snapshot undo/redo
//   transform.rs— interactive affine layer preview with commit/cancel
//   engine.rs   — single-canvas coordinator tying the above together
//
// The host application owns the event loop and the window; this crate owns
// everything between a pointer sample and a composited RGBA buffer.
// ============================================================================

#[macro_use]
pub mod logger;

pub mod canvas;
pub mod config;
pub mod damage;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod history;
pub mod stroke;
pub mod transform;

pub use canvas::{BlendMode, DirtyRect, Layer, LayerId, LayerStack};
pub use config::{BrushConfig, EngineConfig};
pub use engine::Engine;
pub use error::EngineError;
pub use stroke::{RibbonMesh, StrokePath, StrokeSample};
