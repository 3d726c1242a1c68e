//! Vexel Paint/Canvas API
//!
//! The per-surface drawing front end: a [`Surface`] owns a render target
//! and a [`Canvas`]; the canvas keeps the transform/clip state machine and
//! compiles high-level draw calls into batched draw ops routed through
//! the context's drawing manager.

pub mod canvas;
mod mc_stack;
pub mod paint;
pub mod surface;

pub use canvas::Canvas;
pub use paint::{Paint, PaintStyle};
pub use surface::{Surface, SurfaceOptions};
