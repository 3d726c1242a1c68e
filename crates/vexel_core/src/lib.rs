//! Vexel Core Primitives
//!
//! Foundational types shared by the rest of the engine:
//!
//! - **Geometry**: points, rectangles, rounded rectangles, 2D transforms
//! - **Color**: unpremultiplied RGBA colors and blend modes
//! - **Paths**: vector path recording with cheap shape downcasts
//! - **Keys**: the cache identity system (scratch keys, unique keys,
//!   unique domains) that the GPU resource cache is indexed by

pub mod color;
pub mod geometry;
pub mod key;
pub mod path;

pub use color::{BlendMode, Color};
pub use geometry::{Point, RRect, Rect, Size, Transform2D};
pub use key::{BytesKey, LazyUniqueKey, ScratchKey, UniqueDomain, UniqueKey, WeakUniqueKey};
pub use path::{LineCap, LineJoin, Path, PathCommand, Stroke};
