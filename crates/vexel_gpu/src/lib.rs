//! Vexel GPU Core
//!
//! The caching and scheduling heart of the engine: decides what GPU work
//! is needed, whether it already exists, and when it runs.
//!
//! - [`cache::ResourceCache`] — memory-bounded pool of live GPU resources
//! - [`proxy`] — deferred handles for resources that may not exist yet
//! - [`provider::ProxyProvider`] — deduplicates content requests by key
//! - [`ops::DrawOp`] — batched draw descriptions
//! - [`tasks`] / [`manager::DrawingManager`] — the deferred task graph,
//!   executed in creation order at flush
//! - [`backend::GpuBackend`] — the narrow contract a concrete graphics
//!   API implements

pub mod backend;
pub mod cache;
pub mod context;
pub mod manager;
pub mod ops;
pub mod pixels;
pub mod provider;
pub mod proxy;
pub mod raster;
pub mod resource;
pub mod tasks;
pub mod tessellate;

pub use backend::{
    BackendError, GpuBackend, ImageOrigin, MockBackend, RenderTarget, TextureDesc, TextureHandle,
};
pub use cache::{CacheStats, ResourceCache, ResourceId, ResourceRef};
pub use context::{Caps, Context};
pub use manager::DrawingManager;
pub use ops::{AaMode, DrawOp, FragmentStage, OpState, PathVertex, RRectPaint, RectPaint, ShaderStage};
pub use pixels::{BufferSource, PixelBuffer, PixelFormat, PixelSource};
pub use provider::{ProxyProvider, RenderFlags};
pub use proxy::{RenderTargetProxy, TextureProxy};
pub use raster::PathRasterizer;
pub use resource::{Resource, TextureResource};
pub use tasks::{OpsRenderTask, RenderTask, TaskError};
pub use tessellate::{tessellate_fill, tessellate_stroke, TessellatedPath};
