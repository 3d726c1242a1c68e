//! Deferred render tasks
//!
//! Everything the GPU will be asked to do is first recorded as a
//! [`RenderTask`]. The set of task kinds is closed, so dispatch is a
//! plain match rather than virtual calls. Tasks run exactly once, in
//! creation order, inside the drawing manager's flush; a task resolves
//! its proxies into concrete resources only at that point.

use thiserror::Error;

use vexel_core::{Point, Rect};

use crate::backend::{BackendError, GpuBackend};
use crate::cache::ResourceCache;
use crate::ops::{DrawOp, FragmentStage};
use crate::proxy::{RenderTargetProxy, TextureProxy};

/// Failure of one render task; flush logs it and moves on
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The pixel source (rasterizer/decoder) produced no buffer
    #[error("pixel source produced no buffer")]
    EmptySource,

    /// A proxy reached execution with neither a cached resource nor
    /// pending creation work
    #[error("proxy content was never materialized")]
    NeverMaterialized,
}

/// A batch of draw ops against one render target
#[derive(Debug)]
pub struct OpsRenderTask {
    target: RenderTargetProxy,
    ops: Vec<DrawOp>,
    closed: bool,
}

impl OpsRenderTask {
    pub(crate) fn new(target: RenderTargetProxy) -> Self {
        Self {
            target,
            ops: Vec::new(),
            closed: false,
        }
    }

    pub fn target(&self) -> &RenderTargetProxy {
        &self.target
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Append an op, folding it into the open op when batchable. A
    /// full-target clear makes everything recorded before it invisible,
    /// so prior ops are discarded instead of executed.
    pub fn add_op(&mut self, op: DrawOp) {
        if op.clears_full_target() {
            self.ops.clear();
            self.ops.push(op);
            return;
        }
        if let Some(last) = self.ops.last_mut() {
            if last.try_merge(&op) {
                return;
            }
        }
        self.ops.push(op);
    }

    fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        cache: &ResourceCache,
    ) -> Result<(), TaskError> {
        let target = self.target.resolve(cache, backend)?;
        let ops = std::mem::take(&mut self.ops);
        let mut ready = Vec::with_capacity(ops.len());
        for op in ops {
            match instantiate_op_masks(&op, cache, backend) {
                Ok(()) => ready.push(op),
                Err(err) => {
                    // The draw degrades to a no-op; the rest of the batch
                    // still renders.
                    tracing::warn!("skipping draw op, mask unavailable: {err}");
                }
            }
        }
        backend.submit_ops(&target, &ready)?;
        Ok(())
    }
}

/// Resolve every mask texture an op samples.
fn instantiate_op_masks(
    op: &DrawOp,
    cache: &ResourceCache,
    backend: &mut dyn GpuBackend,
) -> Result<(), TaskError> {
    let Some(state) = op.state() else {
        return Ok(());
    };
    for stage in state.color_stages.iter().chain(&state.coverage_stages) {
        if let FragmentStage::TextureMask { proxy, .. } = stage {
            proxy.instantiate(cache, backend)?;
        }
    }
    Ok(())
}

/// Multisample resolve plus mipmap regeneration for one target
#[derive(Debug)]
pub struct TextureResolveTask {
    target: RenderTargetProxy,
}

impl TextureResolveTask {
    pub(crate) fn new(target: RenderTargetProxy) -> Self {
        Self { target }
    }

    fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        cache: &ResourceCache,
    ) -> Result<(), TaskError> {
        let target = self.target.resolve(cache, backend)?;
        if target.sample_count > 1 {
            backend.resolve_render_target(target.handle)?;
        }
        if self.target.texture_proxy().mipmapped() {
            backend.regenerate_mipmaps(target.handle)?;
        }
        Ok(())
    }
}

/// Blit of a region from one target into a texture
#[derive(Debug)]
pub struct RenderTargetCopyTask {
    source: RenderTargetProxy,
    dest: TextureProxy,
    src_rect: Rect,
    dst_point: Point,
}

impl RenderTargetCopyTask {
    pub(crate) fn new(
        source: RenderTargetProxy,
        dest: TextureProxy,
        src_rect: Rect,
        dst_point: Point,
    ) -> Self {
        Self {
            source,
            dest,
            src_rect,
            dst_point,
        }
    }

    fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        cache: &ResourceCache,
    ) -> Result<(), TaskError> {
        let source = self.source.resolve(cache, backend)?;
        let dest = self.dest.instantiate(cache, backend)?;
        let dest_handle = dest.gpu_handle().ok_or(TaskError::NeverMaterialized)?;
        backend.copy_render_target_to_texture(
            source.handle,
            dest_handle,
            self.src_rect,
            self.dst_point,
        )?;
        Ok(())
    }
}

/// Materializes a deferred proxy from its pixel source
///
/// The creation work itself lives in the proxy so that a consumer task
/// scheduled before this one can instantiate on demand; whichever side
/// runs first does the work, the other sees it already done.
#[derive(Debug)]
pub struct TextureCreateTask {
    proxy: TextureProxy,
}

impl TextureCreateTask {
    pub(crate) fn new(proxy: TextureProxy) -> Self {
        Self { proxy }
    }

    fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        cache: &ResourceCache,
    ) -> Result<(), TaskError> {
        self.proxy.instantiate(cache, backend)?;
        Ok(())
    }
}

/// One deferred, ordered unit of GPU work
#[derive(Debug)]
pub enum RenderTask {
    Ops(OpsRenderTask),
    TextureResolve(TextureResolveTask),
    RenderTargetCopy(RenderTargetCopyTask),
    TextureCreate(TextureCreateTask),
}

impl RenderTask {
    pub fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        cache: &ResourceCache,
    ) -> Result<(), TaskError> {
        match self {
            RenderTask::Ops(task) => task.execute(backend, cache),
            RenderTask::TextureResolve(task) => task.execute(backend, cache),
            RenderTask::RenderTargetCopy(task) => task.execute(backend, cache),
            RenderTask::TextureCreate(task) => task.execute(backend, cache),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RenderTask::Ops(_) => "ops",
            RenderTask::TextureResolve(_) => "texture-resolve",
            RenderTask::RenderTargetCopy(_) => "render-target-copy",
            RenderTask::TextureCreate(_) => "texture-create",
        }
    }

    /// The ops task inside, for inspection.
    pub fn as_ops(&self) -> Option<&OpsRenderTask> {
        match self {
            RenderTask::Ops(task) => Some(task),
            _ => None,
        }
    }
}
