//! The drawing manager
//!
//! Owns the ordered render task list for one context. Draws flow into the
//! currently open ops task for their target; copy tasks close it so they
//! observe everything recorded before them; flush executes the whole list
//! in creation order and leaves it empty. One failing task is logged and
//! does not abort the rest of the batch.

use vexel_core::{Point, Rect};

use crate::backend::GpuBackend;
use crate::cache::ResourceCache;
use crate::ops::DrawOp;
use crate::proxy::{RenderTargetProxy, TextureProxy};
use crate::tasks::{
    OpsRenderTask, RenderTargetCopyTask, RenderTask, TextureCreateTask, TextureResolveTask,
};

/// Ordered task list plus the open-ops bookkeeping
#[derive(Default)]
pub struct DrawingManager {
    tasks: Vec<RenderTask>,
    open_ops: Option<usize>,
}

impl DrawingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[RenderTask] {
        &self.tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// The open ops task for `target`, opening a new one when the current
    /// open task belongs to a different target or none is open.
    pub fn ops_task(&mut self, target: &RenderTargetProxy) -> &mut OpsRenderTask {
        let reusable = self.open_ops.filter(|&idx| {
            matches!(&self.tasks[idx], RenderTask::Ops(task)
                if !task.is_closed() && task.target().ptr_eq(target))
        });
        let idx = match reusable {
            Some(idx) => idx,
            None => {
                self.close_open_ops();
                self.tasks
                    .push(RenderTask::Ops(OpsRenderTask::new(target.clone())));
                let idx = self.tasks.len() - 1;
                self.open_ops = Some(idx);
                idx
            }
        };
        match &mut self.tasks[idx] {
            RenderTask::Ops(task) => task,
            _ => unreachable!("open ops index always names an ops task"),
        }
    }

    /// Route one op into the open task for `target`.
    pub fn add_op(&mut self, target: &RenderTargetProxy, op: DrawOp) {
        self.ops_task(target).add_op(op);
    }

    /// Record the materialization of a deferred texture proxy. Texture
    /// creation is independent of the draw stream, so the open ops task
    /// stays open and keeps batching.
    pub fn record_texture_create(&mut self, proxy: TextureProxy) {
        self.tasks
            .push(RenderTask::TextureCreate(TextureCreateTask::new(proxy)));
    }

    /// Record a copy out of `source`. The open ops task is closed first so
    /// the copy observes every draw recorded before it.
    pub fn record_copy(
        &mut self,
        source: RenderTargetProxy,
        dest: TextureProxy,
        src_rect: Rect,
        dst_point: Point,
    ) {
        self.close_open_ops();
        self.tasks.push(RenderTask::RenderTargetCopy(
            RenderTargetCopyTask::new(source, dest, src_rect, dst_point),
        ));
    }

    /// Close the open ops task. Multisampled or mipmapped targets get a
    /// resolve task appended so their content is complete before anything
    /// reads it.
    fn close_open_ops(&mut self) {
        let Some(idx) = self.open_ops.take() else {
            return;
        };
        let needs_resolve = match &mut self.tasks[idx] {
            RenderTask::Ops(task) => {
                task.close();
                task.target().sample_count() > 1 || task.target().texture_proxy().mipmapped()
            }
            _ => false,
        };
        if needs_resolve {
            let target = match &self.tasks[idx] {
                RenderTask::Ops(task) => task.target().clone(),
                _ => return,
            };
            self.tasks
                .push(RenderTask::TextureResolve(TextureResolveTask::new(target)));
        }
    }

    /// Execute every pending task in creation order, then clear the list.
    /// Failures are logged with their task context; the remaining tasks
    /// still run. Evicted GPU objects are released at the end, on this
    /// thread.
    pub fn flush(&mut self, backend: &mut dyn GpuBackend, cache: &ResourceCache) {
        self.close_open_ops();
        let mut tasks = std::mem::take(&mut self.tasks);
        for (index, task) in tasks.iter_mut().enumerate() {
            if let Err(err) = task.execute(backend, cache) {
                tracing::warn!(
                    index,
                    kind = task.kind_name(),
                    "render task failed: {err}"
                );
            }
        }
        for handle in cache.take_pending_releases() {
            backend.delete_texture(handle);
        }
    }
}
