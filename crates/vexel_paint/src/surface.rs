//! Render surfaces

use vexel_core::{Point, Rect};
use vexel_gpu::{
    Context, GpuBackend, ImageOrigin, PixelFormat, RenderFlags, RenderTargetProxy, TextureProxy,
};

use crate::canvas::Canvas;

/// Creation options for a surface
#[derive(Clone, Copy, Debug)]
pub struct SurfaceOptions {
    pub sample_count: u32,
    pub origin: ImageOrigin,
    pub render_flags: RenderFlags,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            sample_count: 1,
            origin: ImageOrigin::TopLeft,
            render_flags: RenderFlags::empty(),
        }
    }
}

/// A drawable target plus its canvas
pub struct Surface {
    context: Context,
    target: RenderTargetProxy,
    options: SurfaceOptions,
    canvas: Canvas,
}

impl Surface {
    pub fn new(context: &Context, width: u32, height: u32) -> Option<Self> {
        Self::with_options(context, width, height, SurfaceOptions::default())
    }

    pub fn with_options(
        context: &Context,
        width: u32,
        height: u32,
        options: SurfaceOptions,
    ) -> Option<Self> {
        let target = context.create_render_target_proxy(
            width,
            height,
            PixelFormat::Rgba8,
            options.sample_count,
            options.origin,
        )?;
        let canvas = Canvas::new(context.clone(), target.clone(), options);
        Some(Self {
            context: context.clone(),
            target,
            options,
            canvas,
        })
    }

    pub fn width(&self) -> u32 {
        self.target.width()
    }

    pub fn height(&self) -> u32 {
        self.target.height()
    }

    pub fn options(&self) -> SurfaceOptions {
        self.options
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn render_target_proxy(&self) -> &RenderTargetProxy {
        &self.target
    }

    pub fn canvas(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    /// Snapshot the surface content into a texture. The copy is recorded
    /// after every draw so far, so it observes all of them at flush.
    pub fn make_snapshot(&mut self) -> Option<TextureProxy> {
        let dest = self.context.create_empty_texture_proxy(
            self.width(),
            self.height(),
            self.target.format(),
            false,
        )?;
        let src_rect = Rect::from_wh(self.width() as f32, self.height() as f32);
        self.context.with_drawing_manager(|manager| {
            manager.record_copy(self.target.clone(), dest.clone(), src_rect, Point::ZERO);
        });
        Some(dest)
    }

    /// Execute all pending recorded work.
    pub fn flush(&mut self, backend: &mut dyn GpuBackend) {
        self.context.flush(backend);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sample_count", &self.options.sample_count)
            .finish()
    }
}
