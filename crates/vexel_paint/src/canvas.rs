//! The canvas: per-surface state machine and draw-call compiler
//!
//! A draw call resolves its shape against the transform and clip stack,
//! then compiles into the cheapest op that renders it correctly:
//!
//! 1. an axis-aligned rect or rounded rect becomes a vertex-only op;
//! 2. other paths either tessellate on the CPU or rasterize once into a
//!    cached mask texture, depending on size;
//! 3. the clip folds into a hardware scissor when it is a pixel-aligned
//!    rect, and into a cached coverage-mask stage otherwise;
//! 4. a solid full-region fill rewrites into a clear op;
//! 5. compatible consecutive draws batch into one submission.
//!
//! Any step that fails to produce a texture or geometry silently ends
//! only that draw call.

use vexel_core::geometry::PIXEL_ALIGN_TOLERANCE;
use vexel_core::{BlendMode, BytesKey, Color, Path, Rect, Stroke, Transform2D, UniqueKey};
use vexel_gpu::raster::PathRasterizer;
use vexel_gpu::{
    tessellate_fill, tessellate_stroke, AaMode, Context, DrawOp, FragmentStage, ImageOrigin,
    OpState, PixelFormat, RenderTargetProxy, TextureProxy,
};

use crate::mc_stack::McStack;
use crate::paint::Paint;
use crate::surface::SurfaceOptions;

/// Paths at or below this verb count always tessellate directly.
const MAX_TRIANGULATED_VERB_COUNT: usize = 100;

/// Estimated tessellation buffer bytes per path point, measured across a
/// large corpus of tessellated paths. Tessellation wins while the
/// estimated buffer stays within the device-space bounding box area.
const TESSELLATION_BUFFER_SIZE_FACTOR: usize = 170;

/// Key word separating texture-path masks from other keys derived from a
/// path identity.
const TEXTURE_PATH_KEY_TAG: u32 = 0x7450_6154;

struct DrawArgs {
    color: Color,
    draw_rect: Rect,
    view_matrix: Transform2D,
}

/// Per-surface drawing state machine
pub struct Canvas {
    context: Context,
    target: RenderTargetProxy,
    options: SurfaceOptions,
    mc: McStack,
    /// Mask texture of the current clip state, keyed by clip identity
    clip_texture: Option<(UniqueKey, TextureProxy)>,
}

impl Canvas {
    pub(crate) fn new(context: Context, target: RenderTargetProxy, options: SurfaceOptions) -> Self {
        let width = target.width() as f32;
        let height = target.height() as f32;
        Self {
            context,
            target,
            options,
            mc: McStack::new(width, height),
            clip_texture: None,
        }
    }

    // === State machine ===

    pub fn save(&mut self) {
        self.mc.save();
    }

    pub fn restore(&mut self) {
        self.mc.restore();
    }

    pub fn matrix(&self) -> Transform2D {
        self.mc.matrix()
    }

    pub fn set_matrix(&mut self, matrix: Transform2D) {
        self.mc.set_matrix(matrix);
    }

    pub fn reset_matrix(&mut self) {
        self.mc.reset_matrix();
    }

    pub fn concat(&mut self, matrix: &Transform2D) {
        self.mc.concat(matrix);
    }

    pub fn translate(&mut self, dx: f32, dy: f32) {
        self.mc.translate(dx, dy);
    }

    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.mc.scale(sx, sy);
    }

    pub fn rotate(&mut self, angle: f32) {
        self.mc.rotate(angle);
    }

    pub fn skew(&mut self, sx: f32, sy: f32) {
        self.mc.skew(sx, sy);
    }

    pub fn clip_rect(&mut self, rect: Rect) {
        self.mc.clip_rect(rect);
    }

    pub fn clip_path(&mut self, path: &Path) {
        self.mc.clip_path(path);
    }

    // === Draw calls ===

    /// Fill the whole surface with `color`, replacing existing content.
    pub fn clear(&mut self, color: Color) {
        let paint = Paint {
            color,
            blend_mode: BlendMode::Src,
            ..Paint::default()
        };
        let rect = Rect::from_wh(self.target.width() as f32, self.target.height() as f32);
        self.draw_rect(rect, &paint);
    }

    pub fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.draw_path(&Path::rect(rect), paint);
    }

    pub fn draw_rrect(&mut self, rrect: vexel_core::RRect, paint: &Paint) {
        self.draw_path(&Path::rrect(rrect), paint);
    }

    pub fn draw_oval(&mut self, oval: Rect, paint: &Paint) {
        self.draw_path(&Path::oval(oval), paint);
    }

    pub fn draw_circle(&mut self, cx: f32, cy: f32, radius: f32, paint: &Paint) {
        self.draw_oval(
            Rect::from_ltrb(cx - radius, cy - radius, cx + radius, cy + radius),
            paint,
        );
    }

    pub fn draw_line(&mut self, from: vexel_core::Point, to: vexel_core::Point, paint: &Paint) {
        let mut paint = paint.clone();
        if paint.stroke_params().is_none() {
            paint.style = crate::paint::PaintStyle::Stroke(Stroke::new(1.0));
        }
        self.draw_path(&Path::line(from, to), &paint);
    }

    /// Draw a texture's content as a rect fill at the origin of the
    /// current transform.
    pub fn draw_texture(&mut self, texture: &TextureProxy, paint: &Paint) {
        let paint = paint.cleaned();
        if paint.nothing_to_draw() {
            return;
        }
        let local = Rect::from_wh(texture.width() as f32, texture.height() as f32);
        let draw_rect = self.clip_local_bounds(local);
        if draw_rect.is_empty() {
            return;
        }
        let args = DrawArgs {
            color: Color::WHITE.with_alpha(paint.color.a).premultiply(),
            draw_rect,
            view_matrix: self.mc.matrix(),
        };
        let mut op = DrawOp::fill_rect(
            args.draw_rect,
            args.view_matrix,
            args.color,
            OpState::default(),
        );
        if let Some(state) = op.state_mut() {
            state.color_stages.push(FragmentStage::TextureMask {
                proxy: texture.clone(),
                local_matrix: Transform2D::identity(),
                multiply_by_alpha: false,
            });
        }
        self.add_draw_op(Some(op), &args, &paint);
    }

    pub fn draw_path(&mut self, path: &Path, paint: &Paint) {
        if path.is_empty() || paint.nothing_to_draw() {
            return;
        }
        let paint = paint.cleaned();
        let stroke = paint.stroke_params();
        let mut path_bounds = path.bounds();
        if let Some(stroke) = &stroke {
            path_bounds = path_bounds.outset(stroke.width, stroke.width);
        }
        let draw_rect = self.clip_local_bounds(path_bounds);
        if draw_rect.is_empty() {
            return;
        }
        // Only fills can reduce to rects; a stroked shape never does.
        let fill_path = if stroke.is_none() {
            path.clone()
        } else {
            Path::new()
        };
        if self.draw_as_clear(&fill_path, &paint) {
            return;
        }
        let view_matrix = self.mc.matrix();
        let args = DrawArgs {
            color: paint.color.premultiply(),
            draw_rect,
            view_matrix,
        };
        if let Some(op) = make_simple_path_op(&fill_path, &args) {
            self.add_draw_op(Some(op), &args, &paint);
            return;
        }
        let op = if should_triangulate(path, &view_matrix) {
            let tessellated = match &stroke {
                Some(stroke) => tessellate_stroke(path, stroke, paint.color),
                None => tessellate_fill(path, paint.color),
            };
            tessellated.map(|t| DrawOp::TriangulatedPath {
                vertices: t.vertices,
                indices: t.indices,
                view_matrix,
                state: OpState::default(),
            })
        } else {
            self.make_texture_path_op(path, &args, stroke.as_ref())
        };
        self.add_draw_op(op, &args, &paint);
    }

    // === Compilation ===

    /// Intersect local-space draw bounds with the inverse-transformed
    /// clip. An empty result culls the draw.
    fn clip_local_bounds(&self, local_bounds: Rect) -> Rect {
        let Some(inverse) = self.mc.matrix().invert() else {
            return Rect::ZERO;
        };
        let clip_bounds = self.mc.clip().bounds();
        let local_clip = inverse.map_rect(&clip_bounds);
        local_bounds.intersect(&local_clip).unwrap_or(Rect::ZERO)
    }

    fn full_target_rect(&self) -> Rect {
        Rect::from_wh(self.target.width() as f32, self.target.height() as f32)
    }

    fn flip_y(&self, rect: &mut Rect) {
        if self.options.origin == ImageOrigin::BottomLeft {
            let height = rect.height();
            let top = self.target.height() as f32 - rect.bottom();
            *rect = Rect::new(rect.left(), top, rect.width(), height);
        }
    }

    /// Rewrite a solid fill into a clear op when it exactly covers the
    /// pixel-aligned clip region (or the full target) and the blend mode
    /// allows replacing destination pixels outright.
    fn draw_as_clear(&mut self, path: &Path, paint: &Paint) -> bool {
        if !paint.has_color_only() || !self.mc.matrix().rect_stays_rect() {
            return false;
        }
        let Some(rect) = path.as_rect() else {
            return false;
        };
        let mut color = paint.color.premultiply();
        match paint.blend_mode {
            BlendMode::Clear => color = Color::TRANSPARENT,
            BlendMode::Src => {}
            _ => {
                if !paint.color.is_opaque() {
                    return false;
                }
            }
        }
        let Some(clip_rect) = self.mc.clip().as_rect() else {
            return false;
        };
        if !clip_rect.is_pixel_aligned() {
            return false;
        }
        let clip_rect = clip_rect.round();
        let device_bounds = self.mc.matrix().map_rect(&rect);
        // The fill must cover the whole clip region to become a clear.
        let covered = device_bounds
            .outset(PIXEL_ALIGN_TOLERANCE, PIXEL_ALIGN_TOLERANCE)
            .contains(&clip_rect);
        if !covered {
            return false;
        }
        let op = if clip_rect == self.full_target_rect() {
            DrawOp::Clear { color, rect: None }
        } else {
            let mut scissor = clip_rect;
            self.flip_y(&mut scissor);
            DrawOp::Clear {
                color,
                rect: Some(scissor),
            }
        };
        let target = self.target.clone();
        self.context
            .with_drawing_manager(|manager| manager.add_op(&target, op));
        true
    }

    /// Mask texture of one path, keyed by the path identity plus the view
    /// scale and stroke, so the same path at the same effective scale
    /// reuses one rasterization.
    fn make_texture_path_op(
        &mut self,
        path: &Path,
        args: &DrawArgs,
        stroke: Option<&Stroke>,
    ) -> Option<DrawOp> {
        let (sx, sy) = args.view_matrix.axis_scales();
        let bounds = path.bounds();
        let scaled = Rect::from_ltrb(
            bounds.left() * sx,
            bounds.top() * sy,
            bounds.right() * sx,
            bounds.bottom() * sy,
        );
        let width = scaled.width().ceil() as u32;
        let height = scaled.height().ceil() as u32;
        let mut bytes = BytesKey::with_capacity(7);
        bytes.write_u32(TEXTURE_PATH_KEY_TAG);
        bytes.write_f32(sx);
        bytes.write_f32(sy);
        if let Some(stroke) = stroke {
            bytes.write_f32(stroke.width);
            bytes.write_u32(stroke.cap as u32);
            bytes.write_u32(stroke.join as u32);
            bytes.write_f32(stroke.miter_limit);
        }
        let key = UniqueKey::combine(&path.unique_key(), &bytes);
        let mut local_matrix = Transform2D::scale(sx, sy);
        local_matrix.post_concat(&Transform2D::translate(-scaled.left(), -scaled.top()));
        let rasterizer =
            PathRasterizer::new(path.clone(), width, height, local_matrix, stroke.copied());
        let proxy = self.context.create_texture_proxy(
            key,
            rasterizer,
            false,
            self.options.render_flags,
        )?;
        let multiply_by_alpha = !proxy.alpha_only();
        let mut op = DrawOp::fill_rect(
            args.draw_rect,
            args.view_matrix,
            args.color,
            OpState::default(),
        );
        if let Some(state) = op.state_mut() {
            state.color_stages.push(FragmentStage::TextureMask {
                proxy,
                local_matrix,
                multiply_by_alpha,
            });
        }
        Some(op)
    }

    /// Coverage mask texture for the current clip state, cached per clip
    /// identity so every draw under the same clip reuses it.
    fn clip_texture_proxy(&mut self) -> Option<TextureProxy> {
        let key = self.mc.clip().unique_key();
        if let Some((cached_key, proxy)) = &self.clip_texture {
            if *cached_key == key {
                return Some(proxy.clone());
            }
        }
        let clip_bounds = self.mc.clip().bounds();
        let width = clip_bounds.width().ceil() as u32;
        let height = clip_bounds.height().ceil() as u32;
        if width == 0 || height == 0 {
            return None;
        }
        let raster_matrix = Transform2D::translate(-clip_bounds.left(), -clip_bounds.top());
        let paths = self.mc.clip().mask_paths();
        let proxy = if paths.len() == 1 && should_triangulate(&paths[0], &raster_matrix) {
            // Cheap clip shape: draw it into an offscreen alpha target.
            let format = if self.context.caps().supports_alpha8 {
                PixelFormat::Alpha8
            } else {
                PixelFormat::Rgba8
            };
            let mask_target = self.context.create_render_target_proxy(
                width,
                height,
                format,
                1,
                ImageOrigin::TopLeft,
            )?;
            let device_path = paths[0].transformed(&raster_matrix);
            let tessellated = tessellate_fill(&device_path, Color::WHITE)?;
            let op = DrawOp::TriangulatedPath {
                vertices: tessellated.vertices,
                indices: tessellated.indices,
                view_matrix: Transform2D::identity(),
                state: OpState::default(),
            };
            self.context
                .with_drawing_manager(|manager| manager.add_op(&mask_target, op));
            mask_target.texture_proxy().clone()
        } else {
            let rasterizer =
                PathRasterizer::intersection(paths, width, height, raster_matrix);
            let mut bytes = BytesKey::with_capacity(2);
            bytes.write_u32(width);
            bytes.write_u32(height);
            let mask_key = UniqueKey::combine(&key, &bytes);
            self.context.create_texture_proxy(
                mask_key,
                rasterizer,
                false,
                self.options.render_flags,
            )?
        };
        self.clip_texture = Some((key, proxy.clone()));
        Some(proxy)
    }

    /// Fold the clip into (coverage stage, scissor rect) for one draw.
    fn clip_mask(&mut self, device_bounds: &Rect) -> (Option<FragmentStage>, Option<Rect>) {
        let (clip_covers_draw, clip_as_rect, clip_bounds) = {
            let clip = self.mc.clip();
            (clip.contains(device_bounds), clip.as_rect(), clip.bounds())
        };
        if clip_covers_draw {
            return (None, None);
        }
        if let Some(rect) = clip_as_rect {
            let mut rect = rect;
            self.flip_y(&mut rect);
            if rect.is_pixel_aligned() {
                let rect = rect.round();
                if rect == self.full_target_rect() {
                    (None, None)
                } else {
                    (None, Some(rect))
                }
            } else {
                // A fractional rect cannot be a hardware scissor; clip the
                // edge pixels analytically instead.
                (
                    Some(FragmentStage::AaRect { rect }),
                    Some(rect.round_out()),
                )
            }
        } else {
            let mut scissor = clip_bounds;
            self.flip_y(&mut scissor);
            let scissor = scissor.round_out();
            match self.clip_texture_proxy() {
                Some(proxy) => {
                    let mut local_matrix = self.mc.matrix();
                    local_matrix.post_concat(&Transform2D::translate(
                        -clip_bounds.left(),
                        -clip_bounds.top(),
                    ));
                    let multiply_by_alpha = !proxy.alpha_only();
                    (
                        Some(FragmentStage::TextureMask {
                            proxy,
                            local_matrix,
                            multiply_by_alpha,
                        }),
                        Some(scissor),
                    )
                }
                // Mask creation failed; the scissor still bounds the draw.
                None => (None, Some(scissor)),
            }
        }
    }

    fn add_draw_op(&mut self, op: Option<DrawOp>, args: &DrawArgs, paint: &Paint) {
        let Some(mut op) = op else {
            tracing::debug!("draw call skipped, no op could be built");
            return;
        };
        let device_bounds = args.view_matrix.map_rect(&args.draw_rect);
        let aa = if self.target.sample_count() > 1 {
            AaMode::Msaa
        } else if paint.anti_alias {
            let is_fill_rect = matches!(op, DrawOp::FillRect { .. });
            if !is_fill_rect
                || !args.view_matrix.rect_stays_rect()
                || !device_bounds.is_pixel_aligned()
            {
                AaMode::Coverage
            } else {
                AaMode::None
            }
        } else {
            AaMode::None
        };
        let (clip_stage, scissor) = self.clip_mask(&device_bounds);
        if let Some(state) = op.state_mut() {
            if let Some(shader) = &paint.shader {
                state.color_stages.push(FragmentStage::Shader(shader.clone()));
            }
            if let Some(filter) = &paint.color_filter {
                state.color_stages.push(FragmentStage::Shader(filter.clone()));
            }
            if let Some(filter) = &paint.mask_filter {
                state
                    .coverage_stages
                    .push(FragmentStage::Shader(filter.clone()));
            }
            if let Some(stage) = clip_stage {
                state.coverage_stages.push(stage);
            }
            state.blend_mode = paint.blend_mode;
            state.aa = aa;
            state.scissor = scissor;
        }
        let target = self.target.clone();
        self.context
            .with_drawing_manager(|manager| manager.add_op(&target, op));
    }
}

fn make_simple_path_op(path: &Path, args: &DrawArgs) -> Option<DrawOp> {
    if let Some(rect) = path.as_rect() {
        return Some(DrawOp::fill_rect(
            rect,
            args.view_matrix,
            args.color,
            OpState::default(),
        ));
    }
    if let Some(rrect) = path.as_rrect() {
        return Some(DrawOp::rrect(
            rrect,
            args.view_matrix,
            args.color,
            OpState::default(),
        ));
    }
    None
}

/// Decide CPU tessellation vs. cached texture mask for a path. Small
/// paths always tessellate; large ones tessellate only while the
/// estimated buffer size stays within the device-space bounding box area.
fn should_triangulate(path: &Path, view_matrix: &Transform2D) -> bool {
    if path.count_verbs() <= MAX_TRIANGULATED_VERB_COUNT {
        return true;
    }
    let (sx, sy) = view_matrix.axis_scales();
    let bounds = path.bounds();
    let width = (bounds.width() * sx).ceil() as usize;
    let height = (bounds.height() * sy).ceil() as usize;
    path.count_points() * TESSELLATION_BUFFER_SIZE_FACTOR <= width * height
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexel_core::Point;

    #[test]
    fn test_should_triangulate_small_path() {
        let path = Path::oval(Rect::new(0.0, 0.0, 500.0, 500.0));
        assert!(should_triangulate(&path, &Transform2D::identity()));
    }

    #[test]
    fn test_should_triangulate_dense_path_in_small_bounds() {
        // Many points crammed into a tiny box: the mask texture wins.
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0));
        for i in 0..200 {
            let t = i as f32 / 200.0;
            path.line_to(Point::new(t * 20.0, ((i % 2) as f32) * 20.0));
        }
        path.close();
        assert!(!should_triangulate(&path, &Transform2D::identity()));
    }

    #[test]
    fn test_sparse_path_in_large_bounds_triangulates() {
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0));
        for i in 0..200 {
            let t = i as f32 / 200.0;
            path.line_to(Point::new(t * 2000.0, ((i % 2) as f32) * 2000.0));
        }
        path.close();
        assert!(should_triangulate(&path, &Transform2D::identity()));
    }
}
