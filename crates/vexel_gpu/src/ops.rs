//! Batched draw operations
//!
//! A [`DrawOp`] is an immutable description of one batched GPU draw:
//! geometry, an ordered chain of color and coverage stages, blend mode,
//! anti-aliasing mode, and scissor. The only mutation after construction
//! is batching: a compatible follow-up draw folds its sub-rects into the
//! open op instead of becoming a new submission.

use std::sync::Arc;

use vexel_core::{BlendMode, Color, RRect, Rect, Transform2D};

use crate::proxy::TextureProxy;

/// Vertex for triangulated path geometry
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PathVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

/// Anti-aliasing applied to a draw
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AaMode {
    /// Pixel-aligned axis-aligned fills need no AA at all
    #[default]
    None,
    /// The target is multisampled; hardware does the work
    Msaa,
    /// Per-pixel coverage AA in the shader
    Coverage,
}

/// Opaque shading stage built by higher-level paint/filter logic
///
/// The batcher treats stages as black boxes; two draws may merge only when
/// their stage chains are identical by pointer.
pub trait ShaderStage: Send + Sync {
    /// A stage that reduces to a solid color can collapse into the paint
    /// color before an op is ever built.
    fn as_solid_color(&self) -> Option<Color> {
        None
    }
}

/// One stage in an op's color or coverage chain
#[derive(Clone)]
pub enum FragmentStage {
    /// Analytic coverage of an axis-aligned rect edge (non-aligned
    /// rectangular clips)
    AaRect { rect: Rect },
    /// Multiply by a sampled mask texture
    TextureMask {
        proxy: TextureProxy,
        local_matrix: Transform2D,
        /// The mask texture is RGBA; multiply by its alpha channel
        multiply_by_alpha: bool,
    },
    /// Opaque shader stage (gradients, image shaders, color filters)
    Shader(Arc<dyn ShaderStage>),
}

impl FragmentStage {
    /// Signature equality for batching: identical stage kind and identical
    /// underlying objects.
    fn signature_eq(&self, other: &FragmentStage) -> bool {
        match (self, other) {
            (FragmentStage::AaRect { rect: a }, FragmentStage::AaRect { rect: b }) => a == b,
            (
                FragmentStage::TextureMask {
                    proxy: pa,
                    local_matrix: ma,
                    multiply_by_alpha: aa,
                },
                FragmentStage::TextureMask {
                    proxy: pb,
                    local_matrix: mb,
                    multiply_by_alpha: ab,
                },
            ) => pa.ptr_eq(pb) && ma == mb && aa == ab,
            (FragmentStage::Shader(a), FragmentStage::Shader(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for FragmentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentStage::AaRect { rect } => f.debug_struct("AaRect").field("rect", rect).finish(),
            FragmentStage::TextureMask { proxy, .. } => {
                f.debug_struct("TextureMask").field("proxy", proxy).finish()
            }
            FragmentStage::Shader(_) => f.write_str("Shader"),
        }
    }
}

/// Shared pipeline state of a draw op
#[derive(Clone, Debug, Default)]
pub struct OpState {
    pub color_stages: Vec<FragmentStage>,
    pub coverage_stages: Vec<FragmentStage>,
    pub blend_mode: BlendMode,
    pub aa: AaMode,
    pub scissor: Option<Rect>,
}

impl OpState {
    /// Two ops sharing a signature can be one GPU submission.
    fn signature_eq(&self, other: &OpState) -> bool {
        self.blend_mode == other.blend_mode
            && self.aa == other.aa
            && self.scissor == other.scissor
            && stages_eq(&self.color_stages, &other.color_stages)
            && stages_eq(&self.coverage_stages, &other.coverage_stages)
    }
}

fn stages_eq(a: &[FragmentStage], b: &[FragmentStage]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.signature_eq(y))
}

/// One rect of a batched fill
#[derive(Clone, Debug)]
pub struct RectPaint {
    pub rect: Rect,
    pub view_matrix: Transform2D,
    pub color: Color,
}

/// One rounded rect of a batched fill
#[derive(Clone, Debug)]
pub struct RRectPaint {
    pub rrect: RRect,
    pub view_matrix: Transform2D,
    pub color: Color,
}

/// One batched unit of draw work
#[derive(Clone, Debug)]
pub enum DrawOp {
    /// Cheap target clear, scissored or full-target
    Clear { color: Color, rect: Option<Rect> },
    /// Vertex-only axis-aligned rect fills
    FillRect {
        rects: Vec<RectPaint>,
        state: OpState,
    },
    /// Rounded rect fills
    RRect {
        rrects: Vec<RRectPaint>,
        state: OpState,
    },
    /// CPU-tessellated path geometry
    TriangulatedPath {
        vertices: Vec<PathVertex>,
        indices: Vec<u32>,
        view_matrix: Transform2D,
        state: OpState,
    },
}

impl DrawOp {
    pub fn fill_rect(rect: Rect, view_matrix: Transform2D, color: Color, state: OpState) -> Self {
        DrawOp::FillRect {
            rects: vec![RectPaint {
                rect,
                view_matrix,
                color,
            }],
            state,
        }
    }

    pub fn rrect(rrect: RRect, view_matrix: Transform2D, color: Color, state: OpState) -> Self {
        DrawOp::RRect {
            rrects: vec![RRectPaint {
                rrect,
                view_matrix,
                color,
            }],
            state,
        }
    }

    /// A clear op with no rect clears the whole target.
    pub fn clears_full_target(&self) -> bool {
        matches!(self, DrawOp::Clear { rect: None, .. })
    }

    /// Number of batched sub-draws in this op.
    pub fn sub_draw_count(&self) -> usize {
        match self {
            DrawOp::Clear { .. } => 1,
            DrawOp::FillRect { rects, .. } => rects.len(),
            DrawOp::RRect { rrects, .. } => rrects.len(),
            DrawOp::TriangulatedPath { .. } => 1,
        }
    }

    pub fn state(&self) -> Option<&OpState> {
        match self {
            DrawOp::Clear { .. } => None,
            DrawOp::FillRect { state, .. }
            | DrawOp::RRect { state, .. }
            | DrawOp::TriangulatedPath { state, .. } => Some(state),
        }
    }

    pub fn state_mut(&mut self) -> Option<&mut OpState> {
        match self {
            DrawOp::Clear { .. } => None,
            DrawOp::FillRect { state, .. }
            | DrawOp::RRect { state, .. }
            | DrawOp::TriangulatedPath { state, .. } => Some(state),
        }
    }

    /// Fold `other` into this op when both describe the same kind of
    /// geometry through the same pipeline. Returns false (leaving both
    /// untouched) when they are not batchable.
    pub fn try_merge(&mut self, other: &DrawOp) -> bool {
        match (self, other) {
            (
                DrawOp::FillRect { rects, state },
                DrawOp::FillRect {
                    rects: other_rects,
                    state: other_state,
                },
            ) if state.signature_eq(other_state) => {
                rects.extend(other_rects.iter().cloned());
                true
            }
            (
                DrawOp::RRect { rrects, state },
                DrawOp::RRect {
                    rrects: other_rrects,
                    state: other_state,
                },
            ) if state.signature_eq(other_state) => {
                rrects.extend(other_rrects.iter().cloned());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_blend(blend: BlendMode) -> OpState {
        OpState {
            blend_mode: blend,
            ..OpState::default()
        }
    }

    #[test]
    fn test_fill_rects_merge() {
        let mut op = DrawOp::fill_rect(
            Rect::new(0.0, 0.0, 8.0, 8.0),
            Transform2D::identity(),
            Color::RED,
            OpState::default(),
        );
        let other = DrawOp::fill_rect(
            Rect::new(16.0, 0.0, 8.0, 8.0),
            Transform2D::identity(),
            Color::RED,
            OpState::default(),
        );
        assert!(op.try_merge(&other));
        assert_eq!(op.sub_draw_count(), 2);
    }

    #[test]
    fn test_different_blend_does_not_merge() {
        let mut op = DrawOp::fill_rect(
            Rect::new(0.0, 0.0, 8.0, 8.0),
            Transform2D::identity(),
            Color::RED,
            state_with_blend(BlendMode::SrcOver),
        );
        let other = DrawOp::fill_rect(
            Rect::new(16.0, 0.0, 8.0, 8.0),
            Transform2D::identity(),
            Color::RED,
            state_with_blend(BlendMode::Plus),
        );
        assert!(!op.try_merge(&other));
        assert_eq!(op.sub_draw_count(), 1);
    }

    #[test]
    fn test_rect_and_rrect_do_not_merge() {
        let mut op = DrawOp::fill_rect(
            Rect::new(0.0, 0.0, 8.0, 8.0),
            Transform2D::identity(),
            Color::RED,
            OpState::default(),
        );
        let other = DrawOp::rrect(
            RRect::new(Rect::new(16.0, 0.0, 8.0, 8.0), 2.0, 2.0),
            Transform2D::identity(),
            Color::RED,
            OpState::default(),
        );
        assert!(!op.try_merge(&other));
    }

    #[test]
    fn test_shader_stage_identity_gates_merge() {
        struct Dummy;
        impl ShaderStage for Dummy {}
        let shared: Arc<dyn ShaderStage> = Arc::new(Dummy);
        let state_a = OpState {
            color_stages: vec![FragmentStage::Shader(Arc::clone(&shared))],
            ..OpState::default()
        };
        let state_b = OpState {
            color_stages: vec![FragmentStage::Shader(Arc::clone(&shared))],
            ..OpState::default()
        };
        let state_c = OpState {
            color_stages: vec![FragmentStage::Shader(Arc::new(Dummy))],
            ..OpState::default()
        };
        let rect = Rect::new(0.0, 0.0, 4.0, 4.0);
        let identity = Transform2D::identity();
        let mut op = DrawOp::fill_rect(rect, identity, Color::WHITE, state_a);
        assert!(op.try_merge(&DrawOp::fill_rect(rect, identity, Color::WHITE, state_b)));
        assert!(!op.try_merge(&DrawOp::fill_rect(rect, identity, Color::WHITE, state_c)));
    }
}
