//! Paint state for draw calls

use std::sync::Arc;

use vexel_core::{BlendMode, Color, Stroke};
use vexel_gpu::ShaderStage;

/// Fill or stroke rendering of a shape
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum PaintStyle {
    #[default]
    Fill,
    Stroke(Stroke),
}

/// How a draw call is shaded and composited
#[derive(Clone)]
pub struct Paint {
    pub color: Color,
    pub style: PaintStyle,
    pub blend_mode: BlendMode,
    pub anti_alias: bool,
    pub shader: Option<Arc<dyn ShaderStage>>,
    pub color_filter: Option<Arc<dyn ShaderStage>>,
    pub mask_filter: Option<Arc<dyn ShaderStage>>,
}

impl Default for Paint {
    fn default() -> Self {
        Self::base()
    }
}

impl Paint {
    pub fn fill(color: Color) -> Self {
        Self {
            color,
            anti_alias: true,
            ..Self::base()
        }
    }

    pub fn stroke(color: Color, width: f32) -> Self {
        Self {
            color,
            style: PaintStyle::Stroke(Stroke::new(width)),
            anti_alias: true,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            color: Color::BLACK,
            style: PaintStyle::Fill,
            blend_mode: BlendMode::SrcOver,
            anti_alias: true,
            shader: None,
            color_filter: None,
            mask_filter: None,
        }
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_shader(mut self, shader: Arc<dyn ShaderStage>) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn stroke_params(&self) -> Option<Stroke> {
        match self.style {
            PaintStyle::Fill => None,
            PaintStyle::Stroke(stroke) => Some(stroke),
        }
    }

    /// Only a plain color: no shader and no filters. The clear-op rewrite
    /// requires this.
    pub fn has_color_only(&self) -> bool {
        self.shader.is_none() && self.color_filter.is_none() && self.mask_filter.is_none()
    }

    /// A fully transparent paint under an alpha-respecting blend mode
    /// cannot change any pixel.
    pub fn nothing_to_draw(&self) -> bool {
        self.shader.is_none() && self.color.a <= 0.0 && self.blend_mode.transparent_src_is_noop()
    }

    /// Collapse a solid-color shader into the paint color so the draw can
    /// take the vertex-only path.
    pub fn cleaned(&self) -> Paint {
        let mut cleaned = self.clone();
        if let Some(shader) = &cleaned.shader {
            if let Some(mut color) = shader.as_solid_color() {
                color.a *= cleaned.color.a;
                cleaned.color = color;
                cleaned.shader = None;
            }
        }
        cleaned
    }
}

impl std::fmt::Debug for Paint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paint")
            .field("color", &self.color)
            .field("style", &self.style)
            .field("blend_mode", &self.blend_mode)
            .field("anti_alias", &self.anti_alias)
            .field("has_shader", &self.shader.is_some())
            .finish()
    }
}
