//! Colors and blend modes

/// Unpremultiplied RGBA color with f32 components in [0, 1]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Color = Color::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }

    /// Multiply color channels by alpha.
    pub fn premultiply(&self) -> Color {
        Color::new(self.r * self.a, self.g * self.a, self.b * self.a, self.a)
    }
}

/// Porter-Duff style blend modes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Clear,
    Src,
    #[default]
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcAtop,
    DstAtop,
    Xor,
    Plus,
    Modulate,
    Screen,
}

impl BlendMode {
    /// True when a fully transparent source leaves the destination
    /// unchanged, meaning an alpha-zero paint draws nothing.
    pub fn transparent_src_is_noop(&self) -> bool {
        matches!(self, BlendMode::SrcOver | BlendMode::DstOver | BlendMode::DstOut | BlendMode::Plus | BlendMode::Xor | BlendMode::Screen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premultiply() {
        let c = Color::new(1.0, 0.5, 0.0, 0.5).premultiply();
        assert_eq!(c, Color::new(0.5, 0.25, 0.0, 0.5));
    }

    #[test]
    fn test_opaque() {
        assert!(Color::WHITE.is_opaque());
        assert!(!Color::WHITE.with_alpha(0.99).is_opaque());
    }
}
