//! 2D geometry types
//!
//! Rectangles are origin/size based. `Transform2D` is a row-vector affine
//! transform; `pre_concat` composes a transform in caller-local space, which
//! is what canvas `translate`/`scale`/`rotate` calls need.

/// Maximum distance an edge can sit from an integer coordinate and still
/// count as pixel aligned. Within this tolerance, coverage stays inside
/// half of 1/256 of its intended value.
pub const PIXEL_ALIGN_TOLERANCE: f32 = 1e-3;

/// 2D point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
    }
}

/// 2D size
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// 2D rectangle
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        origin: Point::ZERO,
        size: Size::ZERO,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn from_wh(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn x(&self) -> f32 {
        self.origin.x
    }

    pub fn y(&self) -> f32 {
        self.origin.y
    }

    pub fn width(&self) -> f32 {
        self.size.width
    }

    pub fn height(&self) -> f32 {
        self.size.height
    }

    pub fn left(&self) -> f32 {
        self.origin.x
    }

    pub fn top(&self) -> f32 {
        self.origin.y
    }

    pub fn right(&self) -> f32 {
        self.origin.x + self.size.width
    }

    pub fn bottom(&self) -> f32 {
        self.origin.y + self.size.height
    }

    pub fn is_empty(&self) -> bool {
        self.size.width <= 0.0 || self.size.height <= 0.0
    }

    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.size.width * self.size.height
        }
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.left() && p.x < self.right() && p.y >= self.top() && p.y < self.bottom()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left() <= other.left()
            && self.top() <= other.top()
            && self.right() >= other.right()
            && self.bottom() >= other.bottom()
    }

    /// Intersection of two rects, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if left < right && top < bottom {
            Some(Rect::from_ltrb(left, top, right, bottom))
        } else {
            None
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_ltrb(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn outset(&self, dx: f32, dy: f32) -> Rect {
        Rect::from_ltrb(
            self.left() - dx,
            self.top() - dy,
            self.right() + dx,
            self.bottom() + dy,
        )
    }

    /// Round each edge to the nearest integer coordinate.
    pub fn round(&self) -> Rect {
        Rect::from_ltrb(
            self.left().round(),
            self.top().round(),
            self.right().round(),
            self.bottom().round(),
        )
    }

    /// Round outward to the smallest integer rect containing this one.
    pub fn round_out(&self) -> Rect {
        Rect::from_ltrb(
            self.left().floor(),
            self.top().floor(),
            self.right().ceil(),
            self.bottom().ceil(),
        )
    }

    /// True when every edge sits within [`PIXEL_ALIGN_TOLERANCE`] of an
    /// integer coordinate.
    pub fn is_pixel_aligned(&self) -> bool {
        let aligned = |v: f32| (v.round() - v).abs() <= PIXEL_ALIGN_TOLERANCE;
        aligned(self.left()) && aligned(self.top()) && aligned(self.right()) && aligned(self.bottom())
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.origin.x + dx, self.origin.y + dy, self.size.width, self.size.height)
    }
}

/// Rounded rectangle with uniform elliptical corner radii
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RRect {
    pub rect: Rect,
    pub radius_x: f32,
    pub radius_y: f32,
}

impl RRect {
    pub fn new(rect: Rect, radius_x: f32, radius_y: f32) -> Self {
        let radius_x = radius_x.min(rect.width() / 2.0).max(0.0);
        let radius_y = radius_y.min(rect.height() / 2.0).max(0.0);
        Self {
            rect,
            radius_x,
            radius_y,
        }
    }

    /// An oval is a rounded rect whose radii reach the rect center.
    pub fn oval(rect: Rect) -> Self {
        Self {
            rect,
            radius_x: rect.width() / 2.0,
            radius_y: rect.height() / 2.0,
        }
    }
}

/// 2D affine transform
///
/// Maps `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform2D {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translate(x: f32, y: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: x,
            f: y,
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn rotate(angle: f32) -> Self {
        let cos = angle.cos();
        let sin = angle.sin();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn skew(sx: f32, sy: f32) -> Self {
        Self {
            a: 1.0,
            b: sy,
            c: sx,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    /// `self` applied after `other`: the returned transform maps a point
    /// through `other` first.
    pub fn then(&self, other: &Transform2D) -> Transform2D {
        Transform2D {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    /// Compose `other` in local space: points pass through `other`, then
    /// `self`. This is the canvas `concat` operation.
    pub fn pre_concat(&mut self, other: &Transform2D) {
        *self = self.then(other);
    }

    /// Compose `other` in device space: points pass through `self`, then
    /// `other`.
    pub fn post_concat(&mut self, other: &Transform2D) {
        *self = other.then(self);
    }

    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    /// Bounding box of the four mapped corners.
    pub fn map_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.map_point(Point::new(rect.left(), rect.top())),
            self.map_point(Point::new(rect.right(), rect.top())),
            self.map_point(Point::new(rect.right(), rect.bottom())),
            self.map_point(Point::new(rect.left(), rect.bottom())),
        ];
        let mut left = corners[0].x;
        let mut top = corners[0].y;
        let mut right = corners[0].x;
        let mut bottom = corners[0].y;
        for c in &corners[1..] {
            left = left.min(c.x);
            top = top.min(c.y);
            right = right.max(c.x);
            bottom = bottom.max(c.y);
        }
        Rect::from_ltrb(left, top, right, bottom)
    }

    pub fn invert(&self) -> Option<Transform2D> {
        let det = self.a * self.d - self.b * self.c;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Transform2D {
            a: self.d * inv_det,
            b: -self.b * inv_det,
            c: -self.c * inv_det,
            d: self.a * inv_det,
            e: (self.c * self.f - self.d * self.e) * inv_det,
            f: (self.b * self.e - self.a * self.f) * inv_det,
        })
    }

    /// True when axis-aligned rects map to axis-aligned rects: no rotation
    /// or skew (a 90-degree rotation also preserves rects, so either both
    /// diagonal terms or both off-diagonal terms must be zero).
    pub fn rect_stays_rect(&self) -> bool {
        (self.b == 0.0 && self.c == 0.0) || (self.a == 0.0 && self.d == 0.0)
    }

    /// Scale applied along each device axis, ignoring translation.
    pub fn axis_scales(&self) -> (f32, f32) {
        (
            (self.a * self.a + self.b * self.b).sqrt(),
            (self.c * self.c + self.d * self.d).sqrt(),
        )
    }

    pub fn max_scale(&self) -> f32 {
        let (sx, sy) = self.axis_scales();
        sx.max(sy)
    }
}
