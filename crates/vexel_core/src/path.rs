//! Vector path recording
//!
//! A [`Path`] is a recorded command list, not a geometry engine: curve
//! flattening and tessellation are done by consumers through the lyon
//! event conversion. Paths built from a single rect, rounded rect, oval,
//! or line remember that shape so the renderer can take vertex-only fast
//! paths without re-deriving it.
//!
//! Every path also carries a lazily allocated cache identity. Clones share
//! it; any mutation invalidates it. The identity is what keys rasterized
//! path masks in the resource cache, so "the same path drawn twice" really
//! is the same key while "the path after an edit" is a fresh one.

use std::sync::Arc;

use lyon::math::point;
use lyon::path::PathEvent;

use crate::geometry::{Point, RRect, Rect};
use crate::key::{LazyUniqueKey, UniqueKey};

/// Stroke line cap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    Square,
}

/// Stroke line join
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

/// Stroke geometry parameters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub width: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
}

impl Stroke {
    pub fn new(width: f32) -> Self {
        Self {
            width,
            cap: LineCap::default(),
            join: LineJoin::default(),
            miter_limit: 4.0,
        }
    }
}

impl Default for Stroke {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// One recorded path verb
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    QuadTo { control: Point, end: Point },
    CubicTo { control1: Point, control2: Point, end: Point },
    Close,
}

/// Shape the path is known to reduce to, tracked by the convenience
/// constructors and demoted to `General` on any further mutation.
#[derive(Clone, Copy, Debug, PartialEq)]
enum ShapeHint {
    Empty,
    Rect(Rect),
    RRect(RRect),
    Oval(Rect),
    Line(Point, Point),
    General,
}

/// A recorded vector path
#[derive(Clone, Debug)]
pub struct Path {
    commands: Vec<PathCommand>,
    hint: ShapeHint,
    identity: Arc<LazyUniqueKey>,
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

impl Path {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            hint: ShapeHint::Empty,
            identity: Arc::new(LazyUniqueKey::new()),
        }
    }

    pub fn rect(rect: Rect) -> Self {
        let mut path = Self::new();
        path.add_rect(rect);
        path
    }

    pub fn rrect(rrect: RRect) -> Self {
        let mut path = Self::new();
        path.add_round_rect(rrect);
        path
    }

    pub fn oval(rect: Rect) -> Self {
        let mut path = Self::new();
        path.add_oval(rect);
        path
    }

    pub fn line(from: Point, to: Point) -> Self {
        let mut path = Self::new();
        path.move_to(from);
        path.line_to(to);
        path
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn count_verbs(&self) -> usize {
        self.commands.len()
    }

    pub fn count_points(&self) -> usize {
        self.commands
            .iter()
            .map(|cmd| match cmd {
                PathCommand::MoveTo(_) | PathCommand::LineTo(_) => 1,
                PathCommand::QuadTo { .. } => 2,
                PathCommand::CubicTo { .. } => 3,
                PathCommand::Close => 0,
            })
            .sum()
    }

    /// Control-point bounding box. Curves stay inside their control hull,
    /// so this is a conservative bound on the drawn geometry.
    pub fn bounds(&self) -> Rect {
        let mut left = f32::INFINITY;
        let mut top = f32::INFINITY;
        let mut right = f32::NEG_INFINITY;
        let mut bottom = f32::NEG_INFINITY;
        let mut any = false;
        let mut visit = |p: &Point| {
            left = left.min(p.x);
            top = top.min(p.y);
            right = right.max(p.x);
            bottom = bottom.max(p.y);
            any = true;
        };
        for cmd in &self.commands {
            match cmd {
                PathCommand::MoveTo(p) | PathCommand::LineTo(p) => visit(p),
                PathCommand::QuadTo { control, end } => {
                    visit(control);
                    visit(end);
                }
                PathCommand::CubicTo {
                    control1,
                    control2,
                    end,
                } => {
                    visit(control1);
                    visit(control2);
                    visit(end);
                }
                PathCommand::Close => {}
            }
        }
        if any {
            Rect::from_ltrb(left, top, right, bottom)
        } else {
            Rect::ZERO
        }
    }

    pub fn as_rect(&self) -> Option<Rect> {
        match self.hint {
            ShapeHint::Rect(rect) => Some(rect),
            _ => None,
        }
    }

    pub fn as_rrect(&self) -> Option<RRect> {
        match self.hint {
            ShapeHint::RRect(rrect) => Some(rrect),
            ShapeHint::Oval(rect) => Some(RRect::oval(rect)),
            _ => None,
        }
    }

    pub fn as_line(&self) -> Option<(Point, Point)> {
        match self.hint {
            ShapeHint::Line(from, to) => Some((from, to)),
            _ => None,
        }
    }

    /// Cache identity of this path. Clones share the identity; mutation
    /// invalidates it.
    pub fn unique_key(&self) -> UniqueKey {
        self.identity.get()
    }

    // === Builder ===

    pub fn move_to(&mut self, p: Point) {
        self.mutate();
        self.commands.push(PathCommand::MoveTo(p));
        self.hint = ShapeHint::General;
    }

    pub fn line_to(&mut self, p: Point) {
        self.mutate();
        let was_single_move = matches!(self.commands.as_slice(), [PathCommand::MoveTo(_)]);
        let start = match self.commands.first() {
            Some(PathCommand::MoveTo(start)) => *start,
            _ => Point::ZERO,
        };
        self.commands.push(PathCommand::LineTo(p));
        self.hint = if was_single_move {
            ShapeHint::Line(start, p)
        } else {
            ShapeHint::General
        };
    }

    pub fn quad_to(&mut self, control: Point, end: Point) {
        self.mutate();
        self.commands.push(PathCommand::QuadTo { control, end });
        self.hint = ShapeHint::General;
    }

    pub fn cubic_to(&mut self, control1: Point, control2: Point, end: Point) {
        self.mutate();
        self.commands.push(PathCommand::CubicTo {
            control1,
            control2,
            end,
        });
        self.hint = ShapeHint::General;
    }

    pub fn close(&mut self) {
        self.mutate();
        self.commands.push(PathCommand::Close);
        if !matches!(
            self.hint,
            ShapeHint::Rect(_) | ShapeHint::RRect(_) | ShapeHint::Oval(_)
        ) {
            self.hint = ShapeHint::General;
        }
    }

    pub fn add_rect(&mut self, rect: Rect) {
        self.mutate();
        let was_empty = self.commands.is_empty();
        self.commands.push(PathCommand::MoveTo(Point::new(rect.left(), rect.top())));
        self.commands.push(PathCommand::LineTo(Point::new(rect.right(), rect.top())));
        self.commands.push(PathCommand::LineTo(Point::new(rect.right(), rect.bottom())));
        self.commands.push(PathCommand::LineTo(Point::new(rect.left(), rect.bottom())));
        self.commands.push(PathCommand::Close);
        self.hint = if was_empty {
            ShapeHint::Rect(rect)
        } else {
            ShapeHint::General
        };
    }

    pub fn add_round_rect(&mut self, rrect: RRect) {
        if rrect.radius_x <= 0.0 || rrect.radius_y <= 0.0 {
            self.add_rect(rrect.rect);
            return;
        }
        self.mutate();
        let was_empty = self.commands.is_empty();
        let rect = rrect.rect;
        let rx = rrect.radius_x;
        let ry = rrect.radius_y;
        // Quadratic corner approximation; exact arcs are a geometry
        // concern outside this crate.
        self.commands.push(PathCommand::MoveTo(Point::new(rect.left() + rx, rect.top())));
        self.commands.push(PathCommand::LineTo(Point::new(rect.right() - rx, rect.top())));
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.right(), rect.top()),
            end: Point::new(rect.right(), rect.top() + ry),
        });
        self.commands.push(PathCommand::LineTo(Point::new(rect.right(), rect.bottom() - ry)));
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.right(), rect.bottom()),
            end: Point::new(rect.right() - rx, rect.bottom()),
        });
        self.commands.push(PathCommand::LineTo(Point::new(rect.left() + rx, rect.bottom())));
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.left(), rect.bottom()),
            end: Point::new(rect.left(), rect.bottom() - ry),
        });
        self.commands.push(PathCommand::LineTo(Point::new(rect.left(), rect.top() + ry)));
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.left(), rect.top()),
            end: Point::new(rect.left() + rx, rect.top()),
        });
        self.commands.push(PathCommand::Close);
        self.hint = if was_empty {
            ShapeHint::RRect(rrect)
        } else {
            ShapeHint::General
        };
    }

    pub fn add_oval(&mut self, rect: Rect) {
        self.mutate();
        let was_empty = self.commands.is_empty();
        let cx = rect.left() + rect.width() / 2.0;
        let cy = rect.top() + rect.height() / 2.0;
        self.commands.push(PathCommand::MoveTo(Point::new(cx, rect.top())));
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.right(), rect.top()),
            end: Point::new(rect.right(), cy),
        });
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.right(), rect.bottom()),
            end: Point::new(cx, rect.bottom()),
        });
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.left(), rect.bottom()),
            end: Point::new(rect.left(), cy),
        });
        self.commands.push(PathCommand::QuadTo {
            control: Point::new(rect.left(), rect.top()),
            end: Point::new(cx, rect.top()),
        });
        self.commands.push(PathCommand::Close);
        self.hint = if was_empty {
            ShapeHint::Oval(rect)
        } else {
            ShapeHint::General
        };
    }

    /// Copy of this path with every point mapped through `matrix`. Affine
    /// transforms map Bezier control polygons exactly, so commands survive
    /// unchanged. The copy gets a fresh identity.
    pub fn transformed(&self, matrix: &crate::geometry::Transform2D) -> Path {
        let map = |p: &Point| matrix.map_point(*p);
        let commands = self
            .commands
            .iter()
            .map(|cmd| match cmd {
                PathCommand::MoveTo(p) => PathCommand::MoveTo(map(p)),
                PathCommand::LineTo(p) => PathCommand::LineTo(map(p)),
                PathCommand::QuadTo { control, end } => PathCommand::QuadTo {
                    control: map(control),
                    end: map(end),
                },
                PathCommand::CubicTo {
                    control1,
                    control2,
                    end,
                } => PathCommand::CubicTo {
                    control1: map(control1),
                    control2: map(control2),
                    end: map(end),
                },
                PathCommand::Close => PathCommand::Close,
            })
            .collect();
        Path {
            commands,
            hint: ShapeHint::General,
            identity: Arc::new(LazyUniqueKey::new()),
        }
    }

    /// Invalidate the shared cache identity before a mutation. Cheap when
    /// the identity was never observed.
    fn mutate(&mut self) {
        if self.identity.is_set() || Arc::strong_count(&self.identity) > 1 {
            self.identity = Arc::new(LazyUniqueKey::new());
        }
    }

    /// Convert to lyon path events for tessellation or flattening.
    pub fn to_lyon_events(&self) -> Vec<PathEvent> {
        let mut events = Vec::with_capacity(self.commands.len() + 1);
        let mut first: Option<Point> = None;
        let mut current = Point::ZERO;
        for cmd in &self.commands {
            match cmd {
                PathCommand::MoveTo(p) => {
                    if let Some(f) = first {
                        events.push(PathEvent::End {
                            last: point(current.x, current.y),
                            first: point(f.x, f.y),
                            close: false,
                        });
                    }
                    events.push(PathEvent::Begin { at: point(p.x, p.y) });
                    first = Some(*p);
                    current = *p;
                }
                PathCommand::LineTo(p) => {
                    if first.is_none() {
                        events.push(PathEvent::Begin { at: point(0.0, 0.0) });
                        first = Some(Point::ZERO);
                    }
                    events.push(PathEvent::Line {
                        from: point(current.x, current.y),
                        to: point(p.x, p.y),
                    });
                    current = *p;
                }
                PathCommand::QuadTo { control, end } => {
                    if first.is_none() {
                        events.push(PathEvent::Begin { at: point(0.0, 0.0) });
                        first = Some(Point::ZERO);
                    }
                    events.push(PathEvent::Quadratic {
                        from: point(current.x, current.y),
                        ctrl: point(control.x, control.y),
                        to: point(end.x, end.y),
                    });
                    current = *end;
                }
                PathCommand::CubicTo {
                    control1,
                    control2,
                    end,
                } => {
                    if first.is_none() {
                        events.push(PathEvent::Begin { at: point(0.0, 0.0) });
                        first = Some(Point::ZERO);
                    }
                    events.push(PathEvent::Cubic {
                        from: point(current.x, current.y),
                        ctrl1: point(control1.x, control1.y),
                        ctrl2: point(control2.x, control2.y),
                        to: point(end.x, end.y),
                    });
                    current = *end;
                }
                PathCommand::Close => {
                    if let Some(f) = first {
                        events.push(PathEvent::End {
                            last: point(current.x, current.y),
                            first: point(f.x, f.y),
                            close: true,
                        });
                        current = f;
                        first = None;
                    }
                }
            }
        }
        if let Some(f) = first {
            events.push(PathEvent::End {
                last: point(current.x, current.y),
                first: point(f.x, f.y),
                close: false,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_path_downcast() {
        let rect = Rect::new(1.0, 2.0, 3.0, 4.0);
        let path = Path::rect(rect);
        assert_eq!(path.as_rect(), Some(rect));
        assert_eq!(path.count_verbs(), 5);
        assert_eq!(path.bounds(), rect);
    }

    #[test]
    fn test_downcast_lost_after_mutation() {
        let mut path = Path::rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        path.line_to(Point::new(50.0, 50.0));
        assert!(path.as_rect().is_none());
    }

    #[test]
    fn test_line_downcast() {
        let path = Path::line(Point::new(0.0, 0.0), Point::new(5.0, 5.0));
        assert_eq!(
            path.as_line(),
            Some((Point::new(0.0, 0.0), Point::new(5.0, 5.0)))
        );
    }

    #[test]
    fn test_identity_shared_by_clones() {
        let path = Path::oval(Rect::new(0.0, 0.0, 20.0, 10.0));
        let clone = path.clone();
        assert_eq!(path.unique_key(), clone.unique_key());
    }

    #[test]
    fn test_identity_invalidated_by_mutation() {
        let mut path = Path::oval(Rect::new(0.0, 0.0, 20.0, 10.0));
        let before = path.unique_key();
        path.line_to(Point::new(100.0, 100.0));
        let after = path.unique_key();
        assert_ne!(before, after);
    }

    #[test]
    fn test_point_and_verb_counts() {
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0));
        path.quad_to(Point::new(1.0, 0.0), Point::new(1.0, 1.0));
        path.cubic_to(
            Point::new(2.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 2.0),
        );
        path.close();
        assert_eq!(path.count_verbs(), 4);
        assert_eq!(path.count_points(), 6);
    }

    #[test]
    fn test_lyon_events_closed_subpath() {
        let path = Path::rect(Rect::new(0.0, 0.0, 4.0, 4.0));
        let events = path.to_lyon_events();
        assert!(matches!(events.first(), Some(PathEvent::Begin { .. })));
        assert!(matches!(
            events.last(),
            Some(PathEvent::End { close: true, .. })
        ));
    }
}
