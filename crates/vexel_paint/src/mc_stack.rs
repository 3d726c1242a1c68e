//! Matrix/clip state stack
//!
//! Each canvas frame pairs the current transform with the accumulated
//! clip. Clips are stored in device space as a list of intersected
//! elements: rects stay rects while the transform preserves axis
//! alignment, anything else becomes a quad path. Every clip state has a
//! lazily allocated identity that keys its rasterized coverage mask, so
//! draws sharing a clip state share one mask texture.

use std::sync::Arc;

use smallvec::SmallVec;

use vexel_core::{LazyUniqueKey, Path, Point, Rect, Transform2D, UniqueKey};

/// One intersected clip shape in device space
#[derive(Clone, Debug)]
pub(crate) enum ClipElement {
    Rect(Rect),
    Path(Path),
}

impl ClipElement {
    fn bounds(&self) -> Rect {
        match self {
            ClipElement::Rect(rect) => *rect,
            ClipElement::Path(path) => path.bounds(),
        }
    }

}

/// Accumulated clip of one canvas frame
#[derive(Clone, Debug)]
pub(crate) struct Clip {
    elements: SmallVec<[ClipElement; 1]>,
    identity: Arc<LazyUniqueKey>,
}

impl Clip {
    /// Base clip covering the full target.
    fn full(width: f32, height: f32) -> Self {
        Self {
            elements: SmallVec::from_elem(ClipElement::Rect(Rect::from_wh(width, height)), 1),
            identity: Arc::new(LazyUniqueKey::new()),
        }
    }

    fn push(&mut self, element: ClipElement) {
        self.elements.push(element);
        // The clip state changed; it gets a fresh mask identity.
        self.identity = Arc::new(LazyUniqueKey::new());
    }

    /// The clip as a single axis-aligned rect, when every element is one.
    pub(crate) fn as_rect(&self) -> Option<Rect> {
        let mut result: Option<Rect> = None;
        for element in &self.elements {
            let ClipElement::Rect(rect) = element else {
                return None;
            };
            result = Some(match result {
                Some(acc) => acc.intersect(rect)?,
                None => *rect,
            });
        }
        result
    }

    /// Device-space bounds of the clipped region.
    pub(crate) fn bounds(&self) -> Rect {
        let mut result: Option<Rect> = None;
        for element in &self.elements {
            let bounds = element.bounds();
            result = Some(match result {
                Some(acc) => match acc.intersect(&bounds) {
                    Some(intersection) => intersection,
                    None => return Rect::ZERO,
                },
                None => bounds,
            });
        }
        result.unwrap_or(Rect::ZERO)
    }

    /// Conservative containment: true only when the clip provably covers
    /// `rect`. Path elements report false.
    pub(crate) fn contains(&self, rect: &Rect) -> bool {
        self.elements.iter().all(|element| match element {
            ClipElement::Rect(clip_rect) => clip_rect.contains(rect),
            ClipElement::Path(_) => false,
        })
    }

    /// The clip shapes that need rasterizing for a coverage mask. Rect
    /// elements are fully expressed by the mask's scissor bounds, so only
    /// path elements contribute.
    pub(crate) fn mask_paths(&self) -> Vec<Path> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                ClipElement::Path(path) => Some(path.clone()),
                ClipElement::Rect(_) => None,
            })
            .collect()
    }

    /// Identity of this clip state, shared by saved copies until the clip
    /// changes again.
    pub(crate) fn unique_key(&self) -> UniqueKey {
        self.identity.get()
    }
}

struct McFrame {
    matrix: Transform2D,
    clip: Clip,
}

/// Stack of (transform, clip) frames with a permanent base frame
pub(crate) struct McStack {
    frames: Vec<McFrame>,
}

impl McStack {
    pub(crate) fn new(target_width: f32, target_height: f32) -> Self {
        Self {
            frames: vec![McFrame {
                matrix: Transform2D::identity(),
                clip: Clip::full(target_width, target_height),
            }],
        }
    }

    fn top(&self) -> &McFrame {
        self.frames.last().expect("the base frame is never popped")
    }

    fn top_mut(&mut self) -> &mut McFrame {
        self.frames.last_mut().expect("the base frame is never popped")
    }

    pub(crate) fn save(&mut self) {
        let top = self.top();
        self.frames.push(McFrame {
            matrix: top.matrix,
            clip: top.clip.clone(),
        });
    }

    /// Pop the top frame. Popping the base frame is a no-op.
    pub(crate) fn restore(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub(crate) fn matrix(&self) -> Transform2D {
        self.top().matrix
    }

    pub(crate) fn set_matrix(&mut self, matrix: Transform2D) {
        self.top_mut().matrix = matrix;
    }

    pub(crate) fn reset_matrix(&mut self) {
        self.top_mut().matrix = Transform2D::identity();
    }

    pub(crate) fn concat(&mut self, matrix: &Transform2D) {
        self.top_mut().matrix.pre_concat(matrix);
    }

    pub(crate) fn translate(&mut self, dx: f32, dy: f32) {
        self.concat(&Transform2D::translate(dx, dy));
    }

    pub(crate) fn scale(&mut self, sx: f32, sy: f32) {
        self.concat(&Transform2D::scale(sx, sy));
    }

    pub(crate) fn rotate(&mut self, angle: f32) {
        self.concat(&Transform2D::rotate(angle));
    }

    pub(crate) fn skew(&mut self, sx: f32, sy: f32) {
        self.concat(&Transform2D::skew(sx, sy));
    }

    pub(crate) fn clip(&self) -> &Clip {
        &self.top().clip
    }

    /// Intersect the clip with a local-space rect.
    pub(crate) fn clip_rect(&mut self, rect: Rect) {
        let matrix = self.top().matrix;
        let element = if matrix.rect_stays_rect() {
            ClipElement::Rect(matrix.map_rect(&rect))
        } else {
            // A rotated or skewed rect clips as its mapped quad.
            let mut quad = Path::new();
            quad.move_to(matrix.map_point(Point::new(rect.left(), rect.top())));
            quad.line_to(matrix.map_point(Point::new(rect.right(), rect.top())));
            quad.line_to(matrix.map_point(Point::new(rect.right(), rect.bottom())));
            quad.line_to(matrix.map_point(Point::new(rect.left(), rect.bottom())));
            quad.close();
            ClipElement::Path(quad)
        };
        self.top_mut().clip.push(element);
    }

    /// Intersect the clip with a local-space path.
    pub(crate) fn clip_path(&mut self, path: &Path) {
        let matrix = self.top().matrix;
        let element = match path.as_rect() {
            Some(rect) if matrix.rect_stays_rect() => ClipElement::Rect(matrix.map_rect(&rect)),
            _ => ClipElement::Path(path.transformed(&matrix)),
        };
        self.top_mut().clip.push(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_restore() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.translate(10.0, 0.0);
        stack.save();
        stack.scale(2.0, 2.0);
        assert_ne!(stack.matrix(), Transform2D::translate(10.0, 0.0));
        stack.restore();
        assert_eq!(stack.matrix(), Transform2D::translate(10.0, 0.0));
    }

    #[test]
    fn test_restore_below_base_is_noop() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.restore();
        stack.restore();
        assert_eq!(stack.matrix(), Transform2D::identity());
        assert_eq!(stack.clip().as_rect(), Some(Rect::from_wh(100.0, 100.0)));
    }

    #[test]
    fn test_clip_rect_intersection() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.clip_rect(Rect::new(10.0, 10.0, 50.0, 50.0));
        stack.clip_rect(Rect::new(30.0, 30.0, 50.0, 50.0));
        assert_eq!(stack.clip().as_rect(), Some(Rect::new(30.0, 30.0, 30.0, 30.0)));
    }

    #[test]
    fn test_transformed_clip_rect() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.translate(20.0, 0.0);
        stack.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(stack.clip().as_rect(), Some(Rect::new(20.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_rotated_clip_is_not_a_rect() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.rotate(0.3);
        stack.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        assert!(stack.clip().as_rect().is_none());
    }

    #[test]
    fn test_clip_identity_stable_across_save() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
        let key = stack.clip().unique_key();
        stack.save();
        assert_eq!(stack.clip().unique_key(), key);
        stack.clip_rect(Rect::new(2.0, 2.0, 4.0, 4.0));
        assert_ne!(stack.clip().unique_key(), key);
        stack.restore();
        assert_eq!(stack.clip().unique_key(), key);
    }

    #[test]
    fn test_clip_contains() {
        let mut stack = McStack::new(100.0, 100.0);
        stack.clip_rect(Rect::new(10.0, 10.0, 50.0, 50.0));
        assert!(stack.clip().contains(&Rect::new(20.0, 20.0, 10.0, 10.0)));
        assert!(!stack.clip().contains(&Rect::new(0.0, 0.0, 10.0, 10.0)));
    }
}
