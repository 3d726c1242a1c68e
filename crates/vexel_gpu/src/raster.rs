//! CPU path rasterization
//!
//! Produces alpha coverage masks for paths that are too expensive to
//! tessellate and for clip shapes that cannot become a scissor rect.
//! Fills flatten through lyon and scanline-fill with the nonzero winding
//! rule; strokes go through lyon's stroke tessellator and fill the
//! resulting triangles. Everything here is pure CPU work behind the
//! [`PixelSource`] contract, so it can run off the rendering thread.

use std::sync::Arc;

use lyon::lyon_tessellation::{
    BuffersBuilder, StrokeOptions, StrokeTessellator, StrokeVertex, VertexBuffers,
};
use lyon::math::point;
use lyon::path::iterator::PathIterator;
use lyon::path::PathEvent;

use vexel_core::{LineCap, LineJoin, Path, Point, Stroke, Transform2D};

use crate::pixels::{PixelBuffer, PixelFormat, PixelSource};

const FLATTEN_TOLERANCE: f32 = 0.25;

/// One shape contributing coverage to the mask
struct RasterShape {
    path: Path,
    stroke: Option<Stroke>,
}

/// Rasterizes one or more shapes into an Alpha8 coverage mask
///
/// With multiple shapes the mask is their intersection, which is what a
/// clip stack of accumulated shapes needs.
pub struct PathRasterizer {
    shapes: Vec<RasterShape>,
    width: u32,
    height: u32,
    matrix: Transform2D,
}

impl PathRasterizer {
    pub fn new(
        path: Path,
        width: u32,
        height: u32,
        matrix: Transform2D,
        stroke: Option<Stroke>,
    ) -> Arc<Self> {
        Arc::new(Self {
            shapes: vec![RasterShape { path, stroke }],
            width,
            height,
            matrix,
        })
    }

    /// Mask of the intersection of `shapes`, all filled.
    pub fn intersection(
        shapes: Vec<Path>,
        width: u32,
        height: u32,
        matrix: Transform2D,
    ) -> Arc<Self> {
        Arc::new(Self {
            shapes: shapes
                .into_iter()
                .map(|path| RasterShape { path, stroke: None })
                .collect(),
            width,
            height,
            matrix,
        })
    }

    fn rasterize_shape(&self, shape: &RasterShape) -> Vec<u8> {
        let mut coverage = vec![0u8; self.width as usize * self.height as usize];
        match shape.stroke {
            None => {
                let device_path = shape.path.transformed(&self.matrix);
                let edges = flatten_to_edges(&device_path);
                fill_nonzero(&mut coverage, self.width, self.height, &edges);
            }
            Some(stroke) => {
                // Stroke in local space so the width is unscaled, then map
                // the triangles into device space.
                let triangles = stroke_triangles(&shape.path, &stroke);
                for tri in triangles {
                    let mapped = [
                        self.matrix.map_point(tri[0]),
                        self.matrix.map_point(tri[1]),
                        self.matrix.map_point(tri[2]),
                    ];
                    fill_triangle(&mut coverage, self.width, self.height, &mapped);
                }
            }
        }
        coverage
    }
}

impl PixelSource for PathRasterizer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn alpha_only(&self) -> bool {
        true
    }

    fn produce(&self) -> Option<PixelBuffer> {
        if self.width == 0 || self.height == 0 || self.shapes.is_empty() {
            return None;
        }
        let mut iter = self.shapes.iter();
        let first = iter.next()?;
        let mut coverage = self.rasterize_shape(first);
        for shape in iter {
            let mask = self.rasterize_shape(shape);
            for (acc, m) in coverage.iter_mut().zip(mask.iter()) {
                *acc = (*acc).min(*m);
            }
        }
        PixelBuffer::new(self.width, self.height, PixelFormat::Alpha8, coverage)
    }
}

/// Flatten a device-space path into line segments, closing every subpath.
fn flatten_to_edges(path: &Path) -> Vec<(Point, Point)> {
    let mut edges = Vec::new();
    let events = path.to_lyon_events();
    for event in events.into_iter().flattened(FLATTEN_TOLERANCE) {
        match event {
            PathEvent::Line { from, to } => {
                edges.push((Point::new(from.x, from.y), Point::new(to.x, to.y)));
            }
            PathEvent::End { last, first, .. } => {
                // Fills implicitly close open subpaths.
                if last != first {
                    edges.push((Point::new(last.x, last.y), Point::new(first.x, first.y)));
                }
            }
            PathEvent::Begin { .. } => {}
            // Flattening leaves no curve events behind.
            _ => {}
        }
    }
    edges
}

/// Scanline fill with the nonzero winding rule, sampling pixel centers.
fn fill_nonzero(coverage: &mut [u8], width: u32, height: u32, edges: &[(Point, Point)]) {
    let mut crossings: Vec<(f32, i32)> = Vec::new();
    for yi in 0..height {
        let yc = yi as f32 + 0.5;
        crossings.clear();
        for (p0, p1) in edges {
            if p0.y == p1.y {
                continue;
            }
            let (upward, top, bottom) = if p0.y < p1.y {
                (1, p0.y, p1.y)
            } else {
                (-1, p1.y, p0.y)
            };
            if yc >= top && yc < bottom {
                let t = (yc - p0.y) / (p1.y - p0.y);
                crossings.push((p0.x + t * (p1.x - p0.x), upward));
            }
        }
        crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut winding = 0;
        let mut span_start = 0.0f32;
        for (x, dir) in &crossings {
            let was_inside = winding != 0;
            winding += dir;
            if !was_inside && winding != 0 {
                span_start = *x;
            } else if was_inside && winding == 0 {
                fill_span(coverage, width, yi, span_start, *x);
            }
        }
    }
}

fn fill_span(coverage: &mut [u8], width: u32, yi: u32, x0: f32, x1: f32) {
    let start = (x0 - 0.5).ceil().max(0.0) as u32;
    let end = ((x1 - 0.5).floor() as i64).min(width as i64 - 1);
    if end < 0 {
        return;
    }
    let row = yi as usize * width as usize;
    for xi in start..=end as u32 {
        coverage[row + xi as usize] = 255;
    }
}

fn fill_triangle(coverage: &mut [u8], width: u32, height: u32, tri: &[Point; 3]) {
    let edges = [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])];
    let top = tri.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let bottom = tri.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    let y_start = (top - 0.5).ceil().max(0.0) as u32;
    let y_end = ((bottom - 0.5).floor() as i64).min(height as i64 - 1);
    if y_end < 0 {
        return;
    }
    for yi in y_start..=y_end as u32 {
        let yc = yi as f32 + 0.5;
        let mut min_x = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        for (p0, p1) in &edges {
            if p0.y == p1.y {
                continue;
            }
            let (top, bottom) = if p0.y < p1.y { (p0.y, p1.y) } else { (p1.y, p0.y) };
            if yc >= top && yc < bottom {
                let t = (yc - p0.y) / (p1.y - p0.y);
                let x = p0.x + t * (p1.x - p0.x);
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
        }
        if min_x <= max_x {
            fill_span(coverage, width, yi, min_x, max_x);
        }
    }
}

/// Expand a stroke into triangles via lyon. Returns device-independent
/// (local space) triangles.
fn stroke_triangles(path: &Path, stroke: &Stroke) -> Vec<[Point; 3]> {
    let events = path.to_lyon_events();
    if events.is_empty() {
        return Vec::new();
    }
    let mut geometry: VertexBuffers<lyon::math::Point, u32> = VertexBuffers::new();
    let mut tessellator = StrokeTessellator::new();
    let options = StrokeOptions::default()
        .with_line_width(stroke.width)
        .with_tolerance(FLATTEN_TOLERANCE)
        .with_line_cap(match stroke.cap {
            LineCap::Butt => lyon::lyon_tessellation::LineCap::Butt,
            LineCap::Round => lyon::lyon_tessellation::LineCap::Round,
            LineCap::Square => lyon::lyon_tessellation::LineCap::Square,
        })
        .with_line_join(match stroke.join {
            LineJoin::Miter => lyon::lyon_tessellation::LineJoin::Miter,
            LineJoin::Round => lyon::lyon_tessellation::LineJoin::Round,
            LineJoin::Bevel => lyon::lyon_tessellation::LineJoin::Bevel,
        })
        .with_miter_limit(stroke.miter_limit.max(1.0));
    let result = tessellator.tessellate(
        events.iter().cloned(),
        &options,
        &mut BuffersBuilder::new(&mut geometry, |vertex: StrokeVertex| {
            point(vertex.position().x, vertex.position().y)
        }),
    );
    if let Err(err) = result {
        tracing::warn!("stroke tessellation failed: {err:?}");
        return Vec::new();
    }
    geometry
        .indices
        .chunks_exact(3)
        .map(|chunk| {
            [
                to_point(geometry.vertices[chunk[0] as usize]),
                to_point(geometry.vertices[chunk[1] as usize]),
                to_point(geometry.vertices[chunk[2] as usize]),
            ]
        })
        .collect()
}

fn to_point(p: lyon::math::Point) -> Point {
    Point::new(p.x, p.y)
}
