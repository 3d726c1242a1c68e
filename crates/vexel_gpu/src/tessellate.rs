//! Path tessellation for direct GPU rendering
//!
//! Converts vector paths into triangle meshes using lyon. This is the
//! cheap arm of the path-rendering decision: small or sparse paths become
//! vertices instead of cached mask textures.

use lyon::lyon_tessellation::{
    BuffersBuilder, FillOptions, FillTessellator, FillVertex, StrokeOptions, StrokeTessellator,
    StrokeVertex, VertexBuffers,
};

use vexel_core::{Color, LineCap, LineJoin, Path, Stroke};

use crate::ops::PathVertex;

const TOLERANCE: f32 = 0.1;

/// Tessellated geometry ready for a triangulated-path op
#[derive(Debug, Default)]
pub struct TessellatedPath {
    pub vertices: Vec<PathVertex>,
    pub indices: Vec<u32>,
}

impl TessellatedPath {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }
}

/// Tessellate a path for filling. Returns `None` when tessellation fails
/// or produces no geometry.
pub fn tessellate_fill(path: &Path, color: Color) -> Option<TessellatedPath> {
    let events = path.to_lyon_events();
    if events.is_empty() {
        return None;
    }
    let premultiplied = color.premultiply();
    let mut geometry: VertexBuffers<PathVertex, u32> = VertexBuffers::new();
    let mut tessellator = FillTessellator::new();
    let options = FillOptions::default().with_tolerance(TOLERANCE);
    let result = tessellator.tessellate(
        events.iter().cloned(),
        &options,
        &mut BuffersBuilder::new(&mut geometry, |vertex: FillVertex| PathVertex {
            position: vertex.position().to_array(),
            color: [
                premultiplied.r,
                premultiplied.g,
                premultiplied.b,
                premultiplied.a,
            ],
        }),
    );
    if let Err(err) = result {
        tracing::warn!("path fill tessellation failed: {err:?}");
        return None;
    }
    let tessellated = TessellatedPath {
        vertices: geometry.vertices,
        indices: geometry.indices,
    };
    (!tessellated.is_empty()).then_some(tessellated)
}

/// Tessellate a path for stroking.
pub fn tessellate_stroke(path: &Path, stroke: &Stroke, color: Color) -> Option<TessellatedPath> {
    let events = path.to_lyon_events();
    if events.is_empty() {
        return None;
    }
    let premultiplied = color.premultiply();
    let mut geometry: VertexBuffers<PathVertex, u32> = VertexBuffers::new();
    let mut tessellator = StrokeTessellator::new();
    let options = StrokeOptions::default()
        .with_line_width(stroke.width)
        .with_tolerance(TOLERANCE)
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
        &mut BuffersBuilder::new(&mut geometry, |vertex: StrokeVertex| PathVertex {
            position: vertex.position().to_array(),
            color: [
                premultiplied.r,
                premultiplied.g,
                premultiplied.b,
                premultiplied.a,
            ],
        }),
    );
    if let Err(err) = result {
        tracing::warn!("path stroke tessellation failed: {err:?}");
        return None;
    }
    let tessellated = TessellatedPath {
        vertices: geometry.vertices,
        indices: geometry.indices,
    };
    (!tessellated.is_empty()).then_some(tessellated)
}
