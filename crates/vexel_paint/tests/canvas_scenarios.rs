//! End-to-end canvas compilation scenarios: batching, clear rewrites,
//! path mask caching, clip folding, and AA selection, inspected through
//! the recorded task graph and a recording backend.

use vexel_core::{BlendMode, Color, Path, Point, Rect, Transform2D};
use vexel_gpu::{
    AaMode, Caps, Context, DrawOp, FragmentStage, MockBackend, RenderTargetProxy,
};
use vexel_paint::{Paint, Surface, SurfaceOptions};

fn new_surface(width: u32, height: u32) -> (Context, Surface) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let context = Context::new();
    let surface = Surface::new(&context, width, height).expect("valid surface dimensions");
    (context, surface)
}

/// Ops recorded against `target`, cloned out of the task list.
fn ops_for_target(context: &Context, target: &RenderTargetProxy) -> Vec<DrawOp> {
    context.with_drawing_manager(|manager| {
        manager
            .tasks()
            .iter()
            .filter_map(|task| task.as_ops())
            .filter(|task| task.target().ptr_eq(target))
            .flat_map(|task| task.ops().iter().cloned())
            .collect()
    })
}

fn ops_task_count(context: &Context) -> usize {
    context.with_drawing_manager(|manager| {
        manager
            .tasks()
            .iter()
            .filter(|task| task.as_ops().is_some())
            .count()
    })
}

/// A path dense enough that the compiler rasterizes it to a mask texture
/// instead of tessellating: many verbs, tiny bounding box.
fn dense_path() -> Path {
    let mut path = Path::new();
    path.move_to(Point::new(0.0, 0.0));
    for i in 0..150 {
        let t = i as f32 / 150.0;
        path.line_to(Point::new(t * 20.0, ((i % 2) as f32) * 20.0));
    }
    path.close();
    path
}

#[test]
fn test_checkerboard_batches_into_clear_plus_one_fill() {
    let (context, mut surface) = new_surface(72, 72);
    let canvas = surface.canvas();
    canvas.clear(Color::WHITE);
    let paint = Paint::fill(Color::new(0.8, 0.8, 0.8, 1.0));
    let tile = 8.0;
    let mut draw_call_count = 0usize;
    for row in 0..9 {
        let mut draw = row % 2 == 1;
        for col in 0..9 {
            if draw {
                canvas.draw_rect(
                    Rect::new(col as f32 * tile, row as f32 * tile, tile, tile),
                    &paint,
                );
                draw_call_count += 1;
            }
            draw = !draw;
        }
    }
    assert_eq!(draw_call_count, 36);
    assert_eq!(ops_task_count(&context), 1);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], DrawOp::Clear { rect: None, .. }));
    assert!(matches!(&ops[1], DrawOp::FillRect { .. }));
    assert_eq!(ops[1].sub_draw_count(), draw_call_count);

    let mut backend = MockBackend::new();
    surface.flush(&mut backend);
    // One target allocation, one submission for the whole frame.
    assert_eq!(backend.submissions.len(), 1);
    assert_eq!(backend.submissions[0].1, 2);
}

#[test]
fn test_full_target_src_rect_rewrites_to_clear() {
    let (context, mut surface) = new_surface(64, 64);
    let paint = Paint::fill(Color::new(0.2, 0.4, 0.6, 0.5)).with_blend_mode(BlendMode::Src);
    surface
        .canvas()
        .draw_rect(Rect::from_wh(64.0, 64.0), &paint);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], DrawOp::Clear { rect: None, .. }));
}

#[test]
fn test_partial_opaque_rect_stays_a_fill() {
    let (context, mut surface) = new_surface(64, 64);
    let paint = Paint::fill(Color::BLACK);
    surface
        .canvas()
        .draw_rect(Rect::new(8.0, 8.0, 16.0, 16.0), &paint);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], DrawOp::FillRect { .. }));
}

#[test]
fn test_translucent_non_src_rect_is_never_a_clear() {
    let (context, mut surface) = new_surface(64, 64);
    let paint = Paint::fill(Color::BLACK.with_alpha(0.5));
    surface.canvas().draw_rect(Rect::from_wh(64.0, 64.0), &paint);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert!(matches!(&ops[0], DrawOp::FillRect { .. }));
}

#[test]
fn test_clear_under_clip_becomes_scissored_clear() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.clear(Color::WHITE);
    canvas.save();
    canvas.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
    canvas.clear(Color::WHITE);
    canvas.restore();
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 2);
    assert!(matches!(ops[0], DrawOp::Clear { rect: None, .. }));
    assert!(
        matches!(ops[1], DrawOp::Clear { rect: Some(rect), .. } if rect == Rect::from_wh(10.0, 10.0))
    );
}

#[test]
fn test_full_target_clear_discards_covered_draws() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.draw_rect(Rect::new(0.0, 0.0, 16.0, 16.0), &Paint::fill(Color::RED));
    canvas.clear(Color::WHITE);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], DrawOp::Clear { rect: None, .. }));
}

#[test]
fn test_same_path_twice_shares_one_mask_texture() {
    let (context, mut surface) = new_surface(128, 128);
    let path = dense_path();
    let paint = Paint::fill(Color::GREEN);
    let canvas = surface.canvas();
    canvas.draw_path(&path, &paint);
    canvas.draw_path(&path, &paint);

    // Identical key, identical mask: the draws batch into one op.
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].sub_draw_count(), 2);
    let mask_stages = ops[0]
        .state()
        .map(|state| state.color_stages.len())
        .unwrap_or(0);
    assert_eq!(mask_stages, 1);

    let mut backend = MockBackend::new();
    surface.flush(&mut backend);
    // Target storage plus exactly one rasterized mask.
    assert_eq!(backend.allocations.len(), 2);
}

#[test]
fn test_rescaled_path_rasterizes_a_new_mask() {
    let (_context, mut surface) = new_surface(256, 256);
    let path = dense_path();
    let paint = Paint::fill(Color::GREEN);
    let canvas = surface.canvas();
    canvas.draw_path(&path, &paint);
    canvas.save();
    canvas.scale(3.0, 3.0);
    canvas.draw_path(&path, &paint);
    canvas.restore();

    let mut backend = MockBackend::new();
    surface.flush(&mut backend);
    // Different effective scale, different key: two masks.
    assert_eq!(backend.allocations.len(), 3);
}

#[test]
fn test_small_path_tessellates_instead_of_masking() {
    let (context, mut surface) = new_surface(64, 64);
    let mut path = Path::new();
    path.move_to(Point::new(10.0, 10.0));
    path.line_to(Point::new(50.0, 20.0));
    path.line_to(Point::new(30.0, 50.0));
    path.close();
    surface.canvas().draw_path(&path, &Paint::fill(Color::BLUE));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], DrawOp::TriangulatedPath { .. }));
}

#[test]
fn test_stroked_line_tessellates() {
    let (context, mut surface) = new_surface(64, 64);
    surface.canvas().draw_line(
        Point::new(4.0, 4.0),
        Point::new(60.0, 40.0),
        &Paint::stroke(Color::BLACK, 2.0),
    );
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], DrawOp::TriangulatedPath { .. }));
}

#[test]
fn test_aa_selection() {
    // Pixel-aligned axis-aligned fill: no AA.
    let (context, mut surface) = new_surface(64, 64);
    surface
        .canvas()
        .draw_rect(Rect::new(8.0, 8.0, 16.0, 16.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops[0].state().unwrap().aa, AaMode::None);

    // Fractional bounds: coverage AA.
    let (context, mut surface) = new_surface(64, 64);
    surface
        .canvas()
        .draw_rect(Rect::new(8.5, 8.0, 16.0, 16.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops[0].state().unwrap().aa, AaMode::Coverage);

    // Rotated transform: coverage AA.
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.rotate(0.3);
    canvas.draw_rect(Rect::new(8.0, 8.0, 16.0, 16.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops[0].state().unwrap().aa, AaMode::Coverage);

    // AA disabled on the paint: none, even for rotated draws.
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.rotate(0.3);
    let paint = Paint {
        anti_alias: false,
        ..Paint::fill(Color::RED)
    };
    canvas.draw_rect(Rect::new(8.0, 8.0, 16.0, 16.0), &paint);
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops[0].state().unwrap().aa, AaMode::None);
}

#[test]
fn test_msaa_surface_uses_hardware_aa_and_resolves() {
    let context = Context::new();
    let options = SurfaceOptions {
        sample_count: 4,
        ..SurfaceOptions::default()
    };
    let mut surface = Surface::with_options(&context, 64, 64, options).unwrap();
    let canvas = surface.canvas();
    canvas.rotate(0.3);
    canvas.draw_rect(Rect::new(8.0, 8.0, 16.0, 16.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops[0].state().unwrap().aa, AaMode::Msaa);

    let mut backend = MockBackend::new();
    surface.flush(&mut backend);
    assert_eq!(backend.resolves.len(), 1);
}

#[test]
fn test_aligned_rect_clip_folds_into_scissor() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    // Clip in device space, then rotate so the draw's device bounds
    // spill past the clip and the scissor has to do the cutting.
    canvas.clip_rect(Rect::new(2.0, 2.0, 8.0, 8.0));
    canvas.rotate(0.5);
    canvas.draw_rect(Rect::new(-20.0, -20.0, 60.0, 60.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(ops.len(), 1);
    let state = ops[0].state().unwrap();
    assert_eq!(state.scissor, Some(Rect::new(2.0, 2.0, 8.0, 8.0)));
    assert!(state.coverage_stages.is_empty());
}

#[test]
fn test_fractional_rect_clip_uses_analytic_coverage() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.clip_rect(Rect::new(2.25, 2.25, 8.5, 8.5));
    canvas.rotate(0.5);
    canvas.draw_rect(Rect::new(-20.0, -20.0, 60.0, 60.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    let state = ops[0].state().unwrap();
    assert!(matches!(
        state.coverage_stages.as_slice(),
        [FragmentStage::AaRect { .. }]
    ));
    assert!(state.scissor.is_some());
}

#[test]
fn test_path_clip_rasterizes_one_shared_mask() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.clip_path(&Path::oval(Rect::new(4.0, 4.0, 40.0, 40.0)));
    canvas.draw_rect(Rect::new(0.0, 0.0, 60.0, 60.0), &Paint::fill(Color::RED));
    canvas.draw_rect(Rect::new(0.0, 30.0, 60.0, 30.0), &Paint::fill(Color::RED));

    // Both draws share the clip state, so they share the mask stage and
    // batch into one op.
    let main_ops = ops_for_target(&context, surface.render_target_proxy());
    assert_eq!(main_ops.len(), 1);
    assert_eq!(main_ops[0].sub_draw_count(), 2);
    let state = main_ops[0].state().unwrap();
    assert!(matches!(
        state.coverage_stages.as_slice(),
        [FragmentStage::TextureMask { .. }]
    ));
    // The oval is cheap, so the mask renders as a triangulated draw into
    // its own offscreen ops task, scheduled before the main one.
    assert_eq!(ops_task_count(&context), 2);
}

#[test]
fn test_dense_path_clip_mask_falls_back_to_rgba_without_alpha8() {
    let caps = Caps {
        supports_alpha8: false,
        ..Caps::default()
    };
    let context = Context::with_caps(caps);
    let mut surface = Surface::new(&context, 128, 128).unwrap();
    let canvas = surface.canvas();
    canvas.clip_path(&dense_path());
    canvas.draw_rect(Rect::new(0.0, 0.0, 60.0, 60.0), &Paint::fill(Color::RED));
    let ops = ops_for_target(&context, surface.render_target_proxy());
    let state = ops[0].state().unwrap();
    match state.coverage_stages.as_slice() {
        [FragmentStage::TextureMask {
            proxy,
            multiply_by_alpha,
            ..
        }] => {
            assert!(!proxy.alpha_only());
            assert!(multiply_by_alpha);
        }
        other => panic!("expected a texture mask stage, got {other:?}"),
    }
}

#[test]
fn test_draw_outside_clip_is_culled() {
    let (context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0));
    canvas.translate(50.0, 50.0);
    canvas.draw_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &Paint::fill(Color::RED));
    assert_eq!(ops_task_count(&context), 0);
}

#[test]
fn test_transparent_paint_draws_nothing() {
    let (context, mut surface) = new_surface(64, 64);
    surface
        .canvas()
        .draw_rect(Rect::from_wh(64.0, 64.0), &Paint::fill(Color::TRANSPARENT));
    assert_eq!(ops_task_count(&context), 0);
}

#[test]
fn test_snapshot_observes_prior_draws() {
    let (context, mut surface) = new_surface(64, 64);
    surface.canvas().clear(Color::WHITE);
    let snapshot = surface.make_snapshot().unwrap();
    // Drawing after the snapshot lands in a new ops task.
    surface
        .canvas()
        .draw_rect(Rect::new(0.0, 0.0, 8.0, 8.0), &Paint::fill(Color::RED));
    assert_eq!(ops_task_count(&context), 2);

    let mut backend = MockBackend::new();
    surface.flush(&mut backend);
    assert_eq!(backend.copies.len(), 1);
    assert_eq!(backend.submissions.len(), 2);
    assert!(snapshot.is_instantiated());
}

#[test]
fn test_transform_state_roundtrip() {
    let (_context, mut surface) = new_surface(64, 64);
    let canvas = surface.canvas();
    canvas.translate(10.0, 0.0);
    canvas.save();
    canvas.scale(2.0, 2.0);
    canvas.restore();
    assert_eq!(canvas.matrix(), Transform2D::translate(10.0, 0.0));
    // Scale composed in local space: the point at local (5, 5) lands at
    // device (20, 10) after translate-then-scale.
    canvas.scale(2.0, 2.0);
    assert_eq!(
        canvas.matrix().map_point(Point::new(5.0, 5.0)),
        Point::new(20.0, 10.0)
    );
}
