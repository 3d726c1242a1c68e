//! Integration tests for the deferred task graph: proxy deduplication,
//! flush ordering, failure isolation, and resource lifecycle across the
//! public context API.

use std::sync::Arc;
use std::thread;

use vexel_core::{Color, Rect, Transform2D, UniqueKey};
use vexel_gpu::{
    BufferSource, Caps, Context, DrawOp, ImageOrigin, MockBackend, OpState, PixelBuffer,
    PixelFormat, RenderFlags, TextureDesc, TextureHandle,
};

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn solid_source(width: u32, height: u32) -> Arc<BufferSource> {
    let buffer = PixelBuffer::new_zeroed(width, height, PixelFormat::Alpha8)
        .expect("non-zero dimensions");
    BufferSource::new(buffer)
}

fn fill_op(x: f32, y: f32) -> DrawOp {
    DrawOp::fill_rect(
        Rect::new(x, y, 8.0, 8.0),
        Transform2D::identity(),
        Color::RED,
        OpState::default(),
    )
}

#[test]
fn test_flush_executes_tasks_in_creation_order_exactly_once() {
    init_logs();
    let context = Context::new();
    let target = context
        .create_render_target_proxy(16, 16, PixelFormat::Rgba8, 1, ImageOrigin::TopLeft)
        .unwrap();
    let key_a = UniqueKey::make();
    let key_b = UniqueKey::make();
    let _proxy_a = context
        .create_texture_proxy(key_a, solid_source(4, 4), false, RenderFlags::empty())
        .unwrap();
    context.with_drawing_manager(|manager| manager.add_op(&target, fill_op(0.0, 0.0)));
    let _proxy_b = context
        .create_texture_proxy(key_b, solid_source(4, 4), false, RenderFlags::empty())
        .unwrap();

    // Target storage + two texture creates + one ops task.
    assert_eq!(context.with_drawing_manager(|m| m.task_count()), 4);

    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert_eq!(backend.allocations.len(), 3);
    assert_eq!(backend.submissions.len(), 1);
    assert_eq!(context.with_drawing_manager(|m| m.task_count()), 0);

    // Nothing left to execute.
    context.flush(&mut backend);
    assert_eq!(backend.allocations.len(), 3);
    assert_eq!(backend.submissions.len(), 1);
}

#[test]
fn test_failed_task_does_not_abort_flush() {
    let context = Context::new();
    let target = context
        .create_render_target_proxy(16, 16, PixelFormat::Rgba8, 1, ImageOrigin::TopLeft)
        .unwrap();
    context.with_drawing_manager(|manager| manager.add_op(&target, fill_op(0.0, 0.0)));
    let key = UniqueKey::make();
    let _proxy = context
        .create_texture_proxy(key, solid_source(4, 4), false, RenderFlags::empty())
        .unwrap();

    let mut backend = MockBackend::new();
    backend.fail_submits = true;
    context.flush(&mut backend);
    // The ops submission failed, but the later texture create still ran.
    assert_eq!(backend.allocations.len(), 2);
    assert_eq!(context.with_drawing_manager(|m| m.task_count()), 0);
}

#[test]
fn test_concurrent_proxy_requests_dedupe() {
    let context = Context::new();
    let key = UniqueKey::make();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let context = context.clone();
        let key = key.clone();
        handles.push(thread::spawn(move || {
            context
                .create_texture_proxy(key, solid_source(8, 8), false, RenderFlags::empty())
                .unwrap()
        }));
    }
    let proxies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for proxy in &proxies[1..] {
        assert!(proxies[0].ptr_eq(proxy));
    }
    // One pending creation, not four.
    let create_count = context.with_drawing_manager(|manager| {
        manager
            .tasks()
            .iter()
            .filter(|task| task.kind_name() == "texture-create")
            .count()
    });
    assert_eq!(create_count, 1);

    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert_eq!(backend.allocations.len(), 1);
    assert!(proxies[0].is_instantiated());
}

#[test]
fn test_proxy_request_after_flush_hits_cache() {
    let context = Context::new();
    let key = UniqueKey::make();
    let proxy = context
        .create_texture_proxy(key.clone(), solid_source(8, 8), false, RenderFlags::empty())
        .unwrap();
    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    drop(proxy);

    // Same key again: the cached resource is reused, no new create task.
    let proxy = context
        .create_texture_proxy(key, solid_source(8, 8), false, RenderFlags::empty())
        .unwrap();
    assert!(proxy.is_instantiated());
    assert_eq!(context.with_drawing_manager(|m| m.task_count()), 0);
    context.flush(&mut backend);
    assert_eq!(backend.allocations.len(), 1);
}

#[test]
fn test_disable_cache_skips_dedup() {
    let context = Context::new();
    let key = UniqueKey::make();
    let first = context
        .create_texture_proxy(
            key.clone(),
            solid_source(8, 8),
            false,
            RenderFlags::DISABLE_CACHE,
        )
        .unwrap();
    let second = context
        .create_texture_proxy(
            key,
            solid_source(8, 8),
            false,
            RenderFlags::DISABLE_CACHE,
        )
        .unwrap();
    assert!(!first.ptr_eq(&second));
}

#[test]
fn test_resolve_task_appended_for_msaa_target() {
    let context = Context::new();
    let target = context
        .create_render_target_proxy(32, 32, PixelFormat::Rgba8, 4, ImageOrigin::TopLeft)
        .unwrap();
    context.with_drawing_manager(|manager| manager.add_op(&target, fill_op(0.0, 0.0)));
    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert_eq!(backend.resolves.len(), 1);
}

#[test]
fn test_copy_task_runs_after_producing_ops() {
    let context = Context::new();
    let target = context
        .create_render_target_proxy(16, 16, PixelFormat::Rgba8, 1, ImageOrigin::TopLeft)
        .unwrap();
    context.with_drawing_manager(|manager| manager.add_op(&target, fill_op(0.0, 0.0)));
    let dest = context
        .create_empty_texture_proxy(16, 16, PixelFormat::Rgba8, false)
        .unwrap();
    context.with_drawing_manager(|manager| {
        manager.record_copy(
            target.clone(),
            dest.clone(),
            Rect::from_wh(16.0, 16.0),
            vexel_core::Point::ZERO,
        );
    });
    // Drawing after the copy opens a fresh ops task.
    context.with_drawing_manager(|manager| manager.add_op(&target, fill_op(8.0, 8.0)));
    let ops_tasks = context.with_drawing_manager(|manager| {
        manager
            .tasks()
            .iter()
            .filter(|task| task.kind_name() == "ops")
            .count()
    });
    assert_eq!(ops_tasks, 2);

    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert_eq!(backend.copies.len(), 1);
    assert_eq!(backend.submissions.len(), 2);
}

#[test]
fn test_full_target_clear_discards_prior_ops() {
    let context = Context::new();
    let target = context
        .create_render_target_proxy(16, 16, PixelFormat::Rgba8, 1, ImageOrigin::TopLeft)
        .unwrap();
    context.with_drawing_manager(|manager| {
        manager.add_op(&target, fill_op(0.0, 0.0));
        manager.add_op(&target, fill_op(8.0, 0.0));
        manager.add_op(
            &target,
            DrawOp::Clear {
                color: Color::WHITE,
                rect: None,
            },
        );
    });
    let op_count = context.with_drawing_manager(|manager| {
        manager
            .tasks()
            .iter()
            .find_map(|task| task.as_ops())
            .map(|task| task.ops().len())
    });
    assert_eq!(op_count, Some(1));
}

#[test]
fn test_wrapped_texture_adoption() {
    let context = Context::new();
    let desc = TextureDesc::texture(8, 8, PixelFormat::Rgba8, false);

    let adopted = context.wrap_backend_texture(TextureHandle(100), desc, ImageOrigin::TopLeft, true);
    let borrowed =
        context.wrap_backend_texture(TextureHandle(200), desc, ImageOrigin::TopLeft, false);
    drop(adopted);
    drop(borrowed);
    context.purge_until_memory_to(0);

    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    // Only the adopted handle is released; the borrowed one is never
    // destroyed by the cache.
    assert_eq!(backend.deletions, vec![TextureHandle(100)]);
}

#[test]
fn test_worker_thread_decode_feeds_texture_create() {
    let context = Context::new();
    // Decoding happens off-thread and is pure; only the finished buffer
    // reaches the task graph.
    let decoded = thread::spawn(|| {
        let mut buffer = PixelBuffer::new_zeroed(4, 4, PixelFormat::Rgba8).unwrap();
        buffer.data_mut().fill(0xff);
        buffer
    })
    .join()
    .unwrap();
    let key = UniqueKey::make();
    let proxy = context
        .create_texture_proxy(
            key,
            BufferSource::new(decoded),
            false,
            RenderFlags::empty(),
        )
        .unwrap();
    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert!(proxy.is_instantiated());
    assert_eq!(backend.allocations.len(), 1);
    assert_eq!(backend.allocations[0].format, PixelFormat::Rgba8);
}

#[test]
fn test_alpha8_fallback_uses_rgba() {
    let caps = Caps {
        supports_alpha8: false,
        ..Caps::default()
    };
    let context = Context::with_caps(caps);
    let key = UniqueKey::make();
    let proxy = context
        .create_texture_proxy(key, solid_source(8, 8), false, RenderFlags::empty())
        .unwrap();
    assert_eq!(proxy.format(), PixelFormat::Rgba8);
    assert!(!proxy.alpha_only());

    let mut backend = MockBackend::new();
    context.flush(&mut backend);
    assert_eq!(backend.allocations[0].format, PixelFormat::Rgba8);
}
