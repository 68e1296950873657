//! End-to-end tests of the render context over the software device
//!
//! Covers teardown ordering, target invalidation and the one-shot
//! submission guarantee through the public API only.

use std::sync::Arc;

use render_core::device::{BufferCopy, DeviceEvent, RawHandle};
use render_core::prelude::*;

fn setup(width: u32, height: u32) -> (Arc<SoftwareDevice>, HeadlessSurface, RenderContext) {
    let device = Arc::new(SoftwareDevice::new());
    let surface = HeadlessSurface::new(width, height);
    let ctx = RenderContext::new(device.clone(), Box::new(surface.clone()), RenderConfig::default())
        .expect("render context");
    (device, surface, ctx)
}

fn draw(ctx: &mut RenderContext) -> SubmitOutcome {
    match ctx.prepare_frame().expect("prepare") {
        PrepareOutcome::Ready(_) => {}
        PrepareOutcome::OutOfDate => panic!("unexpected out-of-date target"),
    }
    let image = ctx.frame_image();
    ctx.commands()
        .cmd_clear_color_image(image, [0.2, 0.3, 0.8, 1.0]);
    ctx.submit_frame().expect("submit")
}

#[test]
fn test_resources_are_destroyed_in_reverse_creation_order() {
    let (device, _surface, mut ctx) = setup(64, 64);

    let a = ctx.create_buffer(BufferDesc::uniform(16), "A").unwrap();
    let b = ctx.create_buffer(BufferDesc::uniform(16), "B").unwrap();
    let c = ctx.create_buffer(BufferDesc::uniform(16), "C").unwrap();
    let created = [a.handle(), b.handle(), c.handle()];
    drop((a, b, c));
    assert_eq!(device.live_count(ResourceKind::Buffer), 3);

    ctx.shutdown().unwrap();

    let order = device.destruction_order(ResourceKind::Buffer);
    assert_eq!(
        order,
        vec![created[2].as_raw(), created[1].as_raw(), created[0].as_raw()]
    );
}

#[test]
fn test_target_resources_follow_the_target() {
    let (device, surface, mut ctx) = setup(64, 64);
    let depth = ctx
        .create_target_image(ImageDesc::depth(ctx.extent()), "depth")
        .unwrap();
    let depth_view = depth.create_view().unwrap();
    assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);

    surface.resize(96, 64);
    assert_eq!(ctx.prepare_frame().unwrap(), PrepareOutcome::OutOfDate);
    ctx.recreate_target().unwrap();

    // The old depth image went with the old target
    assert!(!depth.is_live());
    assert!(!depth_view.is_live());
    assert_eq!(device.live_count(ResourceKind::Image), 0);

    let depth = ctx
        .create_target_image(ImageDesc::depth(ctx.extent()), "depth")
        .unwrap();
    assert_eq!(depth.extent(), Extent2D::new(96, 64));
    assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);
}

#[test]
fn test_prepare_after_resize_is_out_of_date_then_succeeds() {
    let (device, surface, mut ctx) = setup(800, 600);
    for _ in 0..3 {
        assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);
    }

    surface.resize(1024, 768);
    let outcome = ctx.prepare_frame().unwrap();
    assert_eq!(outcome, PrepareOutcome::OutOfDate);
    assert_eq!(ctx.state(), FrameState::Idle);

    ctx.recreate_target().unwrap();
    match ctx.prepare_frame().unwrap() {
        PrepareOutcome::Ready(info) => assert_eq!(info.extent, Extent2D::new(1024, 768)),
        PrepareOutcome::OutOfDate => panic!("still out of date after recreation"),
    }
    assert_eq!(ctx.submit_frame().unwrap(), SubmitOutcome::Presented);

    // Old swapchain and its views are gone, exactly one target remains
    assert_eq!(device.live_count(ResourceKind::Swapchain), 1);
    assert_eq!(device.destroyed_count(ResourceKind::Swapchain), 1);
    assert_eq!(device.live_count(ResourceKind::ImageView), 3);
}

#[test]
fn test_one_shot_copy_is_complete_on_return() {
    let (device, _surface, ctx) = setup(32, 32);
    let payload: Vec<u8> = (0..=255).collect();

    let mut src = ctx.create_buffer(BufferDesc::staging(256), "src").unwrap();
    src.write(0, &payload).unwrap();
    let dst = ctx
        .create_buffer(
            BufferDesc::device_local(256, BufferUsage::STORAGE),
            "dst",
        )
        .unwrap();

    let (from, to) = (src.handle(), dst.handle());
    ctx.immediate_submit(|cmd| {
        cmd.cmd_copy_buffer(from, to, &[BufferCopy::whole(256)]);
        Ok(())
    })
    .unwrap();

    assert_eq!(device.pending_submissions(), 0);
    assert_eq!(device.read_buffer(dst.handle()), payload);
}

#[test]
fn test_uploaded_buffer_holds_its_data() {
    let (device, _surface, ctx) = setup(32, 32);
    let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
    let buffer = ctx
        .upload_buffer(BufferUsage::VERTEX, bytemuck::cast_slice(&vertices), "triangle")
        .unwrap();

    assert_eq!(
        device.read_buffer(buffer.handle()),
        bytemuck::cast_slice::<f32, u8>(&vertices)
    );
    // Staging memory is gone, only the vertex buffer remains
    assert_eq!(device.live_count(ResourceKind::Buffer), 1);
}

#[test]
fn test_mapped_buffer_is_unmapped_before_free() {
    let (device, _surface, mut ctx) = setup(32, 32);
    let buffer = ctx.create_buffer(BufferDesc::uniform(64), "camera").unwrap();
    assert!(buffer.mapped_ptr().is_some());
    let allocation = buffer.allocation().handle.as_raw();
    let raw = buffer.handle().as_raw();
    drop(buffer);

    device.clear_events();
    ctx.shutdown().unwrap();

    let events = device.events();
    let unmapped = events
        .iter()
        .position(|e| *e == DeviceEvent::Unmapped { allocation })
        .expect("buffer was never unmapped");
    let destroyed = events
        .iter()
        .position(|e| {
            *e == DeviceEvent::Destroyed {
                kind: ResourceKind::Buffer,
                raw,
            }
        })
        .expect("buffer was never destroyed");
    assert!(unmapped < destroyed);
}

#[test]
fn test_frame_descriptors_grow_and_reset() {
    let device = Arc::new(SoftwareDevice::new());
    let surface = HeadlessSurface::new(32, 32);
    let mut config = RenderConfig::default();
    config.descriptor_pool = DescriptorPoolConfig {
        sets_per_pool: 2,
        ..DescriptorPoolConfig::default()
    };
    let mut ctx = RenderContext::new(device.clone(), Box::new(surface), config).unwrap();
    let ubo = ctx.create_buffer(BufferDesc::uniform(64), "ubo").unwrap();

    for _ in 0..4 {
        let _ = ctx.prepare_frame().unwrap();
        for _ in 0..3 {
            let (set, layout) = ctx
                .descriptor_builder()
                .bind_whole_buffer(
                    0,
                    &ubo,
                    DescriptorType::UniformBuffer,
                    ShaderStages::VERTEX,
                )
                .build()
                .unwrap();
            assert_eq!(layout.bindings().len(), 1);
            assert!(!set.handle().is_null());
        }
        assert_eq!(ctx.frame_descriptors().pool_count(), 2);
        let _ = ctx.submit_frame().unwrap();
    }

    // Each of the two slots grew to two pools once, then reused them
    assert_eq!(device.created_count(ResourceKind::DescriptorPool), 4);
    assert_eq!(ctx.layout_cache().len(), 1);
}

#[test]
fn test_retired_buffers_are_freed_while_frames_run() {
    let device = Arc::new(SoftwareDevice::with_config(SoftwareDeviceConfig {
        memory_budget: 1024 * 1024,
        ..SoftwareDeviceConfig::default()
    }));
    let surface = HeadlessSurface::new(32, 32);
    let mut ctx = RenderContext::new(device.clone(), Box::new(surface), RenderConfig::default())
        .expect("render context");

    // 64 KiB per iteration, far more than the budget over the whole loop
    for i in 0..64_u32 {
        let mut buffer = ctx
            .create_buffer(BufferDesc::uniform(64 * 1024), "per_frame")
            .unwrap();
        buffer.write(0, &i.to_le_bytes()).unwrap();
        assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);
        ctx.retire_buffer(buffer);

        assert!(device.live_count(ResourceKind::Buffer) <= 3);
        assert!(ctx.deletion_queue().len() <= 3);
    }

    ctx.shutdown().unwrap();
    assert_eq!(device.live_count(ResourceKind::Buffer), 0);
    assert_eq!(device.memory_in_use(), 0);
}

#[test]
fn test_retired_image_goes_after_its_views() {
    let (device, _surface, mut ctx) = setup(32, 32);
    let image = ctx
        .create_image(
            ImageDesc::texture(Extent2D::new(8, 8), ImageFormat::Rgba8Unorm),
            "albedo",
        )
        .unwrap();
    let view = image.create_view().unwrap();
    assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);

    ctx.retire_image(image, [view]);
    // The frame slot that used the image comes around after one more frame
    assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);
    assert_eq!(device.live_count(ResourceKind::Image), 1);
    device.clear_events();
    assert_eq!(draw(&mut ctx), SubmitOutcome::Presented);

    assert_eq!(device.live_count(ResourceKind::Image), 0);
    let kinds: Vec<_> = device
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::Destroyed { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![ResourceKind::ImageView, ResourceKind::Image]);
}
