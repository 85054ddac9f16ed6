use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use api::{
    barrier::SampleLocations,
    buffer::BufferCreateInfo,
    framebuffer::ViewId,
    image::{ImageCreateInfo, ImageViewCreateInfo},
    types::{
        AccessFlags, BufferUsage, Domain, Format, ImageLayout, ImageUsage, MemoryUsage,
        PipelineStageFlags, ShaderStage,
    },
    BackendError, Capabilities,
};
use empty::{Command, EmptyBackend, EmptyBackendCreateInfo, RecordedBarrier};

use crate::{
    batch::WaitError,
    bindings::ShaderImage,
    config::{ContextCreateInfo, FramebufferStrategy},
    context::{Context, FlushError, ResetStatus},
    render_target::{ClearFlags, FramebufferTarget},
    resource::ResourceId,
};

fn context() -> (Arc<EmptyBackend>, Context<EmptyBackend>) {
    context_with(EmptyBackendCreateInfo::default(), ContextCreateInfo::default())
}

fn context_with(
    backend: EmptyBackendCreateInfo,
    create_info: ContextCreateInfo,
) -> (Arc<EmptyBackend>, Context<EmptyBackend>) {
    let backend = Arc::new(EmptyBackend::new(backend));
    let ctx = Context::new(backend.clone(), create_info).unwrap();
    (backend, ctx)
}

fn manual() -> EmptyBackendCreateInfo {
    EmptyBackendCreateInfo {
        capabilities: Capabilities {
            imageless_framebuffer: true,
            timeline_semaphore: false,
        },
        auto_complete: false,
    }
}

fn buffer(ctx: &mut Context<EmptyBackend>) -> ResourceId {
    ctx.create_buffer(BufferCreateInfo {
        size: 256,
        buffer_usage: BufferUsage::UNIFORM_BUFFER
            | BufferUsage::STORAGE_BUFFER
            | BufferUsage::VERTEX_BUFFER,
        memory_usage: MemoryUsage::GpuOnly,
        debug_name: None,
    })
    .unwrap()
}

fn image(ctx: &mut Context<EmptyBackend>, format: Format) -> ResourceId {
    let image_usage = if format.is_depth_stencil() {
        ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED
    } else {
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED | ImageUsage::STORAGE
    };

    ctx.create_image(ImageCreateInfo {
        format,
        width: 64,
        height: 64,
        array_layers: 1,
        mip_levels: 1,
        samples: 1,
        image_usage,
        memory_usage: MemoryUsage::GpuOnly,
        presentable: false,
        debug_name: None,
    })
    .unwrap()
}

fn surface(ctx: &mut Context<EmptyBackend>, format: Format) -> ViewId {
    let image = image(ctx, format);
    ctx.create_surface(image, ImageViewCreateInfo::default())
        .unwrap()
}

fn color_target(views: &[ViewId]) -> FramebufferTarget {
    FramebufferTarget {
        width: 64,
        height: 64,
        layers: 1,
        samples: 1,
        color: views.iter().copied().collect(),
        depth_stencil: None,
    }
}

fn primary_barriers(ctx: &Context<EmptyBackend>) -> Vec<Command> {
    ctx.current_batch()
        .command_buffer()
        .barriers()
        .cloned()
        .collect()
}

fn image_barriers(ctx: &Context<EmptyBackend>) -> Vec<RecordedBarrier> {
    primary_barriers(ctx)
        .into_iter()
        .filter_map(|command| match command {
            Command::Barrier {
                barrier: barrier @ RecordedBarrier::Image { .. },
                ..
            } => Some(barrier),
            _ => None,
        })
        .collect()
}

#[test]
fn uniform_and_storage_binds_share_one_barrier() {
    let (_, mut ctx) = context();
    let buf = buffer(&mut ctx);

    ctx.set_constant_buffer(ShaderStage::Compute, 0, Some(buf));
    ctx.set_shader_buffers(ShaderStage::Compute, 0, &[Some(buf)], 0b1);
    ctx.dispatch(|_, _| {}).unwrap();

    let barriers = primary_barriers(&ctx);
    assert_eq!(barriers.len(), 1);
    match &barriers[0] {
        Command::Barrier {
            dst_stage,
            barrier: RecordedBarrier::Buffer { dst_access, .. },
            ..
        } => {
            assert_eq!(*dst_stage, PipelineStageFlags::COMPUTE_SHADER);
            assert_eq!(
                *dst_access,
                AccessFlags::UNIFORM_READ | AccessFlags::SHADER_WRITE
            );
        }
        other => panic!("unexpected command {other:?}"),
    }

    // The write aliases another bind, so the next dispatch needs a barrier again.
    assert!(ctx.is_pending(buf, Domain::Compute));
}

#[test]
fn repeated_reads_record_one_barrier() {
    let (_, mut ctx) = context();
    let buf = buffer(&mut ctx);

    ctx.set_sampler_views(ShaderStage::Fragment, 0, &[Some(buf)]);
    ctx.draw(|_, _| {}).unwrap();
    ctx.draw(|_, _| {}).unwrap();
    ctx.draw(|_, _| {}).unwrap();

    assert_eq!(primary_barriers(&ctx).len(), 1);
    assert!(!ctx.is_pending(buf, Domain::Graphics));
}

#[test]
fn first_access_inside_render_pass_is_hoisted() {
    let (backend, mut ctx) = context();
    let sampled = buffer(&mut ctx);
    let uniform = buffer(&mut ctx);

    ctx.set_sampler_views(ShaderStage::Fragment, 0, &[Some(sampled)]);
    ctx.draw(|_, _| {}).unwrap();
    assert!(ctx.in_render_pass());

    ctx.set_constant_buffer(ShaderStage::Vertex, 0, Some(uniform));
    ctx.draw(|_, _| {}).unwrap();

    // The pass was not interrupted.
    assert!(ctx.in_render_pass());
    assert!(ctx.current_batch().has_barriers());
    assert_eq!(primary_barriers(&ctx).len(), 1);

    ctx.flush().unwrap();
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);

    let command_buffers = &submissions[0].command_buffers;
    assert_eq!(command_buffers.len(), 2);

    let hoisted: Vec<_> = command_buffers[0].barriers().collect();
    assert_eq!(hoisted.len(), 1);
    assert!(matches!(
        hoisted[0],
        Command::Barrier {
            barrier: RecordedBarrier::Buffer { dst_access, .. },
            ..
        } if *dst_access == AccessFlags::UNIFORM_READ
    ));

    let passes = command_buffers[1]
        .commands()
        .iter()
        .filter(|command| matches!(command, Command::BeginRenderPass { .. }))
        .count();
    assert_eq!(passes, 1);
    assert_eq!(
        command_buffers[1].commands().last(),
        Some(&Command::EndRenderPass)
    );
}

#[test]
fn image_layout_follows_domain() {
    let (_, mut ctx) = context();
    let img = image(&mut ctx, Format::Rgba8Unorm);

    ctx.set_sampler_views(ShaderStage::Fragment, 0, &[Some(img)]);
    ctx.set_shader_images(
        ShaderStage::Compute,
        0,
        &[Some(ShaderImage {
            resource: img,
            writable: true,
        })],
    );
    assert!(ctx.is_pending(img, Domain::Compute));
    assert!(ctx.is_pending(img, Domain::Graphics));

    ctx.dispatch(|_, _| {}).unwrap();
    match image_barriers(&ctx).last() {
        Some(RecordedBarrier::Image {
            old_layout,
            new_layout,
            ..
        }) => {
            assert_eq!(*old_layout, ImageLayout::Undefined);
            assert_eq!(*new_layout, ImageLayout::General);
        }
        other => panic!("unexpected barrier {other:?}"),
    }

    ctx.draw(|_, _| {}).unwrap();
    match image_barriers(&ctx).last() {
        Some(RecordedBarrier::Image {
            old_layout,
            new_layout,
            ..
        }) => {
            assert_eq!(*old_layout, ImageLayout::General);
            assert_eq!(*new_layout, ImageLayout::ShaderReadOnlyOptimal);
        }
        other => panic!("unexpected barrier {other:?}"),
    }
    assert_eq!(
        ctx.resource_state(img).unwrap().layout,
        ImageLayout::ShaderReadOnlyOptimal
    );
}

#[test]
fn bind_counts_return_to_zero() {
    let (_, mut ctx) = context();
    let buf = buffer(&mut ctx);

    ctx.set_constant_buffer(ShaderStage::Vertex, 0, Some(buf));
    ctx.set_shader_buffers(ShaderStage::Fragment, 0, &[Some(buf), Some(buf)], 0b01);
    ctx.set_vertex_buffers(3, &[Some(buf)]);
    ctx.set_stream_output_targets(&[Some(buf)]);
    ctx.set_constant_buffer(ShaderStage::Compute, 1, Some(buf));

    let state = ctx.resource_state(buf).unwrap();
    assert_eq!(state.bind_count, [5, 1]);
    assert_eq!(state.write_bind_count, [1, 0]);
    assert_eq!(state.ubo_bind_count, [1, 1]);
    assert_eq!(state.vbo_bind_mask, 1 << 3);
    assert_eq!(state.so_bind_count, 1);

    ctx.set_constant_buffer(ShaderStage::Vertex, 0, None);
    ctx.set_shader_buffers(ShaderStage::Fragment, 0, &[None, None], 0);
    ctx.set_vertex_buffers(3, &[None]);
    ctx.set_stream_output_targets(&[]);
    ctx.set_constant_buffer(ShaderStage::Compute, 1, None);

    let state = ctx.resource_state(buf).unwrap();
    assert_eq!(state.bind_count, [0, 0]);
    assert_eq!(state.write_bind_count, [0, 0]);
    assert_eq!(state.ubo_bind_count, [0, 0]);
    assert_eq!(state.stage_binds, [0; ShaderStage::COUNT]);
    assert_eq!(state.vbo_bind_mask, 0);
    assert_eq!(state.so_bind_count, 0);
    assert!(!ctx.is_pending(buf, Domain::Graphics));
    assert!(!ctx.is_pending(buf, Domain::Compute));

    ctx.destroy_resource(buf);
    assert_eq!(ctx.resource_count(), 0);
}

#[test]
fn resident_handles_bind_in_both_domains() {
    let (_, mut ctx) = context();
    let img = image(&mut ctx, Format::Rgba8Unorm);

    let handle = ctx.create_image_handle(img, true);
    assert_eq!(ctx.resource_state(img).unwrap().bind_count, [0, 0]);

    ctx.make_handle_resident(handle, true);
    let state = ctx.resource_state(img).unwrap();
    assert_eq!(state.bind_count, [1, 1]);
    assert_eq!(state.layout_eval(Domain::Graphics), ImageLayout::General);

    ctx.delete_handle(handle);
    assert_eq!(ctx.resource_state(img).unwrap().bind_count, [0, 0]);
    assert_eq!(ctx.bindless_handle_count(), 0);
}

#[test]
fn flush_without_work_does_not_submit() {
    let (backend, mut ctx) = context();
    assert_eq!(ctx.flush(), Ok(0));
    assert!(backend.submissions().is_empty());

    ctx.dispatch(|_, _| {}).unwrap();
    assert_eq!(ctx.flush(), Ok(1));
    assert_eq!(ctx.flush(), Ok(1));
    assert_eq!(backend.submissions().len(), 1);
}

#[test]
fn queued_clear_is_applied_on_flush() {
    let (backend, mut ctx) = context();
    let view = surface(&mut ctx, Format::Rgba8Unorm);

    ctx.set_framebuffer_state(color_target(&[view])).unwrap();
    ctx.clear(ClearFlags::COLOR0, [0.0, 0.0, 0.0, 1.0], 0.0, 0);
    ctx.flush().unwrap();

    let submissions = backend.submissions();
    let commands = submissions[0].command_buffers[0].commands();
    assert!(commands.iter().any(|command| matches!(
        command,
        Command::BeginRenderPass {
            clear_values: 1,
            ..
        }
    )));
    assert_eq!(commands.last(), Some(&Command::EndRenderPass));
}

#[test]
fn framebuffers_with_equal_structure_share_objects() {
    let (backend, mut ctx) = context();
    let a = surface(&mut ctx, Format::Rgba8Unorm);
    let b = surface(&mut ctx, Format::Rgba8Unorm);

    ctx.set_framebuffer_state(color_target(&[a])).unwrap();
    ctx.draw(|_, _| {}).unwrap();
    ctx.set_framebuffer_state(color_target(&[b])).unwrap();
    ctx.draw(|_, _| {}).unwrap();

    assert_eq!(ctx.render_pass_count(), 1);
    assert_eq!(ctx.framebuffer_count(), 1);
    assert_eq!(
        backend
            .counters()
            .framebuffers_created
            .load(Ordering::Relaxed),
        1
    );
}

#[test]
fn destroyed_surface_evicts_framebuffers() {
    let (backend, mut ctx) = context_with(
        EmptyBackendCreateInfo::default(),
        ContextCreateInfo {
            framebuffer_strategy: FramebufferStrategy::Concrete,
            ..Default::default()
        },
    );
    assert_eq!(ctx.framebuffer_strategy(), FramebufferStrategy::Concrete);

    let view = surface(&mut ctx, Format::Rgba8Unorm);
    ctx.set_framebuffer_state(color_target(&[view])).unwrap();
    ctx.draw(|_, _| {}).unwrap();
    assert_eq!(ctx.framebuffer_count(), 1);

    ctx.set_framebuffer_state(FramebufferTarget::default())
        .unwrap();
    ctx.destroy_surface(view);
    assert_eq!(ctx.framebuffer_count(), 0);
    assert_eq!(ctx.surface_count(), 0);

    // The recording batch still uses the framebuffer.
    let destroyed = || {
        backend
            .counters()
            .framebuffers_destroyed
            .load(Ordering::Relaxed)
    };
    assert_eq!(destroyed(), 0);

    ctx.finish().unwrap();
    assert_eq!(destroyed(), 1);
}

#[test]
#[should_panic]
fn destroying_attached_surface_panics() {
    let (_, mut ctx) = context();
    let view = surface(&mut ctx, Format::Rgba8Unorm);
    ctx.set_framebuffer_state(color_target(&[view])).unwrap();
    ctx.destroy_surface(view);
}

#[test]
fn depth_evaluation_chains_sample_locations() {
    let (_, mut ctx) = context();
    let view = surface(&mut ctx, Format::D32Sfloat);

    ctx.set_framebuffer_state(FramebufferTarget {
        depth_stencil: Some(view),
        ..color_target(&[])
    })
    .unwrap();
    ctx.set_depth_write(true);
    ctx.draw(|_, _| {}).unwrap();

    ctx.evaluate_depth_buffer(SampleLocations {
        samples_per_pixel: 1,
        grid_width: 1,
        grid_height: 1,
        locations: vec![(0.5, 0.5)],
    });
    assert!(!ctx.in_render_pass());
    ctx.draw(|_, _| {}).unwrap();

    let barriers = image_barriers(&ctx);
    assert_eq!(barriers.len(), 2);
    assert_eq!(
        barriers[1],
        RecordedBarrier::Image {
            image: match &barriers[0] {
                RecordedBarrier::Image { image, .. } => *image,
                _ => unreachable!(),
            },
            old_layout: ImageLayout::DepthStencilAttachmentOptimal,
            new_layout: ImageLayout::DepthStencilAttachmentOptimal,
            src_access: AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            sample_locations: true,
        }
    );
}

#[test]
fn destroyed_resources_outlive_their_batch() {
    let (backend, mut ctx) = context_with(manual(), ContextCreateInfo::default());
    let buf = buffer(&mut ctx);

    ctx.set_shader_buffers(ShaderStage::Compute, 0, &[Some(buf)], 0b1);
    ctx.dispatch(|_, _| {}).unwrap();
    assert!(ctx.is_resource_busy(buf));

    let id = ctx.flush().unwrap();
    assert!(ctx.is_resource_busy(buf));
    assert!(!ctx.check_batch_completion(id));

    ctx.set_shader_buffers(ShaderStage::Compute, 0, &[None], 0);
    ctx.destroy_resource(buf);
    assert_eq!(
        backend.counters().buffers_destroyed.load(Ordering::Relaxed),
        0
    );

    backend.signal_all();
    assert!(ctx.check_batch_completion(id));
    ctx.stall().unwrap();
    assert_eq!(
        backend.counters().buffers_destroyed.load(Ordering::Relaxed),
        1
    );
}

#[test]
fn device_loss_is_reported_once() {
    let (backend, mut ctx) = context_with(manual(), ContextCreateInfo::default());
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        ctx.set_device_reset_callback(Some(Box::new(move |status| {
            assert_eq!(status, ResetStatus::GuiltyContextReset);
            calls.fetch_add(1, Ordering::SeqCst);
        })));
    }

    ctx.dispatch(|_, _| {}).unwrap();
    let id = ctx.flush().unwrap();
    assert_eq!(ctx.device_reset_status(), ResetStatus::NoReset);

    backend.lose_device();
    assert_eq!(
        ctx.wait_for_batch(id),
        Err(FlushError::Wait(WaitError::DeviceLost))
    );
    assert!(!ctx.check_batch_completion(id));
    assert_eq!(ctx.device_reset_status(), ResetStatus::GuiltyContextReset);
    assert!(ctx.flush().is_err());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn graphics_uniform_folds_into_compute_storage_barrier() {
    let (_, mut ctx) = context();
    let buf = buffer(&mut ctx);

    ctx.set_constant_buffer(ShaderStage::Fragment, 0, Some(buf));
    ctx.set_shader_buffers(ShaderStage::Compute, 0, &[Some(buf)], 0b1);
    assert!(ctx.is_pending(buf, Domain::Graphics));
    assert!(ctx.is_pending(buf, Domain::Compute));

    ctx.dispatch(|_, _| {}).unwrap();

    let barriers = primary_barriers(&ctx);
    assert_eq!(barriers.len(), 1);
    match &barriers[0] {
        Command::Barrier {
            dst_stage,
            barrier: RecordedBarrier::Buffer { dst_access, .. },
            ..
        } => {
            assert_eq!(*dst_stage, PipelineStageFlags::COMPUTE_SHADER);
            assert_eq!(
                *dst_access,
                AccessFlags::UNIFORM_READ | AccessFlags::SHADER_WRITE
            );
        }
        other => panic!("unexpected command {other:?}"),
    }

    // The compute write still has to be ordered before the next draw.
    assert!(!ctx.is_pending(buf, Domain::Compute));
    assert!(ctx.is_pending(buf, Domain::Graphics));
}

#[test]
#[should_panic]
fn destroying_viewed_image_panics() {
    let (_, mut ctx) = context();
    let img = image(&mut ctx, Format::Rgba8Unorm);
    ctx.create_surface(img, ImageViewCreateInfo::default())
        .unwrap();
    ctx.destroy_resource(img);
}

#[test]
fn image_is_destroyable_once_its_surfaces_are() {
    let (_, mut ctx) = context();
    let img = image(&mut ctx, Format::Rgba8Unorm);
    let view = ctx
        .create_surface(img, ImageViewCreateInfo::default())
        .unwrap();

    ctx.set_framebuffer_state(color_target(&[view])).unwrap();
    ctx.draw(|_, _| {}).unwrap();
    ctx.set_framebuffer_state(FramebufferTarget::default())
        .unwrap();

    ctx.destroy_surface(view);
    ctx.destroy_resource(img);
    assert_eq!(ctx.resource_count(), 0);

    let reused = image(&mut ctx, Format::Rgba8Unorm);
    assert_eq!(reused, img);
    let state = ctx.resource_state(reused).unwrap();
    assert_eq!(state.fb_binds, 0);
    assert_eq!(state.layout, ImageLayout::Undefined);
}

#[test]
fn handle_of_destroyed_resource_never_binds_its_successor() {
    let (backend, mut ctx) = context();
    let old = buffer(&mut ctx);
    let handle = ctx.create_texture_handle(old);

    ctx.destroy_resource(old);
    let new = buffer(&mut ctx);
    assert_eq!(new, old);

    ctx.make_handle_resident(handle, true);
    let state = ctx.resource_state(new).unwrap();
    assert_eq!(state.bind_count, [0, 0]);
    assert!(!ctx.is_pending(new, Domain::Graphics));
    assert!(!ctx.is_pending(new, Domain::Compute));

    // The handle keeps the destroyed buffer alive.
    let destroyed = || backend.counters().buffers_destroyed.load(Ordering::Relaxed);
    assert_eq!(destroyed(), 0);
    ctx.delete_handle(handle);
    assert_eq!(destroyed(), 1);
    assert_eq!(ctx.bindless_handle_count(), 0);
}

#[test]
fn failed_flush_leaves_resources_idle() {
    let (backend, mut ctx) = context();
    let buf = buffer(&mut ctx);

    ctx.set_shader_buffers(ShaderStage::Compute, 0, &[Some(buf)], 0b1);
    ctx.dispatch(|_, _| {}).unwrap();

    backend.set_fail_recording(true);
    assert_eq!(ctx.flush(), Err(BackendError::OutOfHostMemory));
    backend.set_fail_recording(false);

    assert_eq!(ctx.last_submitted(), 0);
    assert!(!ctx.is_resource_busy(buf));
    assert!(backend.submissions().is_empty());
}
