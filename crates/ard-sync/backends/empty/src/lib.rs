//! A backend that talks to no device. Commands are recorded into plain vectors and fences are
//! either signaled on submission or held until the owner signals them.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use api::{
    barrier::{Barrier, PipelineBarrier},
    buffer::BufferCreateInfo,
    command_buffer::RenderPassBegin,
    framebuffer::FramebufferState,
    image::{ImageCreateInfo, ImageViewCreateInfo},
    render_pass::RenderPassState,
    types::{AccessFlags, ImageLayout, PipelineStageFlags},
    Backend, BackendError, Capabilities, FenceStatus,
};

pub struct EmptyBackendCreateInfo {
    pub capabilities: Capabilities,
    /// Signal fences as soon as they are submitted. When `false`, submissions stay pending until
    /// [`EmptyBackend::signal_next`] or [`EmptyBackend::signal_all`] is called.
    pub auto_complete: bool,
}

impl Default for EmptyBackendCreateInfo {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                imageless_framebuffer: true,
                timeline_semaphore: false,
            },
            auto_complete: true,
        }
    }
}

pub struct EmptyBackend {
    capabilities: Capabilities,
    auto_complete: bool,
    next_object: AtomicU64,
    pending: Mutex<VecDeque<(Arc<FenceSignal>, Option<u64>)>>,
    submissions: Mutex<Vec<Submission>>,
    timeline: Mutex<u64>,
    timeline_cond: Condvar,
    device_lost: AtomicBool,
    fail_creation: AtomicBool,
    fail_recording: AtomicBool,
    counters: Counters,
}

/// Number of calls made into the backend, for inspection.
#[derive(Default)]
pub struct Counters {
    pub render_passes_created: AtomicUsize,
    pub render_passes_destroyed: AtomicUsize,
    pub framebuffers_created: AtomicUsize,
    pub framebuffers_destroyed: AtomicUsize,
    pub buffers_destroyed: AtomicUsize,
    pub images_destroyed: AtomicUsize,
    pub fence_waits: AtomicUsize,
    pub timeline_waits: AtomicUsize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Signaled,
    Lost,
}

struct FenceSignal {
    state: Mutex<FenceState>,
    cond: Condvar,
}

pub struct EmptyFence(Arc<FenceSignal>);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EmptyObject {
    pub id: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EmptyFramebuffer {
    pub id: u64,
    pub imageless: bool,
}

#[derive(Debug, Default, Clone)]
pub struct EmptyCommandBuffer {
    pub id: u64,
    pub name: Option<String>,
    recording: bool,
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier {
        src_stage: PipelineStageFlags,
        dst_stage: PipelineStageFlags,
        barrier: RecordedBarrier,
    },
    BeginRenderPass {
        render_pass: u64,
        framebuffer: u64,
        attachments: Vec<u64>,
        clear_values: usize,
    },
    EndRenderPass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedBarrier {
    Memory {
        src_access: AccessFlags,
        dst_access: AccessFlags,
    },
    Buffer {
        buffer: u64,
        src_access: AccessFlags,
        dst_access: AccessFlags,
    },
    Image {
        image: u64,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_access: AccessFlags,
        dst_access: AccessFlags,
        sample_locations: bool,
    },
}

/// A snapshot of one submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub command_buffers: Vec<EmptyCommandBuffer>,
    pub signal: Option<u64>,
}

impl EmptyBackend {
    pub fn new(create_info: EmptyBackendCreateInfo) -> Self {
        Self {
            capabilities: create_info.capabilities,
            auto_complete: create_info.auto_complete,
            next_object: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::default()),
            submissions: Mutex::new(Vec::default()),
            timeline: Mutex::new(0),
            timeline_cond: Condvar::new(),
            device_lost: AtomicBool::new(false),
            fail_creation: AtomicBool::new(false),
            fail_recording: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    #[inline(always)]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Every submission made so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    /// Makes every following creation call fail with an out of memory error.
    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Makes every following attempt to end a command buffer fail with an out of memory error.
    pub fn set_fail_recording(&self, fail: bool) {
        self.fail_recording.store(fail, Ordering::SeqCst);
    }

    /// Completes the oldest pending submission. Returns `false` if nothing was pending.
    pub fn signal_next(&self) -> bool {
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some((fence, signal)) => {
                self.complete(&fence, signal);
                true
            }
            None => false,
        }
    }

    /// Completes every pending submission.
    pub fn signal_all(&self) {
        while self.signal_next() {}
    }

    /// Loses the device. Pending and future waits report it.
    pub fn lose_device(&self) {
        self.device_lost.store(true, Ordering::SeqCst);
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (fence, _) in pending {
            *fence.state.lock().unwrap() = FenceState::Lost;
            fence.cond.notify_all();
        }
        let _timeline = self.timeline.lock().unwrap();
        self.timeline_cond.notify_all();
    }

    fn complete(&self, fence: &FenceSignal, signal: Option<u64>) {
        if let Some(value) = signal {
            let mut timeline = self.timeline.lock().unwrap();
            *timeline = (*timeline).max(value);
            self.timeline_cond.notify_all();
        }
        *fence.state.lock().unwrap() = FenceState::Signaled;
        fence.cond.notify_all();
    }

    fn next_id(&self) -> u64 {
        self.next_object.fetch_add(1, Ordering::Relaxed)
    }

    fn check_creation(&self) -> Result<(), BackendError> {
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(BackendError::DeviceLost);
        }
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(BackendError::OutOfDeviceMemory);
        }
        Ok(())
    }
}

impl Default for EmptyBackend {
    fn default() -> Self {
        Self::new(EmptyBackendCreateInfo::default())
    }
}

impl EmptyCommandBuffer {
    #[inline(always)]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Only the barrier commands.
    pub fn barriers(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .iter()
            .filter(|command| matches!(command, Command::Barrier { .. }))
    }

    #[inline(always)]
    pub fn is_recording(&self) -> bool {
        self.recording
    }
}

impl Backend for EmptyBackend {
    type Buffer = EmptyObject;
    type Image = EmptyObject;
    type ImageView = EmptyObject;
    type RenderPass = EmptyObject;
    type Framebuffer = EmptyFramebuffer;
    type CommandBuffer = EmptyCommandBuffer;
    type Fence = EmptyFence;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    unsafe fn create_buffer(
        &self,
        _create_info: &BufferCreateInfo,
    ) -> Result<Self::Buffer, BackendError> {
        self.check_creation()?;
        Ok(EmptyObject { id: self.next_id() })
    }

    unsafe fn destroy_buffer(&self, _buffer: &mut Self::Buffer) {
        self.counters
            .buffers_destroyed
            .fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn create_image(
        &self,
        _create_info: &ImageCreateInfo,
    ) -> Result<Self::Image, BackendError> {
        self.check_creation()?;
        Ok(EmptyObject { id: self.next_id() })
    }

    unsafe fn destroy_image(&self, _image: &mut Self::Image) {
        self.counters.images_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn create_image_view(
        &self,
        _image: &Self::Image,
        _create_info: &ImageViewCreateInfo,
    ) -> Result<Self::ImageView, BackendError> {
        self.check_creation()?;
        Ok(EmptyObject { id: self.next_id() })
    }

    unsafe fn destroy_image_view(&self, _view: &mut Self::ImageView) {}

    unsafe fn create_render_pass(
        &self,
        _state: &RenderPassState,
    ) -> Result<Self::RenderPass, BackendError> {
        self.check_creation()?;
        self.counters
            .render_passes_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(EmptyObject { id: self.next_id() })
    }

    unsafe fn destroy_render_pass(&self, _pass: &mut Self::RenderPass) {
        self.counters
            .render_passes_destroyed
            .fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn create_framebuffer(
        &self,
        _pass: &Self::RenderPass,
        _state: &FramebufferState,
        views: Option<&[&Self::ImageView]>,
    ) -> Result<Self::Framebuffer, BackendError> {
        self.check_creation()?;
        self.counters
            .framebuffers_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(EmptyFramebuffer {
            id: self.next_id(),
            imageless: views.is_none(),
        })
    }

    unsafe fn destroy_framebuffer(&self, _framebuffer: &mut Self::Framebuffer) {
        self.counters
            .framebuffers_destroyed
            .fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn create_command_buffer(
        &self,
        debug_name: Option<&str>,
    ) -> Result<Self::CommandBuffer, BackendError> {
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(BackendError::DeviceLost);
        }
        Ok(EmptyCommandBuffer {
            id: self.next_id(),
            name: debug_name.map(String::from),
            recording: false,
            commands: Vec::default(),
        })
    }

    unsafe fn destroy_command_buffer(&self, _command_buffer: &mut Self::CommandBuffer) {}

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        assert!(!command_buffer.recording, "command buffer already recording");
        command_buffer.recording = true;
        Ok(())
    }

    unsafe fn end_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        assert!(command_buffer.recording, "command buffer not recording");
        command_buffer.recording = false;
        if self.fail_recording.load(Ordering::SeqCst) {
            return Err(BackendError::OutOfHostMemory);
        }
        Ok(())
    }

    unsafe fn reset_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        command_buffer.recording = false;
        command_buffer.commands.clear();
        Ok(())
    }

    unsafe fn create_fence(&self) -> Result<Self::Fence, BackendError> {
        Ok(EmptyFence(Arc::new(FenceSignal {
            state: Mutex::new(FenceState::Unsignaled),
            cond: Condvar::new(),
        })))
    }

    unsafe fn destroy_fence(&self, _fence: &mut Self::Fence) {}

    unsafe fn reset_fence(&self, fence: &mut Self::Fence) -> Result<(), BackendError> {
        *fence.0.state.lock().unwrap() = FenceState::Unsignaled;
        Ok(())
    }

    unsafe fn wait_fence(&self, fence: &Self::Fence, timeout: Option<Duration>) -> FenceStatus {
        self.counters.fence_waits.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = fence.0.state.lock().unwrap();
        loop {
            match *state {
                FenceState::Signaled => return FenceStatus::Signaled,
                FenceState::Lost => return FenceStatus::DeviceLost,
                FenceState::Unsignaled => {}
            }

            if self.device_lost.load(Ordering::SeqCst) {
                return FenceStatus::DeviceLost;
            }

            state = match deadline {
                None => fence.0.cond.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return FenceStatus::Pending;
                    }
                    fence.0.cond.wait_timeout(state, deadline - now).unwrap().0
                }
            };
        }
    }

    unsafe fn timeline_value(&self) -> Result<u64, BackendError> {
        Ok(*self.timeline.lock().unwrap())
    }

    unsafe fn wait_timeline(&self, value: u64, timeout: Option<Duration>) -> FenceStatus {
        self.counters.timeline_waits.fetch_add(1, Ordering::Relaxed);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut timeline = self.timeline.lock().unwrap();
        loop {
            if *timeline >= value {
                return FenceStatus::Signaled;
            }

            if self.device_lost.load(Ordering::SeqCst) {
                return FenceStatus::DeviceLost;
            }

            timeline = match deadline {
                None => self.timeline_cond.wait(timeline).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return FenceStatus::Pending;
                    }
                    self.timeline_cond
                        .wait_timeout(timeline, deadline - now)
                        .unwrap()
                        .0
                }
            };
        }
    }

    unsafe fn submit(
        &self,
        command_buffers: &[&Self::CommandBuffer],
        fence: &Self::Fence,
        signal: Option<u64>,
    ) -> Result<(), BackendError> {
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(BackendError::DeviceLost);
        }

        for command_buffer in command_buffers {
            assert!(
                !command_buffer.recording,
                "submitted a command buffer that is still recording"
            );
        }

        self.submissions.lock().unwrap().push(Submission {
            command_buffers: command_buffers.iter().map(|cb| (*cb).clone()).collect(),
            signal,
        });

        if self.auto_complete {
            self.complete(&fence.0, signal);
        } else {
            self.pending
                .lock()
                .unwrap()
                .push_back((fence.0.clone(), signal));
        }

        Ok(())
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        barrier: PipelineBarrier<'_, Self>,
    ) {
        debug_assert!(command_buffer.recording);
        let recorded = match barrier.barrier {
            Barrier::Memory(memory) => RecordedBarrier::Memory {
                src_access: memory.src_access,
                dst_access: memory.dst_access,
            },
            Barrier::Buffer(buffer) => RecordedBarrier::Buffer {
                buffer: buffer.buffer.id,
                src_access: buffer.src_access,
                dst_access: buffer.dst_access,
            },
            Barrier::Image(image) => RecordedBarrier::Image {
                image: image.image.id,
                old_layout: image.old_layout,
                new_layout: image.new_layout,
                src_access: image.src_access,
                dst_access: image.dst_access,
                sample_locations: image.sample_locations.is_some(),
            },
        };

        command_buffer.commands.push(Command::Barrier {
            src_stage: barrier.src_stage,
            dst_stage: barrier.dst_stage,
            barrier: recorded,
        });
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        begin: RenderPassBegin<'_, Self>,
    ) {
        debug_assert!(command_buffer.recording);
        command_buffer.commands.push(Command::BeginRenderPass {
            render_pass: begin.render_pass.id,
            framebuffer: begin.framebuffer.id,
            attachments: begin.attachments.iter().map(|view| view.id).collect(),
            clear_values: begin.clear_values.len(),
        });
    }

    unsafe fn cmd_end_render_pass(&self, command_buffer: &mut Self::CommandBuffer) {
        debug_assert!(command_buffer.recording);
        command_buffer.commands.push(Command::EndRenderPass);
    }
}
