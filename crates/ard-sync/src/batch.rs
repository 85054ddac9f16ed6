use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use api::{Backend, BackendError, FenceStatus};
use ard_log::{debug, error, trace};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    barrier::CommandStream,
    config::ContextCreateInfo,
    framebuffer::Framebuffer,
    render_pass::RenderPass,
    resource::{Resource, ResourceState},
    submit::SubmitThread,
    surface::Surface,
};

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("the device has been lost")]
    DeviceLost,
    #[error("the batch did not complete before the timeout")]
    Timeout,
}

/// One unit of submission: a primary command buffer, a barrier command buffer that executes
/// before it, a fence and everything the recorded commands reference.
pub struct BatchState<B: Backend> {
    backend: Arc<B>,
    id: u64,
    /// Unique per recording. Used to reference each resource once.
    usage: u64,
    cmdbuf: B::CommandBuffer,
    barrier_cmdbuf: B::CommandBuffer,
    has_barriers: bool,
    has_work: bool,
    fence: B::Fence,
    resources: Vec<Arc<Resource<B>>>,
    zombies: Zombies<B>,
    flush_completed: FlushSignal,
    device_lost: AtomicBool,
}

/// Objects released while a batch might still be using them. Dropped when the batch is reset.
struct Zombies<B: Backend> {
    render_passes: Vec<Arc<RenderPass<B>>>,
    framebuffers: Vec<Arc<Framebuffer<B>>>,
    surfaces: Vec<Arc<Surface<B>>>,
}

/// Signaled once a batch has been handed to the backend, whether submission worked or not.
struct FlushSignal {
    completed: Mutex<bool>,
    cond: Condvar,
}

/// Owns every batch that is not being recorded.
pub(crate) struct BatchQueue<B: Backend> {
    backend: Arc<B>,
    debug_name: Option<String>,
    in_flight: Mutex<InFlight<B>>,
    free: Mutex<Vec<BatchState<B>>>,
    /// Every batch with an id at or below this value is known to be complete.
    last_finished: AtomicU64,
    next_id: AtomicU64,
    next_usage: AtomicU64,
    timeline: bool,
    max_free: usize,
    device_lost: AtomicBool,
    submit_thread: Option<SubmitThread<B>>,
}

struct InFlight<B: Backend> {
    /// Submitted batches in id order.
    batches: VecDeque<Arc<BatchState<B>>>,
    /// The most recently submitted batch.
    last_fence: Option<Arc<BatchState<B>>>,
}

impl<B: Backend> Default for Zombies<B> {
    fn default() -> Self {
        Self {
            render_passes: Vec::default(),
            framebuffers: Vec::default(),
            surfaces: Vec::default(),
        }
    }
}

impl<B: Backend> Zombies<B> {
    fn len(&self) -> usize {
        self.render_passes.len() + self.framebuffers.len() + self.surfaces.len()
    }

    fn clear(&mut self) {
        self.render_passes.clear();
        self.framebuffers.clear();
        self.surfaces.clear();
    }
}

impl FlushSignal {
    fn new() -> Self {
        Self {
            completed: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn reset(&self) {
        *self.completed.lock().unwrap() = false;
    }

    fn signal(&self) {
        *self.completed.lock().unwrap() = true;
        self.cond.notify_all();
    }

    fn is_signaled(&self) -> bool {
        *self.completed.lock().unwrap()
    }

    /// Returns `false` if the timeout elapsed first.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut completed = self.completed.lock().unwrap();
        while !*completed {
            completed = match deadline {
                None => self.cond.wait(completed).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.cond.wait_timeout(completed, deadline - now).unwrap().0
                }
            };
        }
        true
    }
}

impl<B: Backend> BatchState<B> {
    fn new(backend: Arc<B>, debug_name: Option<&str>) -> Result<Self, BackendError> {
        let mut cmdbuf = unsafe { backend.create_command_buffer(debug_name)? };

        let mut barrier_cmdbuf = match unsafe { backend.create_command_buffer(debug_name) } {
            Ok(barrier_cmdbuf) => barrier_cmdbuf,
            Err(err) => {
                unsafe { backend.destroy_command_buffer(&mut cmdbuf) };
                return Err(err);
            }
        };

        let fence = match unsafe { backend.create_fence() } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe {
                    backend.destroy_command_buffer(&mut cmdbuf);
                    backend.destroy_command_buffer(&mut barrier_cmdbuf);
                }
                return Err(err);
            }
        };

        Ok(Self {
            backend,
            id: 0,
            usage: 0,
            cmdbuf,
            barrier_cmdbuf,
            has_barriers: false,
            has_work: false,
            fence,
            resources: Vec::default(),
            zombies: Zombies::default(),
            flush_completed: FlushSignal::new(),
            device_lost: AtomicBool::new(false),
        })
    }

    /// Id assigned on submission. `0` while recording.
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn command_buffer(&self) -> &B::CommandBuffer {
        &self.cmdbuf
    }

    #[inline(always)]
    pub fn barrier_command_buffer(&self) -> &B::CommandBuffer {
        &self.barrier_cmdbuf
    }

    #[inline(always)]
    pub fn has_barriers(&self) -> bool {
        self.has_barriers
    }

    #[inline(always)]
    pub fn has_work(&self) -> bool {
        self.has_work
    }

    /// Number of resources kept alive by this batch.
    #[inline(always)]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    #[inline(always)]
    pub fn zombie_count(&self) -> usize {
        self.zombies.len()
    }

    #[inline(always)]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn primary_mut(&mut self) -> &mut B::CommandBuffer {
        &mut self.cmdbuf
    }

    #[inline(always)]
    pub(crate) fn stream_mut(&mut self, stream: CommandStream) -> &mut B::CommandBuffer {
        match stream {
            CommandStream::Primary => &mut self.cmdbuf,
            CommandStream::Unordered => &mut self.barrier_cmdbuf,
        }
    }

    #[inline(always)]
    pub(crate) fn set_has_barriers(&mut self) {
        self.has_barriers = true;
    }

    #[inline(always)]
    pub(crate) fn set_has_work(&mut self) {
        self.has_work = true;
    }

    /// Keeps the resource alive until this batch completes. Each resource is referenced once
    /// no matter how many commands use it.
    pub(crate) fn reference_resource(
        &mut self,
        state: &mut ResourceState,
        resource: &Arc<Resource<B>>,
    ) {
        if state.batch_usage != self.usage {
            state.batch_usage = self.usage;
            self.resources.push(resource.clone());
        }
    }

    /// Whether the resource was referenced since this batch started recording.
    #[inline(always)]
    pub(crate) fn is_using(&self, state: &ResourceState) -> bool {
        state.batch_usage == self.usage
    }

    #[inline(always)]
    pub(crate) fn usage(&self) -> u64 {
        self.usage
    }

    #[inline(always)]
    pub(crate) fn resources(&self) -> impl Iterator<Item = &Arc<Resource<B>>> {
        self.resources.iter()
    }

    #[inline(always)]
    pub(crate) fn retain_render_pass(&mut self, pass: Arc<RenderPass<B>>) {
        self.zombies.render_passes.push(pass);
    }

    #[inline(always)]
    pub(crate) fn retain_framebuffer(&mut self, framebuffer: Arc<Framebuffer<B>>) {
        self.zombies.framebuffers.push(framebuffer);
    }

    #[inline(always)]
    pub(crate) fn retain_surface(&mut self, surface: Arc<Surface<B>>) {
        self.zombies.surfaces.push(surface);
    }

    fn start(&mut self, usage: u64) -> Result<(), BackendError> {
        unsafe {
            self.backend.reset_command_buffer(&mut self.cmdbuf)?;
            self.backend.reset_command_buffer(&mut self.barrier_cmdbuf)?;
            self.backend.reset_fence(&mut self.fence)?;
            self.backend.begin_command_buffer(&mut self.cmdbuf)?;
            self.backend.begin_command_buffer(&mut self.barrier_cmdbuf)?;
        }

        self.id = 0;
        self.usage = usage;
        self.has_barriers = false;
        self.has_work = false;
        self.flush_completed.reset();
        self.device_lost.store(false, Ordering::Release);
        Ok(())
    }

    fn end(&mut self) -> Result<(), BackendError> {
        unsafe {
            self.backend.end_command_buffer(&mut self.barrier_cmdbuf)?;
            self.backend.end_command_buffer(&mut self.cmdbuf)?;
        }
        Ok(())
    }

    /// Hands the batch to the backend. The barrier command buffer is only submitted if
    /// anything was recorded into it, and always ahead of the primary.
    pub(crate) fn submit(&self, timeline: bool) -> Result<(), BackendError> {
        puffin::profile_function!();

        let mut command_buffers = SmallVec::<[&B::CommandBuffer; 2]>::default();
        if self.has_barriers {
            command_buffers.push(&self.barrier_cmdbuf);
        }
        command_buffers.push(&self.cmdbuf);

        let signal = if timeline { Some(self.id) } else { None };
        let res = unsafe { self.backend.submit(&command_buffers, &self.fence, signal) };

        // A batch that failed to submit will never signal its fence.
        if res.is_err() {
            self.device_lost.store(true, Ordering::Release);
        }
        self.flush_completed.signal();
        res
    }

    /// Releases everything the batch kept alive.
    fn reset(&mut self) {
        trace!(
            "resetting batch {} with {} resources and {} zombies",
            self.id,
            self.resources.len(),
            self.zombies.len()
        );
        self.resources.clear();
        self.zombies.clear();
    }
}

impl<B: Backend> Drop for BatchState<B> {
    fn drop(&mut self) {
        unsafe {
            self.backend.destroy_command_buffer(&mut self.cmdbuf);
            self.backend.destroy_command_buffer(&mut self.barrier_cmdbuf);
            self.backend.destroy_fence(&mut self.fence);
        }
    }
}

impl<B: Backend> BatchQueue<B> {
    pub fn new(backend: Arc<B>, create_info: &ContextCreateInfo) -> Result<Self, BackendError> {
        let timeline = backend.capabilities().timeline_semaphore;

        // Timeline values must keep increasing, so ids continue from wherever the device is.
        let first_id = if timeline {
            unsafe { backend.timeline_value()? + 1 }
        } else {
            1
        };

        let submit_thread = if create_info.threaded_submit {
            let name = match &create_info.debug_name {
                Some(name) => format!("{name}_submit"),
                None => String::from("ard_sync_submit"),
            };
            let thread = SubmitThread::new(name, timeline)
                .map_err(|err| BackendError::Other(err.to_string()))?;
            Some(thread)
        } else {
            None
        };

        Ok(Self {
            backend,
            debug_name: create_info.debug_name.clone(),
            in_flight: Mutex::new(InFlight {
                batches: VecDeque::default(),
                last_fence: None,
            }),
            free: Mutex::new(Vec::default()),
            last_finished: AtomicU64::new(first_id - 1),
            next_id: AtomicU64::new(first_id),
            next_usage: AtomicU64::new(1),
            timeline,
            max_free: create_info.max_free_batches,
            device_lost: AtomicBool::new(false),
            submit_thread,
        })
    }

    /// Returns a batch ready for recording. Reuses a free batch, then the oldest completed
    /// batch, and only then allocates a new one.
    pub fn acquire(&self) -> Result<BatchState<B>, BackendError> {
        let usage = self.next_usage.fetch_add(1, Ordering::Relaxed);

        let free = self.free.lock().unwrap().pop();
        let free = match free {
            Some(batch) => Some(batch),
            None => {
                self.recycle();
                self.free.lock().unwrap().pop()
            }
        };

        let mut batch = match free {
            Some(batch) => batch,
            None => {
                debug!("allocating new batch");
                BatchState::new(self.backend.clone(), self.debug_name.as_deref())?
            }
        };

        batch.start(usage)?;
        Ok(batch)
    }

    /// Ends recording, assigns the next id and submits. The batch becomes the last fence.
    pub fn submit(&self, mut batch: BatchState<B>) -> Result<u64, BackendError> {
        puffin::profile_function!();

        batch.end()?;

        let batch = {
            let mut in_flight = self.in_flight.lock().unwrap();
            batch.id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let batch = Arc::new(batch);
            in_flight.batches.push_back(batch.clone());
            in_flight.last_fence = Some(batch.clone());
            batch
        };

        let id = batch.id;
        trace!("queued batch {id}");

        let inline = match &self.submit_thread {
            Some(thread) => thread.submit(batch).err(),
            None => Some(batch),
        };

        if let Some(batch) = inline {
            if let Err(err) = batch.submit(self.timeline) {
                error!("submission of batch {id} failed: {err}");
                if err == BackendError::DeviceLost {
                    self.device_lost.store(true, Ordering::Release);
                }
                return Err(err);
            }
        }

        Ok(id)
    }

    /// Id of the most recently submitted batch, or `0` if nothing was submitted.
    #[inline(always)]
    pub fn last_submitted(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    #[inline(always)]
    pub fn last_finished(&self) -> u64 {
        self.last_finished.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_device_lost(&self) -> bool {
        self.device_lost.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().batches.len()
    }

    #[inline(always)]
    pub fn free(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Waits for batch `id` to complete. A `timeout` of zero polls.
    ///
    /// Batches that were already recycled are known to be complete, as are ids older than any
    /// batch still in flight.
    pub fn wait(&self, id: u64, timeout: Option<Duration>) -> Result<(), WaitError> {
        if id <= self.last_finished() {
            return Ok(());
        }

        if self.is_device_lost() {
            return Err(WaitError::DeviceLost);
        }

        assert!(
            id <= self.last_submitted(),
            "batch {id} has not been submitted"
        );

        let batch = self.find(id);
        if let Some(batch) = &batch {
            if !batch.flush_completed.wait(timeout) {
                return Err(WaitError::Timeout);
            }

            if batch.is_device_lost() {
                return Err(self.lost(id));
            }
        }

        let status = if self.timeline {
            unsafe { self.backend.wait_timeline(id, timeout) }
        } else {
            match &batch {
                Some(batch) => unsafe { self.backend.wait_fence(&batch.fence, timeout) },
                None => FenceStatus::Signaled,
            }
        };

        match status {
            FenceStatus::Signaled => {
                self.last_finished.fetch_max(id, Ordering::AcqRel);
                Ok(())
            }
            FenceStatus::Pending => Err(WaitError::Timeout),
            FenceStatus::DeviceLost => Err(self.lost(id)),
        }
    }

    /// Waits for the last submitted batch and recycles everything that completed.
    pub fn stall(&self) -> Result<(), WaitError> {
        let last = self.last_submitted();
        if last != 0 {
            self.wait(last, None)?;
        }
        self.recycle();
        Ok(())
    }

    /// Moves completed batches from the front of the in flight list to the free list,
    /// releasing everything they kept alive.
    pub fn recycle(&self) {
        puffin::profile_function!();

        let mut completed = SmallVec::<[Arc<BatchState<B>>; 4]>::default();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            while let Some(front) = in_flight.batches.front() {
                if !self.poll(front) {
                    break;
                }

                let Some(batch) = in_flight.batches.pop_front() else {
                    break;
                };

                if let Some(last) = &in_flight.last_fence {
                    if Arc::ptr_eq(last, &batch) {
                        in_flight.last_fence = None;
                    }
                }

                completed.push(batch);
            }
        }

        let mut free = self.free.lock().unwrap();
        for batch in completed {
            // Still referenced by a waiter or the submission thread. Whoever holds the last
            // reference destroys it.
            let Ok(mut batch) = Arc::try_unwrap(batch) else {
                continue;
            };

            batch.reset();
            if free.len() < self.max_free {
                free.push(batch);
            }
        }
    }

    fn find(&self, id: u64) -> Option<Arc<BatchState<B>>> {
        let in_flight = self.in_flight.lock().unwrap();
        if let Some(last) = &in_flight.last_fence {
            if last.id == id {
                return Some(last.clone());
            }
        }

        for batch in &in_flight.batches {
            if batch.id == id {
                return Some(batch.clone());
            }

            if batch.id > id {
                break;
            }
        }

        None
    }

    /// Whether the batch can be reclaimed. Batches lost with the device never complete, but
    /// nothing will execute them either.
    fn poll(&self, batch: &BatchState<B>) -> bool {
        if batch.id <= self.last_finished() {
            return true;
        }

        if !batch.flush_completed.is_signaled() {
            return false;
        }

        if batch.is_device_lost() {
            self.device_lost.store(true, Ordering::Release);
            return true;
        }

        let status = unsafe {
            if self.timeline {
                self.backend.wait_timeline(batch.id, Some(Duration::ZERO))
            } else {
                self.backend.wait_fence(&batch.fence, Some(Duration::ZERO))
            }
        };

        match status {
            FenceStatus::Signaled => {
                self.last_finished.fetch_max(batch.id, Ordering::AcqRel);
                true
            }
            FenceStatus::Pending => false,
            FenceStatus::DeviceLost => {
                self.device_lost.store(true, Ordering::Release);
                true
            }
        }
    }

    fn lost(&self, id: u64) -> WaitError {
        error!("device lost while waiting on batch {id}");
        self.device_lost.store(true, Ordering::Release);
        WaitError::DeviceLost
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, thread, time::Duration};

    use api::Capabilities;
    use empty::{EmptyBackend, EmptyBackendCreateInfo};

    use super::*;

    fn manual(timeline: bool) -> Arc<EmptyBackend> {
        Arc::new(EmptyBackend::new(EmptyBackendCreateInfo {
            capabilities: Capabilities {
                imageless_framebuffer: true,
                timeline_semaphore: timeline,
            },
            auto_complete: false,
        }))
    }

    fn submit_n(queue: &BatchQueue<EmptyBackend>, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| {
                let mut batch = queue.acquire().unwrap();
                batch.set_has_work();
                queue.submit(batch).unwrap()
            })
            .collect()
    }

    #[test]
    fn ids_increase_monotonically() {
        let backend = Arc::new(EmptyBackend::default());
        let queue = BatchQueue::new(backend, &ContextCreateInfo::default()).unwrap();
        assert_eq!(queue.last_submitted(), 0);
        assert_eq!(submit_n(&queue, 4), vec![1, 2, 3, 4]);
        assert_eq!(queue.last_submitted(), 4);
    }

    #[test]
    fn completed_batch_is_reused_on_acquire() {
        let backend = Arc::new(EmptyBackend::default());
        let queue = BatchQueue::new(backend, &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 3);
        queue.recycle();
        // Every acquire reclaimed the previous batch, so only one was ever allocated.
        assert_eq!(queue.free(), 1);
    }

    #[test]
    fn completed_batches_are_reused() {
        let backend = manual(false);
        let queue = BatchQueue::new(backend.clone(), &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 3);
        assert_eq!(queue.in_flight(), 3);

        backend.signal_all();
        queue.recycle();
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.free(), 3);

        let batch = queue.acquire().unwrap();
        assert_eq!(queue.free(), 2);
        assert_eq!(batch.id(), 0);
        assert!(!batch.has_work());
    }

    #[test]
    fn free_list_is_bounded() {
        let backend = manual(false);
        let queue = BatchQueue::new(
            backend.clone(),
            &ContextCreateInfo {
                max_free_batches: 1,
                ..Default::default()
            },
        )
        .unwrap();
        submit_n(&queue, 3);
        backend.signal_all();
        queue.recycle();
        assert_eq!(queue.free(), 1);
    }

    #[test]
    fn check_and_wait_against_manual_signals() {
        let backend = manual(false);
        let queue = BatchQueue::new(backend.clone(), &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 6);

        for _ in 0..5 {
            assert!(backend.signal_next());
        }

        assert_eq!(queue.wait(5, Some(Duration::ZERO)), Ok(()));
        assert_eq!(queue.wait(6, Some(Duration::ZERO)), Err(WaitError::Timeout));

        let signaler = {
            let backend = backend.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                backend.signal_all();
            })
        };

        assert_eq!(queue.wait(6, None), Ok(()));
        signaler.join().unwrap();
        assert_eq!(queue.last_finished(), 6);
    }

    #[test]
    fn finished_ids_skip_fences() {
        let backend = manual(false);
        let queue = BatchQueue::new(backend.clone(), &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 3);
        backend.signal_all();
        queue.wait(3, None).unwrap();

        let waits = backend.counters().fence_waits.load(Ordering::Relaxed);
        queue.wait(1, None).unwrap();
        queue.wait(2, Some(Duration::ZERO)).unwrap();
        assert_eq!(backend.counters().fence_waits.load(Ordering::Relaxed), waits);
    }

    #[test]
    fn timeline_waits_use_the_timeline() {
        let backend = manual(true);
        let queue = BatchQueue::new(backend.clone(), &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 2);
        backend.signal_next();

        assert_eq!(queue.wait(1, Some(Duration::ZERO)), Ok(()));
        assert_eq!(queue.wait(2, Some(Duration::ZERO)), Err(WaitError::Timeout));
        assert_eq!(backend.counters().fence_waits.load(Ordering::Relaxed), 0);
        assert!(backend.counters().timeline_waits.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn device_loss_is_reported() {
        let backend = manual(false);
        let queue = BatchQueue::new(backend.clone(), &ContextCreateInfo::default()).unwrap();
        submit_n(&queue, 1);
        backend.lose_device();

        assert_eq!(queue.wait(1, None), Err(WaitError::DeviceLost));
        assert!(queue.is_device_lost());
    }

    #[test]
    fn threaded_submission_preserves_order() {
        let backend = Arc::new(EmptyBackend::default());
        let queue = BatchQueue::new(
            backend.clone(),
            &ContextCreateInfo {
                threaded_submit: true,
                ..Default::default()
            },
        )
        .unwrap();

        let ids = submit_n(&queue, 4);
        queue.stall().unwrap();
        assert_eq!(queue.last_finished(), *ids.last().unwrap());
        assert_eq!(backend.submissions().len(), 4);
        assert_eq!(queue.in_flight(), 0);
    }
}
