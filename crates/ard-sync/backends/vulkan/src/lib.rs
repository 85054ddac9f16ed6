use std::{
    borrow::Cow,
    ffi::{CStr, CString},
    mem::ManuallyDrop,
    sync::Mutex,
    time::Duration,
};

use api::{
    barrier::{Barrier, PipelineBarrier},
    buffer::BufferCreateInfo,
    command_buffer::{ClearValue, RenderPassBegin},
    framebuffer::FramebufferState,
    image::{ImageCreateInfo, ImageViewCreateInfo},
    render_pass::{RenderPassState, MAX_ATTACHMENTS},
    Backend, BackendError, Capabilities, FenceStatus,
};
use ard_log::{debug, error, info, trace, warn};
use arrayvec::ArrayVec;
use ash::vk::{self, DebugUtilsMessageSeverityFlagsEXT};
use buffer::Buffer;
use command_buffer::CommandBuffer;
use gpu_allocator::vulkan::*;
use image::{Image, ImageView};
use render_pass::{VkFramebuffer, VkRenderPass};
use smallvec::SmallVec;
use thiserror::Error;

pub mod buffer;
pub mod command_buffer;
pub mod image;
pub mod render_pass;
pub(crate) mod util;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanBackendCreateInfo {
    pub app_name: String,
    pub engine_name: String,
    /// Enables debugging layers and extensions.
    pub debug: bool,
}

#[derive(Debug, Error)]
pub enum VulkanBackendCreateError {
    #[error("vulkan error: {0}")]
    Vulkan(vk::Result),
    #[error("ash load error: {0}")]
    AshLoadError(ash::LoadingError),
    #[error("no suitable graphics device was found")]
    NoDevice,
    #[error("unable to create memory allocator: {0}")]
    Allocator(String),
}

/// A headless Vulkan 1.2 device with a single queue that supports graphics and compute.
pub struct VulkanBackend {
    pub(crate) _entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) debug_names: Option<ash::ext::debug_utils::Device>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) device: ash::Device,
    pub(crate) queue: Mutex<vk::Queue>,
    pub(crate) queue_family: u32,
    pub(crate) allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Only present when timeline semaphores are supported.
    pub(crate) timeline: Option<vk::Semaphore>,
    pub(crate) capabilities: Capabilities,
    /// `VK_EXT_sample_locations` is enabled.
    pub(crate) sample_locations: bool,
}

struct PhysicalDeviceQuery {
    pub device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub properties: vk::PhysicalDeviceProperties,
    pub capabilities: Capabilities,
    pub sample_locations: bool,
}

impl Backend for VulkanBackend {
    type Buffer = Buffer;
    type Image = Image;
    type ImageView = ImageView;
    type RenderPass = VkRenderPass;
    type Framebuffer = VkFramebuffer;
    type CommandBuffer = CommandBuffer;
    type Fence = vk::Fence;

    #[inline(always)]
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    #[inline(always)]
    unsafe fn create_buffer(
        &self,
        create_info: &BufferCreateInfo,
    ) -> Result<Self::Buffer, BackendError> {
        let mut allocator = self.allocator.lock().unwrap();
        Buffer::new(self, &mut allocator, create_info)
    }

    #[inline(always)]
    unsafe fn destroy_buffer(&self, buffer: &mut Self::Buffer) {
        let mut allocator = self.allocator.lock().unwrap();
        buffer.release(&self.device, &mut allocator);
    }

    #[inline(always)]
    unsafe fn create_image(
        &self,
        create_info: &ImageCreateInfo,
    ) -> Result<Self::Image, BackendError> {
        let mut allocator = self.allocator.lock().unwrap();
        Image::new(self, &mut allocator, create_info)
    }

    #[inline(always)]
    unsafe fn destroy_image(&self, image: &mut Self::Image) {
        let mut allocator = self.allocator.lock().unwrap();
        image.release(&self.device, &mut allocator);
    }

    #[inline(always)]
    unsafe fn create_image_view(
        &self,
        image: &Self::Image,
        create_info: &ImageViewCreateInfo,
    ) -> Result<Self::ImageView, BackendError> {
        ImageView::new(&self.device, image, create_info)
    }

    #[inline(always)]
    unsafe fn destroy_image_view(&self, view: &mut Self::ImageView) {
        self.device.destroy_image_view(view.view, None);
        view.view = vk::ImageView::null();
    }

    unsafe fn create_render_pass(
        &self,
        state: &RenderPassState,
    ) -> Result<Self::RenderPass, BackendError> {
        trace!(
            "creating render pass with {} attachments",
            state.num_attachments()
        );
        VkRenderPass::new(&self.device, state)
    }

    #[inline(always)]
    unsafe fn destroy_render_pass(&self, pass: &mut Self::RenderPass) {
        self.device.destroy_render_pass(pass.pass, None);
        pass.pass = vk::RenderPass::null();
    }

    unsafe fn create_framebuffer(
        &self,
        pass: &Self::RenderPass,
        state: &FramebufferState,
        views: Option<&[&Self::ImageView]>,
    ) -> Result<Self::Framebuffer, BackendError> {
        if views.is_none() && !self.capabilities.imageless_framebuffer {
            return Err(BackendError::Other(String::from(
                "imageless framebuffers are not supported",
            )));
        }
        VkFramebuffer::new(&self.device, pass, state, views)
    }

    #[inline(always)]
    unsafe fn destroy_framebuffer(&self, framebuffer: &mut Self::Framebuffer) {
        self.device.destroy_framebuffer(framebuffer.framebuffer, None);
        framebuffer.framebuffer = vk::Framebuffer::null();
    }

    unsafe fn create_command_buffer(
        &self,
        debug_name: Option<&str>,
    ) -> Result<Self::CommandBuffer, BackendError> {
        let command_buffer = CommandBuffer::new(&self.device, self.queue_family)?;
        if let Some(name) = debug_name {
            self.set_debug_name(command_buffer.cb, name);
        }
        Ok(command_buffer)
    }

    #[inline(always)]
    unsafe fn destroy_command_buffer(&self, command_buffer: &mut Self::CommandBuffer) {
        command_buffer.release(&self.device);
    }

    #[inline(always)]
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        command_buffer.begin(&self.device)
    }

    #[inline(always)]
    unsafe fn end_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        self.device
            .end_command_buffer(command_buffer.cb)
            .map_err(util::to_backend_error)
    }

    #[inline(always)]
    unsafe fn reset_command_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
    ) -> Result<(), BackendError> {
        command_buffer.reset(&self.device)
    }

    #[inline(always)]
    unsafe fn create_fence(&self) -> Result<Self::Fence, BackendError> {
        self.device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(util::to_backend_error)
    }

    #[inline(always)]
    unsafe fn destroy_fence(&self, fence: &mut Self::Fence) {
        self.device.destroy_fence(*fence, None);
        *fence = vk::Fence::null();
    }

    #[inline(always)]
    unsafe fn reset_fence(&self, fence: &mut Self::Fence) -> Result<(), BackendError> {
        self.device
            .reset_fences(&[*fence])
            .map_err(util::to_backend_error)
    }

    unsafe fn wait_fence(&self, fence: &Self::Fence, timeout: Option<Duration>) -> FenceStatus {
        puffin::profile_function!();
        let res = self
            .device
            .wait_for_fences(&[*fence], true, util::to_timeout_ns(timeout));
        to_fence_status(res)
    }

    unsafe fn timeline_value(&self) -> Result<u64, BackendError> {
        match self.timeline {
            Some(timeline) => self
                .device
                .get_semaphore_counter_value(timeline)
                .map_err(util::to_backend_error),
            None => Err(BackendError::Other(String::from(
                "timeline semaphores are not supported",
            ))),
        }
    }

    unsafe fn wait_timeline(&self, value: u64, timeout: Option<Duration>) -> FenceStatus {
        puffin::profile_function!();
        let timeline = match self.timeline {
            Some(timeline) => timeline,
            None => {
                error!("waited on a timeline value without timeline semaphore support");
                return FenceStatus::DeviceLost;
            }
        };

        let semaphores = [timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        let res = self
            .device
            .wait_semaphores(&wait_info, util::to_timeout_ns(timeout));
        to_fence_status(res)
    }

    unsafe fn submit(
        &self,
        command_buffers: &[&Self::CommandBuffer],
        fence: &Self::Fence,
        signal: Option<u64>,
    ) -> Result<(), BackendError> {
        puffin::profile_function!();

        let cbs: SmallVec<[vk::CommandBuffer; 4]> =
            command_buffers.iter().map(|cb| cb.cb).collect();

        let signal_semaphores = [self.timeline.unwrap_or(vk::Semaphore::null())];
        let signal_values = [signal.unwrap_or_default()];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);

        let mut submit_info = vk::SubmitInfo::default().command_buffers(&cbs);
        match (signal, self.timeline) {
            (Some(_), Some(_)) => {
                submit_info = submit_info
                    .signal_semaphores(&signal_semaphores)
                    .push_next(&mut timeline_info);
            }
            (Some(value), None) => {
                warn!("timeline value {value} requested without timeline semaphore support");
            }
            _ => {}
        }

        let queue = self.queue.lock().unwrap();
        self.device
            .queue_submit(*queue, &[submit_info], *fence)
            .map_err(util::to_backend_error)
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        barrier: PipelineBarrier<'_, Self>,
    ) {
        let src_stage = util::to_vk_pipeline_stage(barrier.src_stage);
        let dst_stage = util::to_vk_pipeline_stage(barrier.dst_stage);

        match barrier.barrier {
            Barrier::Memory(memory) => {
                let memory_barrier = vk::MemoryBarrier::default()
                    .src_access_mask(util::to_vk_access_flags(memory.src_access))
                    .dst_access_mask(util::to_vk_access_flags(memory.dst_access));
                self.device.cmd_pipeline_barrier(
                    command_buffer.cb,
                    src_stage,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    &[memory_barrier],
                    &[],
                    &[],
                );
            }
            Barrier::Buffer(buffer) => {
                let buffer_barrier = vk::BufferMemoryBarrier::default()
                    .src_access_mask(util::to_vk_access_flags(buffer.src_access))
                    .dst_access_mask(util::to_vk_access_flags(buffer.dst_access))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer.buffer.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                self.device.cmd_pipeline_barrier(
                    command_buffer.cb,
                    src_stage,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[buffer_barrier],
                    &[],
                );
            }
            Barrier::Image(image) => {
                let sample_locations = if self.sample_locations {
                    image.sample_locations
                } else {
                    if image.sample_locations.is_some() {
                        debug!("sample locations ignored without VK_EXT_sample_locations");
                    }
                    None
                };

                let locations: SmallVec<[vk::SampleLocationEXT; 16]> = sample_locations
                    .map(|sl| {
                        sl.locations
                            .iter()
                            .map(|&(x, y)| vk::SampleLocationEXT { x, y })
                            .collect()
                    })
                    .unwrap_or_default();
                let mut sample_info = sample_locations.map(|sl| {
                    vk::SampleLocationsInfoEXT::default()
                        .sample_locations_per_pixel(vk::SampleCountFlags::from_raw(
                            sl.samples_per_pixel,
                        ))
                        .sample_location_grid_size(vk::Extent2D {
                            width: sl.grid_width,
                            height: sl.grid_height,
                        })
                        .sample_locations(&locations)
                });

                let mut image_barrier = vk::ImageMemoryBarrier::default()
                    .src_access_mask(util::to_vk_access_flags(image.src_access))
                    .dst_access_mask(util::to_vk_access_flags(image.dst_access))
                    .old_layout(util::to_vk_image_layout(image.old_layout))
                    .new_layout(util::to_vk_image_layout(image.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: util::to_vk_image_aspect(image.aspect),
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    });
                if let Some(sample_info) = sample_info.as_mut() {
                    image_barrier = image_barrier.push_next(sample_info);
                }

                self.device.cmd_pipeline_barrier(
                    command_buffer.cb,
                    src_stage,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[image_barrier],
                );
            }
        }
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        begin: RenderPassBegin<'_, Self>,
    ) {
        let clear_values: ArrayVec<vk::ClearValue, MAX_ATTACHMENTS> = begin
            .clear_values
            .iter()
            .map(|value| match *value {
                ClearValue::Color(color) => vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            })
            .collect();
        let views: ArrayVec<vk::ImageView, MAX_ATTACHMENTS> =
            begin.attachments.iter().map(|view| view.view).collect();
        let mut attachment_info = vk::RenderPassAttachmentBeginInfo::default().attachments(&views);

        let mut begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass.pass)
            .framebuffer(begin.framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: vk::Extent2D {
                    width: begin.state.width,
                    height: begin.state.height,
                },
            })
            .clear_values(&clear_values);
        if begin.framebuffer.imageless {
            begin_info = begin_info.push_next(&mut attachment_info);
        }

        self.device.cmd_begin_render_pass(
            command_buffer.cb,
            &begin_info,
            vk::SubpassContents::INLINE,
        );
    }

    #[inline(always)]
    unsafe fn cmd_end_render_pass(&self, command_buffer: &mut Self::CommandBuffer) {
        self.device.cmd_end_render_pass(command_buffer.cb);
    }
}

impl VulkanBackend {
    pub fn new(create_info: VulkanBackendCreateInfo) -> Result<Self, VulkanBackendCreateError> {
        let app_name = CString::new(create_info.app_name).unwrap_or_default();
        let engine_name = CString::new(create_info.engine_name).unwrap_or_default();
        let vk_version = vk::API_VERSION_1_2;

        // Dynamically load Vulkan
        let entry = unsafe { ash::Entry::load()? };

        // Get required instance layers
        let debug_enabled = create_info.debug && validation_layer_available(&entry);
        if create_info.debug && !debug_enabled {
            warn!("debugging was requested but the validation layer is not available");
        }

        let layer_names = if debug_enabled {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::default()
        };

        // Get required instance extensions
        let instance_extensions = if debug_enabled {
            vec![ash::ext::debug_utils::NAME.as_ptr()]
        } else {
            Vec::default()
        };

        // Create the instance
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(&engine_name)
            .engine_version(0)
            .api_version(vk_version);

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&instance_extensions);

        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

        // Create debugging utilities if requested
        let debug = if debug_enabled {
            let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let debug_utils_loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let debug_messenger =
                unsafe { debug_utils_loader.create_debug_utils_messenger(&debug_info, None)? };
            Some((debug_utils_loader, debug_messenger))
        } else {
            None
        };

        // Query for a physical device
        let pd_query = match unsafe { pick_physical_device(&instance, vk_version) } {
            Some(pd) => pd,
            None => return Err(VulkanBackendCreateError::NoDevice),
        };

        let device_name = unsafe { CStr::from_ptr(pd_query.properties.device_name.as_ptr()) };
        info!(
            "using {} ({:?}) with {:?}",
            device_name.to_string_lossy(),
            pd_query.properties.device_type,
            pd_query.capabilities,
        );

        // Optional device extensions
        let mut device_extensions = Vec::default();
        if pd_query.sample_locations {
            device_extensions.push(ash::ext::sample_locations::NAME.as_ptr());
        }

        // Queue requests
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(pd_query.queue_family)
            .queue_priorities(&priorities)];

        // Request features
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(pd_query.capabilities.timeline_semaphore)
            .imageless_framebuffer(pd_query.capabilities.imageless_framebuffer);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .push_next(&mut features12);

        // Create the device
        let device =
            unsafe { instance.create_device(pd_query.device, &device_create_info, None)? };
        let queue = unsafe { device.get_device_queue(pd_query.queue_family, 0) };

        let debug_names = debug
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        // Create the memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: pd_query.device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: false,
                log_leaks_on_shutdown: debug_enabled,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|err| VulkanBackendCreateError::Allocator(err.to_string()))?;

        // The timeline starts at zero, which no batch is ever assigned
        let timeline = if pd_query.capabilities.timeline_semaphore {
            let mut type_info = vk::SemaphoreTypeCreateInfo::default()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(0);
            let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
            Some(unsafe { device.create_semaphore(&semaphore_info, None)? })
        } else {
            None
        };

        let ctx = Self {
            _entry: entry,
            instance,
            debug,
            debug_names,
            physical_device: pd_query.device,
            properties: pd_query.properties,
            device,
            queue: Mutex::new(queue),
            queue_family: pd_query.queue_family,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            timeline,
            capabilities: pd_query.capabilities,
            sample_locations: pd_query.sample_locations,
        };

        if let Some(timeline) = ctx.timeline {
            ctx.set_debug_name(timeline, "timeline");
        }

        Ok(ctx)
    }

    #[inline(always)]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline(always)]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Only applied when debugging is enabled.
    pub(crate) fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let debug_names = match &self.debug_names {
            Some(debug_names) => debug_names,
            None => return,
        };

        let name = match CString::new(name) {
            Ok(name) => name,
            Err(_) => return,
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        unsafe {
            if let Err(err) = debug_names.set_debug_utils_object_name(&name_info) {
                debug!("unable to set debug name: {err}");
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                error!("unable to wait for the device to idle: {err}");
            }
            ManuallyDrop::drop(&mut self.allocator);
            if let Some(timeline) = self.timeline {
                self.device.destroy_semaphore(timeline, None);
            }
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = &self.debug {
                loader.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn to_fence_status(res: ash::prelude::VkResult<()>) -> FenceStatus {
    match res {
        Ok(()) => FenceStatus::Signaled,
        Err(vk::Result::TIMEOUT) => FenceStatus::Pending,
        Err(vk::Result::ERROR_DEVICE_LOST) => FenceStatus::DeviceLost,
        Err(err) => {
            error!("wait failed: {err}");
            FenceStatus::DeviceLost
        }
    }
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    layers.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    })
}

unsafe fn pick_physical_device(
    instance: &ash::Instance,
    vk_version: u32,
) -> Option<PhysicalDeviceQuery> {
    let devices = match instance.enumerate_physical_devices() {
        Ok(devices) => devices,
        Err(_) => return None,
    };

    let mut device_type = vk::PhysicalDeviceType::OTHER;
    let mut query = None;
    for device in devices {
        let properties = instance.get_physical_device_properties(device);
        if properties.api_version < vk_version {
            continue;
        }

        // Must have a queue for both graphics and compute
        let queue_family = match find_queue_family(instance, device) {
            Some(queue_family) => queue_family,
            None => continue,
        };

        // Pick this device if it's better than the old one
        if device_type_rank(properties.device_type) < device_type_rank(device_type) {
            continue;
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
            instance.get_physical_device_features2(device, &mut features2);
        }

        device_type = properties.device_type;
        query = Some(PhysicalDeviceQuery {
            device,
            queue_family,
            properties,
            capabilities: Capabilities {
                imageless_framebuffer: features12.imageless_framebuffer == vk::TRUE,
                timeline_semaphore: features12.timeline_semaphore == vk::TRUE,
            },
            sample_locations: has_device_extension(
                instance,
                device,
                ash::ext::sample_locations::NAME,
            ),
        });
    }

    query
}

fn find_queue_family(instance: &ash::Instance, device: vk::PhysicalDevice) -> Option<u32> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(device) };

    // Probably will end up being family 0.
    properties
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|idx| idx as u32)
}

unsafe fn has_device_extension(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    extension: &CStr,
) -> bool {
    let found_extensions = match instance.enumerate_device_extension_properties(device) {
        Ok(extensions) => extensions,
        Err(_) => return false,
    };

    found_extensions
        .iter()
        .any(|property| CStr::from_ptr(property.extension_name.as_ptr()) == extension)
}

fn device_type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::CPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        DebugUtilsMessageSeverityFlagsEXT::VERBOSE => trace!(
            "{:?} [{} ({})] : {}",
            message_type,
            message_id_name,
            message_id_number,
            message,
        ),
        DebugUtilsMessageSeverityFlagsEXT::INFO => debug!(
            "{:?} [{} ({})] : {}",
            message_type,
            message_id_name,
            message_id_number,
            message,
        ),
        DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(
            "{:?} [{} ({})] : {}",
            message_type,
            message_id_name,
            message_id_number,
            message,
        ),
        DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(
            "{:?} [{} ({})] : {}",
            message_type,
            message_id_name,
            message_id_number,
            message,
        ),
        _ => {}
    }

    vk::FALSE
}

impl From<vk::Result> for VulkanBackendCreateError {
    fn from(res: vk::Result) -> Self {
        VulkanBackendCreateError::Vulkan(res)
    }
}

impl From<ash::LoadingError> for VulkanBackendCreateError {
    fn from(err: ash::LoadingError) -> Self {
        VulkanBackendCreateError::AshLoadError(err)
    }
}
