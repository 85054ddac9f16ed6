use api::{buffer::BufferCreateInfo, BackendError};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};

use crate::{util, VulkanBackend};

pub struct Buffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) block: Option<Allocation>,
    pub(crate) size: u64,
}

impl Buffer {
    pub(crate) unsafe fn new(
        ctx: &VulkanBackend,
        allocator: &mut Allocator,
        create_info: &BufferCreateInfo,
    ) -> Result<Self, BackendError> {
        // Create the buffer
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(create_info.size.max(1))
            .usage(util::to_vk_buffer_usage(create_info.buffer_usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = ctx
            .device
            .create_buffer(&buffer_create_info, None)
            .map_err(util::to_backend_error)?;

        // Allocate memory
        let mem_reqs = ctx.device.get_buffer_memory_requirements(buffer);
        let block = match allocator.allocate(&AllocationCreateDesc {
            name: create_info.debug_name.as_deref().unwrap_or("buffer"),
            requirements: mem_reqs,
            location: util::to_gpu_allocator_memory_location(create_info.memory_usage),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(block) => block,
            Err(err) => {
                ctx.device.destroy_buffer(buffer, None);
                return Err(BackendError::Other(err.to_string()));
            }
        };

        // Bind to the buffer
        if let Err(err) = ctx
            .device
            .bind_buffer_memory(buffer, block.memory(), block.offset())
        {
            ctx.device.destroy_buffer(buffer, None);
            let _ = allocator.free(block);
            return Err(util::to_backend_error(err));
        }

        if let Some(name) = &create_info.debug_name {
            ctx.set_debug_name(buffer, name);
        }

        Ok(Self {
            buffer,
            block: Some(block),
            size: create_info.size,
        })
    }

    pub(crate) unsafe fn release(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        if let Some(block) = self.block.take() {
            if let Err(err) = allocator.free(block) {
                ard_log::warn!("unable to free buffer memory: {err}");
            }
        }
        device.destroy_buffer(self.buffer, None);
        self.buffer = vk::Buffer::null();
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }
}
