use api::BackendError;
use ash::vk;

use crate::util;

/// Each command buffer owns its pool so buffers can be recorded and reset independently.
pub struct CommandBuffer {
    pub(crate) pool: vk::CommandPool,
    pub(crate) cb: vk::CommandBuffer,
}

impl CommandBuffer {
    pub(crate) unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self, BackendError> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family);
        let pool = device
            .create_command_pool(&pool_info, None)
            .map_err(util::to_backend_error)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cb = match device.allocate_command_buffers(&alloc_info) {
            Ok(cbs) => cbs[0],
            Err(err) => {
                device.destroy_command_pool(pool, None);
                return Err(util::to_backend_error(err));
            }
        };

        Ok(Self { pool, cb })
    }

    #[inline(always)]
    pub(crate) unsafe fn begin(&self, device: &ash::Device) -> Result<(), BackendError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(self.cb, &begin_info)
            .map_err(util::to_backend_error)
    }

    #[inline(always)]
    pub(crate) unsafe fn reset(&self, device: &ash::Device) -> Result<(), BackendError> {
        device
            .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
            .map_err(util::to_backend_error)
    }

    pub(crate) unsafe fn release(&mut self, device: &ash::Device) {
        // Freeing the pool frees the command buffer with it.
        device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
        self.cb = vk::CommandBuffer::null();
    }
}
