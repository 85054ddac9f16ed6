use std::time::Duration;

use api::{types::*, BackendError};
use ash::vk;
use gpu_allocator::MemoryLocation;

#[inline(always)]
pub(crate) const fn to_vk_format(format: Format) -> vk::Format {
    match format {
        Format::Undefined => vk::Format::UNDEFINED,
        // R8
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8UInt => vk::Format::R8_UINT,
        // R16
        Format::R16SFloat => vk::Format::R16_SFLOAT,
        // R32
        Format::R32UInt => vk::Format::R32_UINT,
        Format::R32SFloat => vk::Format::R32_SFLOAT,
        // RG16
        Format::Rg16SFloat => vk::Format::R16G16_SFLOAT,
        // RGBA8
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        // RGBA16
        Format::Rgba16SFloat => vk::Format::R16G16B16A16_SFLOAT,
        // RGBA32
        Format::Rgba32SFloat => vk::Format::R32G32B32A32_SFLOAT,
        // BGRA8
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        // Depth
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,
        Format::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

#[inline(always)]
pub(crate) const fn to_vk_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachmentOptimal => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        ImageLayout::DepthStencilReadOnlyOptimal => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::Preinitialized => vk::ImageLayout::PREINITIALIZED,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

#[inline(always)]
pub(crate) const fn to_gpu_allocator_memory_location(usage: MemoryUsage) -> MemoryLocation {
    match usage {
        MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
        MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
        MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
    }
}

// The flag types below share bit values with Vulkan.

#[inline(always)]
pub(crate) const fn to_vk_access_flags(access: AccessFlags) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(access.bits())
}

#[inline(always)]
pub(crate) fn to_vk_pipeline_stage(stage: PipelineStageFlags) -> vk::PipelineStageFlags {
    // An empty source scope is not allowed.
    if stage.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        vk::PipelineStageFlags::from_raw(stage.bits())
    }
}

#[inline(always)]
pub(crate) const fn to_vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    vk::BufferUsageFlags::from_raw(usage.bits())
}

#[inline(always)]
pub(crate) const fn to_vk_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::from_raw(usage.bits())
}

#[inline(always)]
pub(crate) const fn to_vk_image_aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    vk::ImageAspectFlags::from_raw(aspect.bits())
}

#[inline(always)]
pub(crate) fn to_vk_sample_count(samples: u8) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        _ => vk::SampleCountFlags::TYPE_64,
    }
}

/// `None` waits forever.
#[inline(always)]
pub(crate) fn to_timeout_ns(timeout: Option<Duration>) -> u64 {
    match timeout {
        Some(timeout) => u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX),
        None => u64::MAX,
    }
}

pub(crate) fn to_backend_error(res: vk::Result) -> BackendError {
    match res {
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => BackendError::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => BackendError::OutOfDeviceMemory,
        other => BackendError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_vulkan() {
        assert_eq!(
            to_vk_access_flags(AccessFlags::SHADER_WRITE),
            vk::AccessFlags::SHADER_WRITE
        );
        assert_eq!(
            to_vk_access_flags(AccessFlags::TRANSFORM_FEEDBACK_COUNTER_WRITE),
            vk::AccessFlags::TRANSFORM_FEEDBACK_COUNTER_WRITE_EXT
        );
        assert_eq!(
            to_vk_pipeline_stage(PipelineStageFlags::COMPUTE_SHADER),
            vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(
            to_vk_pipeline_stage(PipelineStageFlags::TRANSFORM_FEEDBACK),
            vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT
        );
        assert_eq!(
            to_vk_buffer_usage(BufferUsage::TRANSFORM_FEEDBACK_BUFFER),
            vk::BufferUsageFlags::TRANSFORM_FEEDBACK_BUFFER_EXT
        );
        assert_eq!(
            to_vk_image_usage(ImageUsage::DEPTH_STENCIL_ATTACHMENT),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
        assert_eq!(
            to_vk_image_aspect(ImageAspect::DEPTH | ImageAspect::STENCIL),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn empty_stage_is_top_of_pipe() {
        assert_eq!(
            to_vk_pipeline_stage(PipelineStageFlags::empty()),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
    }

    #[test]
    fn device_lost_maps_to_backend_error() {
        assert_eq!(
            to_backend_error(vk::Result::ERROR_DEVICE_LOST),
            BackendError::DeviceLost
        );
        assert!(matches!(
            to_backend_error(vk::Result::ERROR_INITIALIZATION_FAILED),
            BackendError::Other(_)
        ));
    }
}
