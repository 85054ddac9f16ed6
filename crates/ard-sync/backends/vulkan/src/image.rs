use api::{
    image::{ImageCreateInfo, ImageViewCreateInfo},
    types::Format,
    BackendError,
};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};

use crate::{util, VulkanBackend};

pub struct Image {
    pub(crate) image: vk::Image,
    pub(crate) block: Option<Allocation>,
    pub(crate) format: Format,
    pub(crate) samples: u8,
}

pub struct ImageView {
    pub(crate) view: vk::ImageView,
    pub(crate) format: Format,
}

impl Image {
    pub(crate) unsafe fn new(
        ctx: &VulkanBackend,
        allocator: &mut Allocator,
        create_info: &ImageCreateInfo,
    ) -> Result<Self, BackendError> {
        let image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(util::to_vk_format(create_info.format))
            .extent(vk::Extent3D {
                width: create_info.width,
                height: create_info.height,
                depth: 1,
            })
            .mip_levels(create_info.mip_levels.max(1))
            .array_layers(create_info.array_layers.max(1))
            .samples(util::to_vk_sample_count(create_info.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(util::to_vk_image_usage(create_info.image_usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = ctx
            .device
            .create_image(&image_create_info, None)
            .map_err(util::to_backend_error)?;

        // Allocate memory
        let mem_reqs = ctx.device.get_image_memory_requirements(image);
        let block = match allocator.allocate(&AllocationCreateDesc {
            name: create_info.debug_name.as_deref().unwrap_or("image"),
            requirements: mem_reqs,
            location: util::to_gpu_allocator_memory_location(create_info.memory_usage),
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(block) => block,
            Err(err) => {
                ctx.device.destroy_image(image, None);
                return Err(BackendError::Other(err.to_string()));
            }
        };

        if let Err(err) = ctx
            .device
            .bind_image_memory(image, block.memory(), block.offset())
        {
            ctx.device.destroy_image(image, None);
            let _ = allocator.free(block);
            return Err(util::to_backend_error(err));
        }

        if let Some(name) = &create_info.debug_name {
            ctx.set_debug_name(image, name);
        }

        Ok(Self {
            image,
            block: Some(block),
            format: create_info.format,
            samples: create_info.samples,
        })
    }

    pub(crate) unsafe fn release(&mut self, device: &ash::Device, allocator: &mut Allocator) {
        if let Some(block) = self.block.take() {
            if let Err(err) = allocator.free(block) {
                ard_log::warn!("unable to free image memory: {err}");
            }
        }
        device.destroy_image(self.image, None);
        self.image = vk::Image::null();
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline(always)]
    pub fn samples(&self) -> u8 {
        self.samples
    }
}

impl ImageView {
    pub(crate) unsafe fn new(
        device: &ash::Device,
        image: &Image,
        create_info: &ImageViewCreateInfo,
    ) -> Result<Self, BackendError> {
        let format = create_info.format.unwrap_or(image.format);
        let view_type = if create_info.array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };

        let view_create_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(view_type)
            .format(util::to_vk_format(format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: util::to_vk_image_aspect(format.aspect()),
                base_mip_level: create_info.base_mip_level,
                level_count: 1,
                base_array_layer: create_info.base_array_layer,
                layer_count: create_info.array_layers.max(1),
            });
        let view = device
            .create_image_view(&view_create_info, None)
            .map_err(util::to_backend_error)?;

        Ok(Self { view, format })
    }

    #[inline(always)]
    pub fn format(&self) -> Format {
        self.format
    }
}
