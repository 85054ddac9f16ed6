use serde::{Deserialize, Serialize};

use crate::types::{Format, ImageUsage, MemoryUsage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCreateInfo {
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub samples: u8,
    pub image_usage: ImageUsage,
    pub memory_usage: MemoryUsage,
    /// The image is presented. Affects how its contents are loaded on the first frame of a new
    /// swapchain.
    pub presentable: bool,
    /// The backend *should* use the provided debug name for easy identification.
    pub debug_name: Option<String>,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct ImageViewCreateInfo {
    /// Defaults to the format of the image.
    pub format: Option<Format>,
    pub base_mip_level: u32,
    pub base_array_layer: u32,
    pub array_layers: u32,
}

impl Default for ImageViewCreateInfo {
    fn default() -> Self {
        Self {
            format: None,
            base_mip_level: 0,
            base_array_layer: 0,
            array_layers: 1,
        }
    }
}
