use serde::{Deserialize, Serialize};

use crate::{
    types::{AccessFlags, ImageAspect, ImageLayout, PipelineStageFlags},
    Backend,
};

/// Custom sample positions used when a depth buffer has to be re-evaluated.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleLocations {
    pub samples_per_pixel: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    /// Positions in `[0, 1)` for every sample of every pixel in the grid.
    pub locations: Vec<(f32, f32)>,
}

/// A global memory dependency.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

pub struct BufferBarrier<'a, B: Backend> {
    pub buffer: &'a B::Buffer,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// A dependency on a whole image, optionally transitioning its layout.
pub struct ImageBarrier<'a, B: Backend> {
    pub image: &'a B::Image,
    pub aspect: ImageAspect,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    /// Chained onto the barrier when a depth image is re-evaluated with custom sample
    /// positions.
    pub sample_locations: Option<&'a SampleLocations>,
}

pub enum Barrier<'a, B: Backend> {
    Memory(MemoryBarrier),
    Buffer(BufferBarrier<'a, B>),
    Image(ImageBarrier<'a, B>),
}

/// A single pipeline barrier command.
pub struct PipelineBarrier<'a, B: Backend> {
    pub src_stage: PipelineStageFlags,
    pub dst_stage: PipelineStageFlags,
    pub barrier: Barrier<'a, B>,
}
