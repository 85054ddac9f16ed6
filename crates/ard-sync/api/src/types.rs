use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum Format {
    #[default]
    Undefined,

    // R8
    R8Unorm,
    R8UInt,

    // R16
    R16SFloat,

    // R32
    R32UInt,
    R32SFloat,

    // RG16
    Rg16SFloat,

    // RGBA8
    Rgba8Unorm,
    Rgba8Srgb,

    // RGBA16
    Rgba16SFloat,

    // RGBA32
    Rgba32SFloat,

    // BGRA8
    Bgra8Unorm,
    Bgra8Srgb,

    // Depth
    D16Unorm,
    D24UnormS8Uint,
    D32Sfloat,
    D32SfloatS8Uint,
}

/// The image layouts the tracker can place an image in.
#[derive(
    Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    Preinitialized,
    PresentSrc,
}

/// The two independent execution domains a resource can be bound in.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Graphics = 0,
    Compute = 1,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex = 0,
    TessellationControl = 1,
    TessellationEvaluation = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryUsage {
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

bitflags! {
    /// Memory access classes. Bit values match Vulkan.
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x0000_0001;
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const INPUT_ATTACHMENT_READ = 0x0000_0010;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x0000_0200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
        const COLOR_ATTACHMENT_READ_NONCOHERENT = 0x0008_0000;
        const TRANSFORM_FEEDBACK_WRITE = 0x0200_0000;
        const TRANSFORM_FEEDBACK_COUNTER_READ = 0x0400_0000;
        const TRANSFORM_FEEDBACK_COUNTER_WRITE = 0x0800_0000;

        const ALL_READ = Self::INDIRECT_COMMAND_READ.bits()
            | Self::INDEX_READ.bits()
            | Self::VERTEX_ATTRIBUTE_READ.bits()
            | Self::UNIFORM_READ.bits()
            | Self::INPUT_ATTACHMENT_READ.bits()
            | Self::SHADER_READ.bits()
            | Self::COLOR_ATTACHMENT_READ.bits()
            | Self::DEPTH_STENCIL_ATTACHMENT_READ.bits()
            | Self::TRANSFER_READ.bits()
            | Self::HOST_READ.bits()
            | Self::MEMORY_READ.bits()
            | Self::COLOR_ATTACHMENT_READ_NONCOHERENT.bits()
            | Self::TRANSFORM_FEEDBACK_COUNTER_READ.bits();
    }
}

bitflags! {
    /// Pipeline stages. Bit values match Vulkan, so a lower bit is a logically earlier stage.
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct PipelineStageFlags: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const TESSELLATION_CONTROL_SHADER = 0x0000_0010;
        const TESSELLATION_EVALUATION_SHADER = 0x0000_0020;
        const GEOMETRY_SHADER = 0x0000_0040;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const ALL_GRAPHICS = 0x0000_8000;
        const ALL_COMMANDS = 0x0001_0000;
        const TRANSFORM_FEEDBACK = 0x0100_0000;

        const GRAPHICS_SHADERS = Self::VERTEX_SHADER.bits()
            | Self::TESSELLATION_CONTROL_SHADER.bits()
            | Self::TESSELLATION_EVALUATION_SHADER.bits()
            | Self::GEOMETRY_SHADER.bits()
            | Self::FRAGMENT_SHADER.bits();
        const ALL_SHADERS = Self::GRAPHICS_SHADERS.bits() | Self::COMPUTE_SHADER.bits();
    }
}

bitflags! {
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const UNIFORM_TEXEL_BUFFER = 0x0000_0004;
        const STORAGE_TEXEL_BUFFER = 0x0000_0008;
        const UNIFORM_BUFFER = 0x0000_0010;
        const STORAGE_BUFFER = 0x0000_0020;
        const INDEX_BUFFER = 0x0000_0040;
        const VERTEX_BUFFER = 0x0000_0080;
        const INDIRECT_BUFFER = 0x0000_0100;
        const TRANSFORM_FEEDBACK_BUFFER = 0x0000_0800;
    }
}

bitflags! {
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 0x0000_0001;
        const TRANSFER_DST = 0x0000_0002;
        const SAMPLED = 0x0000_0004;
        const STORAGE = 0x0000_0008;
        const COLOR_ATTACHMENT = 0x0000_0010;
        const DEPTH_STENCIL_ATTACHMENT = 0x0000_0020;
        const TRANSIENT_ATTACHMENT = 0x0000_0040;
        const INPUT_ATTACHMENT = 0x0000_0080;
    }
}

bitflags! {
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct ImageAspect: u32 {
        const COLOR = 0b001;
        const DEPTH = 0b010;
        const STENCIL = 0b100;
    }
}

impl Format {
    #[inline(always)]
    pub fn aspect(self) -> ImageAspect {
        match self {
            Format::Undefined => ImageAspect::empty(),
            Format::D16Unorm | Format::D32Sfloat => ImageAspect::DEPTH,
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint => {
                ImageAspect::DEPTH | ImageAspect::STENCIL
            }
            _ => ImageAspect::COLOR,
        }
    }

    #[inline(always)]
    pub fn is_depth_stencil(self) -> bool {
        self.aspect()
            .intersects(ImageAspect::DEPTH | ImageAspect::STENCIL)
    }
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Graphics, Domain::Compute];

    #[inline(always)]
    pub const fn idx(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn other(self) -> Domain {
        match self {
            Domain::Graphics => Domain::Compute,
            Domain::Compute => Domain::Graphics,
        }
    }
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    #[inline(always)]
    pub const fn idx(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn domain(self) -> Domain {
        match self {
            ShaderStage::Compute => Domain::Compute,
            _ => Domain::Graphics,
        }
    }

    /// The pipeline stage this shader stage executes in.
    #[inline(always)]
    pub const fn pipeline_stage(self) -> PipelineStageFlags {
        match self {
            ShaderStage::Vertex => PipelineStageFlags::VERTEX_SHADER,
            ShaderStage::TessellationControl => PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
            ShaderStage::TessellationEvaluation => {
                PipelineStageFlags::TESSELLATION_EVALUATION_SHADER
            }
            ShaderStage::Geometry => PipelineStageFlags::GEOMETRY_SHADER,
            ShaderStage::Fragment => PipelineStageFlags::FRAGMENT_SHADER,
            ShaderStage::Compute => PipelineStageFlags::COMPUTE_SHADER,
        }
    }
}

impl AccessFlags {
    /// Any bit outside of the read classes makes an access a write.
    #[inline(always)]
    pub fn is_write(self) -> bool {
        !self.difference(AccessFlags::ALL_READ).is_empty()
    }
}
