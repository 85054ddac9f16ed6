use serde::{Deserialize, Serialize};

use crate::types::{BufferUsage, MemoryUsage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferCreateInfo {
    /// The size in bytes of the buffer to create.
    pub size: u64,
    /// Describes the supported usage types of this buffer.
    pub buffer_usage: BufferUsage,
    /// Describes what memory operations are supported by this buffer.
    pub memory_usage: MemoryUsage,
    /// The backend *should* use the provided debug name for easy identification.
    pub debug_name: Option<String>,
}
