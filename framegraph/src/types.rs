//! Resource descriptions and usage declarations.
//!
//! Logical resources come in three kinds: textures, buffers and opaque
//! host-memory blobs. A declared resource carries a static description
//! (or an automatic-resolution binding for textures), an optional history
//! policy, and is consumed by nodes under a [`ResourceUsage`] describing
//! access mode and pipeline stage. Usages drive barrier placement.

use bitflags::bitflags;

/// The kind of a logical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// GPU texture.
    Texture,
    /// GPU buffer.
    Buffer,
    /// Opaque CPU-side memory block.
    Blob,
}

/// Texture format enumeration.
///
/// Only formats the frame graph needs to size allocations for; backends
/// translate these to their native formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit red channel, float.
    R32Float,
    /// 32-bit red channel, unsigned integer.
    R32Uint,
    /// 32-bit depth, float.
    Depth32Float,
}

impl TextureFormat {
    /// Size in bytes of one pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::R32Uint => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::Depth32Float => 4,
        }
    }
}

/// Description of a texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescription {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Mip level count.
    pub mip_levels: u32,
}

impl TextureDescription {
    /// Create a single-mip 2D texture description.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
        }
    }

    /// Conservative byte size of the full mip chain, for heap placement.
    pub fn byte_size(&self) -> u64 {
        let mut total = 0u64;
        let (mut w, mut h) = (self.width.max(1) as u64, self.height.max(1) as u64);
        for _ in 0..self.mip_levels.max(1) {
            total += w * h * self.format.block_size() as u64;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total
    }
}

/// Description of a buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescription {
    /// Size in bytes.
    pub size: u64,
}

impl BufferDescription {
    /// Create a buffer description of the given byte size.
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

/// Description of a CPU-side blob resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobDescription {
    /// Size in bytes.
    pub size: usize,
    /// Required alignment in bytes. Must be a power of two.
    pub align: usize,
}

impl BlobDescription {
    /// Create a blob description with the given size and alignment.
    pub fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

/// Static description of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDescription {
    /// GPU texture.
    Texture(TextureDescription),
    /// GPU buffer.
    Buffer(BufferDescription),
    /// CPU memory block.
    Blob(BlobDescription),
}

impl ResourceDescription {
    /// The kind of resource this description creates.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Texture(_) => ResourceKind::Texture,
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Blob(_) => ResourceKind::Blob,
        }
    }

    /// Byte size used for lifetime-based placement.
    pub fn byte_size(&self) -> u64 {
        match self {
            Self::Texture(t) => t.byte_size(),
            Self::Buffer(b) => b.size,
            Self::Blob(b) => b.size as u64,
        }
    }

    /// Whether the description can actually be allocated.
    ///
    /// Zero-sized resources are considered broken declarations; validity
    /// analysis drops them with a diagnostic instead of erroring.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Texture(t) => t.width > 0 && t.height > 0 && t.mip_levels > 0,
            Self::Buffer(b) => b.size > 0,
            Self::Blob(b) => b.size > 0 && b.align.is_power_of_two(),
        }
    }
}

/// What happens to a history resource's previous-frame contents when it is
/// first read after a (re)allocation, before any frame has produced data
/// for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum History {
    /// The resource keeps no history. Reading last frame's contents is a
    /// declaration error.
    #[default]
    No,
    /// First-frame history reads see undefined contents.
    DiscardOnFirstFrame,
    /// First-frame history reads see all-zero contents. Used for
    /// cumulative resources that blend previous and current frames.
    ClearZeroOnFirstFrame,
}

/// Access mode of a resource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// The node only reads the resource.
    ReadOnly,
    /// The node reads and/or writes the resource.
    ReadWrite,
}

impl Access {
    /// Whether this access may modify the resource.
    pub fn is_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

bitflags! {
    /// Pipeline stages at which a resource request takes effect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StageFlags: u32 {
        /// Vertex processing and earlier.
        const PRE_RASTER = 1 << 0;
        /// Fragment processing and attachment output.
        const POST_RASTER = 1 << 1;
        /// Compute dispatches.
        const COMPUTE = 1 << 2;
        /// Copy/blit operations.
        const TRANSFER = 1 << 3;
        /// CPU-side access.
        const HOST = 1 << 4;
    }
}

impl Default for StageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// How a resource is bound while a node runs.
///
/// Together with the access mode this determines the state the resource
/// must be transitioned into before the node executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    /// Bound as a color render target.
    RenderTarget,
    /// Bound as a depth/stencil attachment.
    DepthAttachment,
    /// Sampled or fetched in a shader.
    ShaderResource,
    /// Bound as a storage image/buffer.
    Storage,
    /// Source or destination of a copy.
    Transfer,
    /// Accessed from the CPU (blobs).
    Host,
}

/// A resource usage: binding kind, access mode and pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceUsage {
    /// How the resource is bound.
    pub kind: UsageKind,
    /// Read-only or read-write.
    pub access: Access,
    /// Stages at which the usage occurs.
    pub stage: StageFlags,
}

impl ResourceUsage {
    /// Shorthand for a read-only usage.
    pub fn read(kind: UsageKind, stage: StageFlags) -> Self {
        Self {
            kind,
            access: Access::ReadOnly,
            stage,
        }
    }

    /// Shorthand for a read-write usage.
    pub fn write(kind: UsageKind, stage: StageFlags) -> Self {
        Self {
            kind,
            access: Access::ReadWrite,
            stage,
        }
    }

    /// Whether the usage may modify the resource.
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }
}

/// A resource state change between two consecutive usages.
///
/// `from` is `None` when the previous state is unknown, e.g. when
/// re-activating a history resource after recompilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// State the resource is currently in, if known.
    pub from: Option<ResourceUsage>,
    /// State the resource must be in next.
    pub to: ResourceUsage,
}

/// How backing storage is initialized when a resource is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    /// Contents start undefined; the first user overwrites them.
    Discard,
    /// Contents start as all zeroes.
    ClearToZero,
}

/// Derive the activation for a history resource's first-frame read from
/// its declared history policy.
///
/// Returns `None` for [`History::No`], where reading history is invalid.
pub fn activation_from_history(history: History) -> Option<Activation> {
    match history {
        History::No => None,
        History::DiscardOnFirstFrame => Some(Activation::Discard),
        History::ClearZeroOnFirstFrame => Some(Activation::ClearToZero),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_byte_size_with_mips() {
        let desc = TextureDescription {
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 3,
        };
        // 4x4 + 2x2 + 1x1 pixels at 4 bytes each.
        assert_eq!(desc.byte_size(), (16 + 4 + 1) * 4);
    }

    #[test]
    fn test_zero_sized_descriptions_are_malformed() {
        assert!(!ResourceDescription::Buffer(BufferDescription::new(0)).is_well_formed());
        assert!(
            !ResourceDescription::Texture(TextureDescription::new_2d(
                0,
                4,
                TextureFormat::Rgba8Unorm
            ))
            .is_well_formed()
        );
        assert!(!ResourceDescription::Blob(BlobDescription::new(16, 3)).is_well_formed());
        assert!(ResourceDescription::Blob(BlobDescription::new(16, 8)).is_well_formed());
    }

    #[test]
    fn test_access_write() {
        assert!(Access::ReadWrite.is_write());
        assert!(!Access::ReadOnly.is_write());
    }

    #[test]
    fn test_activation_from_history() {
        assert_eq!(activation_from_history(History::No), None);
        assert_eq!(
            activation_from_history(History::DiscardOnFirstFrame),
            Some(Activation::Discard)
        );
        assert_eq!(
            activation_from_history(History::ClearZeroOnFirstFrame),
            Some(Activation::ClearToZero)
        );
    }
}
