//! Error types for the decode and render pipelines.
//!
//! Decode errors are scoped to a single channel and surface as a per-layer
//! failure; GPU errors are fatal only to renderer construction.  Nothing in
//! this crate aborts the whole document over one bad layer.

/// Failure while decoding one compressed channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Compression tag not one of raw / RLE / zip / zip-with-prediction.
    UnknownCompression(u16),
    /// The compressed stream ended before the scanline byte-count table did.
    TruncatedInput { expected: usize, got: usize },
    /// Zlib stream could not be inflated.
    Inflate(String),
    /// Channel dimensions produce a zero or overflowing buffer size.
    BadDimensions { width: u32, height: u32, depth: u16 },
    /// The worker thread is gone (engine already torn down).
    WorkerGone,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnknownCompression(tag) => {
                write!(f, "unknown channel compression tag {}", tag)
            }
            DecodeError::TruncatedInput { expected, got } => {
                write!(f, "truncated channel data: expected {} bytes, got {}", expected, got)
            }
            DecodeError::Inflate(e) => write!(f, "zlib inflate failed: {}", e),
            DecodeError::BadDimensions { width, height, depth } => {
                write!(f, "invalid channel dimensions {}x{} at depth {}", width, height, depth)
            }
            DecodeError::WorkerGone => write!(f, "decode worker has shut down"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(e: std::io::Error) -> Self {
        DecodeError::Inflate(e.to_string())
    }
}

/// Failure initializing or driving the GPU.
#[derive(Debug)]
pub enum GpuError {
    /// No adapter at all — not even the software rasterizer.
    NoAdapter,
    /// Adapter found but device request was refused.
    DeviceRequest(String),
    /// Requested texture exceeds the device limit.
    TextureTooLarge { width: u32, height: u32, max: u32 },
    /// Staging-buffer map for readback failed.
    Readback(String),
}

impl std::fmt::Display for GpuError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "no GPU adapter available"),
            GpuError::DeviceRequest(e) => write!(f, "GPU device request failed: {}", e),
            GpuError::TextureTooLarge { width, height, max } => {
                write!(f, "texture {}x{} exceeds device limit {}", width, height, max)
            }
            GpuError::Readback(e) => write!(f, "GPU readback failed: {}", e),
        }
    }
}

impl std::error::Error for GpuError {}

/// Top-level engine errors surfaced to the host.
#[derive(Debug)]
pub enum ViewerError {
    Gpu(GpuError),
    /// A layer's pixel data failed to decode; carries the layer index.
    LayerDecode(usize, DecodeError),
}

impl std::fmt::Display for ViewerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerError::Gpu(e) => write!(f, "GPU error: {}", e),
            ViewerError::LayerDecode(idx, e) => write!(f, "layer {} failed to decode: {}", idx, e),
        }
    }
}

impl std::error::Error for ViewerError {}

impl From<GpuError> for ViewerError {
    fn from(e: GpuError) -> Self {
        ViewerError::Gpu(e)
    }
}
