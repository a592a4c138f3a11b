//! Error type shared by every stage of the setup-dispatch-teardown
//! sequence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong between opening the render node and
/// reading results back.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("failed to open render node {}: {source}", path.display())]
    OpenNode {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a character device", .0.display())]
    NotADevice(PathBuf),

    #[error("no compute-capable GPU adapter found for {0}")]
    NoAdapter(String),

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("shader compilation failed:\n{0}")]
    Compile(String),

    #[error(
        "combined sampler `{0}` is not supported; declare a `texture2D` (or `utexture2D`/`itexture2D`) \
         and a separate `sampler`, and combine them at the call site"
    )]
    CombinedSampler(String),

    #[error("shader has no compute entry point{}", .0.as_ref().map(|n| format!(" named `{n}`")).unwrap_or_default())]
    NoEntryPoint(Option<String>),

    #[error("unsupported shader resource `{name}`: {reason}")]
    UnsupportedResource { name: String, reason: String },

    #[error("resource `{name}` needs {required} bytes but only {available} are allocated")]
    BufferTooSmall {
        name: String,
        required: u64,
        available: u64,
    },

    #[error("resource `{name}` would need {size} bytes but the device binds at most {limit}")]
    BufferTooLarge { name: String, size: u64, limit: u64 },

    #[error("work group count {requested:?} exceeds the device limit of {limit} per dimension")]
    TooManyGroups { requested: [u32; 3], limit: u32 },

    #[error("GPU validation error: {0}")]
    Validation(String),

    #[error("failed to map buffer for reading: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
}

pub type Result<T> = std::result::Result<T, ComputeError>;
