//! Run a single compute shader on a Linux DRM render node.
//!
//! No display server is involved: the render node is opened directly,
//! a windowless [wgpu](https://github.com/gfx-rs/wgpu) context is bound
//! to the GPU behind it, and one GLSL or WGSL compute program is
//! compiled, given its buffers and textures, dispatched once and read
//! back.  The API is synchronous and blocking; every call returns only
//! after the GPU is done.

pub mod bindings;
pub mod buffer;
pub mod compute;
pub mod context;
pub mod error;
pub mod hexdump;
pub mod logging;
pub mod node;
pub mod options;
pub mod program;
pub mod reflect;
pub mod texture;

pub use bindings::{BindingSizes, Bindings};
pub use buffer::GpuBuffer;
pub use compute::{check_groups, dispatch, run, Dump, RunReport};
pub use context::{ComputeLimits, GpuContext};
pub use error::{ComputeError, Result};
pub use hexdump::hexdump_dwords;
pub use node::RenderNode;
pub use options::{Options, WorkGroups};
pub use program::{ComputeProgram, ShaderLanguage};
