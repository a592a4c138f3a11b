//! GPU context initialization.
//!
//! This module binds a windowless wgpu context to an open
//! [`RenderNode`].  No surface is ever created: on Linux the Vulkan
//! backend needs none, and the GL backend falls back to a surfaceless
//! EGL display when no window system is around.  The `new_blocking`
//! constructor hides the asynchronous nature of requesting a device by
//! using the [`pollster`] crate.

use std::fmt;

use wgpu::{Adapter, Backend, Backends, Device, DeviceType, Instance, Queue};

use crate::error::{ComputeError, Result};
use crate::node::{Affinity, NodeIdentity, RenderNode};

/// Backends that can drive a render node without a window system.
const BACKENDS: Backends = Backends::VULKAN.union(Backends::GL);

/// A GPU context encapsulates all state needed to submit compute work
/// on the device behind one render node.
///
/// Field order is drop order: the queue and device go before the
/// adapter and instance, and the node's file descriptor is closed last.
pub struct GpuContext {
    /// Command submission queue used to send recorded command buffers
    /// to the GPU.
    pub queue: Queue,
    /// Logical device used to create resources and command encoders.
    pub device: Device,
    /// The adapter matched to the render node.
    pub adapter: Adapter,
    pub instance: Instance,
    node: RenderNode,
}

impl GpuContext {
    /// Create a context synchronously.
    ///
    /// Blocks the current thread while the device request completes.
    /// See [`Self::new_async`] for the asynchronous variant.
    pub fn new_blocking(node: RenderNode) -> Result<Self> {
        pollster::block_on(Self::new_async(node))
    }

    /// Create a context asynchronously.
    pub async fn new_async(node: RenderNode) -> Result<Self> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: BACKENDS,
            ..Default::default()
        });

        let adapter = select_adapter(&node, instance.enumerate_adapters(BACKENDS))
            .ok_or_else(|| ComputeError::NoAdapter(node.path().display().to_string()))?;
        let info = adapter.get_info();
        log::info!(
            "using adapter {} ({:?}, driver {} {})",
            info.name,
            info.backend,
            info.driver,
            info.driver_info
        );

        // Ask for everything the adapter offers so the compute limits
        // reported below are the hardware's, not the portable defaults.
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("render_node_compute_device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            queue,
            device,
            adapter,
            instance,
            node,
        })
    }

    pub fn node(&self) -> &RenderNode {
        &self.node
    }

    /// Compute-related limits of the device.
    pub fn compute_limits(&self) -> ComputeLimits {
        ComputeLimits::from(&self.device.limits())
    }
}

/// The compute limits worth knowing before picking a dispatch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeLimits {
    pub max_work_group_count: u32,
    pub max_work_group_size: [u32; 3],
    pub max_work_group_invocations: u32,
    pub max_shared_memory_size: u32,
}

impl From<&wgpu::Limits> for ComputeLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_work_group_count: limits.max_compute_workgroups_per_dimension,
            max_work_group_size: [
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_work_group_invocations: limits.max_compute_invocations_per_workgroup,
            max_shared_memory_size: limits.max_compute_workgroup_storage_size,
        }
    }
}

impl fmt::Display for ComputeLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.max_work_group_size;
        let n = self.max_work_group_count;
        writeln!(f, "max work group count: {n}, {n}, {n}")?;
        writeln!(f, "max work group size: {x}, {y}, {z}")?;
        writeln!(f, "max work group invocations: {}", self.max_work_group_invocations)?;
        write!(f, "max shared memory size: {}", self.max_shared_memory_size)
    }
}

/// What adapter selection needs to know about an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub vendor: u32,
    pub device: u32,
    pub device_type: DeviceType,
    pub backend: Backend,
    pub compute: bool,
}

impl Candidate {
    fn of(adapter: &Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            vendor: info.vendor,
            device: info.device,
            device_type: info.device_type,
            backend: info.backend,
            compute: adapter
                .get_downlevel_capabilities()
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
        }
    }
}

/// Rank a candidate for a node; `None` means it cannot be the node's GPU.
pub(crate) fn rank(node: &NodeIdentity, candidate: &Candidate) -> Option<(Affinity, u8)> {
    if !candidate.compute || candidate.device_type == DeviceType::Cpu {
        return None;
    }
    let affinity = node.affinity(candidate.vendor, candidate.device);
    if affinity == Affinity::Mismatch {
        return None;
    }
    let backend = match candidate.backend {
        Backend::Vulkan => 2,
        Backend::Gl => 1,
        _ => 0,
    };
    Some((affinity, backend))
}

fn select_adapter(node: &RenderNode, adapters: Vec<Adapter>) -> Option<Adapter> {
    let mut best: Option<((Affinity, u8), Adapter)> = None;
    for adapter in adapters {
        let candidate = Candidate::of(&adapter);
        let score = rank(node.identity(), &candidate);
        log::debug!(
            "adapter {} {:?}: {:?}",
            adapter.get_info().name,
            candidate.backend,
            score
        );
        let Some(score) = score else { continue };
        // Ties keep the first adapter enumerated.
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, adapter));
        }
    }
    best.map(|(_, adapter)| adapter)
}
