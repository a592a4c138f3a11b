//! Dispatching the compute program and the end-to-end run.
//!
//! [`run`] is the whole tool in one call: open the render node, bring
//! up a windowless context on it, compile and link the shader, bind its
//! resources, dispatch once, read the requested results back and tear
//! everything down again.  [`dispatch`] is the bare step on its own for
//! callers that manage the context and resources themselves.

use crate::bindings::Bindings;
use crate::context::{ComputeLimits, GpuContext};
use crate::error::{ComputeError, Result};
use crate::node::RenderNode;
use crate::options::{Options, WorkGroups};
use crate::program::ComputeProgram;
use crate::reflect::ResourceKind;

/// Record one compute pass, submit it and block until it has finished.
pub fn dispatch(
    context: &GpuContext,
    program: &ComputeProgram,
    bindings: &Bindings,
    groups: WorkGroups,
) -> Result<()> {
    check_groups(&context.device.limits(), groups)?;

    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("compute_encoder"),
        });
    {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("compute_pass"),
            timestamp_writes: None,
        });
        cpass.set_pipeline(&program.pipeline);
        for (index, group) in bindings.bind_groups().iter().enumerate() {
            cpass.set_bind_group(index as u32, group, &[]);
        }
        cpass.dispatch_workgroups(groups.x, groups.y, groups.z);
    }
    context.queue.submit([encoder.finish()]);
    if let Some(error) = pollster::block_on(context.device.pop_error_scope()) {
        return Err(ComputeError::Validation(error.to_string()));
    }

    context.device.poll(wgpu::PollType::Wait)?;
    log::info!("Compute shader dispatched and finished successfully");
    Ok(())
}

/// Reject group counts above the per-dimension limit.  Zero groups along
/// any axis is a valid, empty dispatch.
pub fn check_groups(limits: &wgpu::Limits, groups: WorkGroups) -> Result<()> {
    let limit = limits.max_compute_workgroups_per_dimension;
    let requested = groups.as_array();
    if requested.iter().any(|&n| n > limit) {
        return Err(ComputeError::TooManyGroups { requested, limit });
    }
    Ok(())
}

/// Contents of one resource after the dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dump {
    pub name: String,
    pub kind: ResourceKind,
    pub group: u32,
    pub binding: u32,
    pub words: Vec<u32>,
}

impl Dump {
    /// `Dump SSBO: Output at 1`, with the group spelled out (`at 1:0`)
    /// only when it is not 0.
    pub fn header(&self) -> String {
        let what = match self.kind {
            ResourceKind::StorageImage { .. } => "image",
            _ => "SSBO",
        };
        if self.group == 0 {
            format!("Dump {what}: {} at {}", self.name, self.binding)
        } else {
            format!("Dump {what}: {} at {}:{}", self.name, self.group, self.binding)
        }
    }
}

/// What a run found out and produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub limits: ComputeLimits,
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    pub dumps: Vec<Dump>,
}

/// Run `source` once on the render node named in `options`.
pub fn run(options: &Options, source: &str) -> Result<RunReport> {
    let node = RenderNode::open(&options.device)?;
    let context = GpuContext::new_blocking(node)?;

    let limits = context.compute_limits();
    for line in limits.to_string().lines() {
        log::info!("{line}");
    }

    let program = ComputeProgram::compile(
        &context,
        source,
        options.language(),
        options.entry.as_deref(),
    )?;
    let bindings = Bindings::setup(&context, &program, options.binding_sizes())?;

    log::info!("dispatching {} work groups", options.groups);
    dispatch(&context, &program, &bindings, options.groups)?;

    let mut dumps = Vec::new();
    for name in &options.dump {
        match (bindings.get(name), bindings.read(&context, name)?) {
            (Some(bound), Some(words)) => dumps.push(Dump {
                name: name.clone(),
                kind: bound.resource.kind,
                group: bound.resource.group,
                binding: bound.resource.binding,
                words,
            }),
            _ => log::warn!("no storage buffer or image named `{name}` to dump"),
        }
    }

    let report = RunReport {
        limits,
        entry_point: program.entry_point().to_string(),
        workgroup_size: program.workgroup_size(),
        dumps,
    };
    // Teardown, in reverse order of setup.
    drop(bindings);
    drop(program);
    drop(context);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(x: u32, y: u32, z: u32) -> WorkGroups {
        WorkGroups { x, y, z }
    }

    fn dump(name: &str, kind: ResourceKind, group: u32, binding: u32) -> Dump {
        Dump {
            name: name.to_string(),
            kind,
            group,
            binding,
            words: Vec::new(),
        }
    }

    #[test]
    fn dump_headers_name_the_resource() {
        let ssbo = ResourceKind::StorageBuffer { read_only: false };
        assert_eq!(dump("Output", ssbo, 0, 1).header(), "Dump SSBO: Output at 1");
        assert_eq!(dump("Output", ssbo, 2, 1).header(), "Dump SSBO: Output at 2:1");

        let image = ResourceKind::StorageImage {
            format: wgpu::TextureFormat::R32Uint,
            access: wgpu::StorageTextureAccess::WriteOnly,
        };
        assert_eq!(dump("img2d0out", image, 1, 1).header(), "Dump image: img2d0out at 1:1");
    }

    #[test]
    fn group_counts_up_to_the_limit_pass() {
        let limits = wgpu::Limits::default();
        let max = limits.max_compute_workgroups_per_dimension;
        assert!(check_groups(&limits, groups(1, 1, 1)).is_ok());
        assert!(check_groups(&limits, groups(max, max, max)).is_ok());
    }

    #[test]
    fn zero_groups_is_an_empty_dispatch() {
        let limits = wgpu::Limits::default();
        assert!(check_groups(&limits, groups(0, 0, 0)).is_ok());
        assert!(check_groups(&limits, groups(0, 4, 1)).is_ok());
    }

    #[test]
    fn one_past_the_limit_is_rejected() {
        let limits = wgpu::Limits::default();
        let max = limits.max_compute_workgroups_per_dimension;
        let err = check_groups(&limits, groups(1, max + 1, 1)).unwrap_err();
        match err {
            ComputeError::TooManyGroups { requested, limit } => {
                assert_eq!(requested, [1, max + 1, 1]);
                assert_eq!(limit, max);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
