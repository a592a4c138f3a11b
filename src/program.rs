//! Compiling and linking a compute program.
//!
//! The shader is parsed by naga up front so that syntax errors come back
//! as a readable log and so the resource list can be reflected; the same
//! module is then handed to the device, which lowers it for whichever
//! backend drives the render node.

use std::borrow::Cow;
use std::path::Path;
use std::str::FromStr;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::context::GpuContext;
use crate::error::{ComputeError, Result};
use crate::reflect::{self, Resource};

/// Source language of a compute shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderLanguage {
    Glsl,
    Wgsl,
}

impl ShaderLanguage {
    /// `.wgsl` files are WGSL; anything else (`.comp`, `.glsl`, ...) is
    /// taken to be GLSL.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("wgsl") => Self::Wgsl,
            _ => Self::Glsl,
        }
    }
}

impl FromStr for ShaderLanguage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "glsl" => Ok(Self::Glsl),
            "wgsl" => Ok(Self::Wgsl),
            other => Err(format!("unknown shader language `{other}`")),
        }
    }
}

/// Parse and validate `source`, returning the formatted diagnostics as a
/// [`ComputeError::Compile`] on failure.
///
/// GLSL may be written for Vulkan (`#version 450`) or for GLES 3.1
/// (`#version 310 es`); see [`prepare_glsl`] for what the latter goes
/// through first.
pub fn parse_source(source: &str, language: ShaderLanguage) -> Result<naga::Module> {
    let (module, source) = match language {
        ShaderLanguage::Glsl => {
            let source = prepare_glsl(source)?;
            let options = naga::front::glsl::Options::from(naga::ShaderStage::Compute);
            let module = naga::front::glsl::Frontend::default()
                .parse(&options, &source)
                .map_err(|errors| ComputeError::Compile(errors.emit_to_string(&source)))?;
            (module, source)
        }
        ShaderLanguage::Wgsl => {
            let module = naga::front::wgsl::parse_str(source)
                .map_err(|error| ComputeError::Compile(error.emit_to_string(source)))?;
            (module, Cow::Borrowed(source))
        }
    };

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| ComputeError::Compile(error.emit_to_string(&source)))?;

    Ok(module)
}

/// Bring GLES compute shaders into the dialect naga's GLSL front-end reads.
///
/// naga accepts desktop `#version 440`/`450`/`460` only.  A GLES
/// `#version 3x0 es` directive becomes `#version 450` and default
/// `precision` statements are blanked; both edits keep line numbers, so
/// diagnostics still point at the user's source.  Combined sampler
/// uniforms (`uniform usampler2D tex;`) have no equivalent in naga and are
/// rejected with [`ComputeError::CombinedSampler`].
pub fn prepare_glsl(source: &str) -> Result<Cow<'_, str>> {
    let mut changed = false;
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        if let Some(name) = combined_sampler(trimmed) {
            return Err(ComputeError::CombinedSampler(name.to_string()));
        }
        if is_es_version(trimmed) {
            lines.push("#version 450");
            changed = true;
        } else if trimmed.starts_with("precision ") {
            lines.push("");
            changed = true;
        } else {
            lines.push(line);
        }
    }

    if !changed {
        return Ok(Cow::Borrowed(source));
    }
    log::debug!("rewrote GLES shader as #version 450");
    let mut out = lines.join("\n");
    out.push('\n');
    Ok(Cow::Owned(out))
}

fn is_es_version(line: &str) -> bool {
    let Some(rest) = line.strip_prefix('#') else {
        return false;
    };
    let mut words = rest.split_whitespace();
    words.next() == Some("version")
        && words.next().is_some_and(|v| v.starts_with('3'))
        && words.next() == Some("es")
}

/// The variable name of a combined sampler uniform declared on `line`.
fn combined_sampler(line: &str) -> Option<&str> {
    let mut words = line
        .split(|c: char| c.is_whitespace() || c == ';' || c == ')')
        .filter(|w| !w.is_empty());
    if line.starts_with("//") || !line.contains("uniform") {
        return None;
    }
    while let Some(word) = words.next() {
        let base = word
            .strip_prefix('u')
            .or_else(|| word.strip_prefix('i'))
            .unwrap_or(word);
        let Some(dim) = base.strip_prefix("sampler") else {
            continue;
        };
        if dim.starts_with(|c: char| matches!(c, '1'..='3'))
            || dim.starts_with("Cube")
            || dim.starts_with("Buffer")
        {
            return words.next();
        }
    }
    None
}

/// A linked compute pipeline together with what was learned about its
/// interface.
pub struct ComputeProgram {
    pub pipeline: wgpu::ComputePipeline,
    /// One layout per bind group index, including empty gaps.
    pub layouts: Vec<wgpu::BindGroupLayout>,
    resources: Vec<Resource>,
    entry_point: String,
    workgroup_size: [u32; 3],
}

impl ComputeProgram {
    /// Compile `source` and link it into a compute pipeline.
    ///
    /// `entry` selects a compute entry point by name; by default the first
    /// one is used, which for GLSL is always `main`.
    pub fn compile(
        context: &GpuContext,
        source: &str,
        language: ShaderLanguage,
        entry: Option<&str>,
    ) -> Result<Self> {
        let module = parse_source(source, language)?;
        let (entry_point, workgroup_size) = reflect::entry_point(&module, entry)?;
        let resources = reflect::reflect(&module)?;
        for resource in &resources {
            log::debug!(
                "resource {} at {}:{} {:?}",
                resource.name,
                resource.group,
                resource.binding,
                resource.kind
            );
        }

        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("compute_shader"),
            source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
        });

        let group_count = resources.iter().map(|r| r.group + 1).max().unwrap_or(0);
        let layouts: Vec<_> = (0..group_count)
            .map(|group| {
                let entries: Vec<_> = resources
                    .iter()
                    .filter(|r| r.group == group)
                    .map(Resource::layout_entry)
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("compute_bind_group_layout"),
                    entries: &entries,
                })
            })
            .collect();
        let layout_refs: Vec<_> = layouts.iter().collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("compute_pipeline_layout"),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("compute_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(&entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ComputeError::Validation(error.to_string()));
        }
        log::info!(
            "linked entry point `{entry_point}` with local size {}x{}x{}",
            workgroup_size[0],
            workgroup_size[1],
            workgroup_size[2]
        );

        Ok(Self {
            pipeline,
            layouts,
            resources,
            entry_point,
            workgroup_size,
        })
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Look a resource up by block, instance or variable name.
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.is_named(name))
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}
