//! Shader resource reflection.
//!
//! A GL program is queried by name for its blocks and uniforms; the
//! equivalent here is walking the naga module's globals.  Each global that
//! carries a `(group, binding)` pair becomes a [`Resource`] that knows its
//! name, where it binds and what kind of object must back it.

use naga::{AddressSpace, ImageClass, ImageDimension, ScalarKind, StorageAccess, TypeInner};

use crate::error::{ComputeError, Result};

/// A bindable shader resource.
///
/// Resources are what a GL program would be asked for by name: buffer
/// blocks, uniform blocks, textures, images and samplers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Block name for buffer blocks, variable name otherwise.
    pub name: String,
    /// Instance name of a buffer block, if it has one.
    pub instance: Option<String>,
    pub group: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    /// Smallest valid size in bytes of a buffer binding; zero otherwise.
    pub min_size: u64,
}

/// The kind of GPU object a [`Resource`] must be backed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Shader storage block (SSBO).
    StorageBuffer { read_only: bool },
    /// Uniform block (UBO).
    UniformBuffer,
    /// Texture read through a sampler or `texelFetch`.
    SampledTexture { format: wgpu::TextureFormat },
    /// Image bound for load/store.
    StorageImage {
        format: wgpu::TextureFormat,
        access: wgpu::StorageTextureAccess,
    },
    /// Separate sampler, combined with a texture at the call site.
    Sampler,
}

impl Resource {
    /// Whether `name` refers to this resource, by block or instance name.
    pub fn is_named(&self, name: &str) -> bool {
        self.name == name || self.instance.as_deref() == Some(name)
    }

    /// Whether the resource is a shader input and gets the index pattern
    /// as its initial contents.
    ///
    /// Uniform blocks and sampled textures always are.  Storage buffers
    /// and images are inputs when their name contains "in" in any case,
    /// which is a plain substring test: `Input` and `img2d0in` qualify,
    /// but so do `Points`, `Indices` and `Binding`.
    pub fn is_input(&self) -> bool {
        match self.kind {
            ResourceKind::UniformBuffer | ResourceKind::SampledTexture { .. } => true,
            ResourceKind::StorageBuffer { .. } | ResourceKind::StorageImage { .. } => {
                self.name.to_ascii_lowercase().contains("in")
            }
            ResourceKind::Sampler => false,
        }
    }

    /// The bind group layout entry this resource occupies.
    pub fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self.kind {
            ResourceKind::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ResourceKind::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            ResourceKind::SampledTexture { format } => wgpu::BindingType::Texture {
                sample_type: sample_type(format),
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ResourceKind::StorageImage { format, access } => wgpu::BindingType::StorageTexture {
                access,
                format,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            ResourceKind::Sampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
            }
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

/// 32-bit single-channel formats are never filterable without extra
/// features, so every sampled texture is bound as unfilterable.
fn sample_type(format: wgpu::TextureFormat) -> wgpu::TextureSampleType {
    match format {
        wgpu::TextureFormat::R32Uint => wgpu::TextureSampleType::Uint,
        wgpu::TextureFormat::R32Sint => wgpu::TextureSampleType::Sint,
        _ => wgpu::TextureSampleType::Float { filterable: false },
    }
}

/// List every bound global of `module`, sorted by group then binding.
pub fn reflect(module: &naga::Module) -> Result<Vec<Resource>> {
    let gctx = module.to_ctx();
    let mut resources = Vec::new();

    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let ty = &module.types[var.ty];
        let var_name = var.name.clone().unwrap_or_default();

        let (name, instance, kind, min_size) = match var.space {
            AddressSpace::Storage { access } => (
                ty.name.clone().unwrap_or_else(|| var_name.clone()),
                var.name.clone(),
                ResourceKind::StorageBuffer {
                    read_only: !access.contains(StorageAccess::STORE),
                },
                u64::from(ty.inner.size(gctx)),
            ),
            AddressSpace::Uniform => (
                ty.name.clone().unwrap_or_else(|| var_name.clone()),
                var.name.clone(),
                ResourceKind::UniformBuffer,
                u64::from(ty.inner.size(gctx)),
            ),
            AddressSpace::Handle => (var_name.clone(), None, handle_kind(&var_name, &ty.inner)?, 0),
            _ => continue,
        };

        resources.push(Resource {
            name,
            instance,
            group: binding.group,
            binding: binding.binding,
            kind,
            min_size,
        });
    }

    resources.sort_by_key(|r| (r.group, r.binding));
    Ok(resources)
}

fn handle_kind(name: &str, inner: &TypeInner) -> Result<ResourceKind> {
    let unsupported = |reason: &str| ComputeError::UnsupportedResource {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    match *inner {
        TypeInner::Sampler { comparison: false } => Ok(ResourceKind::Sampler),
        TypeInner::Sampler { comparison: true } => Err(unsupported("comparison sampler")),
        TypeInner::Image {
            dim,
            arrayed,
            ref class,
        } => {
            if dim != ImageDimension::D2 || arrayed {
                return Err(unsupported("only non-arrayed 2D images are supported"));
            }
            match *class {
                ImageClass::Sampled { kind, multi: false } => {
                    let format = match kind {
                        ScalarKind::Uint => wgpu::TextureFormat::R32Uint,
                        ScalarKind::Sint => wgpu::TextureFormat::R32Sint,
                        ScalarKind::Float => wgpu::TextureFormat::R32Float,
                        _ => return Err(unsupported("sample type")),
                    };
                    Ok(ResourceKind::SampledTexture { format })
                }
                ImageClass::Storage { format, access } => Ok(ResourceKind::StorageImage {
                    format: storage_format(format).ok_or_else(|| unsupported("image format"))?,
                    access: storage_access(access),
                }),
                _ => Err(unsupported("multisampled, depth or external texture")),
            }
        }
        _ => Err(unsupported("binding arrays and other handle types")),
    }
}

fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    use naga::StorageFormat as S;
    use wgpu::TextureFormat as T;

    Some(match format {
        S::R32Uint => T::R32Uint,
        S::R32Sint => T::R32Sint,
        S::R32Float => T::R32Float,
        S::Rgba8Unorm => T::Rgba8Unorm,
        S::Rgba8Uint => T::Rgba8Uint,
        S::Rgba32Uint => T::Rgba32Uint,
        S::Rgba32Sint => T::Rgba32Sint,
        S::Rgba32Float => T::Rgba32Float,
        _ => return None,
    })
}

fn storage_access(access: StorageAccess) -> wgpu::StorageTextureAccess {
    let load = access.contains(StorageAccess::LOAD);
    let store = access.contains(StorageAccess::STORE);
    match (load, store) {
        (true, false) => wgpu::StorageTextureAccess::ReadOnly,
        (false, true) => wgpu::StorageTextureAccess::WriteOnly,
        _ => wgpu::StorageTextureAccess::ReadWrite,
    }
}

/// Pick the compute entry point, by name when one is requested.
/// Returns its name and local work-group size.
pub fn entry_point(module: &naga::Module, requested: Option<&str>) -> Result<(String, [u32; 3])> {
    module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Compute)
        .find(|ep| requested.map_or(true, |name| ep.name == name))
        .map(|ep| (ep.name.clone(), ep.workgroup_size))
        .ok_or_else(|| ComputeError::NoEntryPoint(requested.map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{parse_source, ShaderLanguage};

    const GLSL: &str = r#"
#version 450
layout(local_size_x = 8, local_size_y = 8) in;

layout(std430, set = 0, binding = 0) readonly buffer Input { uint in_data[]; };
layout(std430, set = 0, binding = 1) buffer Output { uint out_data[]; } result;
layout(std140, set = 0, binding = 2) uniform Params { uvec4 scale; };
layout(set = 0, binding = 3) uniform utexture2D tex2d0;
layout(set = 0, binding = 4) uniform sampler tex2d0_sampler;
layout(r32ui, set = 1, binding = 0) uniform readonly uimage2D img2d0in;
layout(r32ui, set = 1, binding = 1) uniform writeonly uimage2D img2d0out;

void main() {
    ivec2 p = ivec2(gl_GlobalInvocationID.xy);
    uint i = gl_GlobalInvocationID.x;
    uint t = texelFetch(usampler2D(tex2d0, tex2d0_sampler), p, 0).x;
    uint v = imageLoad(img2d0in, p).x;
    imageStore(img2d0out, p, uvec4(v + t));
    result.out_data[i] = in_data[i] * scale.x;
}
"#;

    fn resources() -> Vec<Resource> {
        let module = parse_source(GLSL, ShaderLanguage::Glsl).unwrap();
        reflect(&module).unwrap()
    }

    fn find<'a>(resources: &'a [Resource], name: &str) -> &'a Resource {
        resources.iter().find(|r| r.is_named(name)).unwrap()
    }

    #[test]
    fn finds_every_bound_global() {
        let resources = resources();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["Input", "Output", "Params", "tex2d0", "tex2d0_sampler", "img2d0in", "img2d0out"]
        );
    }

    #[test]
    fn classifies_buffer_blocks() {
        let resources = resources();

        let input = find(&resources, "Input");
        assert_eq!(input.kind, ResourceKind::StorageBuffer { read_only: true });
        assert_eq!((input.group, input.binding), (0, 0));
        assert!(input.is_input());

        let output = find(&resources, "Output");
        assert_eq!(output.kind, ResourceKind::StorageBuffer { read_only: false });
        assert!(!output.is_input());
        assert!(output.is_named("result"));

        let params = find(&resources, "Params");
        assert_eq!(params.kind, ResourceKind::UniformBuffer);
        assert_eq!(params.min_size, 16);
        assert!(params.is_input());
    }

    #[test]
    fn classifies_textures_and_images() {
        let resources = resources();

        assert_eq!(
            find(&resources, "tex2d0").kind,
            ResourceKind::SampledTexture {
                format: wgpu::TextureFormat::R32Uint
            }
        );
        assert_eq!(find(&resources, "tex2d0_sampler").kind, ResourceKind::Sampler);

        let img_in = find(&resources, "img2d0in");
        assert_eq!(
            img_in.kind,
            ResourceKind::StorageImage {
                format: wgpu::TextureFormat::R32Uint,
                access: wgpu::StorageTextureAccess::ReadOnly,
            }
        );
        assert_eq!((img_in.group, img_in.binding), (1, 0));
        assert!(img_in.is_input());

        let img_out = find(&resources, "img2d0out");
        assert_eq!(
            img_out.kind,
            ResourceKind::StorageImage {
                format: wgpu::TextureFormat::R32Uint,
                access: wgpu::StorageTextureAccess::WriteOnly,
            }
        );
        assert!(!img_out.is_input());
    }

    #[test]
    fn glsl_entry_point_is_main() {
        let module = parse_source(GLSL, ShaderLanguage::Glsl).unwrap();
        assert_eq!(entry_point(&module, None).unwrap(), ("main".to_string(), [8, 8, 1]));
        assert!(matches!(
            entry_point(&module, Some("other")),
            Err(ComputeError::NoEntryPoint(Some(_)))
        ));
    }

    #[test]
    fn wgsl_entry_points_by_name() {
        let module = parse_source(
            r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn first(@builtin(global_invocation_id) id: vec3<u32>) { data[id.x] = 1u; }

@compute @workgroup_size(32)
fn second(@builtin(global_invocation_id) id: vec3<u32>) { data[id.x] = 2u; }
"#,
            ShaderLanguage::Wgsl,
        )
        .unwrap();

        assert_eq!(entry_point(&module, None).unwrap().0, "first");
        assert_eq!(entry_point(&module, Some("second")).unwrap(), ("second".to_string(), [32, 1, 1]));

        let resources = reflect(&module).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].name, "data");
        assert_eq!(resources[0].kind, ResourceKind::StorageBuffer { read_only: false });
    }

    fn unsupported(declaration: &str) -> String {
        let source = format!("{declaration}\n\n@compute @workgroup_size(1)\nfn main() {{}}\n");
        let module = parse_source(&source, ShaderLanguage::Wgsl).unwrap();
        match reflect(&module) {
            Err(ComputeError::UnsupportedResource { name, .. }) => name,
            other => panic!("`{declaration}` was accepted: {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_handles() {
        assert_eq!(unsupported("@group(0) @binding(0) var layers: texture_2d_array<u32>;"), "layers");
        assert_eq!(unsupported("@group(0) @binding(0) var depth: texture_depth_2d;"), "depth");
        assert_eq!(unsupported("@group(0) @binding(0) var shadow: sampler_comparison;"), "shadow");
        assert_eq!(
            unsupported("@group(0) @binding(0) var many: binding_array<texture_2d<u32>, 4>;"),
            "many"
        );
        assert_eq!(
            unsupported("@group(0) @binding(0) var pairs: texture_storage_2d<rg32float, write>;"),
            "pairs"
        );
        assert_eq!(
            unsupported("@group(0) @binding(0) var msaa: texture_multisampled_2d<f32>;"),
            "msaa"
        );
    }

    #[test]
    fn storage_formats_and_access() {
        use naga::StorageFormat as S;
        use wgpu::TextureFormat as T;

        let table = [
            (S::R32Uint, T::R32Uint),
            (S::R32Sint, T::R32Sint),
            (S::R32Float, T::R32Float),
            (S::Rgba8Unorm, T::Rgba8Unorm),
            (S::Rgba8Uint, T::Rgba8Uint),
            (S::Rgba32Uint, T::Rgba32Uint),
            (S::Rgba32Sint, T::Rgba32Sint),
            (S::Rgba32Float, T::Rgba32Float),
        ];
        for (naga_format, format) in table {
            assert_eq!(storage_format(naga_format), Some(format), "{naga_format:?}");
        }
        assert_eq!(storage_format(S::Rg32Float), None);
        assert_eq!(storage_format(S::R16Float), None);

        assert_eq!(storage_access(StorageAccess::LOAD), wgpu::StorageTextureAccess::ReadOnly);
        assert_eq!(storage_access(StorageAccess::STORE), wgpu::StorageTextureAccess::WriteOnly);
        assert_eq!(
            storage_access(StorageAccess::LOAD | StorageAccess::STORE),
            wgpu::StorageTextureAccess::ReadWrite
        );
    }

    #[test]
    fn layout_entries_follow_kind() {
        let resources = resources();
        let ty = |name| find(&resources, name).layout_entry().ty;

        assert_eq!(
            ty("Input"),
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            }
        );
        assert_eq!(
            ty("Params"),
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            }
        );
        assert_eq!(
            ty("tex2d0"),
            wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Uint,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            }
        );
        assert_eq!(
            ty("tex2d0_sampler"),
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering)
        );
        assert_eq!(
            ty("img2d0out"),
            wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::R32Uint,
                view_dimension: wgpu::TextureViewDimension::D2,
            }
        );

        let entry = find(&resources, "img2d0in").layout_entry();
        assert_eq!(entry.binding, 0);
        assert_eq!(entry.visibility, wgpu::ShaderStages::COMPUTE);
        assert_eq!(entry.count, None);
    }

    #[test]
    fn input_names_are_substring_matches() {
        let block = |name: &str| Resource {
            name: name.to_string(),
            instance: None,
            group: 0,
            binding: 0,
            kind: ResourceKind::StorageBuffer { read_only: false },
            min_size: 0,
        };
        assert!(block("Input").is_input());
        assert!(block("Points").is_input());
        assert!(!block("Output").is_input());
        assert!(!block("Result").is_input());
    }

    #[test]
    fn rejects_unsupported_image_dimension() {
        let module = parse_source(
            r#"
@group(0) @binding(0) var volume: texture_3d<f32>;

@compute @workgroup_size(1)
fn main() { _ = textureLoad(volume, vec3<i32>(0), 0); }
"#,
            ShaderLanguage::Wgsl,
        )
        .unwrap();

        let err = reflect(&module).unwrap_err();
        assert!(matches!(err, ComputeError::UnsupportedResource { ref name, .. } if name == "volume"));
    }
}
