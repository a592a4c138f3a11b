//! Backing every reflected resource with a GPU object.
//!
//! Storage blocks, uniform blocks, sampled textures, storage images and
//! samplers are all created here, filled with their initial contents and
//! collected into bind groups matching the program's layouts.

use crate::buffer::{index_pattern, GpuBuffer};
use crate::context::GpuContext;
use crate::error::{ComputeError, Result};
use crate::program::ComputeProgram;
use crate::reflect::{Resource, ResourceKind};
use crate::texture::{nearest_sampler, GpuTexture, TEXTURE_EXTENT};

/// Sizes of the objects created for a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSizes {
    /// Size of every storage and uniform buffer, in dwords.
    pub buffer_dwords: u32,
    /// Width and height of every texture.
    pub texture_extent: u32,
}

impl Default for BindingSizes {
    fn default() -> Self {
        Self {
            buffer_dwords: 256,
            texture_extent: TEXTURE_EXTENT,
        }
    }
}

/// The GPU object behind one resource.
pub enum Backing {
    /// Storage or uniform buffer of `buffer_dwords` dwords.
    Buffer(GpuBuffer<u32>),
    /// Sampled texture or storage image, square with side
    /// `texture_extent`.
    Texture(GpuTexture),
    /// Nearest-filtering, clamp-to-edge sampler.
    Sampler(wgpu::Sampler),
}

/// A reflected resource paired with the object that backs it.
///
/// The resource keeps its name and `(group, binding)` so that results can
/// be looked up and reported by name after the dispatch.
pub struct Bound {
    pub resource: Resource,
    pub backing: Backing,
}

/// Every resource of a program, bound.
///
/// The bind groups are indexed by group number and hold one entry per
/// resource in that group.  Dropping this releases all buffers, textures
/// and samplers.
pub struct Bindings {
    bound: Vec<Bound>,
    groups: Vec<wgpu::BindGroup>,
}

impl Bindings {
    /// No resources at all, for programs that declare none.
    pub fn empty() -> Self {
        Self {
            bound: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Create and fill an object for each resource of `program`, then
    /// build its bind groups.
    ///
    /// Every allocation happens inside a validation error scope, so a
    /// device that refuses an object yields [`ComputeError::Validation`]
    /// rather than reaching wgpu's uncaptured error handler.
    pub fn setup(context: &GpuContext, program: &ComputeProgram, sizes: BindingSizes) -> Result<Self> {
        context.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = Self::build(context, program, sizes);
        let scope = pollster::block_on(context.device.pop_error_scope());
        let bindings = built?;
        if let Some(error) = scope {
            return Err(ComputeError::Validation(error.to_string()));
        }
        Ok(bindings)
    }

    fn build(context: &GpuContext, program: &ComputeProgram, sizes: BindingSizes) -> Result<Self> {
        let limits = context.device.limits();
        let bound = program
            .resources()
            .iter()
            .map(|resource| bind_resource(context, &limits, resource, sizes))
            .collect::<Result<Vec<_>>>()?;

        let groups = program
            .layouts
            .iter()
            .enumerate()
            .map(|(group, layout)| {
                let entries: Vec<_> = bound
                    .iter()
                    .filter(|b| b.resource.group == group as u32)
                    .map(|b| wgpu::BindGroupEntry {
                        binding: b.resource.binding,
                        resource: match &b.backing {
                            Backing::Buffer(buffer) => buffer.buffer.as_entire_binding(),
                            Backing::Texture(texture) => {
                                wgpu::BindingResource::TextureView(&texture.view)
                            }
                            Backing::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                        },
                    })
                    .collect();
                context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("compute_bind_group"),
                    layout,
                    entries: &entries,
                })
            })
            .collect();

        Ok(Self { bound, groups })
    }

    pub fn bind_groups(&self) -> &[wgpu::BindGroup] {
        &self.groups
    }

    pub fn get(&self, name: &str) -> Option<&Bound> {
        self.bound.iter().find(|b| b.resource.is_named(name))
    }

    /// Read back a storage buffer or storage image by name.
    ///
    /// Returns `Ok(None)` when the program has no such readable resource.
    pub fn read(&self, context: &GpuContext, name: &str) -> Result<Option<Vec<u32>>> {
        let Some(bound) = self.get(name) else {
            return Ok(None);
        };
        match (&bound.resource.kind, &bound.backing) {
            (ResourceKind::StorageBuffer { .. }, Backing::Buffer(buffer)) => {
                buffer.read_back(context).map(Some)
            }
            (ResourceKind::StorageImage { .. }, Backing::Texture(texture)) => {
                texture.read_back(context).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn contents(resource: &Resource, dwords: usize) -> Vec<u32> {
    if resource.is_input() {
        index_pattern(dwords)
    } else {
        vec![0; dwords]
    }
}

/// A buffer block must fit in the allocation, and the allocation must
/// fit in what the device can bind.
pub(crate) fn check_buffer(limits: &wgpu::Limits, resource: &Resource, available: u64) -> Result<()> {
    let binding_limit = match resource.kind {
        ResourceKind::StorageBuffer { .. } => limits.max_storage_buffer_binding_size,
        ResourceKind::UniformBuffer => limits.max_uniform_buffer_binding_size,
        _ => return Ok(()),
    };
    if resource.min_size > available {
        return Err(ComputeError::BufferTooSmall {
            name: resource.name.clone(),
            required: resource.min_size,
            available,
        });
    }
    let limit = u64::from(binding_limit).min(limits.max_buffer_size);
    if available > limit {
        return Err(ComputeError::BufferTooLarge {
            name: resource.name.clone(),
            size: available,
            limit,
        });
    }
    Ok(())
}

fn bind_resource(
    context: &GpuContext,
    limits: &wgpu::Limits,
    resource: &Resource,
    sizes: BindingSizes,
) -> Result<Bound> {
    let name = resource.name.as_str();
    let backing = match resource.kind {
        ResourceKind::StorageBuffer { .. } | ResourceKind::UniformBuffer => {
            let dwords = sizes.buffer_dwords as usize;
            check_buffer(limits, resource, dwords as u64 * 4)?;
            let data = contents(resource, dwords);
            if resource.kind == ResourceKind::UniformBuffer {
                log::info!("UBO: {name} at {}", resource.binding);
                Backing::Buffer(GpuBuffer::uniform(context, name, &data))
            } else {
                log::info!("SSBO: {name} at {}", resource.binding);
                Backing::Buffer(GpuBuffer::storage(context, name, &data))
            }
        }
        ResourceKind::SampledTexture { format } => {
            log::info!("setup {name}");
            let data = contents(resource, GpuTexture::dwords(format, sizes.texture_extent));
            Backing::Texture(GpuTexture::sampled(
                context,
                name,
                format,
                sizes.texture_extent,
                &data,
            ))
        }
        ResourceKind::StorageImage { format, .. } => {
            log::info!("setup {name}");
            let data = contents(resource, GpuTexture::dwords(format, sizes.texture_extent));
            Backing::Texture(GpuTexture::storage(
                context,
                name,
                format,
                sizes.texture_extent,
                &data,
            ))
        }
        ResourceKind::Sampler => Backing::Sampler(nearest_sampler(context)),
    };

    Ok(Bound {
        resource: resource.clone(),
        backing,
    })
}
