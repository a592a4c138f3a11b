//! Sampled textures and storage images.

use crate::buffer::GpuBuffer;
use crate::context::GpuContext;
use crate::error::Result;

/// Width and height of every texture bound to a program.
pub const TEXTURE_EXTENT: u32 = 64;

/// A square 2D texture with a single mip level.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub extent: u32,
}

impl GpuTexture {
    /// A texture to be read through a sampler or `texelFetch`.
    pub fn sampled(
        context: &GpuContext,
        label: &str,
        format: wgpu::TextureFormat,
        extent: u32,
        words: &[u32],
    ) -> Self {
        Self::with_contents(
            context,
            label,
            format,
            extent,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            words,
        )
    }

    /// An image for `imageLoad`/`imageStore`; readable back to the host.
    pub fn storage(
        context: &GpuContext,
        label: &str,
        format: wgpu::TextureFormat,
        extent: u32,
        words: &[u32],
    ) -> Self {
        Self::with_contents(
            context,
            label,
            format,
            extent,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            words,
        )
    }

    fn with_contents(
        context: &GpuContext,
        label: &str,
        format: wgpu::TextureFormat,
        extent: u32,
        usage: wgpu::TextureUsages,
        words: &[u32],
    ) -> Self {
        let size = wgpu::Extent3d {
            width: extent,
            height: extent,
            depth_or_array_layers: 1,
        };
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        let row_bytes = extent * texel_size(format);
        context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(words),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(extent),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            extent,
        }
    }

    /// Number of dwords covering the whole texture.
    pub fn dwords(format: wgpu::TextureFormat, extent: u32) -> usize {
        (extent * extent * texel_size(format) / 4) as usize
    }

    /// Read the texture back as tightly packed rows of dwords.
    pub fn read_back(&self, context: &GpuContext) -> Result<Vec<u32>> {
        let row_bytes = self.extent * texel_size(self.format);
        let padded = padded_bytes_per_row(row_bytes);
        let download = GpuBuffer::<u32>::new_download(
            context,
            (padded / 4 * self.extent) as usize,
        );

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            self.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &download.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.extent),
                },
            },
            self.texture.size(),
        );
        context.queue.submit([encoder.finish()]);

        let words = download.read_to_vec(context)?;
        Ok(unpad_rows(&words, (padded / 4) as usize, (row_bytes / 4) as usize))
    }
}

/// A sampler with nearest filtering and clamp-to-edge addressing, the
/// only kind 32-bit integer textures can be used with.
pub fn nearest_sampler(context: &GpuContext) -> wgpu::Sampler {
    context.device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("nearest_clamp_sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Nearest,
        min_filter: wgpu::FilterMode::Nearest,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

/// Formats reflected from shaders all have a fixed texel size that is a
/// multiple of four bytes.
fn texel_size(format: wgpu::TextureFormat) -> u32 {
    format.block_copy_size(None).unwrap_or(4)
}

/// Buffer copies need rows aligned to `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub(crate) fn padded_bytes_per_row(row_bytes: u32) -> u32 {
    row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

fn unpad_rows(words: &[u32], padded_row: usize, row: usize) -> Vec<u32> {
    words
        .chunks(padded_row)
        .flat_map(|chunk| &chunk[..row.min(chunk.len())])
        .copied()
        .collect()
}
