// ============================================================================
// LAYER TEXTURE — GPU render target with partial upload support
// ============================================================================

/// A GPU texture backing a single layer at supersampled resolution.
///
/// Doubles as render attachment (the brush and transform pipelines draw into
/// it) and sampled source (the compositor reads it).  Contents are
/// premultiplied RGBA8; straight↔premultiplied conversion happens on the CPU
/// at upload/readback so fixed-function blending stays exact.
///
/// ### Key optimisation: `update_rect`
/// After a stroke only the modified region is uploaded via
/// `queue.write_texture` — never the full supersampled image.
pub struct LayerTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
}

impl LayerTexture {
    pub const USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
        .union(wgpu::TextureUsages::RENDER_ATTACHMENT)
        .union(wgpu::TextureUsages::COPY_DST)
        .union(wgpu::TextureUsages::COPY_SRC);

    /// Create the raw texture only (for pooling and scratch targets).
    pub fn create_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        label: &str,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: Self::USAGE,
            view_formats: &[],
        })
    }

    /// Wrap an existing texture (new or recycled) with a view and bind group.
    pub fn from_texture(
        device: &wgpu::Device,
        bind_group_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        texture: wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LayerTexture bind group"),
            layout: bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        Self {
            texture,
            view,
            bind_group,
            width,
            height,
        }
    }

    /// **Crucial optimisation**: upload only the modified rectangle.
    ///
    /// `data` must contain `rect_width * rect_height * 4` bytes of
    /// premultiplied RGBA pixels for the sub-region starting at `(x, y)`.
    pub fn update_rect(
        &self,
        queue: &wgpu::Queue,
        x: u32,
        y: u32,
        rect_width: u32,
        rect_height: u32,
        data: &[u8],
    ) {
        debug_assert_eq!(data.len(), (rect_width * rect_height * 4) as usize);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * rect_width),
                rows_per_image: Some(rect_height),
            },
            wgpu::Extent3d {
                width: rect_width,
                height: rect_height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Full re-upload of all pixel data.
    pub fn upload_full(&self, queue: &wgpu::Queue, data: &[u8]) {
        self.update_rect(queue, 0, 0, self.width, self.height, data);
    }

    /// Clear the whole texture to transparent black.
    pub fn clear(&self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("layer_clear_encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("layer_clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}
