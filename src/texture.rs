use crate::gpu::GpuContext;

/// A GPU texture that can be bound to shaders.
#[derive(Debug)]
pub struct Texture {
    #[allow(dead_code)]
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    /// Create a texture from raw RGBA data.
    pub fn from_rgba(gpu: &GpuContext, data: &[u8], width: u32, height: u32, label: &str) -> Self {
        use wgpu::util::DeviceExt;

        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            data,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(&format!("{} Sampler", label)),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            texture,
            view,
            sampler,
            width,
            height,
        }
    }

    /// Load a texture from an image file.
    pub fn from_file(gpu: &GpuContext, path: &str) -> Result<Self, image::ImageError> {
        let img = image::open(path)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self::from_rgba(gpu, &img, width, height, path))
    }

    /// Load a texture from embedded bytes.
    pub fn from_bytes(
        gpu: &GpuContext,
        bytes: &[u8],
        label: &str,
    ) -> Result<Self, image::ImageError> {
        let (data, width, height) = decode_rgba(bytes)?;
        Ok(Self::from_rgba(gpu, &data, width, height, label))
    }

    /// Single white pixel, bound when a draw has no texture of its own.
    pub fn white(gpu: &GpuContext) -> Self {
        Self::from_rgba(gpu, &[255, 255, 255, 255], 1, 1, "White Texture")
    }

    /// Procedural concrete: gray hash noise with faint streaking. Used on
    /// the walls.
    pub fn concrete(gpu: &GpuContext, size: u32, seed: u32) -> Self {
        let mut data = vec![0u8; (size * size * 4) as usize];

        for y in 0..size {
            for x in 0..size {
                let idx = ((y * size + x) * 4) as usize;

                let base = 150 + (Self::hash(x, y, seed) % 24) as i32 - 12;
                // Horizontal pour lines every 16 texels.
                let streak = if y % 16 == 0 { -18 } else { 0 };
                let g = (base + streak).clamp(0, 255) as u8;

                data[idx] = g;
                data[idx + 1] = g;
                data[idx + 2] = (g as i32 - 4).clamp(0, 255) as u8;
                data[idx + 3] = 255;
            }
        }

        Self::from_rgba(gpu, &data, size, size, "Concrete Texture")
    }

    /// Procedural floor tiles: light panels separated by dark grout lines.
    pub fn tiles(gpu: &GpuContext, size: u32, seed: u32) -> Self {
        let mut data = vec![0u8; (size * size * 4) as usize];
        let tile = size / 4;

        for y in 0..size {
            for x in 0..size {
                let idx = ((y * size + x) * 4) as usize;

                let tile_hash = Self::hash(x / tile, y / tile, seed);
                let base = 175 + (tile_hash % 20) as i32 - 10;
                let noise = (Self::hash(x, y, seed.wrapping_add(7919)) % 10) as i32 - 5;

                let in_grout = x % tile < 2 || y % tile < 2;
                let v = if in_grout { 70 } else { base + noise };
                let v = v.clamp(0, 255) as u8;

                data[idx] = v;
                data[idx + 1] = v;
                data[idx + 2] = v;
                data[idx + 3] = 255;
            }
        }

        Self::from_rgba(gpu, &data, size, size, "Tile Texture")
    }

    /// Simple hash function for procedural generation.
    fn hash(x: u32, y: u32, seed: u32) -> u32 {
        let mut h = seed;
        h = h.wrapping_add(x.wrapping_mul(374761393));
        h = h.wrapping_add(y.wrapping_mul(668265263));
        h ^= h >> 13;
        h = h.wrapping_mul(1274126177);
        h ^= h >> 16;
        h
    }
}

/// Decodes any supported image format into tightly packed RGBA8.
fn decode_rgba(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (width, height) = img.dimensions();
    Ok((img.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_an_encoded_png() {
        let mut img = image::RgbaImage::new(4, 2);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = image::Rgba([x as u8 * 50, y as u8 * 100, 200, 255]);
        }
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png)
            .expect("png encode");

        let (data, width, height) = decode_rgba(png.get_ref()).expect("png decode");
        assert_eq!((width, height), (4, 2));
        assert_eq!(data.len(), 4 * 2 * 4);
        assert_eq!(&data[0..4], &[0, 0, 200, 255]);
        let last = data.len() - 4;
        assert_eq!(&data[last..], &[150, 100, 200, 255]);
    }

    #[test]
    fn garbage_bytes_are_an_error() {
        assert!(decode_rgba(&[0x00, 0x01, 0x02]).is_err());
    }
}
