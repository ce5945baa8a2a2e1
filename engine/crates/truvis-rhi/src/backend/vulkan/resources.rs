use std::ptr::NonNull;

use ash::vk;
use vk_mem::Alloc;

use crate::backend::MappedMemory;
use crate::backend::vulkan::conversions;
use crate::backend::vulkan::logical_device::VulkanDevice;
use crate::error::{RhiError, RhiResult, log_err};
use crate::types::{BufferDesc, BufferKind, BufferUsage, SamplerDesc, ShaderStage, TextureDesc};

pub(crate) struct VulkanBuffer {
    pub(crate) handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    pub(crate) size: u64,
    mapped: Option<NonNull<u8>>,
}

pub(crate) struct VulkanTexture {
    pub(crate) image: vk::Image,
    allocation: vk_mem::Allocation,
    /// 作为 attachment 使用，包含 format 的所有 aspect
    pub(crate) view: vk::ImageView,
    /// 作为 sampled image 使用，depth stencil format 只包含 depth aspect
    pub(crate) sampled_view: vk::ImageView,
    pub(crate) desc: TextureDesc,
    /// 最近一次录制的命令之后的 layout
    pub(crate) layout: vk::ImageLayout,
}

pub(crate) struct VulkanShaderModule {
    pub(crate) handle: vk::ShaderModule,
    pub(crate) stage: ShaderStage,
}

// buffer
impl VulkanDevice {
    /// 所有 buffer 都是 host visible 的，以便 map 后直接写入
    pub fn create_buffer(&self, desc: &BufferDesc, name: &str) -> RhiResult<VulkanBuffer> {
        let usage = match desc.kind {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Constant => vk::BufferUsageFlags::UNIFORM_BUFFER,
        } | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let alloc_flags = match desc.usage {
            BufferUsage::Static => vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            BufferUsage::Dynamic => vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
        };
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: alloc_flags,
            ..Default::default()
        };

        let (handle, allocation) = unsafe { self.allocator()?.create_buffer(&buffer_ci, &alloc_ci)? };
        self.set_debug_name(handle, &format!("Buffer::{}", name));

        Ok(VulkanBuffer {
            handle,
            allocation,
            size: desc.size,
            mapped: None,
        })
    }

    pub fn destroy_buffer(&self, mut buffer: VulkanBuffer) {
        let Ok(allocator) = self.allocator() else {
            return;
        };
        unsafe {
            if buffer.mapped.take().is_some() {
                allocator.unmap_memory(&mut buffer.allocation);
            }
            allocator.destroy_buffer(buffer.handle, &mut buffer.allocation);
        }
    }

    pub fn map_buffer(&self, buffer: &mut VulkanBuffer) -> RhiResult<MappedMemory> {
        if buffer.mapped.is_some() {
            return Err(RhiError::AlreadyMapped(format!("{:?}", buffer.handle)));
        }
        let ptr = unsafe { self.allocator()?.map_memory(&mut buffer.allocation)? };
        let ptr = NonNull::new(ptr).ok_or_else(|| log_err(RhiError::backend("vmaMapMemory returned null")))?;
        buffer.mapped = Some(ptr);
        Ok(MappedMemory {
            ptr,
            len: buffer.size as usize,
        })
    }

    /// flush 之后 unmap，写入对 GPU 可见
    pub fn unmap_buffer(&self, buffer: &mut VulkanBuffer) -> RhiResult<()> {
        if buffer.mapped.take().is_none() {
            return Err(log_err(RhiError::invalid_parameter("buffer is not mapped")));
        }
        let allocator = self.allocator()?;
        let flushed = allocator.flush_allocation(&buffer.allocation, 0, vk::WHOLE_SIZE);
        unsafe { allocator.unmap_memory(&mut buffer.allocation) };
        flushed?;
        Ok(())
    }
}

// texture
impl VulkanDevice {
    pub fn create_texture(&self, desc: &TextureDesc, name: &str) -> RhiResult<VulkanTexture> {
        let format = conversions::vk_format(desc.format);
        let usage = if desc.format.is_depth() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let allocator = self.allocator()?;
        let (image, mut allocation) = unsafe { allocator.create_image(&image_ci, &alloc_ci)? };

        let full_aspect = conversions::vk_aspect(desc.format);
        let sampled_aspect =
            if desc.format.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let views = self.create_image_view(image, format, full_aspect).and_then(|view| {
            match self.create_image_view(image, format, sampled_aspect) {
                Ok(sampled_view) => Ok((view, sampled_view)),
                Err(e) => {
                    unsafe { self.ash_device.destroy_image_view(view, None) };
                    Err(e)
                }
            }
        });
        let (view, sampled_view) = match views {
            Ok(views) => views,
            Err(e) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(e);
            }
        };

        self.set_debug_name(image, &format!("Image::{}", name));
        self.set_debug_name(view, &format!("ImageView::{}", name));

        Ok(VulkanTexture {
            image,
            allocation,
            view,
            sampled_view,
            desc: *desc,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        Ok(unsafe { self.ash_device.create_image_view(&view_ci, None)? })
    }

    pub fn destroy_texture(&self, mut texture: VulkanTexture) {
        unsafe {
            if texture.sampled_view != texture.view {
                self.ash_device.destroy_image_view(texture.sampled_view, None);
            }
            self.ash_device.destroy_image_view(texture.view, None);
            if let Ok(allocator) = self.allocator() {
                allocator.destroy_image(texture.image, &mut texture.allocation);
            }
        }
    }
}

// sampler & shader module
impl VulkanDevice {
    pub fn create_sampler(&self, desc: &SamplerDesc, name: &str) -> RhiResult<vk::Sampler> {
        let address_mode = conversions::vk_address_mode(desc.address_mode);
        let anisotropy = desc.max_anisotropy.filter(|_| self.sampler_anisotropy);
        let mut sampler_ci = vk::SamplerCreateInfo::default()
            .min_filter(conversions::vk_filter(desc.min_filter))
            .mag_filter(conversions::vk_filter(desc.mag_filter))
            .mipmap_mode(conversions::vk_mipmap_mode(desc.mip_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);
        if let Some(compare) = desc.compare {
            sampler_ci = sampler_ci.compare_enable(true).compare_op(conversions::vk_compare_op(compare));
        }

        let sampler = unsafe { self.ash_device.create_sampler(&sampler_ci, None)? };
        self.set_debug_name(sampler, &format!("Sampler::{}", name));
        Ok(sampler)
    }

    pub fn create_shader_module(&self, stage: ShaderStage, spirv: &[u32], name: &str) -> RhiResult<VulkanShaderModule> {
        let shader_module_ci = vk::ShaderModuleCreateInfo::default().code(spirv);
        let handle = unsafe { self.ash_device.create_shader_module(&shader_module_ci, None)? };
        self.set_debug_name(handle, &format!("ShaderModule::{}", name));
        Ok(VulkanShaderModule { handle, stage })
    }
}
