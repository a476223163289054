//! SPIR-V shader modules
//!
//! Compiling GLSL to SPIR-V happens outside the engine. A [`ShaderModule`]
//! wraps already compiled bytecode together with the stage it was compiled
//! for, so materials can check that a vertex module is not bound as a
//! fragment stage and pipelines can build their stage infos without the
//! caller repeating the stage.
//!
//! Modules are immutable once created and shared between materials through
//! `Arc`. The [`MaterialStore`](crate::render::backends::vulkan::MaterialStore)
//! loads each path once and hands out clones of the same `Arc`.

use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Entry point every engine shader uses
pub const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Shader stages a material can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Fragment stage
    Fragment,
    /// Compute stage
    Compute,
}

impl ShaderStage {
    /// Vulkan stage flags
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Guess the stage from a file name such as `mrt.vert.spv`
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.contains(".vert") {
            Some(Self::Vertex)
        } else if name.contains(".frag") {
            Some(Self::Fragment)
        } else if name.contains(".comp") {
            Some(Self::Compute)
        } else {
            None
        }
    }
}

/// SPIR-V shader module with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8], stage: ShaderStage) -> VulkanResult<Self> {
        log::debug!("[SHADER] Creating {:?} module from {} bytes", stage, bytes.len());

        // read_spv copies into an aligned buffer and checks the magic number
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
            log::error!("[SHADER] Invalid SPIR-V: {}", e);
            VulkanError::InitializationFailed(format!("Invalid SPIR-V bytecode: {}", e))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                VulkanError::Api(e)
            })?
        };

        Ok(Self {
            device: device.clone(),
            module,
            stage,
        })
    }

    /// Load a shader module from a SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P, stage: ShaderStage) -> VulkanResult<Self> {
        let path = path.as_ref();
        log::debug!("[SHADER] Loading {:?} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            log::error!("[SHADER] Failed to read {:?}: {}", path, e);
            VulkanError::ShaderLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        Self::from_bytes(device, &bytes, stage).map_err(|e| match e {
            VulkanError::InitializationFailed(reason) => VulkanError::ShaderLoad {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage this module was compiled for
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage create info using the `main` entry point
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl std::fmt::Debug for ShaderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderModule")
            .field("module", &self.module)
            .field("stage", &self.stage)
            .finish()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        log::debug!("[SHADER] Dropping ShaderModule {:?}", self.module);
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_flags() {
        assert_eq!(ShaderStage::Vertex.flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderStage::Fragment.flags(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderStage::Compute.flags(), vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_stage_from_path() {
        assert_eq!(ShaderStage::from_path(Path::new("shaders/mrt.vert.spv")), Some(ShaderStage::Vertex));
        assert_eq!(ShaderStage::from_path(Path::new("deferred_output.frag.spv")), Some(ShaderStage::Fragment));
        assert_eq!(ShaderStage::from_path(Path::new("downsize.comp.spv")), Some(ShaderStage::Compute));
        assert_eq!(ShaderStage::from_path(Path::new("readme.txt")), None);
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
