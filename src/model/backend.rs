use std::env;
use std::sync::OnceLock;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
#[cfg(target_os = "macos")]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Metal};
#[cfg(not(target_os = "macos"))]
use burn::backend::wgpu::{self, WgpuDevice, graphics::Vulkan};
#[cfg(feature = "cuda")]
use burn::backend::{Cuda, cuda::CudaDevice};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable that overrides the configured compute backend.
pub const BACKEND_ENV: &str = "ICONSKETCH_BACKEND";

pub type CpuDevice = NdArrayDevice;
pub type GpuDevice = WgpuDevice;
#[cfg(feature = "cuda")]
pub type CudaGpuDevice = CudaDevice;

pub type CpuBackend = NdArray;
pub type GpuBackend = wgpu::Wgpu;
#[cfg(feature = "cuda")]
pub type CudaGpuBackend = Cuda;

/// Compute backend requested in settings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeBackend {
    #[default]
    Cpu,
    Wgpu,
    Cuda,
}

impl ComputeBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" | "ndarray" => Some(Self::Cpu),
            "wgpu" | "vulkan" | "metal" | "gpu" => Some(Self::Wgpu),
            "cuda" => Some(Self::Cuda),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Wgpu => "wgpu",
            Self::Cuda => "cuda",
        }
    }
}

/// Resolve the backend to run on, honoring [`BACKEND_ENV`] over settings.
pub fn resolve_backend(configured: ComputeBackend) -> ComputeBackend {
    let requested = env::var(BACKEND_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    let backend = match requested.as_deref() {
        None => configured,
        Some(value) => ComputeBackend::parse(value).unwrap_or_else(|| {
            warn!("Unknown backend '{value}' in {BACKEND_ENV}, using {}", configured.as_str());
            configured
        }),
    };
    if backend == ComputeBackend::Cuda && !cfg!(feature = "cuda") {
        warn!("CUDA backend requested but the `cuda` feature is disabled; using WGPU.");
        return ComputeBackend::Wgpu;
    }
    backend
}

static WGPU_INIT: OnceLock<()> = OnceLock::new();

pub(super) fn init_wgpu(device: &WgpuDevice) {
    WGPU_INIT.get_or_init(|| {
        #[cfg(target_os = "macos")]
        wgpu::init_setup::<Metal>(device, Default::default());
        #[cfg(not(target_os = "macos"))]
        wgpu::init_setup::<Vulkan>(device, Default::default());
    });
}

/// Point the cubecl kernel and autotune caches at the global cache directory.
pub(super) fn init_cubecl_config() {
    static CUBECL_CONFIG: OnceLock<()> = OnceLock::new();
    CUBECL_CONFIG.get_or_init(|| {
        let mut config = cubecl_runtime::config::GlobalConfig::default();
        config.compilation.cache = Some(cubecl_runtime::config::cache::CacheConfig::Global);
        config.autotune.cache = cubecl_runtime::config::cache::CacheConfig::Global;
        let _ = std::panic::catch_unwind(|| cubecl_runtime::config::GlobalConfig::set(config));
    });
}
