//! Configuration system
//!
//! Every configuration struct implements [`Config`], which loads and saves
//! TOML or RON depending on the file extension.

pub use serde::{Deserialize, Serialize};

use crate::device::{DescriptorPoolSize, DescriptorType};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Values that parse but cannot be used
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Descriptors of one type reserved per set in a pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolRatio {
    /// Descriptor type
    pub ty: DescriptorType,
    /// Descriptors of that type per set
    pub per_set: f32,
}

/// Sizing of the descriptor pools the allocator creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorPoolConfig {
    /// Sets each pool can hold
    pub sets_per_pool: u32,
    /// Descriptor type mix
    pub ratios: Vec<PoolRatio>,
}

impl DescriptorPoolConfig {
    /// Per-type capacities of one pool
    pub fn pool_sizes(&self) -> Vec<DescriptorPoolSize> {
        self.ratios
            .iter()
            .map(|ratio| DescriptorPoolSize {
                ty: ratio.ty,
                count: ((ratio.per_set * self.sets_per_pool as f32).ceil() as u32).max(1),
            })
            .collect()
    }
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        let ratio = |ty, per_set| PoolRatio { ty, per_set };
        Self {
            sets_per_pool: 64,
            ratios: vec![
                ratio(DescriptorType::UniformBuffer, 2.0),
                ratio(DescriptorType::UniformBufferDynamic, 1.0),
                ratio(DescriptorType::StorageBuffer, 2.0),
                ratio(DescriptorType::CombinedImageSampler, 4.0),
                ratio(DescriptorType::SampledImage, 1.0),
                ratio(DescriptorType::StorageImage, 1.0),
            ],
        }
    }
}

/// Logging defaults applied when `RUST_LOG` is unset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `info` or `render_core=debug`
    pub default_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
        }
    }
}

/// Render context configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Presentable images requested from the swapchain
    pub swapchain_image_count: u32,
    /// Longest fence wait before the device is considered lost
    pub fence_timeout_ns: u64,
    /// Directories searched for relative shader paths, in order
    pub shader_search_dirs: Vec<String>,
    /// Descriptor pool sizing
    pub descriptor_pool: DescriptorPoolConfig,
    /// Logging defaults
    pub logging: LoggingConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            swapchain_image_count: 3,
            fence_timeout_ns: 1_000_000_000,
            shader_search_dirs: vec!["shaders/".to_string(), "target/shaders/".to_string()],
            descriptor_pool: DescriptorPoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and 8, got {}",
                self.frames_in_flight
            )));
        }
        if (self.swapchain_image_count as usize) < self.frames_in_flight {
            return Err(ConfigError::Invalid(format!(
                "swapchain_image_count ({}) must be at least frames_in_flight ({})",
                self.swapchain_image_count, self.frames_in_flight
            )));
        }
        if self.fence_timeout_ns == 0 {
            return Err(ConfigError::Invalid("fence_timeout_ns must be non-zero".to_string()));
        }
        if self.descriptor_pool.sets_per_pool == 0 {
            return Err(ConfigError::Invalid("sets_per_pool must be non-zero".to_string()));
        }
        if let Some(ratio) = self
            .descriptor_pool
            .ratios
            .iter()
            .find(|r| !(r.per_set.is_finite() && r.per_set > 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "descriptor ratio for {:?} must be positive",
                ratio.ty
            )));
        }
        Ok(())
    }
}

impl Config for RenderConfig {}
