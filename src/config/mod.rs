//! Pluggable configuration for model invocation.
//!
//! ```rust,no_run
//! use llm_invoke::config::{CompositeConfigProvider, InvocationSettings, MemoryConfigProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let overrides = MemoryConfigProvider::new().value("global_call_limit", 50);
//! let config = CompositeConfigProvider::standard(overrides);
//! let settings = InvocationSettings::load(&config).await?;
//! assert_eq!(settings.global_call_limit, 50);
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod env;
pub mod memory;
pub mod provider;
pub mod settings;

pub use composite::CompositeConfigProvider;
pub use env::{ENV_PREFIX, EnvConfigProvider};
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};
pub use settings::{InvocationSettings, keys};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Provider error: {message}")]
    Provider { message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
