//! API 模块
//!
//! 对外提供的框架根对象。
//!
//! # 示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bundle_core::api::Framework;
//! use bundle_core::{FrameworkConfig, MemoryContentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FrameworkConfig::builder()
//!         .log_level("debug")
//!         .default_start_level(2)
//!         .build();
//!
//!     let framework = Framework::new(config, Arc::new(MemoryContentStore::new()))?;
//!     framework.start().await?;
//!     Ok(())
//! }
//! ```

pub mod framework;

pub use framework::{Framework, SYSTEM_SYMBOLIC_NAME};
