//! # Desktop Bridge Implementations
//!
//! Native implementations of bridge traits for desktop and server hosts
//! (macOS, Windows, Linux).
//!
//! - `FileSystemAccess` using `tokio::fs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::TokioFileSystem;
//! use std::sync::Arc;
//!
//! let fs: Arc<dyn bridge_traits::FileSystemAccess> = Arc::new(TokioFileSystem::new());
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
