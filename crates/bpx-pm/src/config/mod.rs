//! Build context handling
//!
//! The context is a flat, ordered map of configuration values built once at
//! startup and then shared read-only (`Arc<Context>`) by every component.
//!
//! # Context Sources (in priority order, highest to lowest)
//!
//! 1. User options file (`<BUILD_DIR>/config/options.json`)
//! 2. Buildpack defaults (`<BP_DIR>/defaults/options.json`)
//! 3. Build directories (`BP_DIR`, `BUILD_DIR`, `CACHE_DIR`, `TMPDIR`)
//! 4. Process environment
//!
//! # Example
//!
//! ```rust,no_run
//! use bpx_pm::config::ContextLoader;
//!
//! let ctx = ContextLoader::new(true)
//!     .build_dir("/tmp/staged/app")
//!     .cache_dir("/tmp/cache")
//!     .load()
//!     .unwrap();
//!
//! println!("Hash algorithm: {:?}", ctx.get_str("CACHE_HASH_ALGORITHM"));
//! ```

mod context;
mod source;

pub use context::{keys, Context};
pub use source::{ContextLoader, ContextSource};
