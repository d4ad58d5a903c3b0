//! Binary cache, fetch and install pipeline for buildpack scripts.

pub mod cache;
pub mod config;
pub mod digest;
pub mod downloader;
pub mod error;
pub mod http;
pub mod installer;
pub mod template;

pub use cache::{cache_from_context, CacheManager, DirectoryCache, NoCache};
pub use config::{Context, ContextLoader};
pub use digest::{digester_from_context, DigestAlgorithm, Digester};
pub use downloader::{ArchiveExtractor, Downloader, DownloaderRegistry, Extractor};
pub use error::{BuildpackError, FetchFailure, InstallStage, Result};
pub use installer::{DirectInstall, InstallResult, Installer};
