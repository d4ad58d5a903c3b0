//! Install orchestration.
//!
//! Ties the cache, downloader, digester and extractor together: reuse a
//! cached artifact when its digest matches, otherwise fetch, verify, cache
//! and then unpack it.

mod orchestrator;
mod package;

pub use orchestrator::{InstallResult, Installer};
pub use package::{filename_from_url, DirectInstall, PackageSpec};
