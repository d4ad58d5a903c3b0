//! Download strategy registry.
//!
//! Maps the names accepted by `DOWNLOAD_METHOD` (and, for `custom`,
//! `DOWNLOAD_CLASS`) to constructors. Callers register their own strategies
//! at startup, before the installer is built.

use indexmap::IndexMap;
use std::sync::Arc;

use super::{CurlDownloader, Downloader, HttpDownloader};
use crate::config::{keys, Context};
use crate::http::HttpClientConfig;
use crate::Result;

/// Strategy used when nothing (or something unknown) is configured
pub const DEFAULT_METHOD: &str = "native";

/// Name of the method that defers to `DOWNLOAD_CLASS`
const CUSTOM_METHOD: &str = "custom";

pub type DownloaderFactory = Box<dyn Fn(&Context) -> Result<Arc<dyn Downloader>> + Send + Sync>;

pub struct DownloaderRegistry {
    factories: IndexMap<String, DownloaderFactory>,
}

impl Default for DownloaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_METHOD, |ctx: &Context| {
            let downloader = HttpDownloader::with_config(HttpClientConfig::from_context(ctx))?;
            Ok(Arc::new(downloader) as Arc<dyn Downloader>)
        });
        registry.register("curl", |ctx: &Context| {
            Ok(Arc::new(CurlDownloader::from_context(ctx)) as Arc<dyn Downloader>)
        });
        registry
    }
}

impl DownloaderRegistry {
    /// Registry with the built-in strategies
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with nothing registered
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register (or replace) a strategy
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Context) -> Result<Arc<dyn Downloader>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolve the configured strategy name, falling back to the default
    /// with a warning when it is not registered.
    pub fn resolve_name(&self, ctx: &Context) -> String {
        let method = ctx
            .get_str(keys::DOWNLOAD_METHOD)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_METHOD.to_string());

        let requested = if method == CUSTOM_METHOD {
            match ctx.get_str(keys::DOWNLOAD_CLASS).filter(|c| !c.is_empty()) {
                Some(class) => class,
                None => {
                    log::warn!("DOWNLOAD_METHOD is custom but DOWNLOAD_CLASS is not set, using {}", DEFAULT_METHOD);
                    return DEFAULT_METHOD.to_string();
                }
            }
        } else {
            method
        };

        if self.contains(&requested) {
            requested
        } else {
            log::warn!("Download strategy {:?} not found, using {}", requested, DEFAULT_METHOD);
            DEFAULT_METHOD.to_string()
        }
    }

    /// Build the downloader selected by the context
    pub fn create(&self, ctx: &Context) -> Result<Arc<dyn Downloader>> {
        let name = self.resolve_name(ctx);
        log::debug!("Using {} download strategy", name);

        match self.factories.get(&name) {
            Some(factory) => factory(ctx),
            // Only reachable from a registry built with `empty()`
            None => Ok(Arc::new(HttpDownloader::with_config(HttpClientConfig::from_context(ctx))?)),
        }
    }
}
