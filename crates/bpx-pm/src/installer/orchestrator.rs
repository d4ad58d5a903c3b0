use indexmap::IndexSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::package::{DirectInstall, PackageSpec};
use crate::cache::{cache_from_context, CacheManager};
use crate::config::{keys, Context};
use crate::digest::{digester_from_context, first_token, Digest, DigestAlgorithm, Digester};
use crate::downloader::{looks_like_url, ArchiveExtractor, Downloader, DownloaderRegistry, Extractor};
use crate::error::InstallStage;
use crate::template;
use crate::{BuildpackError, Result};

/// Result of an install operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    /// Where the artifact ended up
    pub path: PathBuf,
    /// Whether the cache served the artifact
    pub from_cache: bool,
}

/// One artifact on its way through the pipeline
struct Artifact<'a> {
    target: &'a str,
    url: &'a str,
    filename: &'a str,
    expected: &'a str,
    dest: &'a Path,
    strip: bool,
    extract: bool,
}

/// Drives cache lookup, fetch, verification, caching and extraction
pub struct Installer {
    ctx: Arc<Context>,
    cache: Arc<dyn CacheManager>,
    downloader: Arc<dyn Downloader>,
    digester: Arc<dyn Digester>,
    extractor: Arc<dyn Extractor>,
}

impl Installer {
    pub fn new(
        ctx: Arc<Context>,
        cache: Arc<dyn CacheManager>,
        downloader: Arc<dyn Downloader>,
        digester: Arc<dyn Digester>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            ctx,
            cache,
            downloader,
            digester,
            extractor,
        }
    }

    /// Build an installer with the collaborators the context selects
    pub fn from_context(ctx: Arc<Context>) -> Result<Self> {
        Self::with_registry(ctx, &DownloaderRegistry::new())
    }

    /// Like [`Installer::from_context`], picking the downloader from `registry`
    pub fn with_registry(ctx: Arc<Context>, registry: &DownloaderRegistry) -> Result<Self> {
        let cache = cache_from_context(&ctx)?;
        let downloader = registry.create(&ctx)?;
        let digester = digester_from_context(&ctx)?;

        Ok(Self::new(ctx, cache, downloader, digester, Arc::new(ArchiveExtractor)))
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Install the package described by the `<KEY>_*` context entries
    pub async fn install(&self, key: &str) -> Result<InstallResult> {
        let spec = PackageSpec::resolve(&self.ctx, key).map_err(|e| e.at_stage(key, InstallStage::Resolve))?;
        log::info!("Installing {} ({})", spec.key, spec.filename);

        self.run(Artifact {
            target: &spec.key,
            url: &spec.url,
            filename: &spec.filename,
            expected: &spec.digest,
            dest: &spec.install_dir,
            strip: spec.strip,
            extract: true,
        })
        .await
    }

    /// Install several packages, in order, stopping at the first failure
    pub async fn install_packages<S: AsRef<str>>(&self, keys: &[S]) -> Result<Vec<InstallResult>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.install(key.as_ref()).await?);
        }
        Ok(results)
    }

    /// Install an artifact from explicit locations
    pub async fn install_direct(&self, install: &DirectInstall) -> Result<InstallResult> {
        let target = install.url.as_str();
        let filename = install
            .resolved_filename()
            .map_err(|e| e.at_stage(target, InstallStage::Resolve))?;

        let expected = if looks_like_url(&install.digest_source) {
            self.downloader
                .download_direct(&install.digest_source)
                .await
                .map_err(|e| e.at_stage(target, InstallStage::Fetch))?
        } else {
            first_token(&install.digest_source).to_string()
        };
        log::info!("Installing {}", filename);

        self.run(Artifact {
            target,
            url: &install.url,
            filename: &filename,
            expected: &expected,
            dest: &install.dest,
            strip: install.strip,
            extract: install.extract,
        })
        .await
    }

    /// Install modules of `key` from the `<KEY>_MODULES_PATTERN` URL pattern.
    ///
    /// The pattern is expanded with `MODULE_NAME` bound to each module; the
    /// digest lives next to the payload with the hash algorithm as extension.
    pub async fn install_modules<S: AsRef<str>>(&self, key: &str, modules: &[S]) -> Result<Vec<InstallResult>> {
        let pattern_key = format!("{}_MODULES_PATTERN", key);
        let pattern = self
            .ctx
            .require(&pattern_key)
            .map_err(|e| e.at_stage(key, InstallStage::Resolve))?;
        let digest_pattern = format!("{}.{}", pattern, self.digester.algorithm());

        let dest = self
            .ctx
            .require(keys::BUILD_DIR)
            .map(|dir| PathBuf::from(dir).join(key.to_lowercase()))
            .map_err(|e| e.at_stage(key, InstallStage::Resolve))?;
        let strip = self.ctx.get_bool(&format!("{}_MODULES_STRIP", key)).unwrap_or(false);

        let unique: IndexSet<&str> = modules.iter().map(|m| m.as_ref()).collect();
        let mut results = Vec::with_capacity(unique.len());

        for module in unique {
            let module_ctx = self.ctx.with(keys::MODULE_NAME, module);
            let (url, digest_url) = template::expand(&pattern, &module_ctx)
                .and_then(|url| Ok((url, template::expand(&digest_pattern, &module_ctx)?)))
                .map_err(|e| e.at_stage(module, InstallStage::Resolve))?;

            log::debug!("Installing {} module {}", key, module);
            let install = DirectInstall::new(url, digest_url, dest.clone()).strip(strip);
            results.push(self.install_direct(&install).await?);
        }

        Ok(results)
    }

    async fn run(&self, artifact: Artifact<'_>) -> Result<InstallResult> {
        let target = artifact.target;

        let cached = self
            .cache
            .get(artifact.filename, artifact.expected)
            .await
            .map_err(|e| e.at_stage(target, InstallStage::Cache))?;

        // Holds the download until extraction is done when the cache hands
        // back the staged file itself
        let mut _staging: Option<TempDir> = None;

        let (source, from_cache) = match cached {
            Some(path) => {
                log::debug!("Using cached {}", path.display());
                (path, true)
            }
            None => {
                let staging = self.staging_dir().map_err(|e| e.at_stage(target, InstallStage::Fetch))?;
                let staged = staging.path().join(artifact.filename);

                log::debug!("Downloading {}", artifact.url);
                self.downloader
                    .download(artifact.url, &staged)
                    .await
                    .map_err(|e| e.at_stage(target, InstallStage::Fetch))?;

                let actual = self
                    .digester
                    .calculate(&staged)
                    .await
                    .map_err(|e| e.at_stage(target, InstallStage::Digest))?;
                verify(self.digester.algorithm(), artifact.url, artifact.expected, &actual).map_err(|e| e.at_stage(target, InstallStage::Digest))?;

                let path = self
                    .cache
                    .put(artifact.filename, &staged, &actual)
                    .await
                    .map_err(|e| e.at_stage(target, InstallStage::Cache))?;
                _staging = Some(staging);
                (path, false)
            }
        };

        let path = self
            .unpack(source, artifact.dest.to_path_buf(), artifact.strip, artifact.extract)
            .await
            .map_err(|e| e.at_stage(target, InstallStage::Extract))?;

        Ok(InstallResult { path, from_cache })
    }

    /// Private temp directory for one download
    fn staging_dir(&self) -> Result<TempDir> {
        let base = self.ctx.temp_dir();
        std::fs::create_dir_all(&base)?;
        Ok(tempfile::Builder::new().prefix("bpx-download-").tempdir_in(base)?)
    }

    async fn unpack(&self, source: PathBuf, dest: PathBuf, strip: bool, extract: bool) -> Result<PathBuf> {
        let extractor = Arc::clone(&self.extractor);
        tokio::task::spawn_blocking(move || {
            if extract {
                extractor.extract(&source, &dest, strip)
            } else {
                extractor.copy_into(&source, &dest)
            }
        })
        .await
        .map_err(|e| BuildpackError::Io(std::io::Error::other(e)))?
    }
}

/// Check a freshly computed digest against the expected one. An empty
/// expectation accepts anything.
fn verify(algorithm: DigestAlgorithm, target: &str, expected: &str, actual: &str) -> Result<()> {
    let Some(expected) = Digest::parse(algorithm, expected) else {
        return Ok(());
    };
    if Digest::parse(algorithm, actual).as_ref() == Some(&expected) {
        return Ok(());
    }

    Err(BuildpackError::Integrity {
        target: target.to_string(),
        expected: expected.value().to_string(),
        actual: actual.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DirectoryCache;
    use crate::digest::{digest_bytes, DigestAlgorithm, NativeDigester};
    use crate::FetchFailure;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves canned bodies by URL and counts calls
    #[derive(Default)]
    struct FakeDownloader {
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        downloads: AtomicUsize,
        direct: AtomicUsize,
    }

    impl FakeDownloader {
        fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body.into());
        }

        fn body(&self, url: &str) -> Result<Vec<u8>> {
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| BuildpackError::fetch(url, FetchFailure::NotFound))
        }
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        fn name(&self) -> &str {
            "fake"
        }

        async fn download(&self, source: &str, dest: &Path) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, self.body(source)?)?;
            Ok(())
        }

        async fn download_direct(&self, source: &str) -> Result<String> {
            self.direct.fetch_add(1, Ordering::SeqCst);
            Ok(String::from_utf8_lossy(&self.body(source)?).trim().to_string())
        }
    }

    struct CountingCache {
        inner: DirectoryCache,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl CacheManager for CountingCache {
        async fn exists(&self, key: &str, digest: &str) -> Result<bool> {
            self.inner.exists(key, digest).await
        }

        async fn get(&self, key: &str, digest: &str) -> Result<Option<PathBuf>> {
            self.inner.get(key, digest).await
        }

        async fn put(&self, key: &str, source: &Path, digest: &str) -> Result<PathBuf> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, source, digest).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    struct CountingDigester {
        inner: NativeDigester,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Digester for CountingDigester {
        fn algorithm(&self) -> DigestAlgorithm {
            self.inner.algorithm()
        }

        async fn calculate(&self, path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.calculate(path).await
        }
    }

    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl Extractor for CountingExtractor {
        fn extract(&self, archive: &Path, dest_dir: &Path, strip: bool) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ArchiveExtractor.extract(archive, dest_dir, strip)
        }
    }

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        downloader: Arc<FakeDownloader>,
        cache: Arc<CountingCache>,
        digester: Arc<CountingDigester>,
        extractor: Arc<CountingExtractor>,
        installer: Installer,
    }

    fn fixture(extra: &[(&str, &str)]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let mut pairs = vec![
            ("BUILD_DIR".to_string(), root.join("build").display().to_string()),
            ("TMPDIR".to_string(), root.join("tmp").display().to_string()),
        ];
        pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        let ctx = Arc::new(Context::from_pairs(pairs));

        let downloader = Arc::new(FakeDownloader::default());
        let cache = Arc::new(CountingCache {
            inner: DirectoryCache::new(
                root.join("cache"),
                Arc::new(NativeDigester::new(DigestAlgorithm::Sha256)),
            )
            .unwrap(),
            puts: AtomicUsize::new(0),
        });
        let digester = Arc::new(CountingDigester {
            inner: NativeDigester::new(DigestAlgorithm::Sha256),
            calls: AtomicUsize::new(0),
        });
        let extractor = Arc::new(CountingExtractor::default());

        let installer = Installer::new(
            ctx,
            cache.clone(),
            downloader.clone(),
            digester.clone(),
            extractor.clone(),
        );

        Fixture {
            _temp: temp,
            root,
            downloader,
            cache,
            digester,
            extractor,
            installer,
        }
    }

    fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        let mut encoder = builder.into_inner().unwrap();
        encoder.flush().unwrap();
        encoder.finish().unwrap()
    }

    fn sha256(data: &[u8]) -> String {
        digest_bytes(DigestAlgorithm::Sha256, data)
    }

    const URL: &str = "https://dl.example.com/app-1.0.tar.gz?sig=xyz";

    #[tokio::test]
    async fn test_direct_install_cold_then_warm() {
        let f = fixture(&[]);
        let archive = tar_gz(&[("app-1.0/bin/run.sh", "#!/bin/sh\n")]);
        f.downloader.serve(URL, archive.clone());
        let dest = f.root.join("dest");
        let install = DirectInstall::new(URL, sha256(&archive), &dest).strip(true);

        let cold = f.installer.install_direct(&install).await.unwrap();
        assert_eq!(cold, InstallResult { path: dest.clone(), from_cache: false });
        assert!(dest.join("bin/run.sh").is_file());
        assert!(f.root.join("cache/app-1.0.tar.gz").is_file());
        assert_eq!(f.downloader.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(f.digester.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.puts.load(Ordering::SeqCst), 1);
        assert_eq!(f.extractor.calls.load(Ordering::SeqCst), 1);

        let warm = f.installer.install_direct(&install).await.unwrap();
        assert!(warm.from_cache);
        assert_eq!(f.downloader.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(f.digester.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.puts.load(Ordering::SeqCst), 1);
        assert_eq!(f.extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_direct_install_fetches_digest_url() {
        let f = fixture(&[]);
        let archive = tar_gz(&[("app-1.0/README", "hi")]);
        f.downloader.serve(URL, archive.clone());
        f.downloader.serve(
            "https://dl.example.com/app-1.0.tar.gz.sha256",
            format!("{}  app-1.0.tar.gz\n", sha256(&archive)),
        );

        let install = DirectInstall::new(URL, "https://dl.example.com/app-1.0.tar.gz.sha256", f.root.join("d"));
        let result = f.installer.install_direct(&install).await.unwrap();

        assert!(!result.from_cache);
        assert!(f.root.join("d/app-1.0/README").is_file());
        assert_eq!(f.downloader.direct.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_integrity_failure_leaves_cache_untouched() {
        let f = fixture(&[]);
        f.downloader.serve(URL, tar_gz(&[("app-1.0/x", "tampered")]));
        let install = DirectInstall::new(URL, sha256(b"something else"), f.root.join("dest"));

        let err = f.installer.install_direct(&install).await.unwrap_err();

        assert!(err.is_integrity());
        assert_eq!(err.stage(), Some(InstallStage::Digest));
        assert!(err.to_string().contains(URL));
        assert_eq!(f.cache.puts.load(Ordering::SeqCst), 0);
        assert!(!f.root.join("cache/app-1.0.tar.gz").exists());
        assert!(!f.root.join("dest").exists());
    }

    #[tokio::test]
    async fn test_no_extract_copies_file() {
        let f = fixture(&[]);
        f.downloader.serve("https://dl.example.com/tool.tar.gz", "not really gzip");
        let install = DirectInstall::new("https://dl.example.com/tool.tar.gz", "", f.root.join("bin")).extract(false);

        let result = f.installer.install_direct(&install).await.unwrap();

        assert_eq!(result.path, f.root.join("bin"));
        assert_eq!(
            std::fs::read_to_string(f.root.join("bin/tool.tar.gz")).unwrap(),
            "not really gzip"
        );
        assert_eq!(f.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_tagged() {
        let f = fixture(&[]);
        let install = DirectInstall::new("https://dl.example.com/missing.zip", "abc", f.root.join("d"));

        let err = f.installer.install_direct(&install).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.stage(), Some(InstallStage::Fetch));
        assert!(err.to_string().contains("https://dl.example.com/missing.zip"));
    }

    #[tokio::test]
    async fn test_install_by_key() {
        let archive = tar_gz(&[("apache-tomcat-8.0.9/bin/catalina.sh", "echo")]);
        let digest = sha256(&archive);
        let f = fixture(&[
            ("TOMCAT_VERSION", "8.0.9"),
            ("TOMCAT_PACKAGE", "apache-tomcat-{TOMCAT_VERSION}.tar.gz"),
            ("TOMCAT_PACKAGE_HASH", digest.as_str()),
            ("TOMCAT_DOWNLOAD_PREFIX", "https://mirror.example.com/tomcat"),
            ("TOMCAT_STRIP", "true"),
        ]);
        f.downloader
            .serve("https://mirror.example.com/tomcat/apache-tomcat-8.0.9.tar.gz", archive);

        let results = f.installer.install_packages(&["TOMCAT", "TOMCAT"]).await.unwrap();

        assert_eq!(results[0].path, f.root.join("build/tomcat"));
        assert!(!results[0].from_cache);
        assert!(results[1].from_cache);
        assert!(f.root.join("build/tomcat/bin/catalina.sh").is_file());
        assert_eq!(f.downloader.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_install_missing_config() {
        let f = fixture(&[]);
        let err = f.installer.install("HTTPD").await.unwrap_err();

        assert_eq!(err.stage(), Some(InstallStage::Resolve));
        assert!(matches!(err.root(), BuildpackError::Config { key } if key == "HTTPD_PACKAGE"));
        assert_eq!(f.downloader.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_install_modules() {
        let f = fixture(&[("PHP_MODULES_PATTERN", "https://dl.example.com/php/{MODULE_NAME}.tar.gz")]);
        for module in ["gd", "curl"] {
            let library = format!("{}.so", module);
            let archive = tar_gz(&[(library.as_str(), "elf")]);
            f.downloader
                .serve(&format!("https://dl.example.com/php/{}.tar.gz.sha256", module), sha256(&archive));
            f.downloader
                .serve(&format!("https://dl.example.com/php/{}.tar.gz", module), archive);
        }

        let results = f.installer.install_modules("PHP", &["gd", "curl", "gd"]).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(f.root.join("build/php/gd.so").is_file());
        assert!(f.root.join("build/php/curl.so").is_file());
        assert_eq!(f.downloader.downloads.load(Ordering::SeqCst), 2);
        assert_eq!(f.downloader.direct.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_install_modules_requires_pattern() {
        let f = fixture(&[]);
        let err = f.installer.install_modules("PHP", &["gd"]).await.unwrap_err();
        assert!(matches!(err.root(), BuildpackError::Config { key } if key == "PHP_MODULES_PATTERN"));
    }

    #[test]
    fn test_verify() {
        let sha256 = DigestAlgorithm::Sha256;
        assert!(verify(sha256, "x", "", "abc").is_ok());
        assert!(verify(sha256, "x", "ABC  file.tgz", "abc").is_ok());
        assert!(verify(sha256, "x", "abd", "abc").unwrap_err().is_integrity());
        assert!(verify(sha256, "x", "abc", "").unwrap_err().is_integrity());
    }
}
