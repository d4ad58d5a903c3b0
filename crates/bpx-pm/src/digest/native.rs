//! In-process hashing.

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha512};
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::{is_absent, DigestAlgorithm, Digester};
use crate::Result;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hashes files with the `sha1`/`sha2` crates
#[derive(Debug, Clone)]
pub struct NativeDigester {
    algorithm: DigestAlgorithm,
}

impl NativeDigester {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }
}

/// Stream a file through a hasher
async fn hash_file<D: sha2::Digest>(path: &Path) -> Result<String>
where
    sha2::digest::Output<D>: std::fmt::LowerHex,
{
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex digest of an in-memory buffer
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha1 => format!("{:x}", Sha1::digest(data)),
        DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
        DigestAlgorithm::Sha512 => format!("{:x}", Sha512::digest(data)),
    }
}

#[async_trait]
impl Digester for NativeDigester {
    fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    async fn calculate(&self, path: &Path) -> Result<String> {
        if is_absent(path) {
            return Ok(String::new());
        }

        match self.algorithm {
            DigestAlgorithm::Sha1 => hash_file::<Sha1>(path).await,
            DigestAlgorithm::Sha256 => hash_file::<Sha256>(path).await,
            DigestAlgorithm::Sha512 => hash_file::<Sha512>(path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::io::AsyncWriteExt;

    const HELLO_SHA1: &str = "2ef7bde608ce5404e97d5f042f95f89f1c232871";
    const HELLO_SHA256: &str = "7f83b1657ff1fc53b92dc18148a1d65dfc2d4b1fa3d677284addd200126d9069";

    async fn hello_file() -> NamedTempFile {
        let temp_file = NamedTempFile::new().unwrap();
        let mut file = tokio::fs::File::create(temp_file.path()).await.unwrap();
        file.write_all(b"Hello World!").await.unwrap();
        file.flush().await.unwrap();
        temp_file
    }

    #[tokio::test]
    async fn test_calculate_sha1() {
        let file = hello_file().await;
        let digester = NativeDigester::new(DigestAlgorithm::Sha1);
        assert_eq!(digester.calculate(file.path()).await.unwrap(), HELLO_SHA1);
    }

    #[tokio::test]
    async fn test_calculate_sha256() {
        let file = hello_file().await;
        let digester = NativeDigester::new(DigestAlgorithm::Sha256);
        assert_eq!(digester.calculate(file.path()).await.unwrap(), HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_calculate_sha512_matches_buffer_digest() {
        let file = hello_file().await;
        let digester = NativeDigester::new(DigestAlgorithm::Sha512);
        let digest = digester.calculate(file.path()).await.unwrap();
        assert_eq!(digest.len(), DigestAlgorithm::Sha512.hex_len());
        assert_eq!(digest, digest_bytes(DigestAlgorithm::Sha512, b"Hello World!"));
    }

    #[tokio::test]
    async fn test_calculate_without_file_is_empty() {
        let digester = NativeDigester::new(DigestAlgorithm::Sha256);
        assert_eq!(digester.calculate(Path::new("")).await.unwrap(), "");
        assert_eq!(digester.calculate(Path::new("/nonexistent/file")).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_matches() {
        let file = hello_file().await;
        let digester = NativeDigester::new(DigestAlgorithm::Sha256);

        assert!(digester.matches(HELLO_SHA256, file.path()).await.unwrap());
        assert!(digester
            .matches(&HELLO_SHA256.to_uppercase(), file.path())
            .await
            .unwrap());
        assert!(digester
            .matches(&format!("{} ./junk.txt", HELLO_SHA256), file.path())
            .await
            .unwrap());
        assert!(!digester.matches(&HELLO_SHA256[1..], file.path()).await.unwrap());
        assert!(!digester.matches("", file.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_large_file_spans_several_reads() {
        let data = vec![7u8; READ_BUFFER_SIZE * 3 + 17];
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), &data).unwrap();

        let digester = NativeDigester::new(DigestAlgorithm::Sha1);
        assert_eq!(
            digester.calculate(temp_file.path()).await.unwrap(),
            digest_bytes(DigestAlgorithm::Sha1, &data)
        );
    }
}
