//! File consumer — destination resolution, write-while-hash, finalize.
//!
//! The consumer owns the one file handle of the receiving session. Every
//! exit path either finalizes (verify then keep) or discards (remove the
//! partial file); no path leaves a stray handle or partial file behind.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::BeamError;
use crate::message::FileMetadata;

/// Reject metadata names that could escape the destination directory.
///
/// Returns the name unchanged when it is a plain basename.
pub fn sanitize_file_name(name: &str) -> Result<&str, BeamError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if unsafe_name {
        return Err(BeamError::UnsafeFileName(name.to_string()));
    }
    Ok(name)
}

/// Write handle for one incoming file.
#[derive(Debug)]
pub struct FileConsumer {
    path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    written: u64,
    expected: FileMetadata,
}

impl FileConsumer {
    /// Resolve the destination and create the file.
    ///
    /// An existing directory `dst` receives `dst/<metadata.name>`; any
    /// other `dst` is the final path itself and its parent is created
    /// (mode 0755) when missing.
    pub async fn create(dst: &Path, metadata: &FileMetadata) -> Result<Self, BeamError> {
        let path = if fs::metadata(dst).await.map(|m| m.is_dir()).unwrap_or(false) {
            dst.join(sanitize_file_name(&metadata.name)?)
        } else {
            if let Some(parent) = dst.parent() {
                if !parent.as_os_str().is_empty() && fs::metadata(parent).await.is_err() {
                    create_dir_0755(parent).await?;
                }
            }
            dst.to_path_buf()
        };

        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            hasher: Sha256::new(),
            written: 0,
            expected: metadata.clone(),
        })
    }

    /// Append one chunk, updating the running digest.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), BeamError> {
        let file = self.file.as_mut().ok_or(BeamError::QueueClosed)?;
        file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// The resolved destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close, then verify byte count and digest against the metadata.
    ///
    /// On mismatch the file is removed and the integrity error returned.
    pub async fn finalize(mut self) -> Result<String, BeamError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }

        if self.written != self.expected.size {
            let err = BeamError::SizeMismatch {
                expected: self.expected.size,
                actual: self.written,
            };
            let _ = fs::remove_file(&self.path).await;
            return Err(err);
        }

        let digest = hex::encode(std::mem::take(&mut self.hasher).finalize());
        if digest != self.expected.checksum {
            let err = BeamError::ChecksumMismatch {
                expected: self.expected.checksum.clone(),
                actual: digest,
            };
            let _ = fs::remove_file(&self.path).await;
            return Err(err);
        }

        Ok(digest)
    }

    /// Drop the handle and remove the partial file (error/cancel path).
    pub async fn discard(mut self) {
        self.file.take();
        let _ = fs::remove_file(&self.path).await;
    }
}

#[cfg(unix)]
async fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(0o755);
    builder.create(path).await
}

#[cfg(not(unix))]
async fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_for(contents: &[u8], name: &str) -> FileMetadata {
        let mut hasher = Sha256::new();
        hasher.update(contents);
        FileMetadata {
            name: name.to_string(),
            size: contents.len() as u64,
            mime_type: "application/octet-stream".to_string(),
            checksum: hex::encode(hasher.finalize()),
        }
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_file_name("file.bin").is_ok());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("a/b").is_err());
        assert!(sanitize_file_name("a\\b").is_err());
        assert!(sanitize_file_name("/etc/passwd").is_err());
        // A leading dot that is not a traversal is acceptable.
        assert!(sanitize_file_name(".config").is_ok());
    }

    #[tokio::test]
    async fn directory_destination_appends_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata_for(b"abc", "file.bin");
        let mut consumer = FileConsumer::create(dir.path(), &meta).await.unwrap();
        assert_eq!(consumer.path(), dir.path().join("file.bin"));

        consumer.write_chunk(b"abc").await.unwrap();
        consumer.finalize().await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("file.bin")).unwrap(),
            b"abc"
        );
    }

    #[tokio::test]
    async fn file_destination_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("nested").join("out.bin");
        let meta = metadata_for(b"xyz", "ignored.bin");
        let mut consumer = FileConsumer::create(&dst, &meta).await.unwrap();

        consumer.write_chunk(b"xyz").await.unwrap();
        consumer.finalize().await.unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"xyz");
    }

    #[tokio::test]
    async fn unsafe_metadata_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata_for(b"x", "../escape.bin");
        let err = FileConsumer::create(dir.path(), &meta).await.unwrap_err();
        assert!(matches!(err, BeamError::UnsafeFileName(_)));
    }

    #[tokio::test]
    async fn checksum_mismatch_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = metadata_for(b"abc", "file.bin");
        meta.checksum = "0".repeat(64);

        let mut consumer = FileConsumer::create(dir.path(), &meta).await.unwrap();
        consumer.write_chunk(b"abc").await.unwrap();
        let path = consumer.path().to_path_buf();

        let err = consumer.finalize().await.unwrap_err();
        assert!(matches!(err, BeamError::ChecksumMismatch { .. }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn size_mismatch_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata_for(b"abcdef", "file.bin");

        let mut consumer = FileConsumer::create(dir.path(), &meta).await.unwrap();
        consumer.write_chunk(b"abc").await.unwrap();
        let path = consumer.path().to_path_buf();

        let err = consumer.finalize().await.unwrap_err();
        assert!(matches!(
            err,
            BeamError::SizeMismatch {
                expected: 6,
                actual: 3
            }
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn discard_removes_the_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata_for(b"abcdef", "file.bin");

        let mut consumer = FileConsumer::create(dir.path(), &meta).await.unwrap();
        consumer.write_chunk(b"abc").await.unwrap();
        let path = consumer.path().to_path_buf();
        assert!(path.exists());

        consumer.discard().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_file_finalizes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let meta = metadata_for(b"", "empty.bin");
        let consumer = FileConsumer::create(dir.path(), &meta).await.unwrap();
        let digest = consumer.finalize().await.unwrap();
        assert_eq!(digest, meta.checksum);
        assert_eq!(
            std::fs::read(dir.path().join("empty.bin")).unwrap().len(),
            0
        );
    }
}
