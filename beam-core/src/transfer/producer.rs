//! File producer — metadata pre-pass and the chunk stream.
//!
//! The producer reads the source twice. The pre-pass snapshots the size
//! and hashes exactly that many bytes, so METADATA always describes the
//! bytes the stream will carry even if the file grows afterwards. The
//! stream then re-opens the file and yields `chunk_size`-bounded slices
//! from its own task, keeping disk I/O off the channel loops.

use std::path::Path;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BeamError;
use crate::message::FileMetadata;

/// Read-buffer size for both passes, independent of `chunk_size`.
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Depth of the chunk queue between the disk task and the session.
const CHUNK_QUEUE_CAPACITY: usize = 8;

/// One element of the chunk stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// One chunk of file bytes, length ≤ `chunk_size`.
    Data(Bytes),
    /// The snapshot byte count has been fully yielded.
    End,
}

/// Receiving half of the producer's chunk queue.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<Result<ChunkEvent, BeamError>>,
}

impl ChunkStream {
    /// Next element, or the error that terminated the stream.
    pub async fn next(&mut self) -> Result<ChunkEvent, BeamError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Err(BeamError::QueueClosed),
        }
    }
}

/// Opens a source file and produces `(metadata, chunks)`.
pub struct FileProducer;

impl FileProducer {
    /// Run the hashing pre-pass and start the chunk stream task.
    ///
    /// The returned metadata is complete (name, snapshot size, mime
    /// type, checksum); the stream yields [`ChunkEvent::Data`] items
    /// and a final [`ChunkEvent::End`].
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> Result<(FileMetadata, ChunkStream), BeamError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BeamError::User(format!("not a file path: {}", path.display())))?
            .to_string();

        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();

        // Pre-pass: hash exactly `size` bytes.
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(BeamError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("file shrank below its {size}-byte snapshot"),
                )));
            }
            hasher.update(&buf[..n]);
            remaining -= n as u64;
        }
        let checksum = hex::encode(hasher.finalize());

        let metadata = FileMetadata {
            name,
            size,
            mime_type: mime_type_for(path).to_string(),
            checksum,
        };

        // Stream pass: re-open so the two passes never share a cursor.
        let stream_file = File::open(path).await?;
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        tokio::spawn(stream_chunks(stream_file, size, chunk_size, tx, cancel));

        Ok((metadata, ChunkStream { rx }))
    }
}

/// Disk task: yield the snapshot byte count in `chunk_size` slices.
async fn stream_chunks(
    mut file: File,
    size: u64,
    chunk_size: usize,
    tx: mpsc::Sender<Result<ChunkEvent, BeamError>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE.max(chunk_size)];
    let mut remaining = size;

    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = match file.read(&mut buf[..want]).await {
            Ok(0) => {
                let _ = tx
                    .send(Err(BeamError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file shrank below its {size}-byte snapshot"),
                    ))))
                    .await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };
        remaining -= n as u64;

        for slice in buf[..n].chunks(chunk_size) {
            let chunk = Bytes::copy_from_slice(slice);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(Ok(ChunkEvent::Data(chunk))) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    let _ = tx.send(Ok(ChunkEvent::End)).await;
}

/// MIME type from the file extension, octet-stream when unknown.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "json" => "application/json",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

// ── Tests ────────────────────────────────────────────────────────
