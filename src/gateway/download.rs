//! Back-pressured streaming of file content.
//!
//! A [`ResourceHandle`] owns the provider byte stream for one download and is
//! driven by a spawned pump task that forwards chunks through a bounded
//! channel. The consumer side is a [`DownloadStream`]. The pump only reads
//! from the provider when the channel has room, and dropping the
//! `DownloadStream` (client disconnect) ends the pump and releases the
//! provider connection.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::METRICS;

pub struct ResourceHandle<S> {
    file_id: String,
    upstream: S,
}

impl<S, E> ResourceHandle<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    pub fn new(file_id: impl Into<String>, upstream: S) -> Self {
        Self {
            file_id: file_id.into(),
            upstream,
        }
    }

    /// Start pumping on the current runtime. `capacity` is the number of
    /// chunks that may be buffered ahead of the consumer.
    pub fn spawn(self, capacity: usize) -> DownloadStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let file_id = self.file_id.clone();
        tokio::spawn(self.pump(tx));
        DownloadStream { file_id, rx }
    }

    async fn pump(self, tx: mpsc::Sender<Result<Bytes>>) {
        let ResourceHandle { file_id, upstream } = self;
        tokio::pin!(upstream);
        let mut transferred: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => {
                    debug!(file_id = %file_id, transferred, "download abandoned by consumer");
                    return;
                }
                next = upstream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let len = chunk.len() as u64;
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!(file_id = %file_id, transferred, "download abandoned by consumer");
                        return;
                    }
                    transferred += len;
                    METRICS.download_bytes_total.inc_by(len as f64);
                }
                Some(Err(e)) => {
                    warn!(file_id = %file_id, transferred, "download interrupted: {}", e);
                    let _ = tx
                        .send(Err(Error::provider(None, format!("download interrupted: {}", e))))
                        .await;
                    return;
                }
                None => {
                    debug!(file_id = %file_id, transferred, "download complete");
                    return;
                }
            }
        }
    }
}

/// Lazily produced file content. Yields chunks until the file is complete or
/// one `Err` if the transfer fails midway.
pub struct DownloadStream {
    file_id: String,
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl DownloadStream {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Copy the whole stream into `sink`, returning the number of bytes written.
    /// Bytes already written before a failure are left for the caller to handle.
    pub async fn write_to<W>(mut self, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written: u64 = 0;
        while let Some(chunk) = self.rx.recv().await {
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }
}

impl DownloadStream {
    /// Save the content at `path`. Bytes go to a temp file in the same
    /// directory that is renamed over `path` only after the last chunk is
    /// synced, so a failed transfer leaves `path` as it was. Unless
    /// `overwrite` is set an existing file at `path` is refused up front.
    pub async fn save_as(self, path: &Path, overwrite: bool) -> Result<u64> {
        if !overwrite && tokio::fs::try_exists(path).await? {
            return Err(Error::Sink(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }

        let tmp = partial_path(path);
        let outcome = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp)
                .await?;
            let written = self.write_to(&mut file).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, path).await?;
            Ok::<u64, Error>(written)
        }
        .await;

        if outcome.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        outcome
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    path.with_file_name(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()))
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
