//! Download engine: streams job payload files to disk
//!
//! Each file is streamed in bounded chunks to a `.part` file next to its destination
//! and renamed into place only once the whole body has been written, so a file that
//! carries its final name is always complete. A payload is all-or-nothing: if one
//! file fails, files already saved for that payload are removed again.

mod naming;

pub use naming::{IdGenerator, UuidGenerator};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::types::{DownloadedFile, Event, FileDescriptor};
use crate::utils::cancellable;
use naming::{descriptor_extension, part_path, unique_destination};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Streams result files to disk with progress events and unique naming
#[derive(Clone)]
pub struct DownloadEngine {
    client: reqwest::Client,
    chunk_size: usize,
    idle_timeout: Duration,
    ids: Arc<dyn IdGenerator>,
    event_tx: broadcast::Sender<Event>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("chunk_size", &self.chunk_size)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Create an engine using random UUID file names
    ///
    /// `config.request_timeout` bounds connecting and every wait for data, not the
    /// whole transfer, so large files that keep flowing are never cut off.
    pub fn new(config: &DownloadConfig, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {e}"),
                key: None,
            })?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size.max(1),
            idle_timeout: config.request_timeout,
            ids: Arc::new(UuidGenerator),
            event_tx,
        })
    }

    /// Replace the token source used for file names
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Stream `source` into `dest`, returning the number of bytes written
    ///
    /// On failure nothing is left at `dest` and the temporary `.part` file is removed.
    ///
    /// # Errors
    ///
    /// - [`Error::Transfer`] on transport failure, non-success status or truncated body
    /// - [`Error::Io`] when the local file cannot be written
    /// - [`Error::Cancelled`] when `cancel` fires mid-transfer
    pub async fn download_file(
        &self,
        source: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let part = part_path(dest);
        let result = match cancellable(cancel, self.stream_to(source, dest, &part)).await {
            Ok(bytes) => tokio::fs::rename(&part, dest)
                .await
                .map(|()| bytes)
                .map_err(Error::from),
            Err(e) => Err(e),
        };

        if result.is_err()
            && let Err(e) = tokio::fs::remove_file(&part).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = ?part, error = %e, "failed to remove partial download");
        }
        result
    }

    async fn stream_to(&self, source: &str, dest: &Path, part: &Path) -> Result<u64> {
        let transfer_error = |message: String| Error::Transfer {
            url: source.to_string(),
            message,
        };

        let idle_error = || {
            transfer_error(format!(
                "no data received for {}s",
                self.idle_timeout.as_secs_f64()
            ))
        };

        let mut response = tokio::time::timeout(self.idle_timeout, self.client.get(source).send())
            .await
            .map_err(|_| idle_error())?
            .map_err(|e| transfer_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(transfer_error(format!("HTTP {}", response.status())));
        }

        let total = response.content_length();
        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = tokio::fs::File::create(part).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut written: u64 = 0;

        while let Some(bytes) = tokio::time::timeout(self.idle_timeout, response.chunk())
            .await
            .map_err(|_| idle_error())?
            .map_err(|e| transfer_error(e.to_string()))?
        {
            for piece in bytes.chunks(self.chunk_size) {
                writer.write_all(piece).await?;
                written += piece.len() as u64;
                self.event_tx
                    .send(Event::Downloading {
                        url: source.to_string(),
                        file_name: file_name.clone(),
                        bytes: written,
                        total,
                    })
                    .ok();
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if let Some(expected) = total
            && expected != written
        {
            return Err(transfer_error(format!(
                "body truncated: expected {expected} bytes, got {written}"
            )));
        }

        Ok(written)
    }

    /// Download every descriptor of a payload into `dir`
    ///
    /// `dir` is created if missing. Each file gets a fresh `{token}{ext}` name, so
    /// repeated calls never overwrite earlier downloads. The first failure aborts the
    /// remaining descriptors, removes the files this call already saved and is
    /// returned to the caller.
    pub async fn download_payload(
        &self,
        descriptors: &[FileDescriptor],
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<DownloadedFile>> {
        tokio::fs::create_dir_all(dir).await?;

        let mut saved: Vec<DownloadedFile> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match self.download_descriptor(descriptor, dir, cancel).await {
                Ok(file) => saved.push(file),
                Err(e) => {
                    tracing::warn!(
                        url = %descriptor.path,
                        error = %e,
                        discarded = saved.len(),
                        "payload download failed, discarding files saved so far"
                    );
                    discard(&saved).await;
                    return Err(e);
                }
            }
        }
        Ok(saved)
    }

    async fn download_descriptor(
        &self,
        descriptor: &FileDescriptor,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadedFile> {
        let extension = descriptor_extension(descriptor);
        let dest = unique_destination(self.ids.as_ref(), dir, &extension).await?;

        tracing::info!(url = %descriptor.path, path = ?dest, "downloading file");
        let bytes = self.download_file(&descriptor.path, &dest, cancel).await?;

        self.event_tx
            .send(Event::FileSaved {
                url: descriptor.path.clone(),
                path: dest.clone(),
                bytes,
            })
            .ok();

        Ok(DownloadedFile {
            source: descriptor.path.clone(),
            path: dest,
            bytes,
            saved_at: chrono::Utc::now(),
        })
    }
}

/// Best-effort removal of files belonging to a failed payload
async fn discard(files: &[DownloadedFile]) {
    for file in files {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            tracing::warn!(path = ?file.path, error = %e, "failed to remove file of failed payload");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Sequential(AtomicUsize);

    impl IdGenerator for Sequential {
        fn next_id(&self) -> String {
            format!("file-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn engine(chunk_size: usize) -> (DownloadEngine, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(1024);
        let config = DownloadConfig {
            chunk_size,
            ..Default::default()
        };
        (DownloadEngine::new(&config, tx).unwrap(), rx)
    }

    fn engine_with_timeout(idle: Duration) -> DownloadEngine {
        let (tx, _rx) = broadcast::channel(1024);
        let config = DownloadConfig {
            request_timeout: idle,
            ..Default::default()
        };
        DownloadEngine::new(&config, tx).unwrap()
    }

    /// Serve one response announcing `announced` bytes, sending `body` one byte every
    /// `gap` and then holding the connection open for `stall`
    async fn trickle_server(
        announced: usize,
        body: &'static [u8],
        gap: Duration,
        stall: Duration,
    ) -> String {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {announced}\r\n\r\n");
            socket.write_all(head.as_bytes()).await.unwrap();
            for byte in body {
                tokio::time::sleep(gap).await;
                if socket.write_all(std::slice::from_ref(byte)).await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(stall).await;
        });
        format!("http://{addr}/media.bin")
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn download_file_streams_body_in_chunks() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/a.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let (engine, mut rx) = engine(1024);

        let bytes = engine
            .download_file(&format!("{}/a.mp4", server.uri()), &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 10_000);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!part_path(&dest).exists());

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::Downloading { bytes, total, .. } = event {
                assert_eq!(total, Some(10_000));
                progress.push(bytes);
            }
        }
        assert!(progress.len() >= 10, "at least one event per 1 KiB chunk");
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&10_000));
    }

    #[tokio::test]
    async fn download_file_http_error_leaves_nothing_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let (engine, _rx) = engine(8192);

        let err = engine
            .download_file(
                &format!("{}/missing.mp4", server.uri()),
                &dest,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            Error::Transfer { message, .. } => assert!(message.contains("404")),
            other => panic!("expected Transfer error, got {other:?}"),
        }
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn download_file_connection_refused_is_transfer_error() {
        let dir = tempdir().unwrap();
        let (engine, _rx) = engine(8192);

        let err = engine
            .download_file(
                "http://127.0.0.1:1/nothing.mp4",
                &dir.path().join("x.mp4"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer { .. }));
    }

    #[tokio::test]
    async fn download_file_cancelled_removes_part_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow.mp4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 64])
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let (engine, _rx) = engine(8192);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = engine
            .download_file(&format!("{}/slow.mp4", server.uri()), &dest, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn steady_transfer_may_outlast_the_timeout() {
        // One byte every 200ms: ~1.2s in total, never idle for 500ms
        let url = trickle_server(6, b"abcdef", Duration::from_millis(200), Duration::ZERO).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("slow.bin");
        let engine = engine_with_timeout(Duration::from_millis(500));

        let started = std::time::Instant::now();
        let bytes = engine
            .download_file(&url, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 6);
        assert!(started.elapsed() > Duration::from_millis(500));
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn stalled_transfer_fails_after_idle_timeout() {
        // Promises 4 bytes, sends 2, then goes quiet
        let url = trickle_server(4, b"ab", Duration::from_millis(10), Duration::from_secs(10)).await;
        let dir = tempdir().unwrap();
        let dest = dir.path().join("stalled.bin");
        let engine = engine_with_timeout(Duration::from_millis(300));

        let started = std::time::Instant::now();
        let err = engine
            .download_file(&url, &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Transfer { message, .. } => {
                assert!(message.contains("no data received"), "unexpected: {message}")
            }
            other => panic!("expected Transfer error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn download_payload_names_files_by_token_and_extension() {
        let server = MockServer::start().await;
        for (p, body) in [("/v/clip", "video"), ("/i/photo.jpg", "image")] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .mount(&server)
                .await;
        }

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("downloads");
        let (engine, _rx) = engine(8192);
        let engine = engine.with_id_generator(Arc::new(Sequential(AtomicUsize::new(0))));

        let payload = vec![
            FileDescriptor::new(format!("{}/v/clip", server.uri())).with_name("clip.mp4"),
            FileDescriptor::new(format!("{}/i/photo.jpg?sig=1", server.uri())),
        ];
        let files = engine
            .download_payload(&payload, &target, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, target.join("file-0.mp4"));
        assert_eq!(files[1].path, target.join("file-1.jpg"));
        assert_eq!(std::fs::read_to_string(&files[0].path).unwrap(), "video");
        assert_eq!(files[1].bytes, 5);
    }

    #[tokio::test]
    async fn download_payload_twice_never_overwrites() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/video.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("data"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (engine, _rx) = engine(8192);
        let payload = vec![FileDescriptor::new(format!("{}/video.mp4", server.uri()))];

        let first = engine
            .download_payload(&payload, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        let second = engine
            .download_payload(&payload, dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_ne!(first[0].path, second[0].path);
        assert_eq!(files_in(dir.path()).len(), 2);
        assert!(first[0].path.exists());
    }

    #[tokio::test]
    async fn download_payload_failure_discards_saved_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("first"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b.mp4"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("third"))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let (engine, _rx) = engine(8192);
        let payload = vec![
            FileDescriptor::new(format!("{}/a.mp4", server.uri())),
            FileDescriptor::new(format!("{}/b.mp4", server.uri())),
            FileDescriptor::new(format!("{}/c.mp4", server.uri())),
        ];

        let err = engine
            .download_payload(&payload, dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transfer { .. }));
        assert!(files_in(dir.path()).is_empty(), "no partial payload left");
    }

    #[tokio::test]
    async fn download_payload_empty_creates_dir_only() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("downloads");
        let (engine, _rx) = engine(8192);

        let files = engine
            .download_payload(&[], &target, &CancellationToken::new())
            .await
            .unwrap();
        assert!(files.is_empty());
        assert!(target.is_dir());

        // creating again is fine
        engine
            .download_payload(&[], &target, &CancellationToken::new())
            .await
            .unwrap();
    }
}
