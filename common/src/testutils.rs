use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::local::LocalRootService;
use crate::service::{BoxedRead, BoxedWrite, FileInfo, RemoteFileService, ServiceError};

pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("afcx_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    let tmp_dir = create_temp_dir().await?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    //    |- 5.txt
    let foo_path = tmp_dir.join("foo");
    tokio::fs::create_dir(&foo_path).await?;
    tokio::fs::write(foo_path.join("0.txt"), "0").await?;
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await?;
    tokio::fs::write(bar_path.join("1.txt"), "11").await?;
    tokio::fs::write(bar_path.join("2.txt"), "222").await?;
    tokio::fs::write(bar_path.join("3.txt"), "3333").await?;
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await?;
    tokio::fs::write(baz_path.join("4.txt"), "44444").await?;
    tokio::fs::write(baz_path.join("5.txt"), "555555").await?;
    Ok(tmp_dir)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateDirectory(String),
    WriteOpened(String),
    WriteClosed(String),
}

/// Wraps [`LocalRootService`], records calls and injects failures.
#[derive(Debug)]
pub struct InstrumentedService {
    inner: LocalRootService,
    fail_reads: HashSet<String>,
    stall_reads: HashSet<String>,
    fail_writes: HashSet<String>,
    read_delay: Duration,
    write_delay: Duration,
    events: Arc<Mutex<Vec<Event>>>,
    active_reads: Arc<AtomicUsize>,
    peak_reads: Arc<AtomicUsize>,
    active_writes: Arc<AtomicUsize>,
    peak_writes: Arc<AtomicUsize>,
}

impl InstrumentedService {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            inner: LocalRootService::new(root),
            fail_reads: HashSet::new(),
            stall_reads: HashSet::new(),
            fail_writes: HashSet::new(),
            read_delay: Duration::ZERO,
            write_delay: Duration::ZERO,
            events: Arc::new(Mutex::new(vec![])),
            active_reads: Arc::new(AtomicUsize::new(0)),
            peak_reads: Arc::new(AtomicUsize::new(0)),
            active_writes: Arc::new(AtomicUsize::new(0)),
            peak_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reads of `path` fail after the stream was opened.
    pub fn fail_read(mut self, path: &str) -> Self {
        self.fail_reads.insert(path.to_string());
        self
    }

    /// Reads of `path` never produce data.
    pub fn stall_read(mut self, path: &str) -> Self {
        self.stall_reads.insert(path.to_string());
        self
    }

    /// Writes to `path` fail after the stream was opened.
    pub fn fail_write(mut self, path: &str) -> Self {
        self.fail_writes.insert(path.to_string());
        self
    }

    /// Every read stream is held open for at least `delay`.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Every write stream is held open for at least `delay`.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn created_directories(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::CreateDirectory(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    /// Highest number of read streams that were open at the same time.
    pub fn peak_reads(&self) -> usize {
        self.peak_reads.load(Ordering::SeqCst)
    }

    /// Highest number of write streams that were open at the same time.
    pub fn peak_writes(&self) -> usize {
        self.peak_writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RemoteFileService for InstrumentedService {
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, ServiceError> {
        self.inner.list_directory(path).await
    }

    async fn file_info(&self, path: &str) -> Result<FileInfo, ServiceError> {
        self.inner.file_info(path).await
    }

    async fn create_directory(&self, path: &str) -> Result<(), ServiceError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::CreateDirectory(path.to_string()));
        self.inner.create_directory(path).await
    }

    async fn delete_directory(&self, path: &str) -> Result<(), ServiceError> {
        self.inner.delete_directory(path).await
    }

    async fn create_read_stream(&self, path: &str) -> Result<BoxedRead, ServiceError> {
        let now = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_reads.fetch_max(now, Ordering::SeqCst);
        let stream = match self.inner.create_read_stream(path).await {
            Ok(stream) => stream,
            Err(error) => {
                self.active_reads.fetch_sub(1, Ordering::SeqCst);
                return Err(error);
            }
        };
        let tracked = TrackedRead {
            inner: if self.fail_reads.contains(path) {
                Box::new(FailingStream)
            } else if self.stall_reads.contains(path) {
                Box::new(StalledStream)
            } else {
                stream
            },
            active_reads: self.active_reads.clone(),
        };
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        Ok(Box::new(tracked))
    }

    async fn create_write_stream(&self, path: &str) -> Result<BoxedWrite, ServiceError> {
        // recorded before opening, so events follow the order in which writes were started
        let now = self.active_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes.fetch_max(now, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(Event::WriteOpened(path.to_string()));
        let stream = match self.inner.create_write_stream(path).await {
            Ok(stream) => stream,
            Err(error) => {
                self.active_writes.fetch_sub(1, Ordering::SeqCst);
                return Err(error);
            }
        };
        let tracked = TrackedWrite {
            inner: if self.fail_writes.contains(path) {
                Box::new(FailingStream)
            } else {
                stream
            },
            path: path.to_string(),
            events: self.events.clone(),
            active_writes: self.active_writes.clone(),
        };
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        Ok(Box::new(tracked))
    }
}

struct TrackedRead {
    inner: BoxedRead,
    active_reads: Arc<AtomicUsize>,
}

impl Drop for TrackedRead {
    fn drop(&mut self) {
        self.active_reads.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedRead {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

struct TrackedWrite {
    inner: BoxedWrite,
    path: String,
    events: Arc<Mutex<Vec<Event>>>,
    active_writes: Arc<AtomicUsize>,
}

impl Drop for TrackedWrite {
    fn drop(&mut self) {
        self.active_writes.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(Event::WriteClosed(self.path.clone()));
    }
}

impl AsyncWrite for TrackedWrite {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct FailingStream;

impl AsyncRead for FailingStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::other("injected read failure")))
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Err(std::io::Error::other("injected write failure")))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::other("injected write failure")))
    }
}

struct StalledStream;

impl AsyncRead for StalledStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}
