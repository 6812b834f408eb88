//! Process-wide transfer counters and the periodic `--progress` report.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter sharded per thread, so that concurrent transfers never contend on one cache line.
#[derive(Debug, Default)]
pub struct TlsCounter {
    shards: thread_local::ThreadLocal<AtomicU64>,
}

impl TlsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: u64) {
        self.shards
            .get_or(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.load(Ordering::Relaxed))
            .sum()
    }
}

/// Transfers that were started and the ones that already finished.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

/// Marks one transfer as in flight until dropped.
pub struct ProgressGuard<'a> {
    counter: &'a ProgressCounter,
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.counter.finished.inc();
    }
}

impl ProgressCounter {
    pub fn guard(&self) -> ProgressGuard<'_> {
        self.started.inc();
        ProgressGuard { counter: self }
    }

    pub fn finished(&self) -> u64 {
        self.finished.get()
    }

    /// Shards are summed one by one, a guard dropped in between may briefly show up as finished
    /// but not started.
    pub fn in_flight(&self) -> u64 {
        let finished = self.finished.get();
        self.started.get().saturating_sub(finished)
    }
}

#[derive(Debug)]
pub struct Progress {
    pub ops: ProgressCounter,
    pub bytes_transferred: TlsCounter,
    pub files_pulled: TlsCounter,
    pub files_failed: TlsCounter,
    pub files_pushed: TlsCounter,
    pub directories_created: TlsCounter,
    pub directories_mirrored: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            ops: ProgressCounter::default(),
            bytes_transferred: TlsCounter::new(),
            files_pulled: TlsCounter::new(),
            files_failed: TlsCounter::new(),
            files_pushed: TlsCounter::new(),
            directories_created: TlsCounter::new(),
            directories_mirrored: TlsCounter::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders one report line per call, with the throughput since the previous call.
pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_bytes: progress.bytes_transferred.get(),
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let now = std::time::Instant::now();
        let bytes = self.progress.bytes_transferred.get();
        let since_last = (now - self.last_update).as_secs_f64();
        let rate = if since_last > 0.0 {
            (bytes - self.last_bytes) as f64 / since_last
        } else {
            0.0
        };
        self.last_bytes = bytes;
        self.last_update = now;
        format!(
            "[{}s] in flight: {} | {} ({}/s) | pulled: {} files, {} failed, {} folders | pushed: {} files, {} folders",
            self.progress.elapsed().as_secs(),
            self.progress.ops.in_flight(),
            bytesize::ByteSize(bytes),
            bytesize::ByteSize(rate as u64),
            self.progress.files_pulled.get(),
            self.progress.files_failed.get(),
            self.progress.directories_mirrored.get(),
            self.progress.files_pushed.get(),
            self.progress.directories_created.get(),
        )
    }
}
