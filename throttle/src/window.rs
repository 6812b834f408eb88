use tokio::task::{JoinError, JoinSet};

/// Sliding window of outstanding tasks.
///
/// At most `max_width` tasks are admitted at any time. When the window is full, admission waits
/// for the first outstanding task to settle and then compacts the window by collecting every
/// other task that has already finished.
#[derive(Debug)]
pub struct Window<T> {
    join_set: JoinSet<T>,
    max_width: usize,
    peak: usize,
}

impl<T: Send + 'static> Window<T> {
    #[must_use]
    pub fn new(max_width: usize) -> Self {
        assert!(max_width > 0, "window width must be positive");
        Self {
            join_set: JoinSet::new(),
            max_width,
            peak: 0,
        }
    }

    #[must_use]
    pub fn max_width(&self) -> usize {
        self.max_width
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Highest number of tasks that were outstanding at the same time.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Waits for a free slot if the window is full.
    ///
    /// Returns the results of all tasks that settled while making room (empty if no wait was
    /// needed).
    pub async fn make_room(&mut self) -> Vec<Result<T, JoinError>> {
        let mut settled = Vec::new();
        if self.join_set.len() >= self.max_width {
            tracing::trace!("window full ({}), waiting for a slot", self.max_width);
            if let Some(res) = self.join_set.join_next().await {
                settled.push(res);
            }
            while let Some(res) = self.join_set.try_join_next() {
                settled.push(res);
            }
        }
        settled
    }

    /// Spawns `task` into a free slot, callers go through [`Window::make_room`] first.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        debug_assert!(self.join_set.len() < self.max_width);
        self.join_set.spawn(task);
        self.peak = std::cmp::max(self.peak, self.join_set.len());
    }

    /// Admits `task`, waiting for a free slot first if the window is full.
    pub async fn admit<F>(&mut self, task: F) -> Vec<Result<T, JoinError>>
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let settled = self.make_room().await;
        self.spawn(task);
        settled
    }

    /// Waits for the next outstanding task, `None` once the window is empty.
    pub async fn next(&mut self) -> Option<Result<T, JoinError>> {
        self.join_set.join_next().await
    }

    /// Waits for every outstanding task.
    pub async fn drain(&mut self) -> Vec<Result<T, JoinError>> {
        let mut settled = Vec::with_capacity(self.join_set.len());
        while let Some(res) = self.join_set.join_next().await {
            settled.push(res);
        }
        settled
    }
}

/// Runs every task produced by `factories` with at most `max_width` of them outstanding.
///
/// A factory is only invoked when its task is admitted. Resolves once all tasks have settled;
/// results come back in completion order.
pub async fn run_bounded<I, F, Fut, T>(factories: I, max_width: usize) -> Vec<Result<T, JoinError>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut window = Window::new(max_width);
    let mut results = Vec::new();
    for factory in factories {
        results.extend(window.admit(factory()).await);
    }
    results.extend(window.drain().await);
    results
}
