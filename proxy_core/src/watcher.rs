/// Outcome of waiting for the next config file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The config file was modified; a reload should be attempted.
    Changed,
    /// The config file was removed. Per spec.md §7 "WatcherError", this
    /// ends the watcher: reload capability is lost but the proxy keeps
    /// serving with its last-loaded table.
    Removed,
}

/// The file-change notifier is an external collaborator (spec.md §1); this
/// crate only depends on the trait boundary so the lifecycle controller can
/// drive reloads without knowing whether events come from `notify`, a
/// polling loop, or a test harness.
#[async_trait::async_trait]
pub trait ConfigWatcher: Send {
    /// Waits for the next event. Returns `None` once the watcher's channel
    /// is closed (e.g. the underlying OS watch failed irrecoverably).
    async fn next_event(&mut self) -> Option<WatchEvent>;
}
