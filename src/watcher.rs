use std::path::Path;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use proxy_core::watcher::{ConfigWatcher, WatchEvent};
use tokio::sync::mpsc;

/// [`ConfigWatcher`] implementation backed by the `notify` crate. This is
/// the binary crate's concrete answer to the trait boundary `proxy_core`
/// defines for the file-change notifier, an external collaborator
/// (spec.md §1).
pub struct FileConfigWatcher {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    // Kept alive for the lifetime of the watcher; dropping it stops watching.
    _watcher: notify::RecommendedWatcher,
}

impl FileConfigWatcher {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    let mapped = match event.kind {
                        EventKind::Remove(_) => Some(WatchEvent::Removed),
                        EventKind::Modify(_) | EventKind::Create(_) => Some(WatchEvent::Changed),
                        _ => None,
                    };
                    if let Some(mapped) = mapped {
                        // Receiver side may have been dropped on shutdown;
                        // a failed send just means nobody's listening anymore.
                        let _ = tx.send(mapped);
                    }
                }
                Err(err) => log::error!("config watcher channel error: {}", err),
            }
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(Self {
            rx,
            _watcher: watcher,
        })
    }
}

#[async_trait::async_trait]
impl ConfigWatcher for FileConfigWatcher {
    async fn next_event(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}
