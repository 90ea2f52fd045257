//! Driving a watcher from the tokio reactor.

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{Result, WatcherError};
use crate::event::FileEvent;
use crate::facility::EventFacility;
use crate::host::Classifier;
use crate::watcher::{DrainCycle, KqueueWatcher};

/// Registers the watcher's kernel queue descriptor with the reactor for read
/// readiness and runs one drain cycle each time it becomes ready.
pub struct EventLoopAdapter<F: EventFacility, C> {
    inner: AsyncFd<KqueueWatcher<F, C>>,
}

impl<F: EventFacility, C: Classifier> EventLoopAdapter<F, C> {
    /// Register `watcher` with the current tokio reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(watcher: KqueueWatcher<F, C>) -> Result<Self> {
        let inner = AsyncFd::try_with_interest(watcher, Interest::READABLE)
            .map_err(|e| WatcherError::Io(e.into()))?;
        Ok(Self { inner })
    }

    pub fn watcher(&self) -> &KqueueWatcher<F, C> {
        self.inner.get_ref()
    }

    pub fn watcher_mut(&mut self) -> &mut KqueueWatcher<F, C> {
        self.inner.get_mut()
    }

    /// Wait for the kernel queue to become readable and drain it once.
    pub async fn next_batch(&mut self) -> Result<DrainCycle> {
        let mut guard = self.inner.readable_mut().await?;
        let cycle = guard.get_inner_mut().process_ready();
        // Everything ready was drained; a later kernel event re-arms readiness.
        guard.clear_ready();
        cycle
    }

    /// Forward every classified event to `tx` until the receiver goes away,
    /// then shut the watcher down.
    pub async fn run(mut self, tx: mpsc::Sender<FileEvent>) -> Result<()> {
        info!("Kqueue event loop started");

        'events: loop {
            let cycle = tokio::select! {
                cycle = self.next_batch() => cycle?,
                () = tx.closed() => break 'events,
            };

            for failure in &cycle.report.failures {
                error!("Watch maintenance failed: {failure}");
            }

            for event in cycle.events {
                if tx.send(event).await.is_err() {
                    break 'events;
                }
            }
        }

        info!("Event receiver dropped; stopping kqueue event loop");
        self.into_inner().shutdown();
        Ok(())
    }

    /// Unregister from the reactor and hand the watcher back.
    pub fn into_inner(self) -> KqueueWatcher<F, C> {
        self.inner.into_inner()
    }
}

impl<F, C> EventLoopAdapter<F, C>
where
    F: EventFacility + Send + 'static,
    C: Classifier + Send + 'static,
{
    /// Move the adapter into its own task. All watch-set mutation then happens
    /// on that task, whatever runtime flavor the host uses.
    pub fn spawn(self, tx: mpsc::Sender<FileEvent>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(tx))
    }
}

/// Create a channel sized from the watcher's config and spawn the adapter.
pub fn spawn_with_channel<F, C>(
    watcher: KqueueWatcher<F, C>,
) -> Result<(JoinHandle<Result<()>>, mpsc::Receiver<FileEvent>)>
where
    F: EventFacility + Send + 'static,
    C: Classifier + Send + 'static,
{
    let capacity = watcher.config().channel_capacity;
    if capacity == 0 {
        return Err(WatcherError::Config(
            "channel_capacity must be greater than zero".to_string(),
        ));
    }
    let (tx, rx) = mpsc::channel(capacity);
    let adapter = EventLoopAdapter::new(watcher)?;
    Ok((adapter.spawn(tx), rx))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::WatcherConfig;
    use crate::event::{FileEventKind, VnodeEvents};
    use crate::host::PathDiscovery;
    use crate::loopback::LoopbackFacility;
    use crate::snapshot::DirectorySnapshot;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    fn watcher(temp_dir: &TempDir) -> KqueueWatcher<LoopbackFacility, DirectorySnapshot> {
        let mut snapshot = DirectorySnapshot::new(temp_dir.path());
        let paths = snapshot.discover().unwrap();
        let mut watcher = KqueueWatcher::new(WatcherConfig::new(temp_dir.path()), snapshot).unwrap();
        watcher.init(&paths).unwrap();
        watcher
    }

    #[tokio::test]
    async fn test_next_batch_wakes_on_readiness() {
        let temp_dir = TempDir::new().unwrap();
        let mut adapter = EventLoopAdapter::new(watcher(&temp_dir)).unwrap();
        let injector = adapter.watcher().bridge().facility().injector().unwrap();
        let root_fd = adapter.watcher().registry().fds().next().unwrap();

        std::fs::write(temp_dir.path().join("c.txt"), "c").unwrap();
        injector.fire(root_fd, VnodeEvents::WRITE).unwrap();

        let cycle = tokio::time::timeout(Duration::from_secs(5), adapter.next_batch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cycle.events.len(), 1);
        assert_eq!(cycle.events[0].kind, FileEventKind::Created);
        assert_eq!(adapter.watcher().len(), 2);
    }

    #[tokio::test]
    async fn test_run_forwards_events_and_stops_with_receiver() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = watcher(&temp_dir);
        let injector = watcher.bridge().facility().injector().unwrap();
        let root_fd = watcher.registry().fds().next().unwrap();

        let (handle, mut rx) = spawn_with_channel(watcher).unwrap();

        let new_dir = temp_dir.path().join("d");
        std::fs::create_dir(&new_dir).unwrap();
        std::fs::write(new_dir.join("e.txt"), "e").unwrap();
        injector.fire(root_fd, VnodeEvents::WRITE | VnodeEvents::LINK).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.path, new_dir);
        assert!(first.is_directory);
        assert_eq!(second.path, new_dir.join("e.txt"));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
