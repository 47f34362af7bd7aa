use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::controller::DeviceController;
use crate::device_cache::StatusCache;

/// Requests an out-of-band refresh from the polling loop.
///
/// Entity adapters hold one of these and ask for a refresh after every
/// command, so user actions are confirmed by the next snapshot instead of
/// optimistic local state. Requests are coalesced: asking while a refresh is
/// already queued does not schedule extra work.
#[derive(Clone)]
pub struct RefreshHandle(mpsc::UnboundedSender<()>);

impl RefreshHandle {
    pub fn request(&self) {
        // The poller going away just means nobody polls any more.
        let _ = self.0.send(());
    }
}

/// Drives [`StatusCache::refresh`] on a fixed interval plus manual requests,
/// and fans out a change notification after every completed refresh.
///
/// Refreshes run strictly serially on this task; subscribers read the cache
/// directly and never block on I/O.
pub struct Poller<C> {
    cache: Arc<StatusCache<C>>,
    interval: Duration,
    requests: mpsc::UnboundedReceiver<()>,
    updates: watch::Sender<u64>,
}

impl<C: DeviceController> Poller<C> {
    pub fn new(cache: Arc<StatusCache<C>>, interval: Duration) -> (Self, RefreshHandle) {
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (updates, _) = watch::channel(0);
        let poller = Self { cache, interval, requests, updates };
        (poller, RefreshHandle(request_tx))
    }

    /// A receiver that observes the refresh generation. The value itself only
    /// matters as a change marker.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut requests_open = true;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                request = self.requests.recv(), if requests_open => {
                    if request.is_none() {
                        // All handles dropped; periodic polling continues.
                        requests_open = false;
                        continue;
                    }
                    // Collapse a burst of requests into one refresh.
                    while self.requests.try_recv().is_ok() {}
                    interval.reset();
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("poll loop stopping");
                    return;
                }
            }
            self.cache.refresh().await;
            self.updates.send_modify(|generation| *generation += 1);
        }
    }
}
