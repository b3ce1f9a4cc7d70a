//! Connectivity monitor - bridges platform online/offline signals to the
//! sync manager and keeps a pending-count for status displays.

use crate::core::{events::SyncEvent, sync::SyncManager};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

/// Platform-facing connectivity flag.
///
/// The platform (or a test) calls [`ConnectivitySignal::set_online`]; the sync
/// manager and the monitor observe it through receivers.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    /// Signal starting in the given state
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Reports the current state. Returns whether it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    /// Last reported state
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Receiver notified on every transition
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Whether a user session exists; sync passes only run for authenticated users
pub trait SessionProvider: Send + Sync {
    /// True when requests would carry valid credentials
    fn is_authenticated(&self) -> bool;
}

/// Session flag set by whoever owns login state
#[derive(Debug, Default)]
pub struct StaticSession(AtomicBool);

impl StaticSession {
    /// Session in the given state
    #[must_use]
    pub const fn new(authenticated: bool) -> Self {
        Self(AtomicBool::new(authenticated))
    }

    /// Flips the session state
    pub fn set_authenticated(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::Release);
    }
}

impl SessionProvider for StaticSession {
    fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Running monitor task
#[derive(Debug)]
pub struct MonitorHandle {
    pending: watch::Receiver<u64>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Pending-operation count, refreshed on a timer and after triggered passes
    #[must_use]
    pub fn pending_count(&self) -> watch::Receiver<u64> {
        self.pending.clone()
    }

    /// Stops the monitor and waits for its task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("Connectivity monitor task ended abnormally: {e}");
        }
    }
}

/// Watches connectivity and starts sync passes when it comes back
pub struct ConnectivityMonitor {
    manager: SyncManager,
    session: Arc<dyn SessionProvider>,
    online: watch::Receiver<bool>,
    pending: Arc<watch::Sender<u64>>,
    poll_interval: Duration,
}

impl ConnectivityMonitor {
    /// Spawns the monitor on the current runtime.
    ///
    /// Transitions to online publish `Online` and, for an authenticated
    /// session, start a pass in the background. Transitions to offline only
    /// publish `Offline`. The pending count is refreshed every `poll_interval`.
    pub fn spawn(
        manager: SyncManager,
        signal: &ConnectivitySignal,
        session: Arc<dyn SessionProvider>,
        poll_interval: Duration,
    ) -> MonitorHandle {
        let (pending_tx, pending_rx) = watch::channel(0);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let mut online = signal.subscribe();
        // baseline is taken here, before the task first runs
        let initial = *online.borrow_and_update();
        let monitor = Self {
            manager,
            session,
            online,
            pending: Arc::new(pending_tx),
            poll_interval,
        };
        let task = tokio::spawn(monitor.run(initial, shutdown_rx));
        MonitorHandle {
            pending: pending_rx,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(mut self, initial: bool, mut shutdown: oneshot::Receiver<()>) {
        let mut last = initial;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(online = last, "Connectivity monitor started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                changed = self.online.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity signal dropped");
                        break;
                    }
                    let now = *self.online.borrow_and_update();
                    if now != last {
                        last = now;
                        self.on_transition(now).await;
                    }
                }
                _ = ticker.tick() => {
                    refresh_pending(&self.manager, &self.pending).await;
                }
            }
        }
        info!("Connectivity monitor stopped");
    }

    async fn on_transition(&self, online: bool) {
        if !online {
            info!("Connection lost");
            self.manager.events().publish(SyncEvent::Offline);
            return;
        }

        info!("Connection restored");
        self.manager.events().publish(SyncEvent::Online);
        refresh_pending(&self.manager, &self.pending).await;

        if !self.session.is_authenticated() {
            debug!("No authenticated session, not syncing");
            return;
        }
        let manager = self.manager.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            match manager.sync().await {
                Ok(outcome) => debug!(?outcome, "Reconnect sync finished"),
                Err(e) => debug!("Reconnect sync failed: {e}"),
            }
            refresh_pending(&manager, &pending).await;
        });
    }
}

async fn refresh_pending(manager: &SyncManager, pending: &watch::Sender<u64>) {
    match manager.pending_count().await {
        Ok(count) => {
            pending.send_replace(count);
        }
        Err(e) => warn!("Could not read pending count: {e}"),
    }
}
