use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::request::Envelope;
use crate::treekeeper::KeeperStatus;

/// Key of the GuidePost intake in the handler map.
pub const GUIDEPOST: &str = "guidepost";

/// Registry key of a repository's Treekeeper.
pub fn repository_key(name: &str) -> String {
    format!("repository_{}", name)
}

/// A handler's input channels: the normal intake plus an optional
/// priority intake with identical semantics.
#[derive(Debug, Clone)]
pub struct Intake {
    pub normal: mpsc::Sender<Envelope>,
    pub priority: Option<mpsc::Sender<Envelope>>,
}

impl Intake {
    pub fn new(normal: mpsc::Sender<Envelope>) -> Self {
        Intake { normal, priority: None }
    }

    pub fn with_priority(normal: mpsc::Sender<Envelope>, priority: mpsc::Sender<Envelope>) -> Self {
        Intake { normal, priority: Some(priority) }
    }
}

/// A registered handler: its intake and, for Treekeepers, the shared
/// status block GuidePost consults before forwarding.
#[derive(Debug, Clone)]
pub struct RegisteredHandler {
    pub intake: Intake,
    pub keeper_status: Option<Arc<KeeperStatus>>,
}

/// Concurrent registry resolving a handler key to its input channel.
/// Handlers publish their intake at startup; the HTTP layer looks the
/// channel up, sends the request, and awaits the embedded reply slot.
#[derive(Debug, Default)]
pub struct HandlerMap {
    inner: RwLock<HashMap<String, RegisteredHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, key: impl Into<String>, handler: RegisteredHandler) {
        let key = key.into();
        debug!(key, "handler registered");
        self.inner.write().await.insert(key, handler);
    }

    pub async fn deregister(&self, key: &str) {
        debug!(key, "handler deregistered");
        self.inner.write().await.remove(key);
    }

    pub async fn lookup(&self, key: &str) -> Option<RegisteredHandler> {
        self.inner.read().await.get(key).cloned()
    }
}

/// Coordinated shutdown: broadcasts drain-then-stop and waits until
/// every registered handler has dropped its acknowledgement token.
pub struct GrimReaper {
    shutdown: broadcast::Sender<()>,
    ack_tx: std::sync::Mutex<Option<mpsc::Sender<()>>>,
    ack_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl GrimReaper {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        GrimReaper {
            shutdown,
            ack_tx: std::sync::Mutex::new(Some(ack_tx)),
            ack_rx: Mutex::new(Some(ack_rx)),
        }
    }

    /// Called by each handler at startup. The receiver fires on
    /// shutdown; dropping the sender acknowledges completion.
    /// Subscribing after reaping has begun yields an already-fired pair.
    pub fn subscribe(&self) -> (broadcast::Receiver<()>, mpsc::Sender<()>) {
        let guard = self.ack_tx.lock().unwrap_or_else(|p| p.into_inner());
        let ack = (*guard).clone().unwrap_or_else(|| mpsc::channel(1).0);
        (self.shutdown.subscribe(), ack)
    }

    /// Broadcast drain-then-stop and wait for every handler to finish
    /// its current message and exit. Idempotent; the second call
    /// returns immediately.
    pub async fn reap(&self) {
        info!("shutdown requested, draining handlers");
        match self.ack_tx.lock() {
            Ok(mut g) => drop(g.take()),
            Err(p) => drop(p.into_inner().take()),
        }
        // no receivers just means nothing was ever registered
        let _ = self.shutdown.send(());
        let rx = self.ack_rx.lock().await.take();
        if let Some(mut rx) = rx {
            while rx.recv().await.is_some() {}
        }
        info!("all handlers acknowledged shutdown");
    }
}

impl Default for GrimReaper {
    fn default() -> Self {
        Self::new()
    }
}
