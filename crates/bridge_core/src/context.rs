//! Contexto do processo: tudo que as threads compartilham, passado
//! explicitamente a cada componente.

use crate::connection::{ConnectionManager, LinkConfig, LinkError};
use crate::telemetry::SharedTelemetry;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// Contadores de operação.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub status_published: AtomicU64,
    pub publish_skipped: AtomicU64,
    pub publish_failed: AtomicU64,
    pub position_queries: AtomicU64,
    pub malformed_replies: AtomicU64,
    pub point_writes: AtomicU64,
    pub point_write_failures: AtomicU64,
    pub write_skipped: AtomicU64,
    pub status_changes: AtomicU64,
}

/// Cópia dos contadores para exibição.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub status_published: u64,
    pub publish_skipped: u64,
    pub publish_failed: u64,
    pub position_queries: u64,
    pub malformed_replies: u64,
    pub point_writes: u64,
    pub point_write_failures: u64,
    pub write_skipped: u64,
    pub status_changes: u64,
}

impl BridgeStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            status_published: get(&self.status_published),
            publish_skipped: get(&self.publish_skipped),
            publish_failed: get(&self.publish_failed),
            position_queries: get(&self.position_queries),
            malformed_replies: get(&self.malformed_replies),
            point_writes: get(&self.point_writes),
            point_write_failures: get(&self.point_write_failures),
            write_skipped: get(&self.write_skipped),
            status_changes: get(&self.status_changes),
        }
    }
}

/// Estado compartilhado do processo.
pub struct BridgeContext {
    pub telemetry: SharedTelemetry,
    pub link: ConnectionManager,
    pub stats: BridgeStats,
    // Dropar o sender acorda todos os loops em `wait_tick`
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
}

impl BridgeContext {
    pub fn new(link: LinkConfig) -> Result<Arc<Self>, LinkError> {
        let (stop_tx, stop_rx) = bounded(0);
        Ok(Arc::new(Self {
            telemetry: SharedTelemetry::new(),
            link: ConnectionManager::new(link)?,
            stats: BridgeStats::default(),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
        }))
    }

    pub fn is_running(&self) -> bool {
        self.link.is_running()
    }

    /// Dorme até o próximo tick. Retorna `false` se o processo está parando.
    pub fn wait_tick(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.stop_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => self.is_running(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Para todos os loops e a thread de reconexão.
    pub fn shutdown(&self) {
        info!("Encerrando loops...");
        self.link.request_shutdown();
        self.stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
