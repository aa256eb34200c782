//! Loop de publicação do status (`11`) para o peer remoto.
//!
//! A cada tick tenta pegar o lock de conexão sem bloquear; se estiver
//! ocupado (reconexão ou consulta em andamento) o tick é descartado. Não há
//! fila: o próximo tick publica o status mais recente.

use crate::connection::SessionAttempt;
use crate::context::{BridgeContext, BridgeStats};
use crate::protocol::encode_status;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resultado de um tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Status enviado e ack recebido
    Published { message: String, ack: String },
    /// Lock de conexão ocupado
    Busy,
    NotConnected,
    /// Falha de link; o sinal de desconexão já foi disparado
    Failed,
}

/// Executa um tick de publicação.
pub fn publish_tick(ctx: &BridgeContext) -> PublishOutcome {
    let mut session = match ctx.link.try_session() {
        SessionAttempt::Ready(session) => session,
        SessionAttempt::Busy => {
            BridgeStats::bump(&ctx.stats.publish_skipped);
            return PublishOutcome::Busy;
        }
        SessionAttempt::NotConnected => {
            BridgeStats::bump(&ctx.stats.publish_skipped);
            return PublishOutcome::NotConnected;
        }
    };

    // Lock de telemetria só durante a cópia
    let status = ctx.telemetry.status();
    let message = encode_status(session.seq(), &status);

    match session.exchange(&message) {
        Ok(ack) => {
            BridgeStats::bump(&ctx.stats.status_published);
            debug!("Status publicado: {message} → {ack}");
            PublishOutcome::Published { message, ack }
        }
        Err(e) => {
            BridgeStats::bump(&ctx.stats.publish_failed);
            warn!("Falha ao publicar status: {e}");
            PublishOutcome::Failed
        }
    }
}

/// Inicia a thread de publicação.
pub fn spawn_publisher(
    ctx: Arc<BridgeContext>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("status-publisher".into())
        .spawn(move || {
            info!("Publicador de status iniciado ({} ms)", interval.as_millis());
            loop {
                let cycle_start = Instant::now();
                let outcome = publish_tick(&ctx);
                if matches!(outcome, PublishOutcome::Busy) {
                    debug!("Lock de conexão ocupado, tick descartado");
                }

                // Dormir pelo tempo restante do intervalo
                if !ctx.wait_tick(interval.saturating_sub(cycle_start.elapsed())) {
                    break;
                }
            }
            info!("Publicador de status encerrado");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, DisconnectReason};
    use crate::test_support::{FlakyPeer, closed_port, link_config, wait_until};
    use crate::types::StatusField;

    fn start_link(ctx: &Arc<BridgeContext>) -> JoinHandle<()> {
        let ctx = Arc::clone(ctx);
        thread::spawn(move || ctx.link.run())
    }

    #[test]
    fn skips_when_not_connected() {
        let ctx = BridgeContext::new(link_config(closed_port())).unwrap();
        assert_eq!(publish_tick(&ctx), PublishOutcome::NotConnected);
        assert_eq!(ctx.stats.snapshot().publish_skipped, 1);
    }

    #[test]
    fn publishes_latest_status_and_reads_ack() {
        let peer = FlakyPeer::start(0);
        let ctx = BridgeContext::new(link_config(peer.port())).unwrap();
        let worker = start_link(&ctx);
        ctx.link.signal_disconnect(DisconnectReason::Startup);
        assert!(wait_until(Duration::from_secs(5), || ctx.link.is_connected()));

        ctx.telemetry.apply_status(&[(StatusField::Power, 12.3)]);
        let PublishOutcome::Published { message, ack } = publish_tick(&ctx) else {
            panic!("esperava publicação");
        };

        // Probe: 1 ($33), 2 (resposta), 3 ($99) → status usa 4
        assert_eq!(message, "000004$11$000000$0012.3$0000.0$0000.0");
        assert_eq!(ack, "000005$99");
        assert_eq!(ctx.stats.snapshot().status_published, 1);
        assert!(wait_until(Duration::from_secs(2), || {
            peer.received().iter().any(|m| m == &message)
        }));

        ctx.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn send_failure_escalates_and_next_tick_is_skipped() {
        let peer = FlakyPeer::start(0);
        let mut config = link_config(peer.port());
        config.retry_interval = Duration::from_millis(300);
        let ctx = BridgeContext::new(config).unwrap();
        let worker = start_link(&ctx);
        ctx.link.signal_disconnect(DisconnectReason::Startup);
        assert!(wait_until(Duration::from_secs(5), || ctx.link.is_connected()));

        // As próximas tentativas de reconexão falham por um tempo
        peer.drop_next(3);
        peer.kick_clients();
        assert_eq!(publish_tick(&ctx), PublishOutcome::Failed);
        assert_ne!(ctx.link.state(), ConnectionState::Connected);

        // Enquanto a reconexão segura o lock, o tick é descartado sem erro
        assert!(wait_until(Duration::from_secs(5), || {
            ctx.link.state() == ConnectionState::Connecting
        }));
        assert_eq!(publish_tick(&ctx), PublishOutcome::Busy);

        assert!(wait_until(Duration::from_secs(10), || ctx.link.epoch() == 2));
        assert!(matches!(publish_tick(&ctx), PublishOutcome::Published { .. }));

        ctx.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn loop_stops_on_shutdown() {
        let ctx = BridgeContext::new(link_config(closed_port())).unwrap();
        let worker = start_link(&ctx);
        let handle = spawn_publisher(Arc::clone(&ctx), Duration::from_millis(10)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            ctx.stats.snapshot().publish_skipped >= 3
        }));
        ctx.shutdown();
        handle.join().unwrap();
        worker.join().unwrap();
    }
}
