//! Loop de escrita da [`Position`] nos pontos de destino do servidor de
//! pontos.
//!
//! O lock de escrita é o próprio lock de telemetria, tentado sem bloquear:
//! se estiver ocupado (consulta gravando a posição, lote de status sendo
//! aplicado) o tick é pulado. A cópia é feita sob o lock e as escritas
//! acontecem depois de soltá-lo, porque o servidor pode notificar mudanças
//! de forma síncrona e o receptor precisa do mesmo lock.

use crate::context::{BridgeContext, BridgeStats};
use crate::point_source::{PointDef, PointSource, PointValue, PositionTargets};
use crate::types::Position;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Teto do `x` ao ir para pontos de um byte.
pub const X_POINT_MAX: u32 = u8::MAX as u32;

/// Resultado de um tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Lock de telemetria ocupado
    Skipped,
    Written { ok: usize, failed: usize },
}

/// Valores de cada ponto de destino para uma posição.
pub fn position_values(targets: &PositionTargets, position: &Position) -> [(PointDef, PointValue); 5] {
    let typed = |def: &PointDef, value: f64| (def.clone(), def.point_type.coerce(value));
    [
        typed(&targets.velocity, position.translational_velocity as f64),
        typed(&targets.x, position.x.min(X_POINT_MAX) as f64),
        typed(&targets.y, position.y as f64),
        typed(&targets.z, position.z as f64),
        typed(&targets.reception_rate, position.reception_rate),
    ]
}

/// Executa um tick de escrita. Falhas por item são registradas e não
/// interrompem os demais itens.
pub fn write_tick(
    ctx: &BridgeContext,
    source: &dyn PointSource,
    targets: &PositionTargets,
) -> WriteOutcome {
    let Some(position) = ctx.telemetry.try_position() else {
        BridgeStats::bump(&ctx.stats.write_skipped);
        return WriteOutcome::Skipped;
    };

    let mut ok = 0;
    let mut failed = 0;
    for (def, value) in position_values(targets, &position) {
        match source.write(def.handle, value) {
            Ok(()) => {
                ok += 1;
                BridgeStats::bump(&ctx.stats.point_writes);
            }
            Err(e) => {
                failed += 1;
                BridgeStats::bump(&ctx.stats.point_write_failures);
                warn!("Falha ao escrever {}: {e}", def.item_id);
            }
        }
    }
    WriteOutcome::Written { ok, failed }
}

/// Inicia a thread de escrita.
pub fn spawn_writer(
    ctx: Arc<BridgeContext>,
    source: Arc<dyn PointSource>,
    targets: PositionTargets,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("point-writer".into())
        .spawn(move || {
            info!("Escritor de pontos iniciado ({} ms)", interval.as_millis());
            loop {
                let cycle_start = Instant::now();
                match write_tick(&ctx, source.as_ref(), &targets) {
                    WriteOutcome::Skipped => debug!("Lock de telemetria ocupado, escrita pulada"),
                    WriteOutcome::Written { failed, .. } if failed > 0 => {
                        debug!("{failed} ponto(s) não escritos neste tick");
                    }
                    WriteOutcome::Written { .. } => {}
                }

                if !ctx.wait_tick(interval.saturating_sub(cycle_start.elapsed())) {
                    break;
                }
            }
            info!("Escritor de pontos encerrado");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointsConfig;
    use crate::point_source::MemoryPointSource;
    use crate::test_support::{PEER_POSITION, closed_port, link_config, wait_until};
    use std::sync::mpsc;

    fn setup() -> (Arc<BridgeContext>, Arc<MemoryPointSource>, PositionTargets) {
        let ctx = BridgeContext::new(link_config(closed_port())).unwrap();
        let targets = PointsConfig::default().position_targets();
        let source = Arc::new(MemoryPointSource::new());
        for def in targets.all() {
            source.add_point(def.clone());
        }
        (ctx, source, targets)
    }

    #[test]
    fn caps_x_only_on_the_point() {
        let (ctx, source, targets) = setup();
        ctx.telemetry.set_position(PEER_POSITION);

        let outcome = write_tick(&ctx, source.as_ref(), &targets);
        assert_eq!(outcome, WriteOutcome::Written { ok: 5, failed: 0 });
        assert_eq!(source.read(targets.x.handle), Ok(PointValue::UInt1(255)));
        assert_eq!(source.read(targets.y.handle), Ok(PointValue::UInt2(40)));
        assert_eq!(
            source.read(targets.reception_rate.handle),
            Ok(PointValue::Real8(98.5))
        );
        // A posição compartilhada mantém o valor original
        assert_eq!(ctx.telemetry.position().x, 300);
        assert_eq!(ctx.stats.snapshot().point_writes, 5);
    }

    #[test]
    fn rejected_write_does_not_stop_others() {
        let (ctx, source, targets) = setup();
        source.reject_writes(targets.y.handle);
        ctx.telemetry.set_position(PEER_POSITION);

        let outcome = write_tick(&ctx, source.as_ref(), &targets);
        assert_eq!(outcome, WriteOutcome::Written { ok: 4, failed: 1 });
        assert_eq!(source.read(targets.z.handle), Ok(PointValue::UInt4(5)));
        assert_eq!(ctx.stats.snapshot().point_write_failures, 1);
    }

    #[test]
    fn skips_while_telemetry_lock_is_held() {
        let (ctx, source, targets) = setup();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let _guard = ctx.telemetry.lock();
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        };
        locked_rx.recv().unwrap();
        assert_eq!(write_tick(&ctx, source.as_ref(), &targets), WriteOutcome::Skipped);
        release_tx.send(()).unwrap();
        holder.join().unwrap();

        assert_eq!(ctx.stats.snapshot().write_skipped, 1);
        assert!(matches!(
            write_tick(&ctx, source.as_ref(), &targets),
            WriteOutcome::Written { ok: 5, .. }
        ));
    }

    #[test]
    fn loop_writes_until_shutdown() {
        let (ctx, source, targets) = setup();
        ctx.telemetry.set_position(PEER_POSITION);
        let handle = spawn_writer(
            Arc::clone(&ctx),
            source.clone(),
            targets.clone(),
            Duration::from_millis(10),
        )
        .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            ctx.stats.snapshot().point_writes >= 10
        }));
        ctx.shutdown();
        handle.join().unwrap();
        assert_eq!(source.read(targets.velocity.handle), Ok(PointValue::Real4(1.5)));
    }
}
