//! Servidor de pontos simulado.
//!
//! Registra os nove pontos da ponte num [`MemoryPointSource`] e roda uma
//! thread que gera valores para as origens do status: aleatórios nos
//! `Random.*`, dente de serra e onda quadrada nos demais.

use bridge_core::config::{PointsConfig, SimulationConfig};
use bridge_core::context::BridgeContext;
use bridge_core::point_source::{MemoryPointSource, PointHandle, PointValue, StatusSources};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Passos por período das ondas.
const WAVE_PERIOD: u64 = 20;
/// Amplitude das ondas.
const WAVE_AMPLITUDE: f32 = 100.0;

/// Dente de serra: sobe de 0 até perto da amplitude e volta a 0.
pub fn saw_tooth(step: u64) -> f32 {
    (step % WAVE_PERIOD) as f32 * WAVE_AMPLITUDE / WAVE_PERIOD as f32
}

/// Onda quadrada: meio período em 0, meio período na amplitude.
pub fn square_wave(step: u64) -> f32 {
    if step % WAVE_PERIOD < WAVE_PERIOD / 2 {
        0.0
    } else {
        WAVE_AMPLITUDE
    }
}

/// Cria o servidor com todos os pontos declarados.
pub fn build_source(points: &PointsConfig) -> Arc<MemoryPointSource> {
    let source = Arc::new(MemoryPointSource::new());
    let targets = points.position_targets();
    let sources = points.status_sources();
    for def in targets.all().into_iter().chain(sources.all()) {
        debug!("Ponto registrado: {} = {}", def.handle, def.item_id);
        source.add_point(def.clone());
    }
    source
}

/// Gerador de valores para as origens do status.
pub struct Generator {
    rng: StdRng,
    step: u64,
    sources: StatusSources,
}

impl Generator {
    pub fn new(sources: StatusSources, seed: u64) -> Self {
        let rng = if seed == 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self {
            rng,
            step: 0,
            sources,
        }
    }

    /// Próximo lote de valores.
    pub fn next_batch(&mut self) -> Vec<(PointHandle, PointValue)> {
        let step = self.step;
        self.step += 1;
        vec![
            (
                self.sources.reception_rate_real.handle,
                PointValue::UInt1(self.rng.gen_range(0..=100)),
            ),
            (
                self.sources.power.handle,
                PointValue::Real4(self.rng.gen_range(0.0..WAVE_AMPLITUDE)),
            ),
            (self.sources.translator_temp.handle, PointValue::Real4(saw_tooth(step))),
            (self.sources.wheel_temp.handle, PointValue::Real4(square_wave(step))),
        ]
    }
}

/// Inicia a thread geradora. Para junto com os loops da ponte.
pub fn spawn_generator(
    ctx: Arc<BridgeContext>,
    source: Arc<MemoryPointSource>,
    sources: StatusSources,
    sim: &SimulationConfig,
) -> std::io::Result<JoinHandle<()>> {
    let interval = Duration::from_millis(sim.update_rate_ms);
    let mut generator = Generator::new(sources, sim.seed);

    thread::Builder::new()
        .name("point-simulator".into())
        .spawn(move || {
            info!("Simulação de pontos iniciada ({} ms)", interval.as_millis());
            loop {
                let cycle_start = Instant::now();
                let notified = source.publish(&generator.next_batch());
                debug!("Simulação: {notified} mudança(s) notificada(s)");

                if !ctx.wait_tick(interval.saturating_sub(cycle_start.elapsed())) {
                    break;
                }
            }
            info!("Simulação de pontos encerrada");
        })
}
