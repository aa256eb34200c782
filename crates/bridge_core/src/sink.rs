//! Receptor das notificações de mudança do servidor de pontos.
//!
//! Roda na thread do servidor de pontos, em paralelo com o publicador e o
//! despachante. Só toca o [`Status`](crate::types::Status) através do lock de
//! telemetria.

use crate::context::BridgeContext;
use crate::point_source::{ChangeHandler, PointChange, PointHandle, Quality, StatusSources};
use crate::types::StatusField;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

pub struct PointChangeSink {
    ctx: Arc<BridgeContext>,
    fields: HashMap<PointHandle, (StatusField, String)>,
    verbose: bool,
}

impl PointChangeSink {
    pub fn new(ctx: Arc<BridgeContext>, sources: &StatusSources, verbose: bool) -> Self {
        let fields = [
            (&sources.reception_rate_real, StatusField::ReceptionRateReal),
            (&sources.power, StatusField::Power),
            (&sources.translator_temp, StatusField::TranslatorTemp),
            (&sources.wheel_temp, StatusField::WheelTemp),
        ]
        .into_iter()
        .map(|(def, field)| (def.handle, (field, def.item_id.clone())))
        .collect();

        Self {
            ctx,
            fields,
            verbose,
        }
    }

    /// Aplica um lote. Itens com erro, qualidade ruim ou handle desconhecido
    /// são descartados individualmente. Retorna quantos campos mudaram.
    pub fn apply(&self, batch: &[PointChange]) -> usize {
        let mut updates = Vec::with_capacity(batch.len());
        for change in batch {
            if let Some(error) = &change.error {
                warn!("Item {} com erro: {error}", change.handle);
                continue;
            }
            if change.quality == Quality::Bad {
                debug!("Item {} com qualidade ruim, ignorado", change.handle);
                continue;
            }
            match self.fields.get(&change.handle) {
                Some(&(field, _)) => updates.push((field, change.value.as_f64())),
                None => debug!("Item {} não mapeado no status", change.handle),
            }
        }

        let changed = self.ctx.telemetry.apply_status(&updates);
        for &(field, value) in &changed {
            let item = self
                .fields
                .values()
                .find(|(f, _)| *f == field)
                .map(|(_, id)| id.as_str())
                .unwrap_or("?");
            if self.verbose {
                info!("{item}: {} = {value}", field.label());
            } else {
                debug!("{item}: {} = {value}", field.label());
            }
        }
        self.ctx
            .stats
            .status_changes
            .fetch_add(changed.len() as u64, Ordering::Relaxed);
        changed.len()
    }
}

impl ChangeHandler for PointChangeSink {
    fn on_data_change(&self, batch: &[PointChange]) {
        self.apply(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointsConfig;
    use crate::point_source::PointValue;
    use crate::test_support::{closed_port, link_config};
    use std::time::SystemTime;

    fn sink() -> (Arc<BridgeContext>, PointChangeSink) {
        let ctx = BridgeContext::new(link_config(closed_port())).unwrap();
        let sources = PointsConfig::default().status_sources();
        let sink = PointChangeSink::new(Arc::clone(&ctx), &sources, false);
        (ctx, sink)
    }

    #[test]
    fn updates_status_only_on_change() {
        let (ctx, sink) = sink();
        let power = PointChange::good(PointHandle(7), PointValue::Real4(12.3));
        assert_eq!(sink.apply(&[power.clone()]), 1);
        assert_eq!(sink.apply(&[power]), 0);
        assert_eq!(ctx.telemetry.status().power, 12.3);
        assert_eq!(ctx.stats.snapshot().status_changes, 1);
    }

    #[test]
    fn bad_items_do_not_abort_batch() {
        let (ctx, sink) = sink();
        let batch = [
            PointChange {
                handle: PointHandle(6),
                value: PointValue::UInt1(50),
                quality: Quality::Bad,
                timestamp: SystemTime::now(),
                error: None,
            },
            PointChange {
                handle: PointHandle(8),
                value: PointValue::Real4(70.0),
                quality: Quality::Good,
                timestamp: SystemTime::now(),
                error: Some("E_FAIL".into()),
            },
            PointChange::good(PointHandle(42), PointValue::Real4(1.0)),
            PointChange::good(PointHandle(9), PointValue::Real4(33.5)),
        ];
        assert_eq!(sink.apply(&batch), 1);

        let status = ctx.telemetry.status();
        assert_eq!(status.reception_rate_real, 0);
        assert_eq!(status.translator_temp, 0.0);
        assert_eq!(status.wheel_temp, 33.5);
    }

    #[test]
    fn concurrent_batches_never_tear_status() {
        let (ctx, sink) = sink();
        let sink = Arc::new(sink);

        // Cada lote grava o mesmo valor k nos quatro campos
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let k = ((t * 1000 + i) % 250) as u8;
                        sink.on_data_change(&[
                            PointChange::good(PointHandle(6), PointValue::UInt1(k)),
                            PointChange::good(PointHandle(7), PointValue::Real4(k as f32)),
                            PointChange::good(PointHandle(8), PointValue::Real4(k as f32)),
                            PointChange::good(PointHandle(9), PointValue::Real4(k as f32)),
                        ]);
                    }
                })
            })
            .collect();

        let reader = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let s = ctx.telemetry.status();
                    let k = s.reception_rate_real as f32;
                    assert_eq!(s.power, k);
                    assert_eq!(s.translator_temp, k);
                    assert_eq!(s.wheel_temp, k);
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
    }
}
