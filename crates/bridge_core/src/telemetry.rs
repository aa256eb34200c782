//! Registros compartilhados de telemetria protegidos pelo lock de telemetria.
//!
//! Todo acesso a [`Position`] e [`Status`] passa por aqui. Os métodos copiam
//! o registro e soltam o lock antes de retornar, então nenhum chamador segura
//! o lock durante I/O de rede.

use crate::types::{Position, Status, StatusField};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Cópia consistente dos dois registros.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryRecords {
    pub position: Position,
    pub status: Status,
}

/// Position + Status atrás de um único lock.
#[derive(Debug, Default)]
pub struct SharedTelemetry {
    records: Mutex<TelemetryRecords>,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, TelemetryRecords> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TelemetryRecords {
        *self.lock()
    }

    pub fn status(&self) -> Status {
        self.lock().status
    }

    pub fn position(&self) -> Position {
        self.lock().position
    }

    /// Cópia da posição sem bloquear; `None` se o lock estiver ocupado.
    pub fn try_position(&self) -> Option<Position> {
        match self.records.try_lock() {
            Ok(records) => Some(records.position),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner().position),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn set_position(&self, position: Position) {
        self.lock().position = position;
    }

    /// Aplica um lote de valores ao status numa única seção crítica.
    /// Retorna os campos que realmente mudaram, com o novo valor.
    pub fn apply_status(&self, updates: &[(StatusField, f64)]) -> Vec<(StatusField, f64)> {
        let mut records = self.lock();
        let mut changed = Vec::new();
        for &(field, value) in updates {
            if records.status.apply(field, value) {
                changed.push((field, records.status.get(field)));
            }
        }
        changed
    }
}
