//! Fronteira com o servidor de pontos (Point Source).
//!
//! O servidor real (OPC, PLC…) é um colaborador externo. A ponte só depende
//! do trait [`PointSource`]: assinatura ativa, leitura e escrita síncronas, e
//! notificações assíncronas de mudança entregues a um [`ChangeHandler`].
//!
//! [`MemoryPointSource`] é uma implementação em memória usada pela simulação
//! e pelos testes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tracing::debug;

/// Handle estável de um ponto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointHandle(pub u32);

impl std::fmt::Display for PointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tipo semântico de um ponto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    UInt1,
    UInt2,
    UInt4,
    Real4,
    Real8,
}

impl PointType {
    /// Converte um valor numérico para este tipo, saturando inteiros na
    /// largura do ponto.
    pub fn coerce(self, value: f64) -> PointValue {
        match self {
            PointType::UInt1 => PointValue::UInt1(value.clamp(0.0, u8::MAX as f64) as u8),
            PointType::UInt2 => PointValue::UInt2(value.clamp(0.0, u16::MAX as f64) as u16),
            PointType::UInt4 => PointValue::UInt4(value.clamp(0.0, u32::MAX as f64) as u32),
            PointType::Real4 => PointValue::Real4(value as f32),
            PointType::Real8 => PointValue::Real8(value),
        }
    }
}

/// Valor tipado de um ponto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    UInt1(u8),
    UInt2(u16),
    UInt4(u32),
    Real4(f32),
    Real8(f64),
}

impl PointValue {
    pub fn point_type(&self) -> PointType {
        match self {
            PointValue::UInt1(_) => PointType::UInt1,
            PointValue::UInt2(_) => PointType::UInt2,
            PointValue::UInt4(_) => PointType::UInt4,
            PointValue::Real4(_) => PointType::Real4,
            PointValue::Real8(_) => PointType::Real8,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            PointValue::UInt1(v) => v as f64,
            PointValue::UInt2(v) => v as f64,
            PointValue::UInt4(v) => v as f64,
            PointValue::Real4(v) => v as f64,
            PointValue::Real8(v) => v,
        }
    }
}

/// Qualidade do valor no momento da notificação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Good,
    Bad,
}

/// Item de uma notificação de mudança.
#[derive(Debug, Clone, PartialEq)]
pub struct PointChange {
    pub handle: PointHandle,
    pub value: PointValue,
    pub quality: Quality,
    pub timestamp: SystemTime,
    /// Erro reportado pelo servidor para este item
    pub error: Option<String>,
}

impl PointChange {
    pub fn good(handle: PointHandle, value: PointValue) -> Self {
        Self {
            handle,
            value,
            quality: Quality::Good,
            timestamp: SystemTime::now(),
            error: None,
        }
    }
}

/// Erros das operações no servidor de pontos.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointSourceError {
    #[error("Ponto desconhecido: {0}")]
    UnknownPoint(PointHandle),

    #[error("Tipo incompatível em {handle}: esperado {expected:?}, recebido {found:?}")]
    TypeMismatch {
        handle: PointHandle,
        expected: PointType,
        found: PointType,
    },

    #[error("Escrita rejeitada em {handle}: {reason}")]
    WriteRejected { handle: PointHandle, reason: String },

    #[error("Falha na assinatura: {0}")]
    Subscription(String),

    #[error("Ponto {0} não está assinado")]
    NotSubscribed(PointHandle),
}

/// Receptor das notificações assíncronas de mudança.
pub trait ChangeHandler: Send + Sync {
    fn on_data_change(&self, batch: &[PointChange]);
}

/// Operações que a ponte usa do servidor de pontos.
pub trait PointSource: Send + Sync {
    /// Ativa a assinatura dos handles e registra o receptor.
    fn subscribe(
        &self,
        handles: &[PointHandle],
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<(), PointSourceError>;

    /// Cancela a assinatura e descarta o receptor.
    fn unsubscribe(&self, handles: &[PointHandle]) -> Result<(), PointSourceError>;

    fn read(&self, handle: PointHandle) -> Result<PointValue, PointSourceError>;

    fn write(&self, handle: PointHandle, value: PointValue) -> Result<(), PointSourceError>;
}

// ──────────────────────────────────────────────
// Definição dos pontos usados pela ponte
// ──────────────────────────────────────────────

/// Ponto declarado: handle, item id no servidor e tipo.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDef {
    pub handle: PointHandle,
    pub item_id: String,
    pub point_type: PointType,
}

/// Pontos de destino da [`Position`](crate::types::Position).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTargets {
    pub velocity: PointDef,
    pub x: PointDef,
    pub y: PointDef,
    pub z: PointDef,
    pub reception_rate: PointDef,
}

impl PositionTargets {
    pub fn all(&self) -> [&PointDef; 5] {
        [&self.velocity, &self.x, &self.y, &self.z, &self.reception_rate]
    }
}

/// Pontos de origem do [`Status`](crate::types::Status).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSources {
    pub reception_rate_real: PointDef,
    pub power: PointDef,
    pub translator_temp: PointDef,
    pub wheel_temp: PointDef,
}

impl StatusSources {
    pub fn all(&self) -> [&PointDef; 4] {
        [
            &self.reception_rate_real,
            &self.power,
            &self.translator_temp,
            &self.wheel_temp,
        ]
    }

    pub fn handles(&self) -> Vec<PointHandle> {
        self.all().iter().map(|p| p.handle).collect()
    }
}

// ──────────────────────────────────────────────
// Implementação em memória
// ──────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    values: HashMap<PointHandle, (PointDef, PointValue)>,
    subscribed: Vec<PointHandle>,
    handler: Option<Arc<dyn ChangeHandler>>,
    rejected: Vec<PointHandle>,
}

/// Servidor de pontos em memória.
///
/// Escritas externas (da ponte) não disparam notificação; apenas
/// [`MemoryPointSource::publish`] notifica, como um servidor que avisa só
/// mudanças do lado da fonte.
#[derive(Default)]
pub struct MemoryPointSource {
    inner: Mutex<MemoryInner>,
}

impl MemoryPointSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um ponto com valor inicial zero do tipo declarado.
    pub fn add_point(&self, def: PointDef) {
        let initial = def.point_type.coerce(0.0);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.values.insert(def.handle, (def, initial));
    }

    /// Faz escritas neste handle falharem (testes de falha por item).
    pub fn reject_writes(&self, handle: PointHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.rejected.push(handle);
    }

    pub fn item_id(&self, handle: PointHandle) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.values.get(&handle).map(|(def, _)| def.item_id.clone())
    }

    /// Atualiza valores do lado da fonte e notifica o receptor com o lote
    /// dos itens assinados que mudaram.
    pub fn publish(&self, updates: &[(PointHandle, PointValue)]) -> usize {
        let (handler, batch) = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let mut batch = Vec::new();
            for &(handle, value) in updates {
                let subscribed = inner.subscribed.contains(&handle);
                let Some((def, current)) = inner.values.get_mut(&handle) else {
                    continue;
                };
                let value = def.point_type.coerce(value.as_f64());
                if *current == value {
                    continue;
                }
                *current = value;
                if subscribed {
                    batch.push(PointChange::good(handle, value));
                }
            }
            (inner.handler.clone(), batch)
        };

        // Callback fora do lock, como um servidor que notifica em outra thread
        match handler {
            Some(handler) if !batch.is_empty() => {
                handler.on_data_change(&batch);
                batch.len()
            }
            _ => 0,
        }
    }
}

impl PointSource for MemoryPointSource {
    fn subscribe(
        &self,
        handles: &[PointHandle],
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<(), PointSourceError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(missing) = handles.iter().find(|h| !inner.values.contains_key(*h)) {
            return Err(PointSourceError::Subscription(format!(
                "ponto {missing} não existe"
            )));
        }
        for &handle in handles {
            if !inner.subscribed.contains(&handle) {
                inner.subscribed.push(handle);
            }
        }
        inner.handler = Some(handler);
        debug!("Assinatura ativa para {} pontos", handles.len());
        Ok(())
    }

    fn unsubscribe(&self, handles: &[PointHandle]) -> Result<(), PointSourceError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&missing) = handles.iter().find(|h| !inner.subscribed.contains(*h)) {
            return Err(PointSourceError::NotSubscribed(missing));
        }
        inner.subscribed.retain(|h| !handles.contains(h));
        if inner.subscribed.is_empty() {
            inner.handler = None;
        }
        Ok(())
    }

    fn read(&self, handle: PointHandle) -> Result<PointValue, PointSourceError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .values
            .get(&handle)
            .map(|(_, value)| *value)
            .ok_or(PointSourceError::UnknownPoint(handle))
    }

    fn write(&self, handle: PointHandle, value: PointValue) -> Result<(), PointSourceError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.rejected.contains(&handle) {
            return Err(PointSourceError::WriteRejected {
                handle,
                reason: "acesso somente leitura".into(),
            });
        }
        let Some((def, current)) = inner.values.get_mut(&handle) else {
            return Err(PointSourceError::UnknownPoint(handle));
        };
        if def.point_type != value.point_type() {
            return Err(PointSourceError::TypeMismatch {
                handle,
                expected: def.point_type,
                found: value.point_type(),
            });
        }
        *current = value;
        Ok(())
    }
}
