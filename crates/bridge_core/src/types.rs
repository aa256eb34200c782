//! Registros de telemetria trocados entre a ponte, o servidor de pontos e o
//! peer remoto.
//!
//! - [`Position`] chega do peer (resposta à consulta `33`) e é escrita nos
//!   pontos de destino pelo loop de escrita.
//! - [`Status`] é alimentado pelas notificações de mudança dos pontos e
//!   publicado periodicamente para o peer (mensagem `11`).

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Posição
// ──────────────────────────────────────────────

/// Posição reportada pelo peer remoto.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Position {
    /// Velocidade de translação
    pub translational_velocity: f32,
    /// Coordenada X (escrita em ponto de 1 byte, limitada a 255 só na escrita)
    pub x: u32,
    /// Coordenada Y
    pub y: u32,
    /// Coordenada Z
    pub z: u32,
    /// Taxa de recepção
    pub reception_rate: f64,
}

// ──────────────────────────────────────────────
// Status
// ──────────────────────────────────────────────

/// Status coletado do servidor de pontos.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Status {
    /// Taxa de recepção real
    pub reception_rate_real: u32,
    /// Potência
    pub power: f32,
    /// Temperatura do translador
    pub translator_temp: f32,
    /// Temperatura da roda
    pub wheel_temp: f32,
}

/// Campo individual do [`Status`], usado para mapear pontos de origem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusField {
    ReceptionRateReal,
    Power,
    TranslatorTemp,
    WheelTemp,
}

impl StatusField {
    pub const ALL: [StatusField; 4] = [
        StatusField::ReceptionRateReal,
        StatusField::Power,
        StatusField::TranslatorTemp,
        StatusField::WheelTemp,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatusField::ReceptionRateReal => "reception_rate_real",
            StatusField::Power => "power",
            StatusField::TranslatorTemp => "translator_temp",
            StatusField::WheelTemp => "wheel_temp",
        }
    }
}

impl Status {
    /// Aplica um valor a um campo. Retorna `true` somente se o valor mudou
    /// (atualização por borda).
    pub fn apply(&mut self, field: StatusField, value: f64) -> bool {
        match field {
            StatusField::ReceptionRateReal => {
                let v = value.clamp(0.0, u32::MAX as f64) as u32;
                replace_if_changed(&mut self.reception_rate_real, v)
            }
            StatusField::Power => replace_if_changed(&mut self.power, value as f32),
            StatusField::TranslatorTemp => {
                replace_if_changed(&mut self.translator_temp, value as f32)
            }
            StatusField::WheelTemp => replace_if_changed(&mut self.wheel_temp, value as f32),
        }
    }

    /// Valor atual de um campo, como `f64`.
    pub fn get(&self, field: StatusField) -> f64 {
        match field {
            StatusField::ReceptionRateReal => self.reception_rate_real as f64,
            StatusField::Power => self.power as f64,
            StatusField::TranslatorTemp => self.translator_temp as f64,
            StatusField::WheelTemp => self.wheel_temp as f64,
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
