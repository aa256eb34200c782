//! Protocolo de texto delimitado por `$`.
//!
//! Cada mensagem é ASCII puro, sem prefixo de tamanho nem terminador:
//!
//! ```text
//! ┌─────────┬───┬──────────┬───┬─────────┬───┬─────┐
//! │ SEQ (6) │ $ │ CODE (2) │ $ │ FIELD   │ $ │ ... │
//! └─────────┴───┴──────────┴───┴─────────┴───┴─────┘
//! ```
//!
//! - `SEQ`: contador de sequência com 6 dígitos e zeros à esquerda (1–999999)
//! - `CODE`: tipo da mensagem (`11` status, `33` consulta de posição, `99` ack)
//! - Inteiros: 6 dígitos, limitados a 0–999999
//! - Reais: 6 caracteres com uma casa decimal, limitados a 0.0–9999.0
//!
//! A resposta à consulta de posição tem exatamente 7 campos:
//! `SEQ$CODE$velocidade$x$y$z$taxa`.

use crate::types::{Position, Status};

/// Separador de campos.
pub const FIELD_SEPARATOR: char = '$';

/// Maior número de sequência antes de voltar a 1.
pub const SEQ_MAX: u32 = 999_999;

/// Limite superior de campos inteiros.
pub const INT_FIELD_MAX: i64 = 999_999;

/// Limite superior de campos reais.
pub const FLOAT_FIELD_MAX: f64 = 9999.0;

/// Quantidade de campos de uma resposta de posição.
pub const POSITION_REPLY_FIELDS: usize = 7;

/// Erros do protocolo.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Mensagem vazia")]
    Empty,

    #[error("Número de campos inválido: {found} (esperado {expected})")]
    FieldCount { found: usize, expected: usize },

    #[error("Campo '{name}' inválido: {value:?}")]
    InvalidField { name: &'static str, value: String },

    #[error("Código de mensagem desconhecido: {0:?}")]
    UnknownCode(String),
}

// ──────────────────────────────────────────────
// Sequência
// ──────────────────────────────────────────────

/// Contador de sequência das mensagens, no intervalo `[1, 999999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    next: u32,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Valor que a próxima mensagem vai receber.
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Consome o valor atual e avança (999999 → 1).
    pub fn take(&mut self) -> u32 {
        let current = self.next;
        self.next = next_seq(current);
        current
    }

    /// Consome um slot sem gerar mensagem (resposta recebida do peer).
    pub fn skip(&mut self) {
        self.take();
    }

    /// Volta para 1 (nova época de conexão).
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

/// Sucessor de um número de sequência, com wraparound.
pub fn next_seq(seq: u32) -> u32 {
    if seq >= SEQ_MAX || seq == 0 { 1 } else { seq + 1 }
}

// ──────────────────────────────────────────────
// Códigos
// ──────────────────────────────────────────────

/// Tipos de mensagem conhecidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCode {
    /// `11` – publicação de status
    PublishStatus,
    /// `33` – consulta de posição
    QueryPosition,
    /// `99` – acknowledgement
    Ack,
}

impl MessageCode {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageCode::PublishStatus => "11",
            MessageCode::QueryPosition => "33",
            MessageCode::Ack => "99",
        }
    }

    pub fn parse(code: &str) -> Result<Self, ProtocolError> {
        match code {
            "11" => Ok(MessageCode::PublishStatus),
            "33" => Ok(MessageCode::QueryPosition),
            "99" => Ok(MessageCode::Ack),
            other => Err(ProtocolError::UnknownCode(other.to_string())),
        }
    }
}

// ──────────────────────────────────────────────
// Formatação de campos
// ──────────────────────────────────────────────

/// Número de sequência com 6 dígitos.
pub fn format_seq(seq: u32) -> String {
    format!("{:06}", seq.min(SEQ_MAX))
}

/// Inteiro com 6 dígitos, limitado a `[0, 999999]`.
pub fn format_int(value: i64) -> String {
    format!("{:06}", value.clamp(0, INT_FIELD_MAX))
}

/// Real com 6 caracteres e uma casa decimal, limitado a `[0.0, 9999.0]`.
///
/// NaN e `-0.0` viram `0000.0`.
pub fn format_float(value: f64) -> String {
    let clamped = if value.is_nan() || value <= 0.0 {
        0.0
    } else {
        value.min(FLOAT_FIELD_MAX)
    };
    format!("{clamped:06.1}")
}

// ──────────────────────────────────────────────
// Encode
// ──────────────────────────────────────────────

/// Monta `SEQ$CODE[$FIELD]*`, consumindo um número de sequência.
pub fn encode_message(seq: &mut SequenceCounter, code: MessageCode, fields: &[String]) -> String {
    let mut msg = format_seq(seq.take());
    msg.push(FIELD_SEPARATOR);
    msg.push_str(code.as_str());
    for field in fields {
        msg.push(FIELD_SEPARATOR);
        msg.push_str(field);
    }
    msg
}

/// `SEQ$33`
pub fn encode_position_query(seq: &mut SequenceCounter) -> String {
    encode_message(seq, MessageCode::QueryPosition, &[])
}

/// `SEQ$99`
pub fn encode_ack(seq: &mut SequenceCounter) -> String {
    encode_message(seq, MessageCode::Ack, &[])
}

/// `SEQ$11$taxa$potencia$temp_transl$temp_roda`
pub fn encode_status(seq: &mut SequenceCounter, status: &Status) -> String {
    let fields = [
        format_int(status.reception_rate_real as i64),
        format_float(status.power as f64),
        format_float(status.translator_temp as f64),
        format_float(status.wheel_temp as f64),
    ];
    encode_message(seq, MessageCode::PublishStatus, &fields)
}

/// Resposta de posição com 7 campos, como o peer remoto envia.
pub fn encode_position_reply(seq: u32, code: MessageCode, position: &Position) -> String {
    [
        format_seq(seq),
        code.as_str().to_string(),
        format_float(position.translational_velocity as f64),
        format_int(position.x as i64),
        format_int(position.y as i64),
        format_int(position.z as i64),
        format_float(position.reception_rate),
    ]
    .join("$")
}

// ──────────────────────────────────────────────
// Decode
// ──────────────────────────────────────────────

/// Mensagem genérica já separada em campos.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub code: String,
    pub fields: Vec<String>,
}

/// Resposta decodificada da consulta de posição.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReply {
    pub seq: u32,
    pub code: String,
    pub position: Position,
}

/// Remove NULs e espaços que o buffer de recepção possa trazer.
fn trim_raw(raw: &str) -> &str {
    raw.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Separa uma mensagem em campos.
pub fn split_fields(raw: &str) -> Vec<&str> {
    let raw = trim_raw(raw);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(FIELD_SEPARATOR).collect()
}

fn parse_field<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ProtocolError> {
    value.trim().parse::<T>().map_err(|_| ProtocolError::InvalidField {
        name,
        value: value.to_string(),
    })
}

/// Decodifica qualquer mensagem `SEQ$CODE[$FIELD]*`.
pub fn decode_frame(raw: &str) -> Result<Frame, ProtocolError> {
    let parts = split_fields(raw);
    match parts.as_slice() {
        [] => Err(ProtocolError::Empty),
        [_] => Err(ProtocolError::FieldCount {
            found: 1,
            expected: 2,
        }),
        [seq, code, rest @ ..] => Ok(Frame {
            seq: parse_field("seq", seq)?,
            code: code.to_string(),
            fields: rest.iter().map(|f| f.to_string()).collect(),
        }),
    }
}

/// Decodifica a resposta de posição. Qualquer contagem diferente de 7
/// campos é erro.
pub fn decode_position_reply(raw: &str) -> Result<PositionReply, ProtocolError> {
    let parts = split_fields(raw);
    if parts.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if parts.len() != POSITION_REPLY_FIELDS {
        return Err(ProtocolError::FieldCount {
            found: parts.len(),
            expected: POSITION_REPLY_FIELDS,
        });
    }

    Ok(PositionReply {
        seq: parse_field("seq", parts[0])?,
        code: parts[1].to_string(),
        position: Position {
            translational_velocity: parse_field("velocity", parts[2])?,
            x: parse_field("x", parts[3])?,
            y: parse_field("y", parts[4])?,
            z: parse_field("z", parts[5])?,
            reception_rate: parse_field("reception_rate", parts[6])?,
        },
    })
}

/// Decodifica os 4 campos de uma publicação de status (`11`).
pub fn decode_status(frame: &Frame) -> Result<Status, ProtocolError> {
    if frame.fields.len() != 4 {
        return Err(ProtocolError::FieldCount {
            found: frame.fields.len() + 2,
            expected: 6,
        });
    }
    Ok(Status {
        reception_rate_real: parse_field("reception_rate_real", &frame.fields[0])?,
        power: parse_field("power", &frame.fields[1])?,
        translator_temp: parse_field("translator_temp", &frame.fields[2])?,
        wheel_temp: parse_field("wheel_temp", &frame.fields[3])?,
    })
}

/// Tamanho fixo das mensagens que a ponte envia, pelo código. Permite ao
/// peer separar mensagens que o TCP entregou juntas.
pub fn outbound_frame_len(code: &str) -> Option<usize> {
    // SEQ(6) + '$' + CODE(2)
    const HEADER: usize = 9;
    match MessageCode::parse(code).ok()? {
        MessageCode::PublishStatus => Some(HEADER + 4 * 7),
        MessageCode::QueryPosition | MessageCode::Ack => Some(HEADER),
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
