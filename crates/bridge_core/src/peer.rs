//! Lado remoto do protocolo, usado pelo simulador de peer e pelos testes.
//!
//! - `33` → resposta de posição com 7 campos
//! - `11` → guarda o status e responde `SEQ$99`
//! - `99` → sem resposta

use crate::protocol::{
    MessageCode, ProtocolError, decode_frame, decode_status, encode_position_reply, format_seq,
    next_seq, outbound_frame_len,
};
use crate::types::{Position, Status};
use std::io::{Read, Write};

/// O que o peer faz com uma mensagem recebida.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerAction {
    Reply(String),
    Silent,
    Malformed(ProtocolError),
}

/// Máquina de respostas do peer.
#[derive(Debug, Clone)]
pub struct PeerResponder {
    position: Position,
    last_status: Option<Status>,
    handled: u64,
}

impl PeerResponder {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            last_status: None,
            handled: 0,
        }
    }

    pub fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    /// Mensagens tratadas desde a criação.
    pub fn handled(&self) -> u64 {
        self.handled
    }

    pub fn handle(&mut self, raw: &str) -> PeerAction {
        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => return PeerAction::Malformed(e),
        };
        let code = match MessageCode::parse(&frame.code) {
            Ok(code) => code,
            Err(e) => return PeerAction::Malformed(e),
        };
        self.handled += 1;

        // A resposta usa o slot seguinte ao da requisição
        let reply_seq = next_seq(frame.seq);
        match code {
            MessageCode::QueryPosition => PeerAction::Reply(encode_position_reply(
                reply_seq,
                MessageCode::QueryPosition,
                &self.position,
            )),
            MessageCode::PublishStatus => match decode_status(&frame) {
                Ok(status) => {
                    self.last_status = Some(status);
                    PeerAction::Reply(format!(
                        "{}${}",
                        format_seq(reply_seq),
                        MessageCode::Ack.as_str()
                    ))
                }
                Err(e) => PeerAction::Malformed(e),
            },
            MessageCode::Ack => PeerAction::Silent,
        }
    }
}

/// Separa o fluxo TCP em mensagens usando o tamanho fixo de cada código.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: String,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acrescenta bytes recebidos e devolve as mensagens completas.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk.trim_matches('\0'));
        let mut frames = Vec::new();
        loop {
            // SEQ(6) + '$' + CODE(2)
            let Some(header) = self.buf.as_bytes().get(..9) else {
                break;
            };
            let expected = std::str::from_utf8(&header[7..])
                .ok()
                .and_then(outbound_frame_len);
            match expected {
                Some(len) if self.buf.len() < len => break,
                Some(len) if self.buf.is_char_boundary(len) => {
                    let rest = self.buf.split_off(len);
                    frames.push(std::mem::replace(&mut self.buf, rest));
                }
                _ => {
                    // Código desconhecido ou cabeçalho fora do ASCII: entrega
                    // o resto como está
                    frames.push(std::mem::take(&mut self.buf));
                    break;
                }
            }
        }
        frames
    }
}

/// Atende uma conexão até o cliente fechar. `on_frame` é chamado para cada
/// mensagem com a ação tomada.
pub fn serve_connection<S: Read + Write>(
    stream: &mut S,
    responder: &mut PeerResponder,
    mut on_frame: impl FnMut(&str, &PeerAction),
) -> std::io::Result<()> {
    let mut splitter = FrameSplitter::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
        for frame in splitter.push(&chunk) {
            let action = responder.handle(&frame);
            on_frame(&frame, &action);
            if let PeerAction::Reply(reply) = &action {
                stream.write_all(reply.as_bytes())?;
            }
        }
    }
}
