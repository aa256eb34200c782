//! Consulta de posição (`33`) disparada pelo operador.
//!
//! Ao contrário do publicador, espera pelo lock de conexão. A resposta
//! decodificada vai para a [`Position`] compartilhada e a troca termina com
//! o ack `99`.

use crate::context::{BridgeContext, BridgeStats};
use crate::protocol::{ProtocolError, decode_position_reply, encode_ack, encode_position_query};
use crate::types::Position;
use tracing::{debug, info, warn};

/// Erros visíveis ao operador.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Sem conexão com o peer")]
    NotConnected,
}

/// Resultado de uma consulta concluída.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Posição vigente após a consulta
    pub position: Position,
    /// Erro de formato da resposta; a posição anterior foi mantida
    pub malformed: Option<ProtocolError>,
}

/// Executa uma consulta de posição completa.
pub fn query_position(ctx: &BridgeContext) -> Result<QueryOutcome, DispatchError> {
    // Sem conexão nem entra na fila do lock
    if !ctx.link.is_connected() {
        return Err(DispatchError::NotConnected);
    }
    let mut session = ctx.link.session().map_err(|e| {
        debug!("Consulta abortada: {e}");
        DispatchError::NotConnected
    })?;

    let query = encode_position_query(session.seq());
    let reply = session
        .exchange(&query)
        .map_err(|_| DispatchError::NotConnected)?;
    BridgeStats::bump(&ctx.stats.position_queries);

    let malformed = match decode_position_reply(&reply) {
        Ok(decoded) => {
            ctx.telemetry.set_position(decoded.position);
            info!("Posição recebida: {:?}", decoded.position);
            None
        }
        Err(e) => {
            BridgeStats::bump(&ctx.stats.malformed_replies);
            warn!("Resposta de posição inválida ({e}): {reply}");
            Some(e)
        }
    };

    let ack = encode_ack(session.seq());
    session.send(&ack).map_err(|_| DispatchError::NotConnected)?;
    drop(session);

    Ok(QueryOutcome {
        position: ctx.telemetry.position(),
        malformed,
    })
}
