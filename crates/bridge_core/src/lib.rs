//! # Bridge Core
//!
//! Núcleo da ponte entre o servidor de pontos e o peer TCP remoto: registros
//! de telemetria, protocolo texto delimitado por `$`, conexão com reconexão
//! automática e os loops que movem dados entre os dois lados.
//!
//! ## Módulos
//! - [`types`] – Position e Status
//! - [`protocol`] – Encode/decode `SEQ$CODE[$FIELD]*` e contador de sequência
//! - [`point_source`] – Fronteira com o servidor de pontos (+ versão em memória)
//! - [`telemetry`] – Registros compartilhados atrás do lock de telemetria
//! - [`connection`] – Socket, estado e máquina de reconexão
//! - [`context`] – Estado do processo e contadores
//! - [`sink`] – Notificações de mudança → Status
//! - [`publisher`] – Status → peer, a cada intervalo
//! - [`writer`] – Position → pontos de destino, a cada intervalo
//! - [`dispatcher`] – Consulta de posição sob comando
//! - [`peer`] – Lado remoto do protocolo (simulador e testes)
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod point_source;
pub mod telemetry;
pub mod connection;
pub mod context;
pub mod sink;
pub mod publisher;
pub mod writer;
pub mod dispatcher;
pub mod peer;
pub mod config;

#[cfg(test)]
mod test_support;

// Re-exports convenientes
pub use types::{Position, Status, StatusField};
pub use protocol::{ProtocolError, SequenceCounter};
pub use connection::{ConnectionManager, ConnectionState, DisconnectReason, LinkConfig, LinkError};
pub use context::{BridgeContext, StatsSnapshot};
pub use config::{AppConfig, BridgeConfig, PeerConfig};
