//! # Peer Simulator
//!
//! Servidor TCP que faz o papel do peer remoto da ponte: responde às
//! consultas de posição (`33`) com a posição configurada, confirma cada
//! publicação de status (`11`) e aceita os acks (`99`).
//!
//! ## Uso
//! ```bash
//! peer_sim                 # config.toml ao lado do executável
//! peer_sim outro.toml      # config explícito
//! ```

mod net_thread;

use bridge_core::config::AppConfig;
use bridge_core::peer::PeerAction;
use bridge_core::protocol::{MessageCode, decode_frame, decode_status};
use net_thread::{PeerEvent, bind_with_retry, spawn_server};
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::load(&config_path);
    save_default(&config, &config_path);
    let peer = &config.peer;

    // ── Servidor ──
    let listener = bind_with_retry(&format!("{}:{}", peer.bind_ip, peer.port));
    let rx = match spawn_server(listener, peer.position) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Falha ao criar thread de rede: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ PEER SIMULADO – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {}:{}", peer.bind_ip, peer.port);
    println!("  Posição:   {:?}", peer.position);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop de eventos ──
    for event in rx.iter() {
        match event {
            PeerEvent::Connected(addr) => info!("Ponte conectada: {addr}"),
            PeerEvent::Disconnected(addr) => info!("Ponte desconectada: {addr}"),
            PeerEvent::Frame { from, raw, action } => log_frame(from, &raw, &action),
        }
    }
    ExitCode::SUCCESS
}

/// Salva o config padrão se o arquivo não existir. Falha só é logada.
fn save_default(config: &AppConfig, path: &Path) -> bool {
    if path.exists() {
        return true;
    }
    match config.save(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Não foi possível salvar config padrão: {e}");
            false
        }
    }
}

fn log_frame(from: std::net::SocketAddr, raw: &str, action: &PeerAction) {
    match action {
        PeerAction::Malformed(e) => warn!("{from}: mensagem inválida {raw:?}: {e}"),
        PeerAction::Silent => debug!("{from}: {raw}"),
        PeerAction::Reply(reply) => {
            let status = decode_frame(raw)
                .ok()
                .filter(|f| MessageCode::parse(&f.code) == Ok(MessageCode::PublishStatus))
                .and_then(|f| decode_status(&f).ok());
            match status {
                Some(s) => info!(
                    "{from}: status taxa {} | potência {:.1} | temp. tradutor {:.1} | temp. roda {:.1}",
                    s.reception_rate_real, s.power, s.translator_temp, s.wheel_temp
                ),
                None => info!("{from}: {raw} → {reply}"),
            }
        }
    }
}
