//! # OPC Bridge
//!
//! Liga o servidor de pontos ao peer TCP remoto: publica o status lido dos
//! pontos, consulta a posição sob comando e a escreve de volta nos pontos.
//! A conexão é refeita automaticamente quando cai.
//!
//! ## Uso
//! ```bash
//! opc_bridge                 # config.toml ao lado do executável
//! opc_bridge outro.toml      # config explícito
//! ```

mod console;
mod sim_source;

use bridge_core::config::AppConfig;
use bridge_core::connection::{DisconnectReason, LinkError};
use bridge_core::context::BridgeContext;
use bridge_core::point_source::{PointSource, PointSourceError};
use bridge_core::publisher::spawn_publisher;
use bridge_core::sink::PointChangeSink;
use bridge_core::writer::spawn_writer;
use console::{execute, parse_command, print_help};
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Falhas que impedem a ponte de iniciar.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Configuração inválida: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Falha no link: {0}")]
    Link(#[from] LinkError),

    #[error("Falha no servidor de pontos: {0}")]
    PointSource(#[from] PointSourceError),

    #[error("Falha ao criar thread: {0}")]
    Thread(#[from] std::io::Error),
}

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), StartupError> {
    // ── Carregar config ──
    let config_path = AppConfig::resolve_path(std::env::args().nth(1));
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(StartupError::InvalidConfig(errors));
    }
    let cfg = &config.bridge;

    // ── Contexto + link (resolução de endereço é fatal) ──
    let ctx = BridgeContext::new(cfg.link_config())?;

    // ── Servidor de pontos ──
    let source = sim_source::build_source(&cfg.points);
    let sources = cfg.points.status_sources();
    let handles = sources.handles();
    let sink = Arc::new(PointChangeSink::new(
        Arc::clone(&ctx),
        &sources,
        cfg.verbose_changes,
    ));
    source.subscribe(&handles, sink)?;

    // ── Threads ──
    let reconnect = {
        let ctx = Arc::clone(&ctx);
        thread::Builder::new()
            .name("reconnect".into())
            .spawn(move || ctx.link.run())?
    };
    ctx.link.signal_disconnect(DisconnectReason::Startup);

    let workers: Vec<JoinHandle<()>> = vec![
        spawn_publisher(Arc::clone(&ctx), cfg.publish_interval())?,
        spawn_writer(
            Arc::clone(&ctx),
            source.clone(),
            cfg.points.position_targets(),
            cfg.write_interval(),
        )?,
        sim_source::spawn_generator(
            Arc::clone(&ctx),
            Arc::clone(&source),
            sources,
            &cfg.simulation,
        )?,
    ];

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ OPC BRIDGE – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Peer:       {}", ctx.link.config().peer_addr());
    println!("  Publicação: {} ms", cfg.publish_interval_ms);
    println!("  Escrita:    {} ms", cfg.write_interval_ms);
    println!("  Reconexão:  {} ms", cfg.retry_interval_ms);
    println!("══════════════════════════════════════════════");
    print_help();
    println!();

    // ── Console ──
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Erro lendo o console: {e}");
                break;
            }
        };
        match parse_command(&line) {
            Some(command) => {
                if !execute(&ctx, command) {
                    break;
                }
            }
            None if line.trim().is_empty() => {}
            None => println!("  Comando desconhecido: {:?} (h para ajuda)", line.trim()),
        }
    }

    // ── Encerramento ──
    ctx.shutdown();
    for worker in workers.into_iter().chain([reconnect]) {
        let name = worker.thread().name().unwrap_or("?").to_string();
        if worker.join().is_err() {
            warn!("Thread {name} terminou com pânico");
        }
    }
    if let Err(e) = source.unsubscribe(&handles) {
        warn!("Falha ao cancelar assinatura: {e}");
    }
    ctx.link.close();
    info!("Ponte encerrada");
    Ok(())
}
