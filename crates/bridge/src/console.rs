//! Comandos do console interativo.

use bridge_core::context::BridgeContext;
use bridge_core::dispatcher::query_position;
use tracing::{info, warn};

/// Comando digitado pelo operador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Consulta a posição no peer
    QueryPosition,
    /// Mostra estado do link, telemetria e contadores
    Status,
    Help,
    Quit,
}

/// Interpreta uma linha. Aceita a letra ou o nome do comando.
pub fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "posicao" | "position" => Some(Command::QueryPosition),
        "s" | "status" => Some(Command::Status),
        "h" | "?" | "ajuda" | "help" => Some(Command::Help),
        "q" | "sair" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

pub fn print_help() {
    println!("  p  Consultar posição no peer");
    println!("  s  Estado da conexão e telemetria");
    println!("  h  Ajuda");
    println!("  q  Sair");
}

/// Executa um comando. Retorna `false` quando o console deve parar.
pub fn execute(ctx: &BridgeContext, command: Command) -> bool {
    match command {
        Command::QueryPosition => match query_position(ctx) {
            Ok(outcome) => {
                if let Some(e) = outcome.malformed {
                    warn!("Resposta inválida, posição mantida: {e}");
                }
                let p = outcome.position;
                println!(
                    "  Posição: vel {:.1} | x {} | y {} | z {} | taxa {:.1}",
                    p.translational_velocity, p.x, p.y, p.z, p.reception_rate
                );
            }
            Err(e) => println!("  {e}"),
        },
        Command::Status => print_status(ctx),
        Command::Help => print_help(),
        Command::Quit => {
            info!("Saída solicitada pelo operador");
            return false;
        }
    }
    true
}

fn print_status(ctx: &BridgeContext) {
    let records = ctx.telemetry.snapshot();
    let stats = ctx.stats.snapshot();
    let s = records.status;
    let p = records.position;

    println!(
        "  Link:     {} ({}) época {}",
        ctx.link.state().label(),
        ctx.link.config().peer_addr(),
        ctx.link.epoch()
    );
    println!(
        "  Status:   taxa {} | potência {:.1} | temp. tradutor {:.1} | temp. roda {:.1}",
        s.reception_rate_real, s.power, s.translator_temp, s.wheel_temp
    );
    println!(
        "  Posição:  vel {:.1} | x {} | y {} | z {} | taxa {:.1}",
        p.translational_velocity, p.x, p.y, p.z, p.reception_rate
    );
    println!(
        "  Publicação: {} ok, {} pulados, {} falhas",
        stats.status_published, stats.publish_skipped, stats.publish_failed
    );
    println!(
        "  Consultas:  {} ({} respostas inválidas)",
        stats.position_queries, stats.malformed_replies
    );
    println!(
        "  Pontos:     {} escritas, {} falhas, {} ticks pulados, {} mudanças de status",
        stats.point_writes, stats.point_write_failures, stats.write_skipped, stats.status_changes
    );
}
