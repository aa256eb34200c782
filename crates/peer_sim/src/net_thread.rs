//! Thread de rede que aceita conexões TCP da ponte, responde pelo protocolo
//! e envia eventos para o main via channel.

use bridge_core::peer::{PeerAction, PeerResponder, serve_connection};
use bridge_core::types::Position;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Evento enviado da thread de rede para o main.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connected(SocketAddr),
    Frame {
        from: SocketAddr,
        raw: String,
        action: PeerAction,
    },
    Disconnected(SocketAddr),
}

/// Faz bind na porta, tentando de novo a cada 2s até conseguir.
pub fn bind_with_retry(addr: &str) -> TcpListener {
    loop {
        match TcpListener::bind(addr) {
            Ok(listener) => return listener,
            Err(e) => {
                error!("Falha ao bind {addr}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(Duration::from_secs(2));
            }
        }
    }
}

/// Inicia a thread de aceitação. Retorna o receiver do channel.
pub fn spawn_server(listener: TcpListener, position: Position) -> std::io::Result<Receiver<PeerEvent>> {
    let (tx, rx) = bounded::<PeerEvent>(64); // Buffer de 64 eventos

    std::thread::Builder::new()
        .name("tcp-accept".into())
        .spawn(move || accept_loop(&listener, &tx, position))?;

    Ok(rx)
}

fn accept_loop(listener: &TcpListener, tx: &Sender<PeerEvent>, position: Position) {
    if let Ok(addr) = listener.local_addr() {
        info!("Peer escutando em {addr}");
    }

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Erro ao aceitar conexão: {e}");
                continue;
            }
        };
        let Ok(from) = stream.peer_addr() else {
            continue;
        };
        let tx = tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("peer-{from}"))
            .spawn(move || {
                emit(&tx, PeerEvent::Connected(from));
                // Cada conexão começa um protocolo novo
                let mut responder = PeerResponder::new(position);
                let result = serve_connection(&mut stream, &mut responder, |raw, action| {
                    emit(
                        &tx,
                        PeerEvent::Frame {
                            from,
                            raw: raw.to_string(),
                            action: action.clone(),
                        },
                    );
                });
                if let Err(e) = result {
                    debug!("Conexão {from} encerrada com erro: {e}");
                }
                emit(&tx, PeerEvent::Disconnected(from));
            });
        if let Err(e) = spawned {
            error!("Falha ao criar thread para {from}: {e}");
        }
    }
}

fn emit(tx: &Sender<PeerEvent>, event: PeerEvent) {
    // Non-blocking send: se o main está lento, descarta eventos antigos
    if tx.try_send(event).is_err() {
        debug!("Channel cheio, descartando evento");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn next(rx: &Receiver<PeerEvent>) -> PeerEvent {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn answers_query_and_reports_events() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let position = Position {
            x: 12,
            ..Default::default()
        };
        let rx = spawn_server(listener, position).unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"000001$33").unwrap();
        let mut buf = [0u8; 128];
        let n = client.read(&mut buf).unwrap();
        let reply = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(reply.starts_with("000002$33$"));
        assert!(reply.contains("$000012$"));

        assert!(matches!(next(&rx), PeerEvent::Connected(_)));
        match next(&rx) {
            PeerEvent::Frame { raw, action, .. } => {
                assert_eq!(raw, "000001$33");
                assert!(matches!(action, PeerAction::Reply(_)));
            }
            other => panic!("evento inesperado: {other:?}"),
        }

        drop(client);
        assert!(matches!(next(&rx), PeerEvent::Disconnected(_)));
    }
}
