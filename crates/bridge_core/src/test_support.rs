//! Peers TCP de loopback e utilitários compartilhados pelos testes.

use crate::connection::{ConnectionManager, LinkConfig};
use crate::peer::{FrameSplitter, PeerAction, PeerResponder};
use crate::types::Position;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const PEER_POSITION: Position = Position {
    translational_velocity: 1.5,
    x: 300,
    y: 40,
    z: 5,
    reception_rate: 98.5,
};

pub fn link_config(port: u16) -> LinkConfig {
    LinkConfig {
        host: "127.0.0.1".into(),
        port,
        retry_interval: Duration::from_millis(20),
        io_timeout: Duration::from_secs(2),
        recv_buffer_len: 512,
    }
}

/// Porta local sem ninguém escutando.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub fn spawn_manager(manager: &Arc<ConnectionManager>) -> JoinHandle<()> {
    let manager = Arc::clone(manager);
    thread::spawn(move || manager.run())
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Como o peer responde a cada mensagem.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Normal,
    /// Respostas de posição com só 4 campos
    TruncatedPosition,
}

#[derive(Default)]
struct PeerShared {
    received: Mutex<Vec<String>>,
    clients: Mutex<Vec<TcpStream>>,
    drop_budget: AtomicUsize,
    dropped: AtomicUsize,
}

/// Peer de loopback que derruba as próximas `drop_budget` conexões logo
/// após aceitar e atende as demais com [`PeerResponder`].
pub struct FlakyPeer {
    port: u16,
    shared: Arc<PeerShared>,
}

impl FlakyPeer {
    pub fn start(drop_first: usize) -> Self {
        Self::start_with(drop_first, ReplyMode::Normal)
    }

    /// Escuta numa porta fixa (que estava fechada até agora).
    pub fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        Self::serve_listener(listener, 0, ReplyMode::Normal)
    }

    pub fn start_with(drop_first: usize, mode: ReplyMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        Self::serve_listener(listener, drop_first, mode)
    }

    fn serve_listener(listener: TcpListener, drop_first: usize, mode: ReplyMode) -> Self {
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(PeerShared::default());
        shared.drop_budget.store(drop_first, Ordering::SeqCst);

        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                if accept_shared.drop_budget.load(Ordering::SeqCst) > 0 {
                    accept_shared.drop_budget.fetch_sub(1, Ordering::SeqCst);
                    accept_shared.dropped.fetch_add(1, Ordering::SeqCst);
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }
                if let Ok(clone) = stream.try_clone() {
                    accept_shared.clients.lock().unwrap().push(clone);
                }
                let conn_shared = Arc::clone(&accept_shared);
                thread::spawn(move || serve(stream, mode, &conn_shared));
            }
        });

        Self { port, shared }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.shared.received.lock().unwrap().clone()
    }

    /// Faz as próximas `n` conexões serem derrubadas.
    pub fn drop_next(&self, n: usize) {
        self.shared.drop_budget.fetch_add(n, Ordering::SeqCst);
    }

    /// Derruba todas as conexões atendidas até agora.
    pub fn kick_clients(&self) {
        for client in self.shared.clients.lock().unwrap().drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }
}

fn serve(mut stream: TcpStream, mode: ReplyMode, shared: &PeerShared) {
    let mut responder = PeerResponder::new(PEER_POSITION);
    let mut splitter = FrameSplitter::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
        for frame in splitter.push(&chunk) {
            shared.received.lock().unwrap().push(frame.clone());
            let reply = match responder.handle(&frame) {
                PeerAction::Reply(reply) => reply,
                _ => continue,
            };
            let reply = if mode == ReplyMode::TruncatedPosition && frame.ends_with("$33") {
                reply.split('$').take(4).collect::<Vec<_>>().join("$")
            } else {
                reply
            };
            if stream.write_all(reply.as_bytes()).is_err() {
                return;
            }
        }
    }
}
