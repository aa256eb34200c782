//! Conexão TCP persistente com o peer remoto e máquina de reconexão.
//!
//! ```text
//! Disconnected ──sinal──▶ Connecting ──probe ok──▶ Connected
//!       ▲                     │  ▲                     │
//!       │                     └──┘ espera fixa         │ falha de send/recv
//!       └──────────────────────────────────────────────┘
//! ```
//!
//! O [`ConnectionManager`] é dono do socket, do estado e do contador de
//! sequência, todos atrás do *lock de conexão*. Quem quer falar com o peer
//! pega uma [`Session`], que segura o lock durante toda a troca
//! (envio + resposta). Qualquer falha numa sessão fecha o socket, marca
//! `Disconnected` e dispara o sinal de desconexão; a thread de reconexão
//! ([`ConnectionManager::run`]) é a única que recupera o link.

use crate::protocol::{SequenceCounter, decode_position_reply, encode_ack, encode_position_query};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parâmetros do link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    /// Espera fixa entre ciclos de reconexão (sem backoff)
    pub retry_interval: Duration,
    /// Timeout de connect, send e recv
    pub io_timeout: Duration,
    pub recv_buffer_len: usize,
}

impl LinkConfig {
    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Erros do link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Conexão encerrada pelo peer")]
    Closed,

    #[error("Sem conexão com o peer")]
    NotConnected,

    #[error("Falha ao resolver {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },

    #[error("Nenhum endereço disponível para {0}")]
    NoCandidates(String),

    #[error("Nenhum candidato de {0} respondeu")]
    Unreachable(String),
}

/// Estado da conexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "desconectado",
            ConnectionState::Connecting => "conectando",
            ConnectionState::Connected => "conectado",
        }
    }
}

/// Motivo carregado pelo sinal de desconexão.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Startup,
    LinkFailure(String),
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Startup => write!(f, "inicialização"),
            DisconnectReason::LinkFailure(e) => write!(f, "falha no link: {e}"),
            DisconnectReason::Shutdown => write!(f, "encerramento"),
        }
    }
}

// ──────────────────────────────────────────────
// Estado protegido pelo lock de conexão
// ──────────────────────────────────────────────

struct Link {
    state: ConnectionState,
    stream: Option<TcpStream>,
    seq: SequenceCounter,
    candidates: Vec<SocketAddr>,
    recv_buf: Vec<u8>,
}

impl Link {
    fn send_raw(&mut self, msg: &str) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        stream.write_all(msg.as_bytes())?;
        debug!("SENT: {msg}");
        Ok(())
    }

    /// Uma única recepção de até `recv_buf.len()` bytes. A resposta consome
    /// um slot de sequência.
    fn recv_raw(&mut self) -> Result<String, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::NotConnected)?;
        let n = stream.read(&mut self.recv_buf)?;
        if n == 0 {
            return Err(LinkError::Closed);
        }
        self.seq.skip();
        let msg = String::from_utf8_lossy(&self.recv_buf[..n])
            .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        debug!("RECV: {msg}");
        Ok(msg)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Resultado de [`ConnectionManager::try_session`].
pub enum SessionAttempt<'a> {
    /// Lock ocupado (reconexão ou outra troca em andamento)
    Busy,
    /// Lock livre, mas sem conexão
    NotConnected,
    Ready(Session<'a>),
}

// ──────────────────────────────────────────────
// ConnectionManager
// ──────────────────────────────────────────────

/// Dono do socket e da máquina de reconexão.
pub struct ConnectionManager {
    config: LinkConfig,
    link: Mutex<Link>,
    /// Espelho de `Link::state` para leitura sem lock
    state: AtomicU8,
    epoch: AtomicU64,
    running: AtomicBool,
    signal_tx: Sender<DisconnectReason>,
    signal_rx: Receiver<DisconnectReason>,
}

impl ConnectionManager {
    /// Cria o gerenciador resolvendo o endereço do peer. Falha de resolução
    /// aqui é fatal para o processo.
    pub fn new(config: LinkConfig) -> Result<Self, LinkError> {
        let candidates = resolve(&config)?;
        info!(
            "Peer {} resolvido para {} endereço(s)",
            config.peer_addr(),
            candidates.len()
        );

        // Capacidade 1: sinais repetidos enquanto um está pendente se fundem
        let (signal_tx, signal_rx) = bounded(1);

        Ok(Self {
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                stream: None,
                seq: SequenceCounter::new(),
                candidates,
                recv_buf: vec![0u8; config.recv_buffer_len.max(1)],
            }),
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            epoch: AtomicU64::new(0),
            running: AtomicBool::new(true),
            signal_tx,
            signal_rx,
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Número de conexões bem-sucedidas até agora.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Pede (re)conexão. Idempotente: se já há um sinal pendente, este é
    /// descartado.
    pub fn signal_disconnect(&self, reason: DisconnectReason) {
        if self.signal_tx.try_send(reason).is_err() {
            debug!("Sinal de desconexão já pendente");
        }
    }

    /// Para a thread de reconexão, acordando a espera em andamento.
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.signal_disconnect(DisconnectReason::Shutdown);
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, link: &mut Link, state: ConnectionState) {
        link.state = state;
        self.state.store(state as u8, Ordering::Release);
    }

    /// Tenta pegar o lock de conexão sem bloquear.
    pub fn try_session(&self) -> SessionAttempt<'_> {
        let link = match self.link.try_lock() {
            Ok(link) => link,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return SessionAttempt::Busy,
        };
        if link.state != ConnectionState::Connected {
            return SessionAttempt::NotConnected;
        }
        SessionAttempt::Ready(Session {
            manager: self,
            link,
        })
    }

    /// Bloqueia até pegar o lock de conexão. O estado é conferido de novo
    /// depois da espera, pois pode ter mudado.
    pub fn session(&self) -> Result<Session<'_>, LinkError> {
        let link = self.lock_link();
        if link.state != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        Ok(Session {
            manager: self,
            link,
        })
    }

    /// Corpo da thread de reconexão: espera o sinal de desconexão e conduz
    /// o ciclo Connecting até conectar ou o processo parar.
    pub fn run(&self) {
        info!("Thread de reconexão iniciada");
        while self.is_running() {
            let reason = match self.signal_rx.recv() {
                Ok(reason) => reason,
                Err(_) => break,
            };
            if !self.is_running() {
                break;
            }
            self.reconnect(&reason);
        }
        info!("Thread de reconexão encerrada");
    }

    fn reconnect(&self, reason: &DisconnectReason) {
        let mut link = self.lock_link();
        if link.state == ConnectionState::Connected && link.stream.is_some() {
            // Sinal atrasado de uma época já recuperada
            debug!("Sinal ignorado ({reason}): conexão ativa");
            return;
        }

        self.set_state(&mut link, ConnectionState::Connecting);
        link.close();
        info!("Reconectando a {} ({reason})...", self.config.peer_addr());

        while self.is_running() {
            match self.connect_once(&mut link) {
                Ok(addr) => {
                    self.set_state(&mut link, ConnectionState::Connected);
                    let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("Conexão estabelecida com {addr} (época {epoch})");
                    return;
                }
                Err(e) => warn!("Tentativa de conexão falhou: {e}"),
            }

            // Espera fixa, interrompível pelo sinal de encerramento
            match self.signal_rx.recv_timeout(self.config.retry_interval) {
                Ok(DisconnectReason::Shutdown) | Err(RecvTimeoutError::Disconnected) => {}
                Ok(other) => debug!("Sinal ignorado durante reconexão: {other}"),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        link.close();
        self.set_state(&mut link, ConnectionState::Disconnected);
    }

    /// Um ciclo: resolve e tenta os candidatos.
    fn connect_once(&self, link: &mut Link) -> Result<SocketAddr, LinkError> {
        match resolve(&self.config) {
            Ok(candidates) => link.candidates = candidates,
            Err(e) => warn!("{e}; usando endereços anteriores"),
        }
        let candidates = link.candidates.clone();
        self.connect_candidates(link, &candidates)
    }

    /// Tenta cada candidato em ordem e faz o probe no primeiro que aceitar.
    fn connect_candidates(
        &self,
        link: &mut Link,
        candidates: &[SocketAddr],
    ) -> Result<SocketAddr, LinkError> {
        for &addr in candidates {
            if !self.is_running() {
                break;
            }
            let stream = match TcpStream::connect_timeout(&addr, self.config.io_timeout) {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("connect {addr}: {e}");
                    continue;
                }
            };
            stream.set_read_timeout(Some(self.config.io_timeout))?;
            stream.set_write_timeout(Some(self.config.io_timeout))?;
            let _ = stream.set_nodelay(true);

            link.stream = Some(stream);
            link.seq.reset();
            match probe(link) {
                Ok(()) => return Ok(addr),
                Err(e) => {
                    warn!("Probe em {addr} falhou: {e}");
                    link.close();
                }
            }
        }

        Err(LinkError::Unreachable(self.config.peer_addr()))
    }

    /// Fecha a conexão no encerramento do processo.
    pub fn close(&self) {
        let mut link = self.lock_link();
        if link.stream.is_some() {
            info!("Fechando conexão com {}", self.config.peer_addr());
        }
        link.close();
        self.set_state(&mut link, ConnectionState::Disconnected);
    }
}

/// Probe de vida: `SEQ$33`, espera a resposta e confirma com `SEQ$99`.
fn probe(link: &mut Link) -> Result<(), LinkError> {
    debug!("Testando conexão...");
    let query = encode_position_query(&mut link.seq);
    link.send_raw(&query)?;
    let reply = link.recv_raw()?;
    if let Err(e) = decode_position_reply(&reply) {
        debug!("Resposta do probe fora do formato: {e}");
    }
    let ack = encode_ack(&mut link.seq);
    link.send_raw(&ack)
}

fn resolve(config: &LinkConfig) -> Result<Vec<SocketAddr>, LinkError> {
    let addr = config.peer_addr();
    let candidates: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|source| LinkError::Resolve {
            addr: addr.clone(),
            source,
        })?
        .collect();
    if candidates.is_empty() {
        return Err(LinkError::NoCandidates(addr));
    }
    Ok(candidates)
}

// ──────────────────────────────────────────────
// Session
// ──────────────────────────────────────────────

/// Acesso exclusivo ao socket enquanto viva. Falhas escalam para o sinal de
/// desconexão.
pub struct Session<'a> {
    manager: &'a ConnectionManager,
    link: MutexGuard<'a, Link>,
}

impl Session<'_> {
    /// Contador usado para codificar a próxima mensagem.
    pub fn seq(&mut self) -> &mut SequenceCounter {
        &mut self.link.seq
    }

    pub fn send(&mut self, msg: &str) -> Result<(), LinkError> {
        let result = self.link.send_raw(msg);
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    pub fn recv(&mut self) -> Result<String, LinkError> {
        let result = self.link.recv_raw();
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    /// Envia e espera a resposta correspondente, sem soltar o lock.
    pub fn exchange(&mut self, msg: &str) -> Result<String, LinkError> {
        self.send(msg)?;
        self.recv()
    }

    fn fail(&mut self, error: &LinkError) {
        warn!("Conexão perdida: {error}");
        self.link.close();
        self.manager
            .set_state(&mut self.link, ConnectionState::Disconnected);
        self.manager
            .signal_disconnect(DisconnectReason::LinkFailure(error.to_string()));
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FlakyPeer, closed_port, link_config, spawn_manager, wait_until,
    };
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn starts_disconnected_and_refuses_sessions() {
        let manager = ConnectionManager::new(link_config(closed_port())).unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(manager.session(), Err(LinkError::NotConnected)));
        assert!(matches!(manager.try_session(), SessionAttempt::NotConnected));
    }

    #[test]
    fn unresolvable_host_is_fatal() {
        let mut config = link_config(closed_port());
        config.host = "nao-existe.invalid".into();
        assert!(ConnectionManager::new(config).is_err());
    }

    #[test]
    fn connects_after_consecutive_probe_failures() {
        let peer = FlakyPeer::start(3);
        let manager = Arc::new(ConnectionManager::new(link_config(peer.port())).unwrap());
        let worker = spawn_manager(&manager);

        manager.signal_disconnect(DisconnectReason::Startup);
        assert!(wait_until(Duration::from_secs(5), || manager.is_connected()));
        assert_eq!(manager.epoch(), 1);
        assert_eq!(peer.dropped(), 3);

        // Durante Connecting só o probe foi enviado
        assert!(peer.received().iter().all(|m| m.ends_with("$33") || m.ends_with("$99")));

        manager.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn connects_once_refused_port_starts_listening() {
        let port = closed_port();
        let manager = Arc::new(ConnectionManager::new(link_config(port)).unwrap());
        let worker = spawn_manager(&manager);
        manager.signal_disconnect(DisconnectReason::Startup);

        // Vários ciclos com connect recusado (espera de 20 ms entre eles)
        assert!(wait_until(Duration::from_secs(5), || {
            manager.state() == ConnectionState::Connecting
        }));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.epoch(), 0);

        let peer = FlakyPeer::start_on(port);
        assert!(wait_until(Duration::from_secs(5), || manager.is_connected()));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(manager.epoch(), 1);
        assert_eq!(peer.received().first().map(String::as_str), Some("000001$33"));

        manager.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn falls_through_to_next_candidate() {
        let peer = FlakyPeer::start(0);
        let refused: SocketAddr = format!("127.0.0.1:{}", closed_port()).parse().unwrap();
        let good: SocketAddr = format!("127.0.0.1:{}", peer.port()).parse().unwrap();
        let manager = ConnectionManager::new(link_config(peer.port())).unwrap();

        let mut link = manager.lock_link();
        assert_eq!(manager.connect_candidates(&mut link, &[refused, good]).unwrap(), good);
        assert!(link.stream.is_some());
        assert!(matches!(
            manager.connect_candidates(&mut link, &[refused]),
            Err(LinkError::Unreachable(_))
        ));
    }

    #[test]
    fn repeated_signals_are_coalesced() {
        let peer = FlakyPeer::start(0);
        let manager = Arc::new(ConnectionManager::new(link_config(peer.port())).unwrap());
        for _ in 0..5 {
            manager.signal_disconnect(DisconnectReason::Startup);
        }
        let worker = spawn_manager(&manager);
        assert!(wait_until(Duration::from_secs(5), || manager.is_connected()));

        // O único sinal pendente foi consumido; nenhuma época extra
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(manager.epoch(), 1);

        manager.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn publisher_style_try_lock_is_busy_while_connecting() {
        let mut config = link_config(closed_port());
        config.retry_interval = Duration::from_secs(30);
        let manager = Arc::new(ConnectionManager::new(config).unwrap());
        let worker = spawn_manager(&manager);

        manager.signal_disconnect(DisconnectReason::Startup);
        assert!(wait_until(Duration::from_secs(5), || {
            manager.state() == ConnectionState::Connecting
        }));
        assert!(wait_until(Duration::from_secs(5), || {
            matches!(manager.try_session(), SessionAttempt::Busy)
        }));

        // O encerramento acorda a espera de 30 s imediatamente
        let started = Instant::now();
        manager.request_shutdown();
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_exchange_triggers_new_epoch() {
        let peer = FlakyPeer::start(0);
        let manager = Arc::new(ConnectionManager::new(link_config(peer.port())).unwrap());
        let worker = spawn_manager(&manager);
        manager.signal_disconnect(DisconnectReason::Startup);
        assert!(wait_until(Duration::from_secs(5), || manager.is_connected()));

        peer.kick_clients();
        {
            let mut session = manager.session().unwrap();
            let msg = encode_position_query(session.seq());
            assert!(session.exchange(&msg).is_err());
        }

        assert!(wait_until(Duration::from_secs(5), || manager.epoch() == 2));
        assert!(manager.is_connected());

        // Nova época recomeça a sequência em 1 (probe = 000001$33)
        assert!(peer.received().iter().filter(|m| m.starts_with("000001$33")).count() >= 2);

        manager.request_shutdown();
        worker.join().unwrap();
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
