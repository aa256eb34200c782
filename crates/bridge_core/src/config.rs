//! Configuração unificada via TOML.
//!
//! Um único `config.toml` com as seções `[bridge]` (cliente) e `[peer]`
//! (simulador do servidor remoto).

use crate::connection::LinkConfig;
use crate::point_source::{PointDef, PointHandle, PointType, PositionTargets, StatusSources};
use crate::types::Position;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Item ids dos pontos no servidor de pontos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PointsConfig {
    // Destinos (Position)
    pub velocity: String,
    pub x: String,
    pub y: String,
    pub z: String,
    pub reception_rate: String,
    // Origens (Status)
    pub reception_rate_real: String,
    pub power: String,
    pub translator_temp: String,
    pub wheel_temp: String,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            velocity: "Bucket Brigade.Real4".into(),
            x: "Bucket Brigade.UInt1".into(),
            y: "Bucket Brigade.UInt2".into(),
            z: "Bucket Brigade.UInt4".into(),
            reception_rate: "Bucket Brigade.Real8".into(),
            reception_rate_real: "Random.UInt1".into(),
            power: "Random.Real4".into(),
            translator_temp: "Saw-toothed Waves.Real4".into(),
            wheel_temp: "Square Waves.Real4".into(),
        }
    }
}

fn point(handle: u32, item_id: &str, point_type: PointType) -> PointDef {
    PointDef {
        handle: PointHandle(handle),
        item_id: item_id.to_string(),
        point_type,
    }
}

impl PointsConfig {
    /// Pontos de escrita da posição (handles 1–5).
    pub fn position_targets(&self) -> PositionTargets {
        PositionTargets {
            velocity: point(1, &self.velocity, PointType::Real4),
            x: point(2, &self.x, PointType::UInt1),
            y: point(3, &self.y, PointType::UInt2),
            z: point(4, &self.z, PointType::UInt4),
            reception_rate: point(5, &self.reception_rate, PointType::Real8),
        }
    }

    /// Pontos de leitura do status (handles 6–9).
    pub fn status_sources(&self) -> StatusSources {
        StatusSources {
            reception_rate_real: point(6, &self.reception_rate_real, PointType::UInt1),
            power: point(7, &self.power, PointType::Real4),
            translator_temp: point(8, &self.translator_temp, PointType::Real4),
            wheel_temp: point(9, &self.wheel_temp, PointType::Real4),
        }
    }
}

/// Geradores do servidor de pontos simulado.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Intervalo entre mudanças geradas (ms)
    pub update_rate_ms: u64,
    /// Semente dos valores aleatórios (0 = entropia do sistema)
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            update_rate_ms: 1000,
            seed: 0,
        }
    }
}

/// Configuração da ponte (cliente).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host do peer remoto
    pub host: String,
    /// Porta TCP do peer
    pub port: u16,
    /// Espera entre tentativas de reconexão (ms)
    pub retry_interval_ms: u64,
    /// Timeout de connect/send/recv (ms)
    pub io_timeout_ms: u64,
    /// Tamanho do buffer de recepção
    pub recv_buffer_len: usize,
    /// Intervalo de publicação do status (ms)
    pub publish_interval_ms: u64,
    /// Intervalo de escrita da posição nos pontos (ms)
    pub write_interval_ms: u64,
    /// Loga cada mudança de status em nível info
    pub verbose_changes: bool,
    pub points: PointsConfig,
    pub simulation: SimulationConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3445,
            retry_interval_ms: 2000,
            io_timeout_ms: 5000,
            recv_buffer_len: 512,
            publish_interval_ms: 2000,
            write_interval_ms: 1000,
            verbose_changes: false,
            points: PointsConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.host.clone(),
            port: self.port,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            recv_buffer_len: self.recv_buffer_len,
        }
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }
}

/// Configuração do peer simulado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// IP local para bind
    pub bind_ip: String,
    /// Porta TCP para escutar
    pub port: u16,
    /// Posição devolvida nas respostas `33`
    pub position: Position,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            bind_ip: "127.0.0.1".into(),
            port: 3445,
            position: Position {
                translational_velocity: 1.5,
                x: 120,
                y: 340,
                z: 56,
                reception_rate: 98.5,
            },
        }
    }
}

/// Configuração raiz do aplicativo (unifica ponte e peer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub peer: PeerConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Caminho do config: primeiro argumento da linha de comando, ou
    /// `config.toml` ao lado do executável.
    pub fn resolve_path(arg: Option<String>) -> PathBuf {
        arg.map(PathBuf::from).unwrap_or_else(Self::default_path)
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let bridge = &self.bridge;

        if bridge.host.trim().is_empty() {
            errors.push("Host do peer não pode ser vazio".into());
        }
        if bridge.port == 0 {
            errors.push("Porta do peer não pode ser 0".into());
        }
        if bridge.retry_interval_ms < 10 {
            errors.push(format!(
                "Intervalo de reconexão muito curto: {} ms (mínimo 10)",
                bridge.retry_interval_ms
            ));
        }
        if bridge.io_timeout_ms == 0 {
            errors.push("Timeout de I/O não pode ser 0".into());
        }
        if bridge.recv_buffer_len < 64 {
            errors.push(format!(
                "Buffer de recepção muito pequeno: {} (mínimo 64)",
                bridge.recv_buffer_len
            ));
        }
        if bridge.publish_interval_ms == 0 || bridge.write_interval_ms == 0 {
            errors.push("Intervalos dos loops devem ser maiores que 0".into());
        }
        if self.peer.port == 0 {
            errors.push("Porta do peer simulado não pode ser 0".into());
        }

        errors
    }
}
