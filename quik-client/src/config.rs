//! Настройки подключения к терминалу.
//!
//! Порядок применения: значения по умолчанию, затем JSON-файл (отсутствующие
//! поля берутся по умолчанию), затем флаги командной строки, затем проверка.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quik_core::{DEFAULT_HOST, DEFAULT_ID_RESOLUTION, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, MAX_PARTICIPANTS};

use crate::error::ConfigError;

/// Период опроса сокета читающим потоком по умолчанию
pub const DEFAULT_READ_TICK_MS: u64 = 200;

/// Настройки моста
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Хост терминала
    pub host: String,
    /// Порт JSON-моста
    pub port: u16,
    /// Номер участника в идентификаторах сообщений
    pub participant_id: u32,
    /// Шаг тика генератора идентификаторов, мс
    pub id_resolution_ms: u64,
    /// Лимит незавершённого документа в буфере декодера
    pub max_frame_bytes: usize,
    /// Таймаут чтения сокета, мс: как часто читающий поток проверяет флаг остановки
    pub read_tick_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            participant_id: 0,
            id_resolution_ms: DEFAULT_ID_RESOLUTION.as_millis() as u64,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_tick_ms: DEFAULT_READ_TICK_MS,
        }
    }
}

impl BridgeConfig {
    /// Загрузка из JSON-файла
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Проверка диапазонов
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host is empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1..=65535".into()));
        }
        if self.participant_id >= MAX_PARTICIPANTS {
            return Err(ConfigError::Invalid(format!(
                "participant_id must be below {MAX_PARTICIPANTS} (got {})",
                self.participant_id
            )));
        }
        if self.id_resolution_ms == 0 {
            return Err(ConfigError::Invalid("id_resolution_ms must be positive".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid("max_frame_bytes must be positive".into()));
        }
        if self.read_tick_ms == 0 {
            return Err(ConfigError::Invalid("read_tick_ms must be positive".into()));
        }
        Ok(())
    }

    /// Шаг тика генератора идентификаторов
    pub fn id_resolution(&self) -> Duration {
        Duration::from_millis(self.id_resolution_ms)
    }

    /// Таймаут чтения сокета
    pub fn read_tick(&self) -> Duration {
        Duration::from_millis(self.read_tick_ms)
    }
}
