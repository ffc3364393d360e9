use std::path::PathBuf;

use quik_core::IdError;
use thiserror::Error;

/// Ошибки отправки через сессию
#[derive(Debug, Error)]
pub enum SessionError {
    /// Сокет не открыт
    #[error("session is not connected")]
    NotConnected,

    /// Мы уже отправили `end`, новые запросы не принимаются
    #[error("session has already sent `end`")]
    Ended,

    /// Ошибка записи в сокет
    #[error("socket write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Запрос не сериализовался
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Не удалось выдать идентификатор
    #[error(transparent)]
    Id(#[from] IdError),
}

/// Ошибки конфигурации
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Файл не читается
    #[error("failed to read config {path:?}: {source}")]
    Io {
        /// Путь к файлу
        path: PathBuf,
        /// Причина
        #[source]
        source: std::io::Error,
    },

    /// Файл не разобрался как JSON
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        /// Путь к файлу
        path: PathBuf,
        /// Причина
        #[source]
        source: serde_json::Error,
    },

    /// Значение вне допустимого диапазона
    #[error("invalid config: {0}")]
    Invalid(String),
}
