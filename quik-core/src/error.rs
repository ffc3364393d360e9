use thiserror::Error;

/// Ошибки декодера кадров. Никогда не фатальны: кусок отбрасывается, разбор продолжается.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Мусор перед первой `{`
    #[error("discarded {} bytes before document start: {:?}", .bytes.len(), String::from_utf8_lossy(.bytes))]
    Garbage {
        /// Отброшенные байты
        bytes: Vec<u8>,
    },

    /// Сбалансированный по скобкам кусок не разобрался как JSON
    #[error("malformed document {:?}: {source}", String::from_utf8_lossy(.raw))]
    Malformed {
        /// Сырой кусок
        raw: Vec<u8>,
        /// Ошибка парсера
        #[source]
        source: serde_json::Error,
    },

    /// Незавершённый документ превысил допустимый размер буфера
    #[error("buffered {len} bytes without a complete document (limit {limit})")]
    Overflow {
        /// Сколько байт было в буфере
        len: usize,
        /// Лимит
        limit: usize,
    },
}

/// Нарушения формата конверта
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Документ не является JSON-объектом
    #[error("envelope is not a json object")]
    NotAnObject,

    /// Нет поля `id`
    #[error("envelope has no `id` field")]
    MissingId,

    /// Нет поля `type`
    #[error("envelope has no `type` field")]
    MissingType,

    /// Неизвестное значение `type`
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Ошибки генератора идентификаторов
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// Номер участника не помещается в идентификатор
    #[error("participant id {participant} is out of range (max {max})")]
    ParticipantOutOfRange {
        /// Переданный номер
        participant: u32,
        /// Верхняя граница (не включительно)
        max: u32,
    },

    /// Слишком мелкий тик: идентификатор перестанет помещаться в i64/JSON-число
    #[error("id resolution must be at least 1 ms (got {0:?})")]
    ResolutionTooFine(std::time::Duration),
}

/// Ошибки чтения списка инструментов
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// Строка не похожа на `CLASS:SEC`
    #[error("instrument must look like CLASS:SEC (got {0:?})")]
    BadFormat(String),

    /// Ошибка чтения источника
    #[error("failed to read instruments: {0}")]
    Io(#[from] std::io::Error),
}
