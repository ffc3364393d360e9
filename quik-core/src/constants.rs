use std::time::Duration;

/// Верхняя граница номера участника в идентификаторе сообщения (не включительно)
pub const MAX_PARTICIPANTS: u32 = 400;

/// Шаг "тика" генератора идентификаторов по умолчанию
pub const DEFAULT_ID_RESOLUTION: Duration = Duration::from_millis(10);

/// Максимальный объём незавершённого документа в буфере декодера
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Порт JSON-моста терминала по умолчанию
pub const DEFAULT_PORT: u16 = 57777;

/// Хост терминала по умолчанию
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Идентификатор служебных кадров (`end`, `ver`)
pub const SERVICE_FRAME_ID: i64 = 0;
