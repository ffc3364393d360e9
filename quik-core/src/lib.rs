//! # quik-core
//!
//! Протокольное ядро клиента JSON-моста терминала QUIK.
//!
//! Этот крейт содержит:
//!
//! - [`codec`] - нарезка TCP-потока на целые JSON-документы
//! - [`envelope`] - конверт `{"id", "type", "data"}` и его разбор
//! - [`request`] - содержимое исходящих запросов
//! - [`ids`] - монотонные идентификаторы сообщений
//! - [`registry`] - сопоставление ответов с отправленными запросами
//! - [`subscriptions`] - дедупликация подписок с подсчётом ссылок
//! - [`events`] - доменные события моста
//! - [`instruments`] - чтение списков `CLASS:SEC`
//! - [`error`] - типы ошибок, которые возвращают компоненты `quik-core`
//!
//! ## Быстрый пример: декодер кадров
//!
//! ```rust
//! use quik_core::codec::FrameDecoder;
//! use quik_core::envelope::{Envelope, MessageKind};
//!
//! let mut dec = FrameDecoder::new();
//! assert!(dec.push(br#"{"id":1,"type":"ans","da"#).is_empty());
//!
//! let docs = dec.push(br#"ta":{"result":[true]}}{"id":0,"type":"end"}"#);
//! let kinds: Vec<_> = docs
//!     .into_iter()
//!     .map(|d| Envelope::from_value(d.unwrap()).unwrap().kind)
//!     .collect();
//! assert_eq!(kinds, vec![MessageKind::Ans, MessageKind::End]);
//! ```
//!
//! ## Пример: идентификаторы
//!
//! ```rust
//! use quik_core::ids::{IdGenerator, participant_of};
//!
//! let ids = IdGenerator::new();
//! let a = ids.next(7).unwrap();
//! let b = ids.next(7).unwrap();
//! assert!(b > a);
//! assert_eq!(participant_of(b), 7);
//! ```
//!
//! ## Пример: список инструментов
//!
//! ```rust
//! use quik_core::instruments::parse_instruments_csv;
//!
//! let list = parse_instruments_csv("tqbr:SBER, SPBFUT:SiH5, TQBR:SBER").unwrap();
//! let names: Vec<String> = list.iter().map(|i| i.to_string()).collect();
//! assert_eq!(names, vec!["SPBFUT:SiH5", "TQBR:SBER"]);
//! ```
//!
//! ## Дизайн
//!
//! Здесь нет сокетов и потоков: только типы, разбор и потокобезопасные
//! таблицы. Сессию, шину событий и бинарники строят `quik-client` и
//! `quik-emulator` поверх этого крейта.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Нарезка байтового потока на JSON-документы.
pub mod codec;

/// Конверт сообщения и типы кадров.
pub mod envelope;

/// Содержимое `data` исходящих запросов.
pub mod request;

/// Метаданные запросов и таблицы строковых имён.
pub mod meta;

/// Генератор идентификаторов сообщений.
pub mod ids;

/// Реестр ожидающих ответа запросов.
pub mod registry;

/// Подписки с подсчётом ссылок.
pub mod subscriptions;

/// Доменные события.
pub mod events;

/// Чтение/нормализация списка инструментов из текста и файлов.
pub mod instruments;

/// Ошибки `quik-core`.
pub mod error;

/// Общие константы
mod constants;
pub use constants::{
    DEFAULT_HOST, DEFAULT_ID_RESOLUTION, DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT, MAX_PARTICIPANTS,
    SERVICE_FRAME_ID,
};

// --- Re-exports (публичный фасад API) ---

pub use crate::codec::FrameDecoder;
pub use crate::envelope::{Envelope, MessageKind};
pub use crate::error::{FrameError, IdError, InstrumentError, ProtocolError};
pub use crate::events::BridgeEvent;
pub use crate::ids::{IdGenerator, MessageId};
pub use crate::instruments::Instrument;
pub use crate::meta::{RequestKind, RequestMeta};
pub use crate::registry::MessageRegistry;
pub use crate::request::{Method, RequestData};
pub use crate::subscriptions::{SubscriptionHandle, SubscriptionManager, TopicKey};
