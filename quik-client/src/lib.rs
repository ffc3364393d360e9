//! # quik-client
//!
//! Клиент JSON-моста терминала QUIK поверх [`quik_core`].
//!
//! - [`bus`] - типизированная шина событий с очередью на каждый вид события
//! - [`session`] - TCP-сессия: чтение, сопоставление ответов, публикация
//! - [`routing`] - перевод конвертов в доменные события
//! - [`datasource`] - каналы источников данных
//! - [`bridge`] - [`QuikBridge`], по одному методу на вызов терминала
//! - [`config`] - настройки подключения
//!
//! ## Пример
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! use quik_client::{BridgeConfig, QuikBridge};
//! use quik_core::events::InstrumentClassesUpdated;
//!
//! let bridge = QuikBridge::new(BridgeConfig::default()).unwrap();
//! bridge.on(|e: &InstrumentClassesUpdated| {
//!     println!("classes: {}", e.items.join(","));
//!     Ok(())
//! });
//!
//! if bridge.connect(Arc::new(AtomicBool::new(false))) {
//!     bridge.get_classes_list().unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Шина событий.
pub mod bus;

/// Сессия с терминалом.
pub mod session;

/// Маршрутизация входящих сообщений.
pub mod routing;

/// Каналы источников данных.
pub mod datasource;

/// Фасад моста.
pub mod bridge;

/// Конфигурация.
pub mod config;

/// Ошибки `quik-client`.
pub mod error;

pub use crate::bridge::QuikBridge;
pub use crate::bus::EventBus;
pub use crate::config::BridgeConfig;
pub use crate::error::{ConfigError, SessionError};
pub use crate::session::{Session, SessionOptions};
