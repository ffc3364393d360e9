//! Каналы источников данных.
//!
//! На каждый источник данных заводится свой неограниченный канал. Все
//! push-вызовы терминала для этого источника попадают в него в порядке прихода.

use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use log::{debug, warn};
use serde_json::Value;

use quik_core::envelope::Envelope;
use quik_core::meta::{DataSourceHandle, value_key};

/// Маршрутизатор push-сообщений по источникам данных
#[derive(Debug, Default)]
pub struct DataSourceRouter {
    channels: DashMap<String, Sender<Envelope>>,
}

impl DataSourceRouter {
    /// Пустой маршрутизатор
    pub fn new() -> Self {
        Self::default()
    }

    /// Открывает канал для источника. Если канал уже был, старый получатель отключается.
    pub fn open(&self, handle: &DataSourceHandle) -> Receiver<Envelope> {
        let (tx, rx) = crossbeam_channel::unbounded();
        if self.channels.insert(handle.key(), tx).is_some() {
            debug!("data source {handle}: channel reopened");
        }
        rx
    }

    /// Закрывает канал; получатель дочитает уже отправленное и увидит отключение
    pub fn close(&self, handle: &DataSourceHandle) -> bool {
        self.channels.remove(&handle.key()).is_some()
    }

    /// Отправляет сообщение в канал источника `object`. Возвращает false, если канала нет.
    pub fn route(&self, object: &Value, env: Envelope) -> bool {
        let key = value_key(object);
        let Some(tx) = self.channels.get(&key).map(|e| e.value().clone()) else {
            warn!("push for unknown data source {key} dropped");
            return false;
        };

        if tx.send(env).is_err() {
            debug!("data source {key}: receiver is gone, closing channel");
            self.channels.remove(&key);
            return false;
        }
        true
    }

    /// Количество открытых каналов
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Нет открытых каналов
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
