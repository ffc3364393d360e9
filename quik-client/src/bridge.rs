//! Фасад моста: по одному методу на вызов терминала.
//!
//! Каждый вызов выдаёт новый `id`, регистрирует метаданные запроса, отправляет
//! его и возвращает `id`. Результат приходит позже событием на шине.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, info};
use serde::Serialize;
use serde_json::json;

use quik_core::envelope::Envelope;
use quik_core::events::ConnectionState;
use quik_core::ids::{IdGenerator, MessageId};
use quik_core::meta::{BarField, CallbackName, DataSourceHandle, RequestKind, RequestMeta};
use quik_core::registry::MessageRegistry;
use quik_core::request::RequestData;
use quik_core::subscriptions::{SubscriptionHandle, SubscriptionManager, TopicKey, Unsubscribed};

use crate::bus::{BusEvent, EventBus};
use crate::config::BridgeConfig;
use crate::datasource::DataSourceRouter;
use crate::error::{ConfigError, SessionError};
use crate::session::{Session, SessionOptions};

/// Клиент JSON-моста терминала
pub struct QuikBridge {
    config: BridgeConfig,
    ids: IdGenerator,
    registry: Arc<MessageRegistry>,
    subscriptions: SubscriptionManager,
    data_sources: Arc<DataSourceRouter>,
    bus: Arc<EventBus>,
    session: Session,
}

impl QuikBridge {
    /// Мост по проверенной конфигурации; сокет не открывается до [`QuikBridge::connect`]
    pub fn new(config: BridgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ids = IdGenerator::with_resolution(config.id_resolution())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let registry = Arc::new(MessageRegistry::new());
        let bus = Arc::new(EventBus::new());
        let data_sources = Arc::new(DataSourceRouter::new());
        let session = Session::new(
            registry.clone(),
            bus.clone(),
            data_sources.clone(),
            SessionOptions::from(&config),
        );

        Ok(Self {
            config,
            ids,
            registry,
            subscriptions: SubscriptionManager::new(),
            data_sources,
            bus,
            session,
        })
    }

    /// Конфигурация моста
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Шина событий
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Регистрирует обработчик событий вида `E`
    pub fn on<E, F>(&self, handler: F)
    where
        E: BusEvent,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(handler);
    }

    /// Реестр ожидающих ответа запросов
    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// Подписки
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Подключение к терминалу по адресу из конфигурации
    pub fn connect(&self, shutdown: Arc<AtomicBool>) -> bool {
        self.session
            .start(&self.config.host, self.config.port, shutdown)
    }

    /// Состояние соединения
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Отправка `end`, см. [`Session::finish`]
    pub fn finish(&self, force: bool) {
        self.session.finish(force);
    }

    /// Ожидание закрытия сессии
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.session.wait_closed(timeout)
    }

    fn request(&self, data: RequestData, meta: RequestMeta) -> Result<MessageId, SessionError> {
        let id = self.ids.next(self.config.participant_id)?;
        let env = Envelope::request(id, &data)?;
        let kind = meta.kind;

        self.registry.register(id, meta);
        if let Err(e) = self.session.send(&env) {
            self.registry.remove(id);
            return Err(e);
        }
        debug!("request {id} ({kind}) sent: {}", data.display_method());
        Ok(id)
    }

    /// Список классов
    pub fn get_classes_list(&self) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke("getClassesList"),
            RequestMeta::new(RequestKind::Classes, "getClassesList"),
        )
    }

    /// Список инструментов класса
    pub fn get_class_securities(&self, class_code: &str) -> Result<MessageId, SessionError> {
        let mut meta = RequestMeta::new(RequestKind::Securities, "getClassSecurities");
        meta.class_code = Some(class_code.to_string());
        self.request(
            RequestData::invoke("getClassSecurities").with_args([class_code]),
            meta,
        )
    }

    /// Описание инструмента
    pub fn get_security_info(&self, class_code: &str, sec_code: &str) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke("getSecurityInfo").with_args([class_code, sec_code]),
            RequestMeta::new(RequestKind::SecurityContract, "getSecurityInfo")
                .with_instrument(class_code, sec_code),
        )
    }

    /// Значение параметра текущей таблицы
    pub fn get_param(&self, class_code: &str, sec_code: &str, param: &str) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke("getParamEx2").with_args([class_code, sec_code, param]),
            RequestMeta::new(RequestKind::GetParam, "getParamEx2")
                .with_instrument(class_code, sec_code)
                .with_param(param),
        )
    }

    /// Снимок стакана
    pub fn get_order_book(&self, class_code: &str, sec_code: &str) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke("getQuoteLevel2").with_args([class_code, sec_code]),
            RequestMeta::new(RequestKind::OrderBookSnapshot, "getQuoteLevel2")
                .with_instrument(class_code, sec_code),
        )
    }

    /// Создание источника данных; ссылка на него придёт событием `DataSourceSet`
    pub fn create_data_source(
        &self,
        class_code: &str,
        sec_code: &str,
        interval: &str,
    ) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke("CreateDataSource").with_args([class_code, sec_code, interval]),
            RequestMeta::new(RequestKind::DataSource, "CreateDataSource")
                .with_instrument(class_code, sec_code)
                .with_interval(interval),
        )
    }

    /// Установка колбэка обновлений источника и открытие его канала.
    /// Канал открывается до отправки, чтобы не потерять первые обновления.
    pub fn set_data_source_callback(
        &self,
        ds: &DataSourceHandle,
    ) -> Result<(MessageId, Receiver<Envelope>), SessionError> {
        let rx = self.data_sources.open(ds);
        let data = RequestData::invoke("SetUpdateCallback")
            .with_raw_arg(json!({"type": "callable", "function": "on_update"}))
            .on_object(ds.as_value().clone());
        let meta = RequestMeta::new(RequestKind::DataSourceCallback, "SetUpdateCallback")
            .with_data_source(ds.clone());

        match self.request(data, meta) {
            Ok(id) => Ok((id, rx)),
            Err(e) => {
                self.data_sources.close(ds);
                Err(e)
            }
        }
    }

    /// Значение бара источника данных по индексу
    pub fn get_bar(&self, ds: &DataSourceHandle, field: BarField, index: u64) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::invoke(field.function())
                .with_args([index.to_string()])
                .on_object(ds.as_value().clone()),
            RequestMeta::new(RequestKind::Bar(field), field.function()).with_data_source(ds.clone()),
        )
    }

    /// Закрытие источника данных и его канала
    pub fn close_data_source(&self, ds: &DataSourceHandle) -> Result<MessageId, SessionError> {
        self.data_sources.close(ds);
        self.request(
            RequestData::invoke("Close").on_object(ds.as_value().clone()),
            RequestMeta::new(RequestKind::DataSourceClose, "Close").with_data_source(ds.clone()),
        )
    }

    /// Регистрация глобального колбэка терминала
    pub fn set_global_callback(&self, name: CallbackName) -> Result<MessageId, SessionError> {
        self.request(
            RequestData::register(name.as_str()),
            RequestMeta::new(RequestKind::GlobalCallback(name), name.as_str()),
        )
    }

    /// Отправка транзакции; поля транзакции передаются терминалу одной JSON-строкой
    pub fn send_transaction<T: Serialize>(
        &self,
        class_code: &str,
        sec_code: &str,
        transaction: &T,
    ) -> Result<MessageId, SessionError> {
        let raw = serde_json::to_string(transaction)?;
        self.request(
            RequestData::invoke("sendTransaction").with_args([raw]),
            RequestMeta::new(RequestKind::Transaction, "sendTransaction")
                .with_instrument(class_code, sec_code),
        )
    }

    /// Подписка на стакан. Повторная подписка на тот же инструмент на провод не уходит.
    pub fn subscribe_order_book(&self, class_code: &str, sec_code: &str) -> Result<SubscriptionHandle, SessionError> {
        let key = TopicKey::order_book(class_code, sec_code);
        self.subscriptions.subscribe(&key, || {
            self.request(
                RequestData::quotes(true, class_code, sec_code),
                RequestMeta::new(RequestKind::SubscribeOrderBook, "subscribeQuotes")
                    .with_instrument(class_code, sec_code),
            )
        })
    }

    /// Отписка от стакана. Проводная отписка уходит, только когда ушёл последний подписчик.
    pub fn unsubscribe_order_book(
        &self,
        class_code: &str,
        sec_code: &str,
        handle: SubscriptionHandle,
    ) -> Result<Unsubscribed, SessionError> {
        let key = TopicKey::order_book(class_code, sec_code);
        self.unsubscribe(&key, handle, || {
            (
                RequestData::quotes(false, class_code, sec_code),
                RequestMeta::new(RequestKind::UnsubscribeOrderBook, "unsubscribeQuotes")
                    .with_instrument(class_code, sec_code),
            )
        })
    }

    /// Подписка на изменения параметра
    pub fn subscribe_param(
        &self,
        class_code: &str,
        sec_code: &str,
        param: &str,
    ) -> Result<SubscriptionHandle, SessionError> {
        let key = TopicKey::param(class_code, sec_code, param);
        self.subscriptions.subscribe(&key, || {
            self.request(
                RequestData::param_changes(true, class_code, sec_code, param),
                RequestMeta::new(RequestKind::SubscribeParam, "subscribeParamChanges")
                    .with_instrument(class_code, sec_code)
                    .with_param(param),
            )
        })
    }

    /// Отписка от изменений параметра
    pub fn unsubscribe_param(
        &self,
        class_code: &str,
        sec_code: &str,
        param: &str,
        handle: SubscriptionHandle,
    ) -> Result<Unsubscribed, SessionError> {
        let key = TopicKey::param(class_code, sec_code, param);
        self.unsubscribe(&key, handle, || {
            (
                RequestData::param_changes(false, class_code, sec_code, param),
                RequestMeta::new(RequestKind::UnsubscribeParam, "unsubscribeParamChanges")
                    .with_instrument(class_code, sec_code)
                    .with_param(param),
            )
        })
    }

    fn unsubscribe(
        &self,
        key: &TopicKey,
        handle: SubscriptionHandle,
        build: impl FnOnce() -> (RequestData, RequestMeta),
    ) -> Result<Unsubscribed, SessionError> {
        // отписка уходит со свежим id, а не с id подписки
        let outcome = self.subscriptions.unsubscribe(key, handle, |wire_id| -> Result<(), SessionError> {
            let (data, meta) = build();
            let id = self.request(data, meta)?;
            info!("{key}: unsubscribed with id {id} (subscribed with {wire_id})");
            Ok(())
        })?;

        if outcome == Unsubscribed::UnknownHandle {
            debug!("{key}: {handle} is not subscribed");
        }
        Ok(outcome)
    }
}
