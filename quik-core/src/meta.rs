//! Метаданные исходящих запросов и таблицы их строковых имён.

use std::fmt;

use serde_json::Value;

/// Функция бара источника данных
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarField {
    /// Цена открытия
    Open,
    /// Максимум
    High,
    /// Минимум
    Low,
    /// Цена закрытия
    Close,
    /// Объём
    Volume,
    /// Время бара
    Time,
}

impl BarField {
    /// Имя метода источника данных в Lua-API
    pub const fn function(self) -> &'static str {
        match self {
            BarField::Open => "O",
            BarField::High => "H",
            BarField::Low => "L",
            BarField::Close => "C",
            BarField::Volume => "V",
            BarField::Time => "T",
        }
    }
}

/// Глобальные колбэки терминала
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackName {
    /// Обезличенные сделки
    OnAllTrade,
    /// Собственные сделки
    OnTrade,
    /// Заявки
    OnOrder,
    /// Ответы на транзакции
    OnTransReply,
    /// Изменение стакана
    OnQuote,
    /// Изменение текущей таблицы
    OnParam,
}

impl CallbackName {
    /// Имя колбэка на проводе
    pub const fn as_str(self) -> &'static str {
        match self {
            CallbackName::OnAllTrade => "OnAllTrade",
            CallbackName::OnTrade => "OnTrade",
            CallbackName::OnOrder => "OnOrder",
            CallbackName::OnTransReply => "OnTransReply",
            CallbackName::OnQuote => "OnQuote",
            CallbackName::OnParam => "OnParam",
        }
    }

    /// Обратное отображение
    pub fn from_wire(s: &str) -> Option<Self> {
        [
            CallbackName::OnAllTrade,
            CallbackName::OnTrade,
            CallbackName::OnOrder,
            CallbackName::OnTransReply,
            CallbackName::OnQuote,
            CallbackName::OnParam,
        ]
        .into_iter()
        .find(|c| c.as_str() == s)
    }
}

/// Вид запроса: определяет, как разбирать ответ на него
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Подписка на стакан
    SubscribeOrderBook,
    /// Отписка от стакана
    UnsubscribeOrderBook,
    /// Список классов
    Classes,
    /// Список инструментов класса
    Securities,
    /// Описание инструмента
    SecurityContract,
    /// Значение параметра текущей таблицы
    GetParam,
    /// Снимок стакана
    OrderBookSnapshot,
    /// Создание источника данных
    DataSource,
    /// Установка колбэка источника данных
    DataSourceCallback,
    /// Закрытие источника данных
    DataSourceClose,
    /// Подписка на параметр
    SubscribeParam,
    /// Отписка от параметра
    UnsubscribeParam,
    /// Значение бара источника данных
    Bar(BarField),
    /// Регистрация глобального колбэка
    GlobalCallback(CallbackName),
    /// Транзакция
    Transaction,
}

impl RequestKind {
    /// Строковое имя вида запроса (для логов и внешних потребителей)
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestKind::SubscribeOrderBook => "subscribe_orderbook",
            RequestKind::UnsubscribeOrderBook => "unsubscribe_orderbook",
            RequestKind::Classes => "classes_list",
            RequestKind::Securities => "class_securities",
            RequestKind::SecurityContract => "security_info",
            RequestKind::GetParam => "get_param",
            RequestKind::OrderBookSnapshot => "order_book_snapshot",
            RequestKind::DataSource => "create_datasource",
            RequestKind::DataSourceCallback => "datasource_callback",
            RequestKind::DataSourceClose => "close_datasource",
            RequestKind::SubscribeParam => "subscribe_quotes_table",
            RequestKind::UnsubscribeParam => "unsubscribe_quotes_table",
            RequestKind::Bar(BarField::Open) => "bar_open",
            RequestKind::Bar(BarField::High) => "bar_high",
            RequestKind::Bar(BarField::Low) => "bar_low",
            RequestKind::Bar(BarField::Close) => "bar_close",
            RequestKind::Bar(BarField::Volume) => "bar_volume",
            RequestKind::Bar(BarField::Time) => "bar_time",
            RequestKind::GlobalCallback(_) => "global_callback",
            RequestKind::Transaction => "transaction",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ссылка на объект источника данных терминала (непрозрачное JSON-значение)
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceHandle(Value);

impl DataSourceHandle {
    /// Оборачивает значение, которое вернул терминал
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// Значение для поля `object` запроса
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Ключ маршрутизации: строка как есть, иначе компактный JSON
    pub fn key(&self) -> String {
        value_key(&self.0)
    }
}

impl fmt::Display for DataSourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Ключ маршрутизации для поля `object` входящего запроса
pub fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Что известно об отправленном запросе к моменту прихода ответа.
/// После создания не меняется.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    /// Вид запроса
    pub kind: RequestKind,
    /// Имя вызванного метода или функции
    pub method: String,
    /// Код инструмента
    pub ticker: Option<String>,
    /// Код класса
    pub class_code: Option<String>,
    /// Интервал источника данных
    pub interval: Option<String>,
    /// Имя параметра
    pub param: Option<String>,
    /// Источник данных, к которому относится запрос
    pub data_source: Option<DataSourceHandle>,
}

impl RequestMeta {
    /// Метаданные без привязки к инструменту
    pub fn new(kind: RequestKind, method: impl Into<String>) -> Self {
        Self {
            kind,
            method: method.into(),
            ticker: None,
            class_code: None,
            interval: None,
            param: None,
            data_source: None,
        }
    }

    /// Привязка к инструменту
    pub fn with_instrument(mut self, class_code: &str, ticker: &str) -> Self {
        self.class_code = Some(class_code.to_string());
        self.ticker = Some(ticker.to_string());
        self
    }

    /// Интервал источника данных
    pub fn with_interval(mut self, interval: &str) -> Self {
        self.interval = Some(interval.to_string());
        self
    }

    /// Имя параметра
    pub fn with_param(mut self, param: &str) -> Self {
        self.param = Some(param.to_string());
        self
    }

    /// Источник данных
    pub fn with_data_source(mut self, ds: DataSourceHandle) -> Self {
        self.data_source = Some(ds);
        self
    }
}
