//! Доменные события, которые мост публикует подписчикам.
//!
//! События неизменяемы. Сделки и описания инструментов передаются как
//! непрозрачные JSON-записи: вызывающий код разбирает их в свои типы через
//! `parse`. Стакан разбирается здесь, потому что его читают и мост, и эмулятор.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::meta::{DataSourceHandle, RequestMeta};

/// Что лежит в списке инструментов
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentListKind {
    /// Коды классов
    ClassCodes,
    /// Коды инструментов
    SecCodes,
}

/// Пришёл список классов или инструментов класса
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentClassesUpdated {
    /// Вид списка
    pub kind: InstrumentListKind,
    /// Коды в порядке ответа терминала
    pub items: Vec<String>,
}

/// Изменилось значение параметра текущей таблицы
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdated {
    /// Код класса
    pub class_code: Option<String>,
    /// Код инструмента
    pub sec_code: Option<String>,
    /// Имя параметра
    pub param: Option<String>,
    /// Значение как его прислал терминал
    pub value: Option<String>,
}

/// Уровень стакана
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Цена
    #[serde(deserialize_with = "lenient_string")]
    pub price: String,
    /// Количество
    #[serde(deserialize_with = "lenient_string")]
    pub quantity: String,
}

/// Стакан в том виде, в каком его отдаёт `getQuoteLevel2`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBook {
    /// Покупка, от худшей цены к лучшей
    #[serde(default, deserialize_with = "lenient_levels")]
    pub bid: Vec<Level>,
    /// Продажа, от лучшей цены к худшей
    #[serde(default, deserialize_with = "lenient_levels")]
    pub offer: Vec<Level>,
    /// Число уровней покупки
    #[serde(default = "zero", deserialize_with = "lenient_string")]
    pub bid_count: String,
    /// Число уровней продажи
    #[serde(default = "zero", deserialize_with = "lenient_string")]
    pub offer_count: String,
}

impl OrderBook {
    /// Лучшая цена покупки (последний уровень `bid`)
    pub fn best_bid(&self) -> Option<&Level> {
        self.bid.last()
    }

    /// Лучшая цена продажи (первый уровень `offer`)
    pub fn best_offer(&self) -> Option<&Level> {
        self.offer.first()
    }
}

fn zero() -> String {
    "0".to_string()
}

// Терминал присылает числа то строками, то числами
fn lenient_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(zero()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

// Пустой стакан в Lua-таблице приходит как `""` или `{}` вместо массива
fn lenient_levels<'de, D>(d: D) -> Result<Vec<Level>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(de::Error::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Обновился стакан (push `quotesChange` или ответ на снимок)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookUpdated {
    /// Код класса
    pub class_code: Option<String>,
    /// Код инструмента
    pub sec_code: Option<String>,
    /// Содержимое стакана
    pub book: OrderBook,
}

/// Обезличенная сделка
#[derive(Debug, Clone, PartialEq)]
pub struct TradeArrived {
    /// Запись сделки как её прислал терминал
    pub trade: Value,
}

impl TradeArrived {
    /// Разбор в тип вызывающего кода
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.trade)
    }
}

/// Описание инструмента (`getSecurityInfo`)
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityInfoArrived {
    /// Запись как её прислал терминал
    pub contract: Value,
}

impl SecurityInfoArrived {
    /// Разбор в тип вызывающего кода
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.contract)
    }
}

/// Сообщение, для которого нет отдельного события
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMessageArrived {
    /// Исходный конверт
    pub message: Envelope,
    /// Метаданные запроса, если ответ удалось сопоставить
    pub meta: Option<Arc<RequestMeta>>,
}

/// Терминал создал источник данных
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceSet {
    /// Ссылка на источник для следующих вызовов
    pub handle: DataSourceHandle,
    /// Метаданные запроса `CreateDataSource`
    pub meta: Arc<RequestMeta>,
}

/// Состояние соединения с терминалом
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Нет соединения
    Disconnected,
    /// Идёт подключение
    Pending,
    /// Соединение установлено
    Connected,
    /// Ошибка сокета; за ним всегда следует `Disconnected`
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Pending => "pending",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Смена состояния соединения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateChanged {
    /// Новое состояние
    pub state: ConnectionState,
}

/// Терминал прислал `end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionClosed;

/// Любое событие моста
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// См. [`InstrumentClassesUpdated`]
    InstrumentClassesUpdated(InstrumentClassesUpdated),
    /// См. [`ParameterUpdated`]
    ParameterUpdated(ParameterUpdated),
    /// См. [`OrderBookUpdated`]
    OrderBookUpdated(OrderBookUpdated),
    /// См. [`TradeArrived`]
    TradeArrived(TradeArrived),
    /// См. [`SecurityInfoArrived`]
    SecurityInfoArrived(SecurityInfoArrived),
    /// См. [`ServiceMessageArrived`]
    ServiceMessageArrived(ServiceMessageArrived),
    /// См. [`DataSourceSet`]
    DataSourceSet(DataSourceSet),
    /// См. [`ConnectionStateChanged`]
    ConnectionStateChanged(ConnectionStateChanged),
    /// См. [`ConnectionClosed`]
    ConnectionClosed(ConnectionClosed),
}

impl BridgeEvent {
    /// Короткое имя вида события для логов
    pub const fn name(&self) -> &'static str {
        match self {
            BridgeEvent::InstrumentClassesUpdated(_) => "instrument-classes-updated",
            BridgeEvent::ParameterUpdated(_) => "parameter-updated",
            BridgeEvent::OrderBookUpdated(_) => "order-book-updated",
            BridgeEvent::TradeArrived(_) => "trade-arrived",
            BridgeEvent::SecurityInfoArrived(_) => "security-info-arrived",
            BridgeEvent::ServiceMessageArrived(_) => "service-message-arrived",
            BridgeEvent::DataSourceSet(_) => "data-source-set",
            BridgeEvent::ConnectionStateChanged(_) => "connection-state-changed",
            BridgeEvent::ConnectionClosed(_) => "connection-closed",
        }
    }
}

macro_rules! impl_from_event {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for BridgeEvent {
                fn from(e: $ty) -> Self {
                    BridgeEvent::$ty(e)
                }
            }
        )*
    };
}

impl_from_event!(
    InstrumentClassesUpdated,
    ParameterUpdated,
    OrderBookUpdated,
    TradeArrived,
    SecurityInfoArrived,
    ServiceMessageArrived,
    DataSourceSet,
    ConnectionStateChanged,
    ConnectionClosed,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_book_accepts_strings_and_numbers() {
        let book: OrderBook = serde_json::from_value(json!({
            "bid": [{"price": "99.5", "quantity": "10"}, {"price": 100, "quantity": 3}],
            "offer": [{"price": "100.5", "quantity": 7}],
            "bid_count": "2.000000",
            "offer_count": 1
        }))
        .unwrap();

        assert_eq!(book.bid.len(), 2);
        assert_eq!(book.best_bid().unwrap().price, "100");
        assert_eq!(book.best_offer().unwrap().quantity, "7");
        assert_eq!(book.bid_count, "2.000000");
        assert_eq!(book.offer_count, "1");
    }

    #[test]
    fn empty_sides_in_lua_shape_become_empty_vectors() {
        let book: OrderBook =
            serde_json::from_value(json!({"bid": "", "offer": {}, "bid_count": "0"})).unwrap();
        assert!(book.bid.is_empty());
        assert!(book.offer.is_empty());
        assert_eq!(book.offer_count, "0");
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn bad_level_is_an_error() {
        let res: Result<OrderBook, _> =
            serde_json::from_value(json!({"bid": [{"price": [1], "quantity": "1"}]}));
        assert!(res.is_err());
    }

    #[test]
    fn trade_parses_into_caller_type() {
        #[derive(Deserialize)]
        struct Trade {
            sec_code: String,
            qty: u32,
        }

        let ev = TradeArrived {
            trade: json!({"sec_code": "SiH5", "qty": 2, "price": 91000}),
        };
        let t: Trade = ev.parse().unwrap();
        assert_eq!(t.sec_code, "SiH5");
        assert_eq!(t.qty, 2);
    }

    #[test]
    fn events_convert_into_bridge_event() {
        let ev: BridgeEvent = ConnectionStateChanged {
            state: ConnectionState::Connected,
        }
        .into();
        assert_eq!(ev.name(), "connection-state-changed");
        assert_eq!(BridgeEvent::from(ConnectionClosed).name(), "connection-closed");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
