//! Перевод входящих конвертов в доменные события.
//!
//! Функции здесь чистые: на вход конверт и метаданные запроса (если ответ
//! удалось сопоставить), на выход список событий. Сокета и шины они не знают.

use std::sync::Arc;

use log::warn;
use serde_json::Value;

use quik_core::envelope::Envelope;
use quik_core::events::{
    BridgeEvent, DataSourceSet, InstrumentClassesUpdated, InstrumentListKind, OrderBook,
    OrderBookUpdated, ParameterUpdated, SecurityInfoArrived, ServiceMessageArrived, TradeArrived,
};
use quik_core::meta::{CallbackName, DataSourceHandle, RequestKind, RequestMeta};

/// Входящий `req` без поля `object`: push от терминала
pub fn route_push(env: &Envelope, meta: Option<Arc<RequestMeta>>) -> Vec<BridgeEvent> {
    // терминал кладёт имя то в `function`, то в `method`
    let method = env.data_str("function").or_else(|| env.data_str("method"));

    match method {
        Some("paramChange") => vec![
            ParameterUpdated {
                class_code: env.data_str("class").map(str::to_string),
                sec_code: env.data_str("security").map(str::to_string),
                param: env.data_str("param").map(str::to_string),
                value: env.data_field("value").and_then(scalar_text),
            }
            .into(),
        ],
        Some("quotesChange") => match env.data_field("quotes").map(parse_book) {
            Some(Ok(book)) => vec![
                OrderBookUpdated {
                    class_code: env.data_str("class").map(str::to_string),
                    sec_code: env.data_str("security").map(str::to_string),
                    book,
                }
                .into(),
            ],
            Some(Err(e)) => {
                warn!("bad order book in push {}: {e}", env.id);
                service(env, meta)
            }
            None => service(env, meta),
        },
        Some("callback")
            if env.data_str("name").and_then(CallbackName::from_wire)
                == Some(CallbackName::OnAllTrade) =>
        {
            match env.data_field("arguments") {
                Some(Value::Array(trades)) => trades
                    .iter()
                    .map(|t| TradeArrived { trade: t.clone() }.into())
                    .collect(),
                _ => Vec::new(),
            }
        }
        _ => service(env, meta),
    }
}

/// Входящий `ans`: разбор по виду исходного запроса
pub fn route_answer(env: &Envelope, meta: Option<Arc<RequestMeta>>) -> Vec<BridgeEvent> {
    let Some(meta) = meta else {
        return service(env, None);
    };
    let result = env.data_field("result");

    match meta.kind {
        RequestKind::Classes => vec![instrument_list(InstrumentListKind::ClassCodes, result)],
        RequestKind::Securities => vec![instrument_list(InstrumentListKind::SecCodes, result)],
        RequestKind::SecurityContract => match result {
            Some(Value::Array(items)) => items
                .iter()
                .map(|c| SecurityInfoArrived { contract: c.clone() }.into())
                .collect(),
            Some(c @ Value::Object(_)) => vec![SecurityInfoArrived { contract: c.clone() }.into()],
            _ => service(env, Some(meta)),
        },
        RequestKind::GetParam => {
            let value = first_result(result).and_then(|v| match v {
                Value::Object(obj) => obj.get("param_value").and_then(scalar_text),
                other => scalar_text(other),
            });
            vec![
                ParameterUpdated {
                    class_code: meta.class_code.clone(),
                    sec_code: meta.ticker.clone(),
                    param: meta.param.clone(),
                    value,
                }
                .into(),
            ]
        }
        RequestKind::OrderBookSnapshot => match first_result(result).map(parse_book) {
            Some(Ok(book)) => vec![
                OrderBookUpdated {
                    class_code: meta.class_code.clone(),
                    sec_code: meta.ticker.clone(),
                    book,
                }
                .into(),
            ],
            Some(Err(e)) => {
                warn!("bad order book snapshot in answer {}: {e}", env.id);
                service(env, Some(meta))
            }
            None => service(env, Some(meta)),
        },
        RequestKind::DataSource => match first_result(result) {
            Some(handle) => vec![
                DataSourceSet {
                    handle: DataSourceHandle::new(handle.clone()),
                    meta,
                }
                .into(),
            ],
            None => service(env, Some(meta)),
        },
        _ => service(env, Some(meta)),
    }
}

fn service(env: &Envelope, meta: Option<Arc<RequestMeta>>) -> Vec<BridgeEvent> {
    vec![
        ServiceMessageArrived {
            message: env.clone(),
            meta,
        }
        .into(),
    ]
}

fn instrument_list(kind: InstrumentListKind, result: Option<&Value>) -> BridgeEvent {
    let strings: Vec<&str> = match result {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };

    let items = strings
        .into_iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    InstrumentClassesUpdated { kind, items }.into()
}

/// Первый элемент массива `result` или сам `result`, если это не массив
fn first_result(result: Option<&Value>) -> Option<&Value> {
    match result? {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_book(v: &Value) -> Result<OrderBook, serde_json::Error> {
    serde_json::from_value(v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quik_core::envelope::MessageKind;
    use quik_core::registry::MessageRegistry;
    use serde_json::json;

    fn envelope(raw: Value) -> Envelope {
        Envelope::from_value(raw).unwrap()
    }

    fn meta(kind: RequestKind, method: &str) -> Option<Arc<RequestMeta>> {
        Some(Arc::new(RequestMeta::new(kind, method)))
    }

    #[test]
    fn classes_answer_splits_comma_lists() {
        let registry = MessageRegistry::new();
        registry.register(42, RequestMeta::new(RequestKind::Classes, "getClassesList"));

        let env = envelope(json!({
            "id": 42, "type": "ans",
            "data": {"method": "invoke", "result": ["TQBR,SBER,GAZP"]}
        }));
        let events = route_answer(&env, registry.lookup(env.id));

        assert_eq!(
            events,
            vec![BridgeEvent::InstrumentClassesUpdated(InstrumentClassesUpdated {
                kind: InstrumentListKind::ClassCodes,
                items: vec!["TQBR".into(), "SBER".into(), "GAZP".into()],
            })]
        );
    }

    #[test]
    fn securities_answer_drops_empty_items_and_keeps_single_codes() {
        let env = envelope(json!({
            "id": 7, "type": "ans",
            "data": {"method": "invoke", "result": ["SiH5,RIH5,", "BRK5"]}
        }));
        let events = route_answer(&env, meta(RequestKind::Securities, "getClassSecurities"));
        match &events[..] {
            [BridgeEvent::InstrumentClassesUpdated(e)] => {
                assert_eq!(e.kind, InstrumentListKind::SecCodes);
                assert_eq!(e.items, vec!["SiH5", "RIH5", "BRK5"]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn unregistered_answer_is_service_message_without_meta() {
        let env = envelope(json!({"id": 999, "type": "ans", "data": {"result": [true]}}));
        let events = route_answer(&env, MessageRegistry::new().lookup(999));
        assert_eq!(
            events,
            vec![BridgeEvent::ServiceMessageArrived(ServiceMessageArrived {
                message: env.clone(),
                meta: None,
            })]
        );
    }

    #[test]
    fn get_param_answer_carries_request_context() {
        let m = RequestMeta::new(RequestKind::GetParam, "getParamEx2")
            .with_instrument("TQBR", "SBER")
            .with_param("LAST");
        let env = envelope(json!({
            "id": 3, "type": "ans",
            "data": {"result": [{"param_type": "1", "param_value": "301.150000", "result": "1"}]}
        }));

        let events = route_answer(&env, Some(Arc::new(m)));
        assert_eq!(
            events,
            vec![BridgeEvent::ParameterUpdated(ParameterUpdated {
                class_code: Some("TQBR".into()),
                sec_code: Some("SBER".into()),
                param: Some("LAST".into()),
                value: Some("301.150000".into()),
            })]
        );
    }

    #[test]
    fn security_info_emits_one_event_per_contract() {
        let env = envelope(json!({
            "id": 4, "type": "ans",
            "data": {"result": [{"code": "SiH5"}, {"code": "RIH5"}]}
        }));
        let events = route_answer(&env, meta(RequestKind::SecurityContract, "getSecurityInfo"));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, BridgeEvent::SecurityInfoArrived(_))));
    }

    #[test]
    fn order_book_snapshot_uses_first_result() {
        let m = RequestMeta::new(RequestKind::OrderBookSnapshot, "getQuoteLevel2")
            .with_instrument("SPBFUT", "SiH5");
        let env = envelope(json!({
            "id": 5, "type": "ans",
            "data": {"result": [{
                "bid": [{"price": "91000", "quantity": "3"}],
                "offer": [{"price": "91010", "quantity": "1"}],
                "bid_count": "1", "offer_count": "1"
            }]}
        }));

        match &route_answer(&env, Some(Arc::new(m)))[..] {
            [BridgeEvent::OrderBookUpdated(e)] => {
                assert_eq!(e.sec_code.as_deref(), Some("SiH5"));
                assert_eq!(e.book.best_offer().unwrap().price, "91010");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn data_source_answer_yields_handle() {
        let env = envelope(json!({"id": 6, "type": "ans", "data": {"result": ["ds_1"]}}));
        match &route_answer(&env, meta(RequestKind::DataSource, "CreateDataSource"))[..] {
            [BridgeEvent::DataSourceSet(e)] => assert_eq!(e.handle.key(), "ds_1"),
            other => panic!("unexpected events: {other:?}"),
        }

        let empty = envelope(json!({"id": 6, "type": "ans", "data": {"result": []}}));
        assert!(matches!(
            &route_answer(&empty, meta(RequestKind::DataSource, "CreateDataSource"))[..],
            [BridgeEvent::ServiceMessageArrived(_)]
        ));
    }

    #[test]
    fn other_kinds_fall_back_to_service_message() {
        let env = envelope(json!({"id": 8, "type": "ans", "data": {"result": [91000]}}));
        let m = meta(RequestKind::Transaction, "sendTransaction");
        match &route_answer(&env, m)[..] {
            [BridgeEvent::ServiceMessageArrived(e)] => {
                assert_eq!(e.meta.as_ref().unwrap().kind, RequestKind::Transaction);
                assert_eq!(e.message.kind, MessageKind::Ans);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn param_change_push() {
        let env = envelope(json!({
            "id": 11, "type": "req",
            "data": {"method": "paramChange", "class": "TQBR", "security": "SBER",
                     "param": "LAST", "value": 301.5}
        }));
        assert_eq!(
            route_push(&env, None),
            vec![BridgeEvent::ParameterUpdated(ParameterUpdated {
                class_code: Some("TQBR".into()),
                sec_code: Some("SBER".into()),
                param: Some("LAST".into()),
                value: Some("301.5".into()),
            })]
        );
    }

    #[test]
    fn quotes_change_push() {
        let env = envelope(json!({
            "id": 12, "type": "req",
            "data": {"method": "quotesChange", "class": "SPBFUT", "security": "SiH5",
                     "quotes": {"bid": [], "offer": [{"price": "1", "quantity": "2"}],
                                "bid_count": "0", "offer_count": "1"}}
        }));
        match &route_push(&env, None)[..] {
            [BridgeEvent::OrderBookUpdated(e)] => {
                assert_eq!(e.class_code.as_deref(), Some("SPBFUT"));
                assert!(e.book.bid.is_empty());
                assert_eq!(e.book.offer.len(), 1);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn all_trade_callback_yields_one_event_per_trade() {
        let env = envelope(json!({
            "id": 13, "type": "req",
            "data": {"method": "callback", "name": "OnAllTrade",
                     "arguments": [{"trade_num": 1}, {"trade_num": 2}, {"trade_num": 3}]}
        }));
        let events = route_push(&env, None);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            BridgeEvent::TradeArrived(TradeArrived {
                trade: json!({"trade_num": 3})
            })
        );
    }

    #[test]
    fn unknown_push_is_service_message() {
        let env = envelope(json!({
            "id": 14, "type": "req",
            "data": {"method": "callback", "name": "OnOrder", "arguments": [{}]}
        }));
        assert!(matches!(
            &route_push(&env, None)[..],
            [BridgeEvent::ServiceMessageArrived(ServiceMessageArrived { meta: None, .. })]
        ));

        let env = envelope(json!({"id": 15, "type": "req", "data": {"method": "quotesChange"}}));
        assert!(matches!(
            &route_push(&env, None)[..],
            [BridgeEvent::ServiceMessageArrived(_)]
        ));
    }
}
