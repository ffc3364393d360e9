//! Ответы терминала на запросы клиента и подписки одной сессии.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use serde_json::{Value, json};

use quik_core::envelope::{Envelope, MessageKind};
use quik_core::ids::MessageId;
use quik_core::instruments::Instrument;
use quik_core::request::{Method, RequestData};

use crate::generator::MarketUpdate;
use crate::market::Market;

/// Что сессия должна сделать после входящего кадра
#[derive(Debug, PartialEq)]
pub(crate) enum Reply {
    Answer(Envelope),
    Silent,
    End,
}

/// Состояние терминала в рамках одного соединения
pub(crate) struct Terminal {
    market: Arc<Market>,
    quotes: HashSet<Instrument>,
    params: HashMap<Instrument, BTreeSet<String>>,
    data_sources: u64,
    push_id: MessageId,
}

impl Terminal {
    pub(crate) fn new(market: Arc<Market>) -> Self {
        Self {
            market,
            quotes: HashSet::new(),
            params: HashMap::new(),
            data_sources: 0,
            push_id: 0,
        }
    }

    pub(crate) fn handle(&mut self, env: &Envelope) -> Reply {
        match env.kind {
            MessageKind::End => Reply::End,
            // подтверждения наших push-запросов и версия клиента
            MessageKind::Ans | MessageKind::Ver => Reply::Silent,
            MessageKind::Req => Reply::Answer(self.request(env)),
        }
    }

    fn request(&mut self, env: &Envelope) -> Envelope {
        let req = match env.data.clone().map(serde_json::from_value::<RequestData>) {
            Some(Ok(req)) => req,
            Some(Err(e)) => {
                debug!("unsupported request {}: {e}", env.id);
                return Envelope::ack(env.id);
            }
            None => return Envelope::ack(env.id),
        };

        let result = match req.method {
            Method::Invoke => self.invoke(&req),
            Method::SubscribeQuotes => {
                if let Some(i) = instrument_of(&req) {
                    self.quotes.insert(i);
                }
                json!(true)
            }
            Method::UnsubscribeQuotes => {
                if let Some(i) = instrument_of(&req) {
                    self.quotes.remove(&i);
                }
                json!(true)
            }
            Method::SubscribeParamChanges => {
                if let (Some(i), Some(p)) = (instrument_of(&req), req.param.as_deref()) {
                    self.params.entry(i).or_default().insert(p.to_ascii_uppercase());
                }
                json!(true)
            }
            Method::UnsubscribeParamChanges => {
                if let (Some(i), Some(p)) = (instrument_of(&req), req.param.as_deref()) {
                    if let Some(set) = self.params.get_mut(&i) {
                        set.remove(&p.to_ascii_uppercase());
                        if set.is_empty() {
                            self.params.remove(&i);
                        }
                    }
                }
                json!(true)
            }
            Method::Register => json!(true),
        };

        debug!("answer {} to {}", env.id, req.display_method());
        Envelope::answer(env.id, json!({"method": "return", "result": result}))
    }

    fn invoke(&mut self, req: &RequestData) -> Value {
        let args = req.arguments.as_deref().unwrap_or(&[]);
        let arg = |n: usize| args.get(n).and_then(Value::as_str).unwrap_or("");
        let instrument = || Instrument::new(arg(0), arg(1));

        match req.function.as_deref().unwrap_or("") {
            "getClassesList" => json!([comma_list(self.market.classes())]),
            "getClassSecurities" => json!([comma_list(self.market.securities(arg(0)))]),
            "getSecurityInfo" => {
                let i = instrument();
                if !self.market.contains(&i) {
                    return json!([]);
                }
                json!([{
                    "class_code": i.class_code,
                    "code": i.sec_code,
                    "name": i.sec_code,
                    "short_name": i.sec_code,
                    "lot_size": 1,
                    "min_price_step": 0.01,
                    "scale": 2
                }])
            }
            "getParamEx2" => {
                let value = self
                    .market
                    .snapshot(&instrument())
                    .and_then(|u| u.param(arg(2)));
                json!([param_entry(value)])
            }
            "getQuoteLevel2" => match self.market.snapshot(&instrument()) {
                Some(u) => json!([u.book]),
                None => json!([{"bid_count": "0", "offer_count": "0"}]),
            },
            "CreateDataSource" => {
                if !self.market.contains(&instrument()) {
                    return json!([]);
                }
                self.data_sources += 1;
                json!([format!("ds_{}", self.data_sources)])
            }
            _ => json!(true),
        }
    }

    /// Инструменты, по которым у сессии есть хоть одна подписка
    pub(crate) fn watched(&self) -> HashSet<Instrument> {
        self.quotes
            .iter()
            .chain(self.params.keys())
            .cloned()
            .collect()
    }

    /// Push-запросы по обновлению, только для подписок этой сессии
    pub(crate) fn pushes(&mut self, u: &MarketUpdate) -> Vec<Envelope> {
        let i = &u.instrument;
        let mut data = Vec::new();

        if let Some(params) = self.params.get(i) {
            for p in params {
                if let Some(value) = u.param(p) {
                    data.push(json!({
                        "method": "paramChange",
                        "class": i.class_code,
                        "security": i.sec_code,
                        "param": p,
                        "value": value
                    }));
                }
            }
        }
        if self.quotes.contains(i) {
            data.push(json!({
                "method": "quotesChange",
                "class": i.class_code,
                "security": i.sec_code,
                "quotes": u.book
            }));
        }

        data.into_iter()
            .map(|d| {
                self.push_id += 1;
                Envelope {
                    id: self.push_id,
                    kind: MessageKind::Req,
                    data: Some(d),
                }
            })
            .collect()
    }
}

fn instrument_of(req: &RequestData) -> Option<Instrument> {
    match (req.class_code.as_deref(), req.sec_code.as_deref()) {
        (Some(c), Some(s)) if !c.is_empty() && !s.is_empty() => Some(Instrument::new(c, s)),
        _ => None,
    }
}

// терминал отдаёт списки строкой с завершающей запятой
fn comma_list(items: Vec<String>) -> String {
    items.into_iter().map(|s| s + ",").collect()
}

fn param_entry(value: Option<String>) -> Value {
    match value {
        Some(v) => json!({"param_type": "1", "param_value": v, "param_image": v, "result": "1"}),
        None => json!({"param_type": "0", "param_value": "", "param_image": "", "result": "0"}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quik_core::events::{Level, OrderBook};

    fn sber() -> Instrument {
        Instrument::new("TQBR", "SBER")
    }

    fn update(last: i64) -> MarketUpdate {
        MarketUpdate {
            instrument: sber(),
            last,
            book: OrderBook {
                bid: vec![Level { price: "301.14".into(), quantity: "7".into() }],
                offer: vec![Level { price: "301.16".into(), quantity: "3".into() }],
                bid_count: "1".into(),
                offer_count: "1".into(),
            },
        }
    }

    fn terminal() -> Terminal {
        let market = Market::new([sber(), Instrument::new("SPBFUT", "SiH5")]);
        market.update(Arc::new(update(30_115)));
        Terminal::new(Arc::new(market))
    }

    fn ask(t: &mut Terminal, id: MessageId, data: RequestData) -> Value {
        let env = Envelope::request(id, &data).unwrap();
        match t.handle(&env) {
            Reply::Answer(ans) => {
                assert_eq!(ans.id, id);
                assert_eq!(ans.kind, MessageKind::Ans);
                ans.data_field("result").cloned().unwrap()
            }
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[test]
    fn lists_classes_and_securities() {
        let mut t = terminal();
        assert_eq!(
            ask(&mut t, 1, RequestData::invoke("getClassesList")),
            json!(["SPBFUT,TQBR,"])
        );
        assert_eq!(
            ask(&mut t, 2, RequestData::invoke("getClassSecurities").with_args(["TQBR"])),
            json!(["SBER,"])
        );
        assert_eq!(
            ask(&mut t, 3, RequestData::invoke("getClassSecurities").with_args(["CETS"])),
            json!([""])
        );
    }

    #[test]
    fn security_info_only_for_known_instruments() {
        let mut t = terminal();
        let info = ask(&mut t, 1, RequestData::invoke("getSecurityInfo").with_args(["TQBR", "SBER"]));
        assert_eq!(info[0]["code"], "SBER");

        let none = ask(&mut t, 2, RequestData::invoke("getSecurityInfo").with_args(["TQBR", "AFLT"]));
        assert_eq!(none, json!([]));
    }

    #[test]
    fn param_and_book_come_from_market() {
        let mut t = terminal();
        let p = ask(&mut t, 1, RequestData::invoke("getParamEx2").with_args(["TQBR", "SBER", "LAST"]));
        assert_eq!(p[0]["param_value"], "301.15");

        let p = ask(&mut t, 2, RequestData::invoke("getParamEx2").with_args(["TQBR", "SBER", "VOLTODAY"]));
        assert_eq!(p[0]["result"], "0");

        let book = ask(&mut t, 3, RequestData::invoke("getQuoteLevel2").with_args(["TQBR", "SBER"]));
        assert_eq!(book[0]["offer"][0]["price"], "301.16");

        // по SiH5 ещё не было тиков
        let empty = ask(&mut t, 4, RequestData::invoke("getQuoteLevel2").with_args(["SPBFUT", "SiH5"]));
        assert_eq!(empty[0]["bid_count"], "0");
    }

    #[test]
    fn data_sources_get_distinct_handles() {
        let mut t = terminal();
        let create = || RequestData::invoke("CreateDataSource").with_args(["TQBR", "SBER", "1"]);
        assert_eq!(ask(&mut t, 1, create()), json!(["ds_1"]));
        assert_eq!(ask(&mut t, 2, create()), json!(["ds_2"]));

        let unknown = RequestData::invoke("CreateDataSource").with_args(["TQBR", "AFLT", "1"]);
        assert_eq!(ask(&mut t, 3, unknown), json!([]));
    }

    #[test]
    fn unknown_calls_are_acknowledged() {
        let mut t = terminal();
        assert_eq!(ask(&mut t, 1, RequestData::invoke("sendTransaction")), json!(true));
        assert_eq!(ask(&mut t, 2, RequestData::register("OnAllTrade")), json!(true));

        let odd = Envelope {
            id: 3,
            kind: MessageKind::Req,
            data: Some(json!({"method": "teleport"})),
        };
        assert_eq!(t.handle(&odd), Reply::Answer(Envelope::ack(3)));
    }

    #[test]
    fn pushes_follow_subscriptions() {
        let mut t = terminal();
        assert!(t.pushes(&update(30_115)).is_empty());

        ask(&mut t, 1, RequestData::param_changes(true, "TQBR", "SBER", "last"));
        ask(&mut t, 2, RequestData::param_changes(true, "TQBR", "SBER", "NOSUCH"));
        ask(&mut t, 3, RequestData::quotes(true, "TQBR", "SBER"));

        let pushes = t.pushes(&update(30_120));
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].data_str("method"), Some("paramChange"));
        assert_eq!(pushes[0].data_str("param"), Some("LAST"));
        assert_eq!(pushes[0].data_str("value"), Some("301.20"));
        assert_eq!(pushes[1].data_str("method"), Some("quotesChange"));
        assert_eq!(pushes[1].data_field("quotes").unwrap()["bid"][0]["quantity"], "7");
        assert!(pushes[0].id < pushes[1].id);

        ask(&mut t, 4, RequestData::quotes(false, "TQBR", "SBER"));
        ask(&mut t, 5, RequestData::param_changes(false, "TQBR", "SBER", "LAST"));
        assert!(t.pushes(&update(30_125)).is_empty());

        // NOSUCH ещё держит инструмент под наблюдением
        assert_eq!(t.watched(), HashSet::from([sber()]));
        ask(&mut t, 6, RequestData::param_changes(false, "TQBR", "SBER", "nosuch"));
        assert!(t.watched().is_empty());
    }

    #[test]
    fn end_and_service_frames() {
        let mut t = terminal();
        assert_eq!(t.handle(&Envelope::end()), Reply::End);
        assert_eq!(t.handle(&Envelope::version(1)), Reply::Silent);
        assert_eq!(t.handle(&Envelope::ack(9)), Reply::Silent);
    }
}
