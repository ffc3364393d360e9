use std::collections::HashMap;

use quik_core::events::{Level, OrderBook};
use quik_core::instruments::Instrument;
use rand::Rng;

use crate::config::BOOK_DEPTH;

#[derive(Debug, Clone)]
pub(crate) struct GeneratorConfig {
    /// Максимальный относительный шаг цены за тик (пример: 0.002 = 0.2%)
    pub(crate) max_rel_step: f64,
    /// Минимальная допустимая цена, в сотых
    pub(crate) min_price: i64,
    /// Уровней стакана с каждой стороны
    pub(crate) depth: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_rel_step: 0.002,
            min_price: 1,
            depth: BOOK_DEPTH,
        }
    }
}

/// Снимок рынка по одному инструменту после очередного тика
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MarketUpdate {
    pub(crate) instrument: Instrument,
    /// Цена последней сделки, в сотых
    pub(crate) last: i64,
    pub(crate) book: OrderBook,
}

impl MarketUpdate {
    /// Значение параметра в том виде, в каком его отдаёт `getParamEx2`
    pub(crate) fn param(&self, name: &str) -> Option<String> {
        match name.to_ascii_uppercase().as_str() {
            "LAST" => Some(format_price(self.last)),
            "BID" => self.book.best_bid().map(|l| l.price.clone()),
            "OFFER" => self.book.best_offer().map(|l| l.price.clone()),
            _ => None,
        }
    }
}

/// Цена в сотых -> строка терминала с двумя знаками
pub(crate) fn format_price(price: i64) -> String {
    format!("{}.{:02}", price / 100, price % 100)
}

pub(crate) struct MarketGenerator {
    cfg: GeneratorConfig,
    /// последняя цена по инструменту
    prices: HashMap<Instrument, i64>,
}

impl MarketGenerator {
    pub(crate) fn new(instruments: Vec<Instrument>, cfg: GeneratorConfig) -> Self {
        let mut rng = rand::rng();

        let prices = instruments
            .into_iter()
            .map(|i| (i, rng.random_range(100_00..5_000_00)))
            .collect::<HashMap<_, _>>();

        Self { cfg, prices }
    }

    /// следующий тик по одному инструменту
    pub(crate) fn next_update(&mut self, instrument: &Instrument) -> Option<MarketUpdate> {
        let price = self.prices.get_mut(instrument)?;

        let mut rng = rand::rng();
        let delta = rng.random_range(-self.cfg.max_rel_step..self.cfg.max_rel_step);
        *price = (((1.0 + delta) * (*price as f64)).round() as i64).max(self.cfg.min_price);
        let last = *price;

        Some(MarketUpdate {
            instrument: instrument.clone(),
            last,
            book: self.book_around(last, &mut rng),
        })
    }

    /// тик по всем инструментам
    pub(crate) fn next_batch(&mut self) -> Vec<MarketUpdate> {
        let mut keys: Vec<Instrument> = self.prices.keys().cloned().collect();
        keys.sort();

        keys.iter().filter_map(|i| self.next_update(i)).collect()
    }

    // bid растёт к лучшей цене, offer начинается с лучшей
    fn book_around(&self, last: i64, rng: &mut impl Rng) -> OrderBook {
        let depth = self.cfg.depth as i64;
        let mut level = |price: i64| Level {
            price: format_price(price),
            quantity: rng.random_range(1..500).to_string(),
        };

        let bid: Vec<Level> = (1..=depth)
            .rev()
            .map(|k| last - k)
            .filter(|&p| p >= self.cfg.min_price)
            .map(&mut level)
            .collect();
        let offer: Vec<Level> = (1..=depth).map(|k| last + k).map(&mut level).collect();

        OrderBook {
            bid_count: bid.len().to_string(),
            offer_count: offer.len().to_string(),
            bid,
            offer,
        }
    }
}
