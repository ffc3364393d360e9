use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use quik_core::instruments::Instrument;

use crate::generator::MarketUpdate;

/// Справочник инструментов и последние снимки рынка, общие для всех сессий
pub(crate) struct Market {
    instruments: BTreeSet<Instrument>,
    last: RwLock<HashMap<Instrument, Arc<MarketUpdate>>>,
}

impl Market {
    pub(crate) fn new(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            instruments: instruments.into_iter().collect(),
            last: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn contains(&self, instrument: &Instrument) -> bool {
        self.instruments.contains(instrument)
    }

    /// Коды классов без повторов
    pub(crate) fn classes(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .instruments
            .iter()
            .map(|i| i.class_code.as_str())
            .collect();
        set.into_iter().map(str::to_string).collect()
    }

    pub(crate) fn securities(&self, class_code: &str) -> Vec<String> {
        self.instruments
            .iter()
            .filter(|i| i.class_code.eq_ignore_ascii_case(class_code))
            .map(|i| i.sec_code.clone())
            .collect()
    }

    pub(crate) fn update(&self, u: Arc<MarketUpdate>) {
        let mut last = match self.last.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.insert(u.instrument.clone(), u);
    }

    pub(crate) fn snapshot(&self, instrument: &Instrument) -> Option<Arc<MarketUpdate>> {
        let last = match self.last.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.get(instrument).cloned()
    }
}
