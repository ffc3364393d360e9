use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use quik_core::error::InstrumentError;
use quik_core::instruments::{self, Instrument};

const DEFAULT_INSTRUMENTS: &str = include_str!("../assets/instruments.txt");

/// Версия протокола, которую эмулятор объявляет в `ver`
pub(crate) const PROTOCOL_VERSION: i64 = 1;

/// Тик сокета сессии: как часто проверяем очередь обновлений и shutdown
pub(crate) const SOCKET_TICK: Duration = Duration::from_millis(20);

pub(crate) const UPDATE_INTERVAL_MS: u64 = 500;
pub(crate) const BOOK_DEPTH: usize = 5;

pub(crate) const BIND_ADDR: &str = "127.0.0.1:57777";

/// Инструменты: из файла, из строки или встроенный список
pub(crate) fn load_instruments(
    path: Option<&Path>,
    inline: Option<&str>,
) -> Result<Vec<Instrument>, InstrumentError> {
    match (path, inline) {
        (Some(p), _) => instruments::read_instruments_from_path(p),
        (None, Some(raw)) => instruments::parse_instruments_csv(raw),
        (None, None) => instruments::read_instruments(Cursor::new(DEFAULT_INSTRUMENTS)),
    }
}

pub(crate) type ConnId = u64;
