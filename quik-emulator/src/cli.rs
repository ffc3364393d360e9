use clap::{ArgGroup, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config;

/// QUIK emulator - отвечает как JSON-мост терминала и рассылает
/// случайные изменения цен по подпискам клиентов.
#[derive(Parser, Debug, Clone)]
#[command(name = "quik-emulator", version, about)]
#[command(
    group(
        ArgGroup::new("instruments_source")
            .required(false)
            .multiple(false)
            .args(["instruments_file", "instruments"])
    )
)]
pub(crate) struct Args {
    /// Адрес моста, например 127.0.0.1:57777
    #[arg(long, default_value = config::BIND_ADDR)]
    pub(crate) bind: SocketAddr,

    /// Инструменты из файла: CLASS:SEC по одному в строке, поддержка # комментариев
    #[arg(long, conflicts_with = "instruments")]
    pub(crate) instruments_file: Option<PathBuf>,

    /// Инструменты строкой: "TQBR:SBER, SPBFUT:SiH5"
    #[arg(long, conflicts_with = "instruments_file")]
    pub(crate) instruments: Option<String>,

    /// Период изменения цен, мс
    #[arg(long, default_value_t = config::UPDATE_INTERVAL_MS,
          value_parser = clap::value_parser!(u64).range(10..))]
    pub(crate) interval_ms: u64,

    /// Глубина стакана с каждой стороны
    #[arg(long, default_value_t = config::BOOK_DEPTH,
          value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=50))]
    pub(crate) depth: usize,
}

impl Args {
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
