use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use quik_client::BridgeConfig;
use quik_core::instruments::{Instrument, parse_instruments_csv};

/// QUIK client - подключение к JSON-мосту терминала.
///
/// Запрашивает списки классов, подписывается на стаканы и параметры
/// по указанным инструментам и печатает события в лог.
#[derive(Parser, Debug, Clone)]
#[command(name = "quik-client", version, about)]
pub(crate) struct Args {
    /// JSON-файл настроек; флаги ниже перекрывают его значения
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Хост терминала
    #[arg(long)]
    pub(crate) host: Option<String>,

    /// Порт JSON-моста
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=65535))]
    pub(crate) port: Option<u16>,

    /// Номер участника в идентификаторах сообщений (0..400)
    #[arg(long)]
    pub(crate) participant: Option<u32>,

    /// Инструменты строкой, например: "TQBR:SBER,SPBFUT:SiH5"
    #[arg(long)]
    pub(crate) instruments: Option<String>,

    /// Подписаться на изменения параметра (например LAST) по каждому инструменту
    #[arg(long)]
    pub(crate) param: Option<String>,

    /// Подписаться на стаканы по каждому инструменту
    #[arg(long)]
    pub(crate) order_book: bool,

    /// Запросить список классов
    #[arg(long)]
    pub(crate) classes: bool,
}

impl Args {
    /// Валидация сочетания флагов
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(path) = &self.config {
            let md = std::fs::metadata(path)
                .with_context(|| format!("config file not found: {path:?}"))?;
            if !md.is_file() {
                bail!("--config must point to a file: {path:?}");
            }
        }
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                bail!("--host is empty");
            }
        }
        if let Some(param) = &self.param {
            if param.trim().is_empty() {
                bail!("--param is empty");
            }
        }
        if (self.order_book || self.param.is_some()) && self.instruments.is_none() {
            bail!("--order-book and --param need --instruments");
        }
        if !self.classes && !self.order_book && self.param.is_none() {
            bail!("nothing to do: pass --classes, --order-book or --param");
        }
        Ok(())
    }

    /// Настройки: файл (если задан), затем флаги
    pub(crate) fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut cfg = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        if let Some(host) = &self.host {
            cfg.host = host.trim().to_string();
        }
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(participant) = self.participant {
            cfg.participant_id = participant;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn instrument_list(&self) -> Result<Vec<Instrument>> {
        match &self.instruments {
            Some(raw) => {
                let list = parse_instruments_csv(raw)?;
                if list.is_empty() {
                    bail!("--instruments is empty");
                }
                Ok(list)
            }
            None => Ok(Vec::new()),
        }
    }
}
