//! Точка входа `quik-client`.
//!
//! Жизненный цикл:
//! - парсинг CLI, загрузка настроек и списка инструментов
//! - подключение к терминалу и логирование событий шины
//! - запросы и подписки по флагам
//! - по `Ctrl+C` или разрыву: отписки, `end`, остановка шины

mod cli;

use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};
use std::thread;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use log::{info, warn};

use quik_client::QuikBridge;
use quik_core::events::{
    ConnectionClosed, ConnectionState, ConnectionStateChanged, InstrumentClassesUpdated,
    OrderBookUpdated, ParameterUpdated, ServiceMessageArrived,
};
use quik_core::subscriptions::SubscriptionHandle;

const TICK: Duration = Duration::from_millis(200);
const END_WAIT: Duration = Duration::from_secs(2);

enum Subscription {
    OrderBook(String, String, SubscriptionHandle),
    Param(String, String, String, SubscriptionHandle),
}

fn main() -> anyhow::Result<()> {
    // Логи через RUST_LOG=info/debug/trace
    env_logger::init();

    let shutdown = Arc::new(AtomicBool::new(false));

    // Ctrl+C => ставим shutdown=true
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            info!("shutting down...");
        })?;
    }

    let args = cli::Args::parse();
    args.validate()?;
    let cfg = args.bridge_config()?;
    let instruments = args.instrument_list()?;

    info!(
        "Starting quik-client: terminal={}:{}, participant={}, instruments={}",
        cfg.host,
        cfg.port,
        cfg.participant_id,
        instruments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );

    let bridge = QuikBridge::new(cfg)?;
    log_events(&bridge);

    if !bridge.connect(shutdown.clone()) {
        bail!(
            "failed to connect to {}:{}",
            bridge.config().host,
            bridge.config().port
        );
    }

    if args.classes {
        bridge.get_classes_list()?;
    }

    let mut subs = Vec::new();
    for i in &instruments {
        if args.order_book {
            let h = bridge.subscribe_order_book(&i.class_code, &i.sec_code)?;
            subs.push(Subscription::OrderBook(i.class_code.clone(), i.sec_code.clone(), h));
        }
        if let Some(param) = &args.param {
            let h = bridge.subscribe_param(&i.class_code, &i.sec_code, param)?;
            subs.push(Subscription::Param(
                i.class_code.clone(),
                i.sec_code.clone(),
                param.clone(),
                h,
            ));
        }
    }

    while !shutdown.load(Ordering::Relaxed) && bridge.state() == ConnectionState::Connected {
        thread::sleep(TICK);
    }

    if bridge.state() == ConnectionState::Connected {
        for s in subs {
            let res = match &s {
                Subscription::OrderBook(class, sec, h) => bridge.unsubscribe_order_book(class, sec, *h),
                Subscription::Param(class, sec, param, h) => {
                    bridge.unsubscribe_param(class, sec, param, *h)
                }
            };
            if let Err(e) = res {
                warn!("unsubscribe failed: {e}");
            }
        }

        bridge.finish(false);
        if !bridge.wait_closed(END_WAIT) {
            warn!("terminal did not answer end in {END_WAIT:?}, closing");
            bridge.finish(true);
        }
    }

    bridge.events().close();
    Ok(())
}

fn log_events(bridge: &QuikBridge) {
    bridge.on(|e: &ConnectionStateChanged| {
        info!("connection {}", e.state);
        Ok(())
    });
    bridge.on(|_: &ConnectionClosed| {
        info!("terminal closed the session");
        Ok(())
    });
    bridge.on(|e: &InstrumentClassesUpdated| {
        info!("{:?}: {}", e.kind, e.items.join(","));
        Ok(())
    });
    bridge.on(|e: &ParameterUpdated| {
        info!(
            "{}:{} {} = {}",
            e.class_code.as_deref().unwrap_or("?"),
            e.sec_code.as_deref().unwrap_or("?"),
            e.param.as_deref().unwrap_or("?"),
            e.value.as_deref().unwrap_or("-")
        );
        Ok(())
    });
    bridge.on(|e: &OrderBookUpdated| {
        let best = |l: Option<&quik_core::events::Level>| {
            l.map_or_else(|| "-".to_string(), |l| format!("{}x{}", l.price, l.quantity))
        };
        info!(
            "{}:{} bid {} / offer {} (levels {}/{})",
            e.class_code.as_deref().unwrap_or("?"),
            e.sec_code.as_deref().unwrap_or("?"),
            best(e.book.best_bid()),
            best(e.book.best_offer()),
            e.book.bid_count,
            e.book.offer_count
        );
        Ok(())
    });
    bridge.on(|e: &ServiceMessageArrived| {
        let method = e.meta.as_ref().map_or("-", |m| m.method.as_str());
        info!("service message {} ({method}): {:?}", e.message.id, e.message.data);
        Ok(())
    });
}
