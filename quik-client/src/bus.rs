//! Шина событий: по одной очереди на вид события.
//!
//! `publish` только кладёт событие в неограниченную очередь и сразу
//! возвращается, поэтому читающий поток сессии никогда не ждёт обработчиков.
//! Каждую очередь разбирает свой поток `bus-<вид>`: события идут строго в
//! порядке публикации, а все обработчики одного события выполняются
//! параллельно, и следующее событие берётся только после того, как
//! закончили все. Первый обработчик работает в потоке очереди, остальные в
//! постоянных потоках-помощниках `bus-<вид>-<n>`, которых столько, сколько
//! обработчиков сверх первого. Ошибки и паники обработчиков логируются и
//! дальше не идут.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{trace, warn};

use quik_core::BridgeEvent;
use quik_core::events::{
    ConnectionClosed, ConnectionStateChanged, DataSourceSet, InstrumentClassesUpdated,
    OrderBookUpdated, ParameterUpdated, SecurityInfoArrived, ServiceMessageArrived, TradeArrived,
};

/// Обработчик события
pub type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

mod sealed {
    pub trait Sealed {}
}

/// Вид события, у которого есть своя очередь в [`EventBus`]
pub trait BusEvent: sealed::Sealed + Sized + Send + Sync + 'static {
    /// Очередь этого вида в шине
    fn lane(bus: &EventBus) -> &Lane<Self>;
}

/// Очередь одного вида событий со своими обработчиками
pub struct Lane<E> {
    name: &'static str,
    tx: Mutex<Option<Sender<E>>>,
    rx: Receiver<E>,
    handlers: Arc<RwLock<Vec<Handler<E>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + Sync + 'static> Lane<E> {
    fn new(name: &'static str) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            name,
            tx: Mutex::new(Some(tx)),
            rx,
            handlers: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(None),
        }
    }

    fn publish(&self, ev: E) {
        let tx = match self.tx.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = tx.as_ref() else {
            trace!("bus-{}: closed, event dropped", self.name);
            return;
        };
        // неограниченный канал: send не ждёт, ошибка только если нет получателя
        if tx.send(ev).is_err() {
            trace!("bus-{}: no receiver, event dropped", self.name);
            return;
        }
        self.ensure_worker();
    }

    fn subscribe(&self, handler: Handler<E>) {
        {
            let mut handlers = match self.handlers.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers.push(handler);
        }
        self.ensure_worker();
    }

    fn handler_count(&self) -> usize {
        match self.handlers.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn ensure_worker(&self) {
        let mut worker = match self.worker.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.is_some() {
            return;
        }

        let name = self.name;
        let rx = self.rx.clone();
        let handlers = self.handlers.clone();
        match thread::Builder::new()
            .name(format!("bus-{name}"))
            .spawn(move || run_lane(name, rx, handlers))
        {
            Ok(h) => *worker = Some(h),
            Err(e) => warn!("bus-{name}: failed to start dispatch thread: {e}"),
        }
    }

    fn close(&self) {
        {
            let mut tx = match self.tx.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            // после drop отправителя цикл разберёт остаток очереди и выйдет
            tx.take();
        }

        let worker = match self.worker.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(h) = worker {
            if h.join().is_err() {
                warn!("bus-{}: dispatch thread panicked", self.name);
            }
        }
    }
}

type Outcome = thread::Result<anyhow::Result<()>>;

struct Job<E> {
    ev: Arc<E>,
    handler: Handler<E>,
    idx: usize,
    done: Sender<(usize, Outcome)>,
}

/// Потоки-помощники одной очереди. Живут, пока жив цикл очереди.
struct Helpers<E> {
    name: &'static str,
    jobs: Vec<Sender<Job<E>>>,
    threads: Vec<JoinHandle<()>>,
}

impl<E: Send + Sync + 'static> Helpers<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            jobs: Vec::new(),
            threads: Vec::new(),
        }
    }

    // добирает помощников до `n`; если поток не стартовал, работаем с теми, что есть
    fn grow(&mut self, n: usize) {
        while self.jobs.len() < n {
            let (tx, rx) = crossbeam_channel::unbounded::<Job<E>>();
            let idx = self.jobs.len();
            let spawned = thread::Builder::new()
                .name(format!("bus-{}-{idx}", self.name))
                .spawn(move || {
                    for job in rx.iter() {
                        let res = panic::catch_unwind(AssertUnwindSafe(|| (job.handler)(&*job.ev)));
                        let _ = job.done.send((job.idx, res));
                    }
                });
            match spawned {
                Ok(h) => {
                    self.jobs.push(tx);
                    self.threads.push(h);
                }
                Err(e) => {
                    warn!("bus-{}: failed to start helper thread: {e}", self.name);
                    return;
                }
            }
        }
    }

    fn stop(self) {
        drop(self.jobs);
        for h in self.threads {
            if h.join().is_err() {
                warn!("bus-{}: helper thread panicked", self.name);
            }
        }
    }
}

fn run_lane<E: Send + Sync + 'static>(
    name: &'static str,
    rx: Receiver<E>,
    handlers: Arc<RwLock<Vec<Handler<E>>>>,
) {
    trace!("bus-{name}: dispatch loop started");
    let mut helpers = Helpers::new(name);
    for ev in rx.iter() {
        let snapshot: Vec<Handler<E>> = match handlers.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        deliver(name, &mut helpers, &snapshot, Arc::new(ev));
    }
    helpers.stop();
    trace!("bus-{name}: dispatch loop stopped");
}

fn deliver<E: Send + Sync + 'static>(
    name: &str,
    helpers: &mut Helpers<E>,
    handlers: &[Handler<E>],
    ev: Arc<E>,
) {
    let (first, rest) = match handlers {
        [] => {
            trace!("bus-{name}: no handlers, event dropped");
            return;
        }
        [first, rest @ ..] => (first, rest),
    };

    helpers.grow(rest.len());
    let (done_tx, done_rx) = crossbeam_channel::unbounded();
    let mut pending = 0;
    let mut inline = vec![(0, first)];

    for (i, h) in rest.iter().enumerate() {
        let job = Job {
            ev: ev.clone(),
            handler: h.clone(),
            idx: i + 1,
            done: done_tx.clone(),
        };
        match helpers.jobs.get(i).map(|tx| tx.send(job)) {
            Some(Ok(())) => pending += 1,
            _ => inline.push((i + 1, h)),
        }
    }
    drop(done_tx);

    for (idx, h) in inline {
        let res = panic::catch_unwind(AssertUnwindSafe(|| h(&*ev)));
        report(name, idx, res);
    }
    for _ in 0..pending {
        match done_rx.recv() {
            Ok((idx, res)) => report(name, idx, res),
            Err(_) => break,
        }
    }
}

fn report<P>(name: &str, idx: usize, res: Result<anyhow::Result<()>, P>) {
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("bus-{name}: handler #{idx} failed: {e:#}"),
        Err(_) => warn!("bus-{name}: handler #{idx} panicked"),
    }
}

/// Шина событий моста
pub struct EventBus {
    classes: Lane<InstrumentClassesUpdated>,
    params: Lane<ParameterUpdated>,
    order_books: Lane<OrderBookUpdated>,
    trades: Lane<TradeArrived>,
    security_info: Lane<SecurityInfoArrived>,
    service: Lane<ServiceMessageArrived>,
    data_sources: Lane<DataSourceSet>,
    connection: Lane<ConnectionStateChanged>,
    closed: Lane<ConnectionClosed>,
}

macro_rules! bus_events {
    ($($ty:ident => $field:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl BusEvent for $ty {
                fn lane(bus: &EventBus) -> &Lane<Self> {
                    &bus.$field
                }
            }
        )*
    };
}

bus_events!(
    InstrumentClassesUpdated => classes,
    ParameterUpdated => params,
    OrderBookUpdated => order_books,
    TradeArrived => trades,
    SecurityInfoArrived => security_info,
    ServiceMessageArrived => service,
    DataSourceSet => data_sources,
    ConnectionStateChanged => connection,
    ConnectionClosed => closed,
);

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Шина без обработчиков; потоки стартуют при первом использовании очереди
    pub fn new() -> Self {
        Self {
            classes: Lane::new("instrument-classes"),
            params: Lane::new("parameters"),
            order_books: Lane::new("order-books"),
            trades: Lane::new("trades"),
            security_info: Lane::new("security-info"),
            service: Lane::new("service"),
            data_sources: Lane::new("data-sources"),
            connection: Lane::new("connection-state"),
            closed: Lane::new("connection-closed"),
        }
    }

    /// Публикует событие в очередь его вида
    pub fn publish(&self, ev: BridgeEvent) {
        match ev {
            BridgeEvent::InstrumentClassesUpdated(e) => self.emit(e),
            BridgeEvent::ParameterUpdated(e) => self.emit(e),
            BridgeEvent::OrderBookUpdated(e) => self.emit(e),
            BridgeEvent::TradeArrived(e) => self.emit(e),
            BridgeEvent::SecurityInfoArrived(e) => self.emit(e),
            BridgeEvent::ServiceMessageArrived(e) => self.emit(e),
            BridgeEvent::DataSourceSet(e) => self.emit(e),
            BridgeEvent::ConnectionStateChanged(e) => self.emit(e),
            BridgeEvent::ConnectionClosed(e) => self.emit(e),
        }
    }

    /// Публикация типизированного события
    pub fn emit<E: BusEvent>(&self, ev: E) {
        E::lane(self).publish(ev);
    }

    /// Регистрирует обработчик событий вида `E`
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: BusEvent,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        E::lane(self).subscribe(Arc::new(handler));
    }

    /// Сколько обработчиков зарегистрировано для вида `E`
    pub fn handler_count<E: BusEvent>(&self) -> usize {
        E::lane(self).handler_count()
    }

    /// Перестаёт принимать события, дожидается разбора очередей и останавливает потоки.
    /// Повторный вызов ничего не делает. Из обработчика событий вызывать нельзя:
    /// поток очереди будет ждать сам себя.
    pub fn close(&self) {
        self.classes.close();
        self.params.close();
        self.order_books.close();
        self.trades.close();
        self.security_info.close();
        self.service.close();
        self.data_sources.close();
        self.connection.close();
        self.closed.close();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.close();
    }
}
