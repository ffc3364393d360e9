//! Сессия с терминалом: владеет сокетом, кормит декодер, сопоставляет ответы
//! и публикует события.
//!
//! Жизненный цикл:
//! - `start` подключается и запускает читающий поток `quik-reader`
//! - читающий поток только разбирает кадры и публикует события, обработчики
//!   выполняются в потоках шины
//! - `finish` шлёт `end`; сокет закрывается, когда `end` отправили обе стороны
//!   (или сразу при `force`)
//! - флаг остановки проверяется раз в `read_tick`

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use quik_core::codec::FrameDecoder;
use quik_core::envelope::{Envelope, MessageKind};
use quik_core::events::{ConnectionClosed, ConnectionState, ConnectionStateChanged};
use quik_core::registry::MessageRegistry;
use quik_core::DEFAULT_MAX_FRAME_BYTES;

use crate::bus::EventBus;
use crate::config::{BridgeConfig, DEFAULT_READ_TICK_MS};
use crate::datasource::DataSourceRouter;
use crate::error::SessionError;
use crate::routing::{route_answer, route_push};

const READ_BUF_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT_STEP: Duration = Duration::from_millis(10);

/// Параметры сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Лимит незавершённого документа в декодере
    pub max_frame_bytes: usize,
    /// Таймаут чтения сокета
    pub read_tick: Duration,
    /// Таймаут подключения
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            read_tick: Duration::from_millis(DEFAULT_READ_TICK_MS),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl From<&BridgeConfig> for SessionOptions {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            max_frame_bytes: cfg.max_frame_bytes,
            read_tick: cfg.read_tick(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Shared {
    registry: Arc<MessageRegistry>,
    bus: Arc<EventBus>,
    data_sources: Arc<DataSourceRouter>,
    // мьютекс отправки: кадры разных потоков не перемешиваются
    writer: Mutex<Option<TcpStream>>,
    state: Mutex<ConnectionState>,
    we_ended: AtomicBool,
    peer_ended: AtomicBool,
    closing: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut cur = lock(&self.state);
        if *cur == state {
            return;
        }
        info!("connection state: {} -> {state}", *cur);
        *cur = state;
        // публикуем под замком, чтобы порядок событий совпадал с порядком переходов
        self.bus.emit(ConnectionStateChanged { state });
    }

    /// Disconnected -> Pending одним шагом; иначе возвращает текущее состояние
    fn begin_connect(&self) -> Result<(), ConnectionState> {
        let mut cur = lock(&self.state);
        if *cur != ConnectionState::Disconnected {
            return Err(*cur);
        }
        info!("connection state: {} -> {}", *cur, ConnectionState::Pending);
        *cur = ConnectionState::Pending;
        self.bus.emit(ConnectionStateChanged {
            state: ConnectionState::Pending,
        });
        Ok(())
    }

    fn write(&self, env: &Envelope) -> Result<(), SessionError> {
        let bytes = env.encode()?;
        let mut writer = lock(&self.writer);
        let Some(stream) = writer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        stream.write_all(&bytes)?;
        stream.flush()?;
        debug!("-> {}", String::from_utf8_lossy(&bytes));
        Ok(())
    }

    fn close_socket(&self) {
        if let Some(stream) = lock(&self.writer).take() {
            // читающий клон того же сокета тоже проснётся
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn handle_document(&self, doc: Value) -> Flow {
        let env = match Envelope::from_value(doc) {
            Ok(env) => env,
            Err(e) => {
                warn!("protocol violation, message dropped: {e}");
                return Flow::Continue;
            }
        };

        match env.kind {
            MessageKind::End => {
                info!("terminal sent end");
                self.peer_ended.store(true, Ordering::SeqCst);
                self.bus.emit(ConnectionClosed);
                if !self.we_ended.swap(true, Ordering::SeqCst) {
                    if let Err(e) = self.write(&Envelope::end()) {
                        warn!("failed to answer end: {e}");
                    }
                }
                Flow::Stop
            }
            MessageKind::Ver => {
                info!("terminal protocol version {}", env.protocol_version().unwrap_or(0));
                Flow::Continue
            }
            MessageKind::Req => {
                if let Err(e) = self.write(&Envelope::ack(env.id)) {
                    warn!("failed to acknowledge request {}: {e}", env.id);
                }
                match env.data_field("object").cloned() {
                    Some(object) => {
                        self.data_sources.route(&object, env);
                    }
                    None => {
                        let meta = self.registry.lookup(env.id);
                        for ev in route_push(&env, meta) {
                            self.bus.publish(ev);
                        }
                    }
                }
                Flow::Continue
            }
            MessageKind::Ans => {
                let meta = self.registry.lookup(env.id);
                if meta.is_none() {
                    debug!("answer {} has no registered request", env.id);
                }
                for ev in route_answer(&env, meta) {
                    self.bus.publish(ev);
                }
                self.registry.remove(env.id);
                Flow::Continue
            }
        }
    }
}

fn read_loop(
    shared: Arc<Shared>,
    mut stream: TcpStream,
    mut decoder: FrameDecoder,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];

    let failed = loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutting down session...");
            break false;
        }
        if shared.closing.load(Ordering::SeqCst) {
            break false;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                // закрытие без обмена `end` считается ошибкой сокета
                let expected = shared.closing.load(Ordering::SeqCst)
                    || shared.peer_ended.load(Ordering::SeqCst)
                    || shared.we_ended.load(Ordering::SeqCst);
                if !expected {
                    warn!("terminal closed the connection without end");
                }
                break !expected;
            }
            Ok(n) => {
                let mut flow = Flow::Continue;
                for item in decoder.push(&buf[..n]) {
                    match item {
                        Ok(doc) => flow = shared.handle_document(doc),
                        Err(e) => warn!("framing error: {e}"),
                    }
                    if flow == Flow::Stop {
                        break;
                    }
                }
                if flow == Flow::Stop {
                    break false;
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                // просто "тик" цикла
                continue;
            }
            Err(e) => {
                if shared.closing.load(Ordering::SeqCst) {
                    break false;
                }
                warn!("socket read failed: {e}");
                break true;
            }
        }
    };

    shared.close_socket();
    if failed {
        shared.set_state(ConnectionState::Error);
    }
    shared.set_state(ConnectionState::Disconnected);
}

fn connect(host: &str, port: u16, opts: &SessionOptions) -> io::Result<(TcpStream, TcpStream)> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))?;

    let stream = TcpStream::connect_timeout(&addr, opts.connect_timeout)?;
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(opts.read_tick))?;
    let reader = stream.try_clone()?;
    Ok((stream, reader))
}

/// Сессия с терминалом
pub struct Session {
    shared: Arc<Shared>,
    opts: SessionOptions,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Сессия поверх общих реестра, шины и каналов источников данных
    pub fn new(
        registry: Arc<MessageRegistry>,
        bus: Arc<EventBus>,
        data_sources: Arc<DataSourceRouter>,
        opts: SessionOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                bus,
                data_sources,
                writer: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                we_ended: AtomicBool::new(false),
                peer_ended: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
            opts,
            reader: Mutex::new(None),
        }
    }

    /// Подключается и запускает чтение. Возвращает false, если подключиться не удалось
    /// или сессия уже работает.
    pub fn start(&self, host: &str, port: u16, shutdown: Arc<AtomicBool>) -> bool {
        let shared = &self.shared;
        if let Err(state) = shared.begin_connect() {
            warn!("session is already {state}");
            return false;
        }
        self.join_reader();

        let (writer, reader) = match connect(host, port, &self.opts) {
            Ok(pair) => pair,
            Err(e) => {
                warn!("failed to connect to {host}:{port}: {e}");
                shared.set_state(ConnectionState::Error);
                shared.set_state(ConnectionState::Disconnected);
                return false;
            }
        };

        shared.we_ended.store(false, Ordering::SeqCst);
        shared.peer_ended.store(false, Ordering::SeqCst);
        shared.closing.store(false, Ordering::SeqCst);
        *lock(&shared.writer) = Some(writer);
        shared.set_state(ConnectionState::Connected);
        info!("connected to terminal at {host}:{port}");

        let decoder = FrameDecoder::with_limit(self.opts.max_frame_bytes);
        let thread_shared = shared.clone();
        match thread::Builder::new()
            .name("quik-reader".into())
            .spawn(move || read_loop(thread_shared, reader, decoder, shutdown))
        {
            Ok(h) => {
                *lock(&self.reader) = Some(h);
                true
            }
            Err(e) => {
                warn!("failed to start reader thread: {e}");
                shared.close_socket();
                shared.set_state(ConnectionState::Error);
                shared.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Отправка кадра. После нашего `end` новые кадры не принимаются.
    pub fn send(&self, env: &Envelope) -> Result<(), SessionError> {
        if self.shared.we_ended.load(Ordering::SeqCst) {
            return Err(SessionError::Ended);
        }
        self.shared.write(env)
    }

    /// Завершение сессии: шлёт `end`, если ещё не слали. Сокет закрывается сразу,
    /// если `force` или терминал уже прислал свой `end`; иначе читающий поток
    /// закроет его, когда придёт ответный `end`.
    pub fn finish(&self, force: bool) {
        let shared = &self.shared;
        if !shared.we_ended.swap(true, Ordering::SeqCst) {
            match shared.write(&Envelope::end()) {
                Ok(()) => info!("end sent to terminal"),
                Err(e) => debug!("end not sent: {e}"),
            }
        }

        if force || shared.peer_ended.load(Ordering::SeqCst) {
            shared.closing.store(true, Ordering::SeqCst);
            shared.close_socket();
            self.join_reader();
        }
    }

    /// Ждёт остановки читающего потока. true, если поток завершился за `timeout`.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = lock(&self.reader)
                .as_ref()
                .is_none_or(JoinHandle::is_finished);
            if finished {
                self.join_reader();
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_STEP);
        }
    }

    /// Текущее состояние соединения
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Соединение установлено
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn join_reader(&self) {
        let handle = lock(&self.reader).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.close_socket();
        self.join_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusEvent;
    use crossbeam_channel::Receiver;
    use quik_core::events::{InstrumentClassesUpdated, ParameterUpdated};
    use quik_core::meta::{DataSourceHandle, RequestKind, RequestMeta};
    use quik_core::request::RequestData;
    use std::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(3);

    struct Fixture {
        registry: Arc<MessageRegistry>,
        bus: Arc<EventBus>,
        data_sources: Arc<DataSourceRouter>,
        session: Session,
        listener: TcpListener,
        shutdown: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(MessageRegistry::new());
        let bus = Arc::new(EventBus::new());
        let data_sources = Arc::new(DataSourceRouter::new());
        let opts = SessionOptions {
            read_tick: Duration::from_millis(20),
            ..SessionOptions::default()
        };
        let session = Session::new(registry.clone(), bus.clone(), data_sources.clone(), opts);
        Fixture {
            registry,
            bus,
            data_sources,
            session,
            listener: TcpListener::bind("127.0.0.1:0").unwrap(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    impl Fixture {
        fn connect(&self) -> TcpStream {
            let port = self.listener.local_addr().unwrap().port();
            assert!(self.session.start("127.0.0.1", port, self.shutdown.clone()));
            let (peer, _) = self.listener.accept().unwrap();
            peer.set_read_timeout(Some(WAIT)).unwrap();
            peer
        }
    }

    fn collect<E: BusEvent + Clone>(bus: &EventBus) -> Receiver<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        bus.subscribe(move |e: &E| {
            tx.send(e.clone())?;
            Ok(())
        });
        rx
    }

    fn read_frames(peer: &mut TcpStream, count: usize) -> Vec<Envelope> {
        let mut dec = FrameDecoder::new();
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while out.len() < count {
            let n = peer.read(&mut buf).unwrap();
            assert!(n > 0, "peer closed before {count} frames arrived");
            for doc in dec.push(&buf[..n]) {
                out.push(Envelope::from_value(doc.unwrap()).unwrap());
            }
        }
        out
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(WAIT_STEP);
        }
        cond()
    }

    #[test]
    fn answer_is_correlated_and_registry_entry_removed() {
        let fx = fixture();
        let states = collect::<ConnectionStateChanged>(&fx.bus);
        let classes = collect::<InstrumentClassesUpdated>(&fx.bus);
        fx.registry
            .register(42, RequestMeta::new(RequestKind::Classes, "getClassesList"));

        let mut peer = fx.connect();
        peer.write_all(br#"{"id":0,"type":"ver","version":1}{"id":42,"type":"ans","#)
            .unwrap();
        peer.write_all(br#""data":{"method":"invoke","result":["TQBR,SBER,GAZP"]}}"#)
            .unwrap();

        let ev = classes.recv_timeout(WAIT).unwrap();
        assert_eq!(ev.items, vec!["TQBR", "SBER", "GAZP"]);
        assert!(wait_until(|| fx.registry.is_empty()));

        assert_eq!(states.recv_timeout(WAIT).unwrap().state, ConnectionState::Pending);
        assert_eq!(states.recv_timeout(WAIT).unwrap().state, ConnectionState::Connected);
        assert!(fx.session.is_connected());
    }

    #[test]
    fn push_is_acknowledged_and_published() {
        let fx = fixture();
        let params = collect::<ParameterUpdated>(&fx.bus);

        let mut peer = fx.connect();
        peer.write_all(
            br#"{"id":77,"type":"req","data":{"method":"paramChange","class":"TQBR","security":"SBER","param":"LAST","value":"301.1"}}"#,
        )
        .unwrap();

        let frames = read_frames(&mut peer, 1);
        assert_eq!(frames[0], Envelope::ack(77));

        let ev = params.recv_timeout(WAIT).unwrap();
        assert_eq!(ev.value.as_deref(), Some("301.1"));
        assert_eq!(ev.sec_code.as_deref(), Some("SBER"));
    }

    #[test]
    fn data_source_push_goes_to_its_channel() {
        let fx = fixture();
        let handle = DataSourceHandle::new(serde_json::json!("ds_1"));
        let rx = fx.data_sources.open(&handle);

        let mut peer = fx.connect();
        peer.write_all(
            br#"{"id":5,"type":"req","data":{"method":"invoke","function":"on_update","object":"ds_1","arguments":[12]}}"#,
        )
        .unwrap();

        assert_eq!(read_frames(&mut peer, 1)[0], Envelope::ack(5));
        let env = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(env.id, 5);
        assert_eq!(env.data_str("function"), Some("on_update"));
    }

    #[test]
    fn garbage_and_malformed_frames_do_not_break_the_session() {
        let fx = fixture();
        let classes = collect::<InstrumentClassesUpdated>(&fx.bus);
        fx.registry
            .register(1, RequestMeta::new(RequestKind::Classes, "getClassesList"));

        let mut peer = fx.connect();
        peer.write_all(b"xx{bad}{\"type\":\"ans\"}").unwrap();
        peer.write_all(br#"{"id":1,"type":"ans","data":{"result":["TQBR"]}}"#)
            .unwrap();

        assert_eq!(classes.recv_timeout(WAIT).unwrap().items, vec!["TQBR"]);
        assert!(fx.session.is_connected());
    }

    #[test]
    fn peer_end_is_answered_and_closes_session() {
        let fx = fixture();
        let closed = collect::<ConnectionClosed>(&fx.bus);

        let mut peer = fx.connect();
        peer.write_all(br#"{"id":0,"type":"end"}"#).unwrap();

        assert_eq!(read_frames(&mut peer, 1)[0], Envelope::end());
        closed.recv_timeout(WAIT).unwrap();
        assert!(fx.session.wait_closed(WAIT));
        assert_eq!(fx.session.state(), ConnectionState::Disconnected);

        let req = Envelope::request(9, &RequestData::invoke("getClassesList")).unwrap();
        assert!(matches!(fx.session.send(&req), Err(SessionError::Ended)));
    }

    #[test]
    fn local_finish_waits_for_peer_end() {
        let fx = fixture();
        let mut peer = fx.connect();

        fx.session.finish(false);
        assert_eq!(read_frames(&mut peer, 1)[0], Envelope::end());
        assert!(fx.session.is_connected());

        peer.write_all(br#"{"id":0,"type":"end"}"#).unwrap();
        assert!(fx.session.wait_closed(WAIT));
        assert_eq!(fx.session.state(), ConnectionState::Disconnected);

        // второй end терминалу не отправляется: сокет закрыт без лишних кадров
        let mut rest = Vec::new();
        peer.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn forced_finish_closes_immediately() {
        let fx = fixture();
        let _peer = fx.connect();

        fx.session.finish(true);
        assert_eq!(fx.session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn shutdown_flag_stops_reader() {
        let fx = fixture();
        let _peer = fx.connect();

        fx.shutdown.store(true, Ordering::Relaxed);
        assert!(fx.session.wait_closed(WAIT));
        assert_eq!(fx.session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn peer_disconnect_without_end_reports_error() {
        let fx = fixture();
        let states = collect::<ConnectionStateChanged>(&fx.bus);
        let peer = fx.connect();
        drop(peer);

        assert!(fx.session.wait_closed(WAIT));
        assert_eq!(fx.session.state(), ConnectionState::Disconnected);
        let seen: Vec<_> = (0..4)
            .map(|_| states.recv_timeout(WAIT).unwrap().state)
            .collect();
        assert_eq!(
            seen,
            vec![
                ConnectionState::Pending,
                ConnectionState::Connected,
                ConnectionState::Error,
                ConnectionState::Disconnected
            ]
        );
    }

    #[test]
    fn concurrent_start_connects_once() {
        for _ in 0..10 {
            let fx = fixture();
            let port = fx.listener.local_addr().unwrap().port();
            let barrier = std::sync::Barrier::new(2);

            let started = thread::scope(|s| {
                let attempts: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            fx.session.start("127.0.0.1", port, fx.shutdown.clone())
                        })
                    })
                    .collect();
                attempts
                    .into_iter()
                    .map(|h| h.join())
                    .filter(|r| matches!(r, Ok(true)))
                    .count()
            });

            assert_eq!(started, 1);
            assert_eq!(fx.session.state(), ConnectionState::Connected);
            fx.session.finish(true);
        }
    }

    #[test]
    fn failed_connect_reports_error_then_disconnected() {
        let fx = fixture();
        let states = collect::<ConnectionStateChanged>(&fx.bus);
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        assert!(!fx.session.start("127.0.0.1", port, fx.shutdown.clone()));
        let seen: Vec<_> = (0..3)
            .map(|_| states.recv_timeout(WAIT).unwrap().state)
            .collect();
        assert_eq!(
            seen,
            vec![
                ConnectionState::Pending,
                ConnectionState::Error,
                ConnectionState::Disconnected
            ]
        );
    }

    #[test]
    fn send_without_connection_fails() {
        let fx = fixture();
        let req = Envelope::request(1, &RequestData::invoke("getClassesList")).unwrap();
        assert!(matches!(fx.session.send(&req), Err(SessionError::NotConnected)));
    }
}
