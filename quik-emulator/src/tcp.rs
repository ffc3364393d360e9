use crate::config::{ConnId, PROTOCOL_VERSION};
use crate::hub::Hub;
use crate::market::Market;
use crate::session::{prepare, run_session};
use crate::terminal::Terminal;
use anyhow::Context;
use log::{info, warn};
use quik_core::envelope::Envelope;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, atomic::AtomicBool, atomic::AtomicU64, atomic::Ordering};
use std::thread;
use std::time::Duration;

const ACCEPT_TICK: Duration = Duration::from_millis(50);

/// Всё, что нужно сессиям, кроме сокета
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) hub: Arc<Hub>,
    pub(crate) market: Arc<Market>,
    pub(crate) next_id: Arc<AtomicU64>,
    pub(crate) shutdown: Arc<AtomicBool>,
}

// accept loop: по потоку на соединение
pub(crate) fn run_tcp_listener(listener: TcpListener, shared: Shared) -> anyhow::Result<()> {
    listener
        .set_nonblocking(true)
        .context("listener.set_nonblocking(true)")?;
    let mut session_handles = Vec::new();

    loop {
        reap_finished_sessions(&mut session_handles);

        if shared.shutdown.load(Ordering::Relaxed) {
            info!("shutting down tcp listener");
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                let shared = shared.clone();
                let h = thread::spawn(move || {
                    if let Err(e) = handle_conn(stream, addr, shared) {
                        warn!("connection {addr}: {e:#}");
                    }
                });
                session_handles.push(h);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                // нет новых соединений прямо сейчас
                thread::sleep(ACCEPT_TICK);
            }
            Err(e) => {
                warn!("accept error: {e}");
                thread::sleep(ACCEPT_TICK);
            }
        }
    }

    for h in session_handles {
        if let Err(panic) = h.join() {
            warn!("session thread panicked: {:?}", panic);
        }
    }

    Ok(())
}

pub(crate) fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr).with_context(|| format!("bind TCP listener {addr}"))
}

fn reap_finished_sessions(handles: &mut Vec<thread::JoinHandle<()>>) {
    let mut i = 0;
    while i < handles.len() {
        if handles[i].is_finished() {
            let h = handles.swap_remove(i);
            if let Err(panic) = h.join() {
                warn!("session thread panicked: {:?}", panic);
            }
        } else {
            i += 1;
        }
    }
}

fn handle_conn(mut stream: TcpStream, addr: SocketAddr, shared: Shared) -> anyhow::Result<()> {
    prepare(&stream).context("prepare accepted socket")?;

    let cid: ConnId = shared.next_id.fetch_add(1, Ordering::Relaxed);
    info!("connection {cid} from {addr}");

    stream
        .write_all(&Envelope::version(PROTOCOL_VERSION).encode()?)
        .context("send ver")?;

    let rx = shared.hub.register(cid)?;
    let terminal = Terminal::new(shared.market.clone());
    let res = run_session(cid, stream, &shared.hub, rx, terminal, shared.shutdown.clone());
    shared.hub.unregister(cid);

    let end = res?;
    info!("connection {cid} closed: {end:?}");
    Ok(())
}
