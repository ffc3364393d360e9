use crate::config::{ConnId, SOCKET_TICK};
use crate::generator::MarketUpdate;
use crate::hub::Hub;
use crate::terminal::{Reply, Terminal};
use crossbeam_channel::Receiver;
use log::{debug, info, warn};
use quik_core::codec::FrameDecoder;
use quik_core::envelope::Envelope;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, atomic::AtomicBool, atomic::Ordering};

const READ_BUF: usize = 16 * 1024;

/// Как закончилась сессия
#[derive(Debug, PartialEq)]
pub(crate) enum SessionEnd {
    /// клиент прислал `end`
    ClientEnded,
    /// клиент закрыл соединение без `end`
    Disconnected,
    /// эмулятор останавливается
    Shutdown,
}

/// Цикл одного соединения: запросы клиента и push по его подпискам.
///
/// Сокет должен быть с таймаутом чтения: он же задаёт тик проверки очереди.
/// Хаб узнаёт о новом наборе инструментов раньше, чем клиент получит ответ
/// на подписку.
pub(crate) fn run_session(
    cid: ConnId,
    mut stream: TcpStream,
    hub: &Hub,
    updates: Receiver<Arc<MarketUpdate>>,
    mut terminal: Terminal,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<SessionEnd> {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut watched = terminal.watched();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutting down session {cid}");
            // клиент мог уже уйти
            let _ = send(&mut stream, &Envelope::end());
            return Ok(SessionEnd::Shutdown);
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                info!("session {cid}: client disconnected");
                return Ok(SessionEnd::Disconnected);
            }
            Ok(n) => {
                for doc in decoder.push(&buf[..n]) {
                    let parsed = match doc {
                        Ok(v) => Envelope::from_value(v).map_err(anyhow::Error::from),
                        Err(e) => Err(e.into()),
                    };
                    let env = match parsed {
                        Ok(env) => env,
                        Err(e) => {
                            warn!("session {cid}: skipping bad frame: {e}");
                            continue;
                        }
                    };

                    match terminal.handle(&env) {
                        Reply::Answer(ans) => {
                            let now = terminal.watched();
                            if now != watched {
                                debug!("session {cid}: watching {} instruments", now.len());
                                hub.watch(cid, now.clone());
                                watched = now;
                            }
                            send(&mut stream, &ans)?;
                        }
                        Reply::Silent => debug!("session {cid}: {} {}", env.kind, env.id),
                        Reply::End => {
                            info!("session {cid}: client sent end");
                            send(&mut stream, &Envelope::end())?;
                            return Ok(SessionEnd::ClientEnded);
                        }
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                // тик: разгребаем очередь обновлений
            }
            Err(e) => return Err(e.into()),
        }

        for u in updates.try_iter() {
            for push in terminal.pushes(&u) {
                send(&mut stream, &push)?;
            }
        }
    }
}

fn send(stream: &mut TcpStream, env: &Envelope) -> anyhow::Result<()> {
    let bytes = env.encode()?;
    stream.write_all(&bytes)?;
    Ok(())
}

/// Подготовка принятого сокета к циклу сессии
pub(crate) fn prepare(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(SOCKET_TICK))?;
    Ok(())
}
