//! Раздача обновлений рынка по сессиям.
//!
//! У каждого соединения своя ограниченная очередь и набор инструментов,
//! на которые у него есть подписки. Обновление уходит только тем, кто следит
//! за его инструментом; переполненная очередь теряет обновление, закрытая
//! снимается с учёта.

use crate::config::ConnId;
use crate::generator::MarketUpdate;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use quik_core::instruments::Instrument;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

const QUEUE_PER_CONNECTION: usize = 256;

#[derive(Debug, Error)]
pub(crate) enum HubError {
    #[error("connection already registered: {0}")]
    AlreadyRegistered(ConnId),
}

#[derive(Debug, Default)]
pub(crate) struct BroadcastStats {
    sent: usize,
    dropped_full: usize,
    dropped_dead: usize,
}

impl fmt::Display for BroadcastStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} dropped_full={} dropped_dead={}",
            self.sent, self.dropped_full, self.dropped_dead
        )
    }
}

impl BroadcastStats {
    pub(crate) fn has_losses(&self) -> bool {
        self.dropped_full + self.dropped_dead > 0
    }

    pub(crate) fn merge(&mut self, other: BroadcastStats) {
        self.sent += other.sent;
        self.dropped_full += other.dropped_full;
        self.dropped_dead += other.dropped_dead;
    }
}

struct Conn {
    tx: Sender<Arc<MarketUpdate>>,
    watched: HashSet<Instrument>,
}

pub(crate) struct Hub {
    conns: RwLock<HashMap<ConnId, Conn>>,
    capacity: usize,
}

impl Hub {
    pub(crate) fn new() -> Self {
        Self::with_capacity(QUEUE_PER_CONNECTION)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnId, Conn>> {
        match self.conns.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnId, Conn>> {
        match self.conns.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Новое соединение пока ни за чем не следит
    pub(crate) fn register(&self, id: ConnId) -> Result<Receiver<Arc<MarketUpdate>>, HubError> {
        match self.write().entry(id) {
            Entry::Occupied(_) => Err(HubError::AlreadyRegistered(id)),
            Entry::Vacant(e) => {
                let (tx, rx) = crossbeam_channel::bounded(self.capacity);
                e.insert(Conn {
                    tx,
                    watched: HashSet::new(),
                });
                Ok(rx)
            }
        }
    }

    pub(crate) fn unregister(&self, id: ConnId) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Заменяет набор инструментов соединения. false, если соединения нет.
    pub(crate) fn watch(&self, id: ConnId, instruments: HashSet<Instrument>) -> bool {
        match self.write().get_mut(&id) {
            Some(conn) => {
                conn.watched = instruments;
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    /// Сколько соединений следит за инструментом
    pub(crate) fn watchers(&self, instrument: &Instrument) -> usize {
        self.read()
            .values()
            .filter(|c| c.watched.contains(instrument))
            .count()
    }

    /// Не блокируется: под читающим замком только `try_send`
    pub(crate) fn broadcast(&self, update: Arc<MarketUpdate>) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        let mut dead = Vec::new();

        for (&id, conn) in self
            .read()
            .iter()
            .filter(|(_, c)| c.watched.contains(&update.instrument))
        {
            match conn.tx.try_send(update.clone()) {
                Ok(()) => stats.sent += 1,
                Err(TrySendError::Full(_)) => stats.dropped_full += 1,
                Err(TrySendError::Disconnected(_)) => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut conns = self.write();
            for id in &dead {
                conns.remove(id);
            }
        }
        stats.dropped_dead = dead.len();
        stats
    }
}
