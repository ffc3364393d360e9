//! Дедупликация подписок.
//!
//! Сколько бы логических подписчиков ни хотели один и тот же стакан или
//! параметр, на проводе существует одна подписка. Она появляется вместе с
//! первым подписчиком и снимается вместе с последним.
//!
//! Проводные команды выполняются колбэками, пока запись ключа в словаре
//! заблокирована. Поэтому снятие последней подписки и одновременное создание
//! первой по тому же ключу упорядочены и не шлют конфликтующих команд.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;

use crate::ids::MessageId;

/// Вид подписки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Стакан
    OrderBook,
    /// Параметр текущей таблицы
    Param,
}

/// Ключ проводной подписки: класс + инструмент + вид [+ параметр]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    class_code: String,
    sec_code: String,
    kind: TopicKind,
    param: Option<String>,
}

impl TopicKey {
    /// Ключ подписки на стакан
    pub fn order_book(class_code: &str, sec_code: &str) -> Self {
        Self {
            class_code: class_code.to_string(),
            sec_code: sec_code.to_string(),
            kind: TopicKind::OrderBook,
            param: None,
        }
    }

    /// Ключ подписки на параметр
    pub fn param(class_code: &str, sec_code: &str, param: &str) -> Self {
        Self {
            class_code: class_code.to_string(),
            sec_code: sec_code.to_string(),
            kind: TopicKind::Param,
            param: Some(param.to_string()),
        }
    }

    /// Код класса
    pub fn class_code(&self) -> &str {
        &self.class_code
    }

    /// Код инструмента
    pub fn sec_code(&self) -> &str {
        &self.sec_code
    }

    /// Вид подписки
    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Имя параметра
    pub fn param_name(&self) -> Option<&str> {
        self.param.as_deref()
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.param) {
            (TopicKind::OrderBook, _) => write!(f, "{}:{}:orderbook", self.class_code, self.sec_code),
            (TopicKind::Param, Some(p)) => {
                write!(f, "{}:{}:param:{}", self.class_code, self.sec_code, p)
            }
            (TopicKind::Param, None) => write!(f, "{}:{}:param", self.class_code, self.sec_code),
        }
    }
}

/// Токен одного логического подписчика
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Числовое значение токена
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Результат отписки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Ушёл последний подписчик, проводная подписка снята
    Last {
        /// Идентификатор, с которым подписка создавалась
        wire_id: MessageId,
    },
    /// Остались другие подписчики
    Remaining(usize),
    /// Такого токена у ключа нет
    UnknownHandle,
}

#[derive(Debug)]
struct Topic {
    wire_id: MessageId,
    handles: HashSet<SubscriptionHandle>,
}

/// Менеджер подписок с подсчётом ссылок
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    topics: DashMap<TopicKey, Topic>,
    next_handle: AtomicU64,
}

impl SubscriptionManager {
    /// Пустой менеджер
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет подписчика.
    ///
    /// Если ключа ещё нет, вызывает `issue`: он должен отправить проводную
    /// подписку и вернуть её `id`. Ошибка `issue` возвращается как есть,
    /// тема при этом не создаётся. Если ключ уже есть, `issue` не вызывается.
    ///
    /// `issue` выполняется под замком записи сегмента `DashMap`. Пока он не
    /// вернётся, ждут все обращения к этому ключу и к соседним ключам того же
    /// сегмента. Поэтому `issue` должен только записать кадр в сокет, но не
    /// ждать ответа терминала и не обращаться к этому же менеджеру.
    pub fn subscribe<E, F>(&self, key: &TopicKey, issue: F) -> Result<SubscriptionHandle, E>
    where
        F: FnOnce() -> Result<MessageId, E>,
    {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));

        match self.topics.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                let topic = e.get_mut();
                topic.handles.insert(handle);
                debug!("{key}: joined as {handle}, {} subscribers", topic.handles.len());
            }
            Entry::Vacant(e) => {
                let wire_id = issue()?;
                e.insert(Topic {
                    wire_id,
                    handles: HashSet::from([handle]),
                });
                debug!("{key}: subscribed on wire with id {wire_id} for {handle}");
            }
        }

        Ok(handle)
    }

    /// Убирает подписчика.
    ///
    /// Если он был последним, вызывает `issue(wire_id)` для проводной отписки
    /// и удаляет тему (даже если `issue` вернул ошибку: соединению уже нельзя
    /// доверять, а тема без подписчиков существовать не должна).
    ///
    /// К `issue` относятся те же ограничения, что и в [`Self::subscribe`].
    pub fn unsubscribe<E, F>(
        &self,
        key: &TopicKey,
        handle: SubscriptionHandle,
        issue: F,
    ) -> Result<Unsubscribed, E>
    where
        F: FnOnce(MessageId) -> Result<(), E>,
    {
        let Entry::Occupied(mut e) = self.topics.entry(key.clone()) else {
            return Ok(Unsubscribed::UnknownHandle);
        };

        let topic = e.get_mut();
        if !topic.handles.remove(&handle) {
            return Ok(Unsubscribed::UnknownHandle);
        }
        if !topic.handles.is_empty() {
            debug!("{key}: {handle} left, {} subscribers", topic.handles.len());
            return Ok(Unsubscribed::Remaining(topic.handles.len()));
        }

        let wire_id = topic.wire_id;
        let sent = issue(wire_id);
        e.remove();
        debug!("{key}: last subscriber {handle} left, wire subscription {wire_id} removed");

        sent.map(|()| Unsubscribed::Last { wire_id })
    }

    /// Есть ли проводная подписка по ключу
    pub fn contains(&self, key: &TopicKey) -> bool {
        self.topics.contains_key(key)
    }

    /// Число логических подписчиков по ключу
    pub fn subscriber_count(&self, key: &TopicKey) -> usize {
        self.topics.get(key).map_or(0, |t| t.handles.len())
    }

    /// Токены подписчиков по ключу
    pub fn handles(&self, key: &TopicKey) -> Vec<SubscriptionHandle> {
        let mut handles: Vec<_> = self
            .topics
            .get(key)
            .map(|t| t.handles.iter().copied().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    /// Идентификатор, с которым создана проводная подписка
    pub fn wire_id(&self, key: &TopicKey) -> Option<MessageId> {
        self.topics.get(key).map(|t| t.wire_id)
    }

    /// Снимок всех активных ключей
    pub fn topics(&self) -> Vec<TopicKey> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }
}
