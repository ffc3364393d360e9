use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::ids::MessageId;
use crate::meta::RequestMeta;

/// Реестр отправленных запросов: по `id` ответа находим, что мы спрашивали.
///
/// Промах при поиске - не ошибка: так выглядят сообщения, которые терминал
/// прислал сам, без нашего запроса.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    entries: DashMap<MessageId, Arc<RequestMeta>>,
}

impl MessageRegistry {
    /// Пустой реестр
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует запрос; если `id` уже занят, ничего не меняет и возвращает false
    pub fn register(&self, id: MessageId, meta: RequestMeta) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(Arc::new(meta));
                true
            }
        }
    }

    /// Поиск без удаления
    pub fn lookup(&self, id: MessageId) -> Option<Arc<RequestMeta>> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    /// Удаление записи
    pub fn remove(&self, id: MessageId) -> Option<Arc<RequestMeta>> {
        self.entries.remove(&id).map(|(_, meta)| meta)
    }

    /// Количество незакрытых запросов
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Реестр пуст
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
