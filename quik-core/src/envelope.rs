//! Конверт сообщения моста: `{"id": N, "type": "req|ans|end|ver", "data": {...}}`.
//!
//! Полезная нагрузка в обе стороны лежит в поле `data`. Кадр `ver` вместо
//! `data` несёт целое поле `version`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::constants::SERVICE_FRAME_ID;
use crate::error::ProtocolError;
use crate::ids::MessageId;
use crate::request::RequestData;

/// Тип сообщения на проводе
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Запрос (в обе стороны)
    Req,
    /// Ответ на запрос
    Ans,
    /// Завершение сессии
    End,
    /// Версия протокола
    Ver,
}

impl MessageKind {
    /// Строка типа на проводе
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Req => "req",
            MessageKind::Ans => "ans",
            MessageKind::End => "end",
            MessageKind::Ver => "ver",
        }
    }

    /// Обратное отображение строки типа
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "req" => Some(MessageKind::Req),
            "ans" => Some(MessageKind::Ans),
            "end" => Some(MessageKind::End),
            "ver" => Some(MessageKind::Ver),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Один целый кадр протокола
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Идентификатор (у входящих `end`/`ver` может быть любым, нецелый читается как -1)
    pub id: MessageId,
    /// Тип кадра
    pub kind: MessageKind,
    /// Полезная нагрузка; для `ver` - значение поля `version`
    pub data: Option<Value>,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    id: MessageId,
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a Value>,
}

impl Envelope {
    /// Исходящий запрос
    pub fn request(id: MessageId, data: &RequestData) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id,
            kind: MessageKind::Req,
            data: Some(serde_json::to_value(data)?),
        })
    }

    /// Ответ на входящий запрос
    pub fn answer(id: MessageId, data: Value) -> Self {
        Self {
            id,
            kind: MessageKind::Ans,
            data: Some(data),
        }
    }

    /// Подтверждение входящего запроса, которого ждёт терминал
    pub fn ack(id: MessageId) -> Self {
        Self::answer(id, json!({"method": "return", "result": true}))
    }

    /// Кадр завершения сессии
    pub fn end() -> Self {
        Self {
            id: SERVICE_FRAME_ID,
            kind: MessageKind::End,
            data: None,
        }
    }

    /// Кадр с версией протокола
    pub fn version(version: i64) -> Self {
        Self {
            id: SERVICE_FRAME_ID,
            kind: MessageKind::Ver,
            data: Some(Value::from(version)),
        }
    }

    /// Разбор документа, выданного декодером
    pub fn from_value(doc: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = doc else {
            return Err(ProtocolError::NotAnObject);
        };

        let id = obj
            .get("id")
            .ok_or(ProtocolError::MissingId)?
            .as_i64()
            .unwrap_or(-1);

        let kind = match obj.get("type").ok_or(ProtocolError::MissingType)? {
            Value::String(s) => {
                MessageKind::from_wire(s).ok_or_else(|| ProtocolError::UnknownType(s.clone()))?
            }
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        let data = match kind {
            MessageKind::Ver => obj.remove("version"),
            _ => obj.remove("data"),
        };

        Ok(Self { id, kind, data })
    }

    /// Номер версии из кадра `ver` (0, если не удалось прочитать)
    pub fn protocol_version(&self) -> Option<i64> {
        match self.kind {
            MessageKind::Ver => Some(self.data.as_ref().and_then(Value::as_i64).unwrap_or(0)),
            _ => None,
        }
    }

    /// Строковое поле полезной нагрузки
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }

    /// Поле полезной нагрузки
    pub fn data_field(&self, field: &str) -> Option<&Value> {
        self.data.as_ref()?.get(field)
    }

    /// Представление в виде JSON-объекта
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::from(self.id));
        obj.insert("type".into(), Value::from(self.kind.as_str()));
        if let Some(data) = &self.data {
            let field = match self.kind {
                MessageKind::Ver => "version",
                _ => "data",
            };
            obj.insert(field.into(), data.clone());
        }
        Value::Object(obj)
    }

    /// Байты для отправки: компактный JSON без перевода строки
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let (data, version) = match self.kind {
            MessageKind::Ver => (None, self.data.as_ref()),
            _ => (self.data.as_ref(), None),
        };
        serde_json::to_vec(&WireEnvelope {
            id: self.id,
            kind: self.kind,
            data,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, RequestData};

    #[test]
    fn request_encodes_compact_json() {
        let data = RequestData::invoke("getClassesList");
        let env = Envelope::request(42, &data).unwrap();
        let bytes = env.encode().unwrap();

        assert!(bytes.starts_with(br#"{"id":42,"type":"req","data":{"#));
        assert!(!bytes.contains(&b'\n'));
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({
                "id": 42,
                "type": "req",
                "data": {"method": "invoke", "function": "getClassesList", "arguments": []}
            })
        );
    }

    #[test]
    fn end_and_version_frames() {
        assert_eq!(
            Envelope::end().encode().unwrap(),
            br#"{"id":0,"type":"end"}"#.to_vec()
        );
        assert_eq!(
            Envelope::version(2).encode().unwrap(),
            br#"{"id":0,"type":"ver","version":2}"#.to_vec()
        );
    }

    #[test]
    fn ack_matches_terminal_expectation() {
        let env = Envelope::ack(17);
        assert_eq!(
            env.to_value(),
            json!({"id": 17, "type": "ans", "data": {"method": "return", "result": true}})
        );
    }

    #[test]
    fn parses_answer_with_data() {
        let env = Envelope::from_value(json!({
            "id": 42, "type": "ans", "data": {"method": "invoke", "result": ["TQBR"]}
        }))
        .unwrap();
        assert_eq!(env.id, 42);
        assert_eq!(env.kind, MessageKind::Ans);
        assert_eq!(env.data_str("method"), Some("invoke"));
        assert_eq!(env.data_field("result"), Some(&json!(["TQBR"])));
    }

    #[test]
    fn parses_version_frame() {
        let env = Envelope::from_value(json!({"id": 0, "type": "ver", "version": 3})).unwrap();
        assert_eq!(env.protocol_version(), Some(3));

        let env = Envelope::from_value(json!({"id": 0, "type": "ver"})).unwrap();
        assert_eq!(env.protocol_version(), Some(0));
    }

    #[test]
    fn non_integer_id_becomes_sentinel() {
        let env = Envelope::from_value(json!({"id": "x", "type": "end"})).unwrap();
        assert_eq!(env.id, -1);
        assert_eq!(env.kind, MessageKind::End);
    }

    #[test]
    fn protocol_violations_are_reported() {
        assert_eq!(
            Envelope::from_value(json!([1, 2])),
            Err(ProtocolError::NotAnObject)
        );
        assert_eq!(
            Envelope::from_value(json!({"type": "ans"})),
            Err(ProtocolError::MissingId)
        );
        assert_eq!(
            Envelope::from_value(json!({"id": 1})),
            Err(ProtocolError::MissingType)
        );
        assert_eq!(
            Envelope::from_value(json!({"id": 1, "type": "resp"})),
            Err(ProtocolError::UnknownType("resp".into()))
        );
    }

    #[test]
    fn wire_table_is_consistent_with_serde() {
        for kind in [
            MessageKind::Req,
            MessageKind::Ans,
            MessageKind::End,
            MessageKind::Ver,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(
            serde_json::to_value(Method::SubscribeParamChanges).unwrap(),
            json!("subscribeParamChanges")
        );
    }
}
