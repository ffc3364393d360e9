use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Метод запроса к мосту терминала
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    /// Вызов функции Lua-API терминала
    Invoke,
    /// Подписка на стакан
    SubscribeQuotes,
    /// Отписка от стакана
    UnsubscribeQuotes,
    /// Подписка на изменения параметра текущей таблицы
    SubscribeParamChanges,
    /// Отписка от изменений параметра
    UnsubscribeParamChanges,
    /// Регистрация глобального колбэка терминала
    Register,
}

impl Method {
    /// Строка метода на проводе
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Invoke => "invoke",
            Method::SubscribeQuotes => "subscribeQuotes",
            Method::UnsubscribeQuotes => "unsubscribeQuotes",
            Method::SubscribeParamChanges => "subscribeParamChanges",
            Method::UnsubscribeParamChanges => "unsubscribeParamChanges",
            Method::Register => "register",
        }
    }
}

/// Содержимое `data` исходящего запроса
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    /// Метод
    pub method: Method,
    /// Имя вызываемой функции (для `invoke`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Аргументы вызова (для `invoke` всегда присутствуют, пусть и пустые)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
    /// Объект терминала, у которого вызывается метод (источник данных)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    /// Код класса
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<String>,
    /// Код инструмента
    #[serde(rename = "security", default, skip_serializing_if = "Option::is_none")]
    pub sec_code: Option<String>,
    /// Имя параметра текущей таблицы
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Имя глобального колбэка (для `register`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl RequestData {
    fn bare(method: Method) -> Self {
        Self {
            method,
            function: None,
            arguments: None,
            object: None,
            class_code: None,
            sec_code: None,
            param: None,
            callback: None,
        }
    }

    /// `invoke` функции без аргументов
    pub fn invoke(function: impl Into<String>) -> Self {
        Self {
            function: Some(function.into()),
            arguments: Some(Vec::new()),
            ..Self::bare(Method::Invoke)
        }
    }

    /// Добавляет строковые аргументы
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments
            .get_or_insert_with(Vec::new)
            .extend(args.into_iter().map(|a| Value::String(a.into())));
        self
    }

    /// Добавляет аргумент как есть (объект, число)
    pub fn with_raw_arg(mut self, arg: Value) -> Self {
        self.arguments.get_or_insert_with(Vec::new).push(arg);
        self
    }

    /// Вызов у объекта терминала
    pub fn on_object(mut self, object: Value) -> Self {
        self.object = Some(object);
        self
    }

    /// Подписка/отписка от стакана
    pub fn quotes(subscribe: bool, class_code: &str, sec_code: &str) -> Self {
        let method = if subscribe {
            Method::SubscribeQuotes
        } else {
            Method::UnsubscribeQuotes
        };
        Self {
            class_code: Some(class_code.to_string()),
            sec_code: Some(sec_code.to_string()),
            ..Self::bare(method)
        }
    }

    /// Подписка/отписка от изменений параметра
    pub fn param_changes(subscribe: bool, class_code: &str, sec_code: &str, param: &str) -> Self {
        let method = if subscribe {
            Method::SubscribeParamChanges
        } else {
            Method::UnsubscribeParamChanges
        };
        Self {
            class_code: Some(class_code.to_string()),
            sec_code: Some(sec_code.to_string()),
            param: Some(param.to_string()),
            ..Self::bare(method)
        }
    }

    /// Регистрация глобального колбэка
    pub fn register(callback: &str) -> Self {
        Self {
            callback: Some(callback.to_string()),
            ..Self::bare(Method::Register)
        }
    }

    /// Имя, под которым запрос регистрируется в реестре: функция, иначе метод
    pub fn display_method(&self) -> &str {
        match &self.function {
            Some(f) if !f.is_empty() => f,
            _ => self.method.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_with_args_and_object() {
        let data = RequestData::invoke("C")
            .with_args(["1"])
            .on_object(json!("ds_1"));
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"method": "invoke", "function": "C", "arguments": ["1"], "object": "ds_1"})
        );
        assert_eq!(data.display_method(), "C");
    }

    #[test]
    fn raw_argument_is_not_stringified() {
        let data = RequestData::invoke("SetUpdateCallback")
            .with_raw_arg(json!({"type": "callable", "function": "on_update"}));
        assert_eq!(
            serde_json::to_value(&data).unwrap()["arguments"],
            json!([{"type": "callable", "function": "on_update"}])
        );
    }

    #[test]
    fn subscriptions_use_class_and_security_fields() {
        let data = RequestData::param_changes(true, "SPBFUT", "SiH5", "LAST");
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({
                "method": "subscribeParamChanges",
                "class": "SPBFUT",
                "security": "SiH5",
                "param": "LAST"
            })
        );

        let data = RequestData::quotes(false, "TQBR", "SBER");
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"method": "unsubscribeQuotes", "class": "TQBR", "security": "SBER"})
        );
        assert_eq!(data.display_method(), "unsubscribeQuotes");
    }

    #[test]
    fn register_carries_callback_name() {
        let data = RequestData::register("OnAllTrade");
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({"method": "register", "callback": "OnAllTrade"})
        );
    }

    #[test]
    fn round_trips_through_deserialize() {
        let raw = json!({"method": "invoke", "function": "getParamEx2",
                         "arguments": ["TQBR", "SBER", "LAST"]});
        let data: RequestData = serde_json::from_value(raw).unwrap();
        assert_eq!(data.method, Method::Invoke);
        assert_eq!(data.arguments.as_ref().map(Vec::len), Some(3));
    }
}
