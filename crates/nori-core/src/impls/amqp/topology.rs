//! Broker topology - exchange / queue / binding の値
//!
//! 引数マップ（`x-message-ttl` など）は JSON で持ち、宣言時に AMQP の field table へ変換します。
//! 入れ子のオブジェクトは入れ子の table、配列は field array になります。

use std::fmt;
use std::str::FromStr;

use lapin::types::{AMQPValue, FieldArray, FieldTable, ShortString};
use serde_json::{Map, Value};

use crate::ports::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(TransportError::Broker(format!(
                "unknown exchange kind {other:?}"
            ))),
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: Map<String, Value>,
}

impl Exchange {
    /// durable な exchange
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
            auto_delete: false,
            internal: false,
            arguments: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        require_name("exchange", &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: Map<String, Value>,
}

impl Queue {
    /// durable・非 exclusive・非 auto-delete の queue（worker が consume するもの）
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            arguments: Map::new(),
        }
    }

    /// 名前は broker が決める。exclusive で、接続が切れると消える
    pub fn anonymous() -> Self {
        Self {
            name: String::new(),
            durable: false,
            exclusive: true,
            auto_delete: true,
            arguments: Map::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.is_anonymous() && !self.exclusive {
            return Err(TransportError::Broker(
                "server-named queues must be exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

/// binding の行き先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Queue(String),
    Exchange(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Exchange(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub destination: Destination,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: Map<String, Value>,
}

impl Binding {
    pub fn new(
        destination: Destination,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            arguments: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        require_name("exchange", &self.exchange)?;
        match &self.destination {
            Destination::Queue(name) => require_name("destination queue", name),
            Destination::Exchange(name) => require_name("destination exchange", name),
        }
    }
}

fn require_name(what: &str, name: &str) -> Result<(), TransportError> {
    if name.trim().is_empty() {
        return Err(TransportError::Broker(format!("{what} name must not be empty")));
    }
    Ok(())
}

pub fn to_field_table(arguments: &Map<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(ShortString::from(key.clone()), to_amqp_value(value));
    }
    table
}

fn to_amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AMQPValue::LongString(s.clone().into()),
        Value::Array(items) => AMQPValue::FieldArray(FieldArray::from(
            items.iter().map(to_amqp_value).collect::<Vec<_>>(),
        )),
        Value::Object(map) => AMQPValue::FieldTable(to_field_table(map)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn field<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&ShortString::from(key.to_string()))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn field_table_converts_nested_maps() {
        let arguments = object(json!({
            "x-message-ttl": 60000,
            "x-dead-letter-exchange": "dlx",
            "x-ratio": 0.5,
            "x-flag": true,
            "x-nothing": null,
            "x-list": [1, "a"],
            "x-nested": {"inner": {"depth": 2}},
        }));

        let table = to_field_table(&arguments);

        assert_eq!(
            field(&table, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(60000))
        );
        assert_eq!(
            field(&table, "x-dead-letter-exchange"),
            Some(&AMQPValue::LongString("dlx".to_string().into()))
        );
        assert_eq!(field(&table, "x-ratio"), Some(&AMQPValue::Double(0.5)));
        assert_eq!(field(&table, "x-flag"), Some(&AMQPValue::Boolean(true)));
        assert_eq!(field(&table, "x-nothing"), Some(&AMQPValue::Void));
        assert_eq!(
            field(&table, "x-list"),
            Some(&AMQPValue::FieldArray(FieldArray::from(vec![
                AMQPValue::LongLongInt(1),
                AMQPValue::LongString("a".to_string().into()),
            ])))
        );

        let mut depth = FieldTable::default();
        depth.insert(ShortString::from("depth".to_string()), AMQPValue::LongLongInt(2));
        let mut nested = FieldTable::default();
        nested.insert(ShortString::from("inner".to_string()), AMQPValue::FieldTable(depth));
        assert_eq!(
            field(&table, "x-nested"),
            Some(&AMQPValue::FieldTable(nested))
        );
    }

    #[rstest]
    #[case("direct", ExchangeKind::Direct)]
    #[case("fanout", ExchangeKind::Fanout)]
    #[case("topic", ExchangeKind::Topic)]
    #[case("headers", ExchangeKind::Headers)]
    fn exchange_kind_parses(#[case] raw: &str, #[case] kind: ExchangeKind) {
        assert_eq!(raw.parse::<ExchangeKind>().unwrap(), kind);
        assert_eq!(kind.to_string(), raw);
    }

    #[test]
    fn unknown_exchange_kind_is_rejected() {
        assert!("x-delayed".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn worker_queue_is_durable_and_shared() {
        let queue = Queue::durable("tasks");
        assert!(queue.durable);
        assert!(!queue.exclusive);
        assert!(!queue.auto_delete);
        assert!(queue.validate().is_ok());
    }

    #[test]
    fn anonymous_queue_must_be_exclusive() {
        let mut queue = Queue::anonymous();
        assert!(queue.validate().is_ok());
        queue.exclusive = false;
        assert!(queue.validate().is_err());
    }

    #[test]
    fn binding_requires_names() {
        let binding = Binding::new(Destination::Queue("tasks".into()), "nori", "tasks");
        assert!(binding.validate().is_ok());
        assert_eq!(binding.destination.name(), "tasks");

        let binding = Binding::new(Destination::Exchange(String::new()), "nori", "tasks");
        assert!(binding.validate().is_err());

        let binding = Binding::new(Destination::Queue("tasks".into()), " ", "tasks");
        assert!(binding.validate().is_err());
    }

    #[test]
    fn exchange_requires_name() {
        assert!(Exchange::new("", ExchangeKind::Direct).validate().is_err());
        assert!(Exchange::new("nori", ExchangeKind::Topic).validate().is_ok());
    }
}
