//! Operation table for the persistent channel.
//!
//! Each operation declares its parameters up front. Incoming arguments are
//! coerced against that schema before the call is built, so handlers only
//! ever see well-typed values.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::{
    common::{HanabiError, HanabiResult},
    interop::envelope::Payload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    U64,
    I64,
    Str,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar(Kind),
    /// Missing and `null` both decode to `null`.
    Optional(Kind),
    /// Missing and `null` both decode to an empty list.
    List(Kind),
}

pub type Schema = &'static [(&'static str, Shape)];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("operation `{0}` is registered twice")]
    DuplicateOp(&'static str),
    #[error("operation `{op}` declares `{param}` twice")]
    DuplicateParam { op: &'static str, param: &'static str },
    #[error("operation names must not be empty")]
    EmptyName,
}

const VOICE: (&str, Shape) = ("voice_id", Shape::Scalar(Kind::U64));

/// Every operation the channel understands.
pub const OPERATIONS: &[(&str, Schema)] = &[
    ("heartbeat", &[("timestamp", Shape::Optional(Kind::U64))]),
    ("init-complete", &[("child_name", Shape::Scalar(Kind::Str))]),
    (
        "connect",
        &[
            ("guild_id", Shape::Scalar(Kind::U64)),
            VOICE,
            ("channel_id", Shape::Scalar(Kind::U64)),
        ],
    ),
    ("delete", &[VOICE]),
    ("disconnect", &[VOICE]),
    ("shutdown", &[]),
    ("reinit", &[]),
    (
        "play",
        &[
            VOICE,
            ("requester", Shape::Scalar(Kind::U64)),
            ("title", Shape::Scalar(Kind::Str)),
            ("position", Shape::Optional(Kind::U64)),
        ],
    ),
    ("pause", &[VOICE, ("setting", Shape::Scalar(Kind::Str))]),
    (
        "skip",
        &[
            VOICE,
            ("by", Shape::Optional(Kind::I64)),
            ("to", Shape::Optional(Kind::U64)),
        ],
    ),
    (
        "volume",
        &[
            VOICE,
            ("requester", Shape::Scalar(Kind::U64)),
            ("setting", Shape::Scalar(Kind::Str)),
        ],
    ),
    ("repeat-mode", &[VOICE, ("mode", Shape::Scalar(Kind::Str))]),
    (
        "enqueue",
        &[
            VOICE,
            ("name", Shape::Scalar(Kind::Str)),
            ("owner", Shape::Scalar(Kind::U64)),
            ("requester", Shape::Scalar(Kind::U64)),
            ("shuffle", Shape::Scalar(Kind::Bool)),
            ("mode", Shape::Scalar(Kind::Str)),
            ("bypass_owner", Shape::Scalar(Kind::Bool)),
        ],
    ),
    (
        "dequeue",
        &[
            VOICE,
            ("positions", Shape::List(Kind::U64)),
            ("requester", Shape::Optional(Kind::U64)),
        ],
    ),
    ("stop", &[VOICE]),
    ("display-queue", &[VOICE, ("amount", Shape::Optional(Kind::U64))]),
    ("display-playback", &[VOICE]),
    ("states", &[]),
];

pub struct OpTable {
    ops: HashMap<&'static str, Schema>,
}

impl OpTable {
    /// Validates and indexes `operations`.
    pub fn new(operations: &[(&'static str, Schema)]) -> Result<Self, SchemaError> {
        let mut ops = HashMap::with_capacity(operations.len());
        for &(name, schema) in operations {
            if name.is_empty() {
                return Err(SchemaError::EmptyName);
            }
            for (i, &(param, _)) in schema.iter().enumerate() {
                if param.is_empty() {
                    return Err(SchemaError::EmptyName);
                }
                if schema[..i].iter().any(|&(other, _)| other == param) {
                    return Err(SchemaError::DuplicateParam { op: name, param });
                }
            }
            if ops.insert(name, schema).is_some() {
                return Err(SchemaError::DuplicateOp(name));
            }
        }
        Ok(Self { ops })
    }

    pub fn standard() -> Result<Self, SchemaError> {
        Self::new(OPERATIONS)
    }

    pub fn contains(&self, op: &str) -> bool {
        self.ops.contains_key(op)
    }

    /// Coerces `raw` against the schema of `op`. `None` if `op` is unknown.
    /// Keys the schema doesn't mention are dropped.
    pub fn coerce(&self, op: &str, raw: &Payload) -> Option<HanabiResult<Args>> {
        let schema = self.ops.get(op)?;
        Some(coerce(schema, raw))
    }
}

fn coerce(schema: Schema, raw: &Payload) -> HanabiResult<Args> {
    let mut args = Payload::new();
    for &(name, shape) in schema {
        let value = raw.get(name).filter(|v| !v.is_null());
        let coerced = match (shape, value) {
            (Shape::Scalar(_), None) => {
                return Err(HanabiError::MalformedRequest(format!(
                    "missing parameter `{}`",
                    name
                )));
            }
            (Shape::Scalar(kind), Some(v)) => scalar(name, kind, v)?,
            (Shape::Optional(_), None) => Value::Null,
            (Shape::Optional(kind), Some(v)) => scalar(name, kind, v)?,
            (Shape::List(_), None) => Value::Array(Vec::new()),
            (Shape::List(kind), Some(Value::Array(items))) => Value::Array(
                items
                    .iter()
                    .map(|item| scalar(name, kind, item))
                    .collect::<HanabiResult<Vec<Value>>>()?,
            ),
            (Shape::List(_), Some(other)) => {
                return Err(HanabiError::MalformedRequest(format!(
                    "`{}` must be a list, got {}",
                    name, other
                )));
            }
        };
        args.insert(name.to_string(), coerced);
    }
    Ok(Args(args))
}

fn scalar(name: &str, kind: Kind, value: &Value) -> HanabiResult<Value> {
    let coerced = match (kind, value) {
        (Kind::U64, Value::Number(n)) => n.as_u64().map(Value::from),
        (Kind::U64, Value::String(s)) => s.trim().parse::<u64>().ok().map(Value::from),
        (Kind::I64, Value::Number(n)) => n.as_i64().map(Value::from),
        (Kind::I64, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (Kind::Str, Value::String(s)) => Some(Value::from(s.as_str())),
        (Kind::Str, Value::Number(n)) => Some(Value::from(n.to_string())),
        (Kind::Bool, Value::Bool(b)) => Some(Value::from(*b)),
        (Kind::Bool, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::from(true)),
            "false" => Some(Value::from(false)),
            _ => None,
        },
        _ => None,
    };
    coerced.ok_or_else(|| {
        HanabiError::MalformedRequest(format!("`{}` is not a valid {:?}: {}", name, kind, value))
    })
}

/// Arguments already coerced against an operation's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Args(Payload);

impl Args {
    fn missing(name: &str) -> HanabiError {
        HanabiError::MalformedRequest(format!("missing parameter `{}`", name))
    }

    pub fn u64(&self, name: &str) -> HanabiResult<u64> {
        self.opt_u64(name)?.ok_or_else(|| Self::missing(name))
    }

    pub fn opt_u64(&self, name: &str) -> HanabiResult<Option<u64>> {
        Ok(self.0.get(name).and_then(Value::as_u64))
    }

    pub fn opt_i64(&self, name: &str) -> HanabiResult<Option<i64>> {
        Ok(self.0.get(name).and_then(Value::as_i64))
    }

    pub fn str(&self, name: &str) -> HanabiResult<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| Self::missing(name))
    }

    pub fn bool(&self, name: &str) -> HanabiResult<bool> {
        self.0
            .get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing(name))
    }

    pub fn list_u64(&self, name: &str) -> HanabiResult<Vec<u64>> {
        Ok(self
            .0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn standard_table_is_valid() {
        let table = OpTable::standard().unwrap();
        for name in ["heartbeat", "init-complete", "delete", "display-queue", "dequeue"] {
            assert!(table.contains(name));
        }
        assert!(table.coerce("dance", &Payload::new()).is_none());
    }

    #[test]
    fn registration_rejects_duplicates() {
        let dup_op: &[(&str, Schema)] = &[("a", &[]), ("a", &[])];
        assert_eq!(OpTable::new(dup_op).err(), Some(SchemaError::DuplicateOp("a")));

        let dup_param: &[(&str, Schema)] = &[("a", &[VOICE, VOICE])];
        assert_eq!(
            OpTable::new(dup_param).err(),
            Some(SchemaError::DuplicateParam { op: "a", param: "voice_id" })
        );

        let empty: &[(&str, Schema)] = &[("", &[])];
        assert_eq!(OpTable::new(empty).err(), Some(SchemaError::EmptyName));
    }

    #[test]
    fn ids_arrive_as_numbers_or_strings() {
        let table = OpTable::standard().unwrap();
        let args = table
            .coerce(
                "connect",
                &payload(json!({"guild_id": "1", "voice_id": 10, "channel_id": "20", "extra": 1})),
            )
            .unwrap()
            .unwrap();
        assert_eq!(args.u64("guild_id").unwrap(), 1);
        assert_eq!(args.u64("voice_id").unwrap(), 10);
        assert_eq!(args.u64("channel_id").unwrap(), 20);
    }

    #[test]
    fn optional_and_list_parameters_default() {
        let table = OpTable::standard().unwrap();
        let args = table
            .coerce("dequeue", &payload(json!({"voice_id": 10, "requester": null})))
            .unwrap()
            .unwrap();
        assert_eq!(args.list_u64("positions").unwrap(), Vec::<u64>::new());
        assert_eq!(args.opt_u64("requester").unwrap(), None);

        let args = table
            .coerce("dequeue", &payload(json!({"voice_id": 10, "positions": [2, "3"]})))
            .unwrap()
            .unwrap();
        assert_eq!(args.list_u64("positions").unwrap(), vec![2, 3]);

        let args = table
            .coerce("skip", &payload(json!({"voice_id": 10, "by": "-2"})))
            .unwrap()
            .unwrap();
        assert_eq!(args.opt_i64("by").unwrap(), Some(-2));
        assert_eq!(args.opt_u64("to").unwrap(), None);
    }

    #[test]
    fn bad_arguments_are_malformed_requests() {
        let table = OpTable::standard().unwrap();
        let missing = table.coerce("delete", &Payload::new()).unwrap().unwrap_err();
        assert!(matches!(missing, HanabiError::MalformedRequest(m) if m.contains("voice_id")));

        let wrong = table
            .coerce("pause", &payload(json!({"voice_id": "ten", "setting": "toggle"})))
            .unwrap()
            .unwrap_err();
        assert!(matches!(wrong, HanabiError::MalformedRequest(_)));

        let not_list = table
            .coerce("dequeue", &payload(json!({"voice_id": 1, "positions": 3})))
            .unwrap()
            .unwrap_err();
        assert!(matches!(not_list, HanabiError::MalformedRequest(_)));
    }
}
