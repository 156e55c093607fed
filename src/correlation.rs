use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Number;
use std::fmt;
use uuid::Uuid;

/// Transaction identifier used to match RPC requests and replies.
///
/// Chosen by the caller and carried in-band as the envelope's `tid` field.
/// Peers may use any JSON number or a string on the wire; UUIDs travel as
/// strings. The transport never interprets it, and the correlation layer
/// only needs equality and hashing.
///
/// Integers equal to each other compare equal whatever their width. A
/// number and a string never do (`1` is not `"1"`), and neither do `1`
/// and `1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionId {
    /// Integer transaction id that fits `i64` (e.g. a monotonic counter).
    Int(i64),
    /// Integer transaction id above `i64::MAX`.
    UInt(u64),
    /// Non-integer number, kept as its JSON text.
    Num(String),
    /// String transaction id (e.g. a UUID).
    Str(String),
}

impl TransactionId {
    /// Generate a new unique transaction id (UUID v4, string form).
    pub fn generate() -> Self {
        Self::Str(Uuid::new_v4().to_string())
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // ---
        match self {
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::UInt(n) => serializer.serialize_u64(*n),
            Self::Num(text) => text
                .parse::<Number>()
                .map_err(serde::ser::Error::custom)?
                .serialize(serializer),
            Self::Str(s) => serializer.serialize_str(s),
        }
    }
}

struct TransactionIdVisitor;

impl<'de> Visitor<'de> for TransactionIdVisitor {
    type Value = TransactionId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON number or string")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(TransactionId::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(TransactionId::from(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        // ---
        Number::from_f64(value)
            .map(|n| TransactionId::Num(n.to_string()))
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(TransactionId::Str(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(TransactionId::Str(value))
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TransactionIdVisitor)
    }
}

impl From<i64> for TransactionId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for TransactionId {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(n) => Self::Int(n),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<i32> for TransactionId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for TransactionId {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self::Str(uuid.to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::UInt(n) => write!(f, "{n}"),
            Self::Num(text) | Self::Str(text) => f.write_str(text),
        }
    }
}
