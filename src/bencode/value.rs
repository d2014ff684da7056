use bytes::Bytes;
use std::collections::BTreeMap;

/// A bencode value.
///
/// Bencode has four data types: integers, byte strings, lists, and
/// dictionaries. Dictionary entries live in a `BTreeMap`, so a value always
/// serializes in canonical key order no matter how it was built, and the
/// decoder only produces values whose input was canonical to begin with.
///
/// Reading is lookup-oriented: nearly every call site walks a decoded
/// dictionary (a metainfo file, a tracker response), so the typed `get_*`
/// helpers fold the key lookup and the type check into one step.
///
/// # Examples
///
/// ```
/// use lanbit::bencode::decode;
///
/// let value = decode(b"d4:porti6881e4:spam4:eggse").unwrap();
/// assert_eq!(value.get_integer(b"port"), Some(6881));
/// assert_eq!(value.get_utf8(b"spam"), Some("eggs"));
/// assert_eq!(value.get(b"missing"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys, held in sorted order.
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Byte-string value holding UTF-8 text.
    pub fn text(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// The integer payload, if this is an integer.
    pub fn integer(&self) -> Option<i64> {
        if let Value::Integer(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// The raw bytes, if this is a byte string.
    pub fn bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(b) = self {
            Some(b)
        } else {
            None
        }
    }

    /// The byte string viewed as UTF-8, if both hold.
    pub fn utf8(&self) -> Option<&str> {
        std::str::from_utf8(self.bytes()?).ok()
    }

    /// The elements, if this is a list.
    pub fn list(&self) -> Option<&[Value]> {
        if let Value::List(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// The entries, if this is a dictionary.
    pub fn dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        if let Value::Dict(entries) = self {
            Some(entries)
        } else {
            None
        }
    }

    /// Dictionary lookup; `None` for non-dictionaries and missing keys.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.dict()?.get(key)
    }

    /// Looks up an integer entry in a dictionary.
    pub fn get_integer(&self, key: &[u8]) -> Option<i64> {
        self.get(key)?.integer()
    }

    /// Looks up a byte-string entry in a dictionary.
    pub fn get_bytes(&self, key: &[u8]) -> Option<&[u8]> {
        self.get(key)?.bytes()
    }

    /// Looks up a UTF-8 byte-string entry in a dictionary.
    pub fn get_utf8(&self, key: &[u8]) -> Option<&str> {
        self.get(key)?.utf8()
    }
}
