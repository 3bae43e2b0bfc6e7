//! Five-way tagged variant for basic data.
//!
//! The tag bytes are part of the wire contract and must never be renumbered.

use std::fmt;

use crate::buffer::Buffer;
use crate::cursor::Cursor;
use crate::error::WireError;
use crate::traits::Wire;

/// Stable tag values for [`Value`] alternatives.
pub mod tag {
    pub const INTEGER: u8 = 0;
    pub const NUMBER: u8 = 1;
    pub const BOOLEAN: u8 = 2;
    pub const POINTER: u8 = 3;
    pub const STRING: u8 = 4;
}

/// A variant over the basic data types, usable as a mapped value in the
/// stable containers.
///
/// The pointer alternative travels as the textual form of its address, so
/// an image never carries a live pointer from the producer's address space.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Pointer(usize),
    String(String),
}

impl Value {
    pub fn tag(&self) -> u8 {
        match self {
            Value::Integer(_) => tag::INTEGER,
            Value::Number(_) => tag::NUMBER,
            Value::Boolean(_) => tag::BOOLEAN,
            Value::Pointer(_) => tag::POINTER,
            Value::String(_) => tag::STRING,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Integer(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Number(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Pointer(addr) => write!(f, "{addr:#x}"),
            Value::String(v) => write!(f, "{v}"),
        }
    }
}

fn parse_pointer(text: &str) -> Result<usize, WireError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    usize::from_str_radix(digits, 16).map_err(|_| WireError::BadPointer(text.to_string()))
}

impl Wire for Value {
    fn encode(&self, out: &mut Buffer) {
        out.append(&[self.tag()]);
        match self {
            Value::Integer(v) => v.encode(out),
            Value::Number(v) => v.encode(out),
            Value::Boolean(v) => v.encode(out),
            Value::Pointer(addr) => format!("{addr:#x}").encode(out),
            Value::String(v) => v.encode(out),
        }
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let tag_byte = cursor.take(1)?[0];
        match tag_byte {
            tag::INTEGER => Ok(Value::Integer(i64::decode(cursor)?)),
            tag::NUMBER => Ok(Value::Number(f64::decode(cursor)?)),
            tag::BOOLEAN => Ok(Value::Boolean(bool::decode(cursor)?)),
            tag::POINTER => {
                let text = String::decode(cursor)?;
                Ok(Value::Pointer(parse_pointer(&text)?))
            }
            tag::STRING => Ok(Value::String(String::decode(cursor)?)),
            other => Err(WireError::BadTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let mut buffer = Buffer::new();
        value.encode(&mut buffer);
        let mut cursor = Cursor::new(buffer.as_slice());
        let decoded = Value::decode(&mut cursor).expect("decode");
        assert_eq!(decoded, value);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn all_alternatives_roundtrip() {
        roundtrip(Value::Integer(-1));
        roundtrip(Value::Integer(i64::MAX));
        roundtrip(Value::Number(2.5));
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Pointer(0xdead_beef));
        roundtrip(Value::Pointer(0));
        roundtrip(Value::String("text".to_string()));
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(Value::Integer(0).tag(), 0);
        assert_eq!(Value::Number(0.0).tag(), 1);
        assert_eq!(Value::Boolean(false).tag(), 2);
        assert_eq!(Value::Pointer(0).tag(), 3);
        assert_eq!(Value::String(String::new()).tag(), 4);
    }

    #[test]
    fn pointer_travels_as_text() {
        let mut buffer = Buffer::new();
        Value::Pointer(0xABCD).encode(&mut buffer);
        let image = buffer.as_slice();
        assert_eq!(image[0], tag::POINTER);
        let mut cursor = Cursor::new(&image[1..]);
        let text = String::decode(&mut cursor).expect("pointer payload is a string");
        assert_eq!(text, "0xabcd");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let image = [9u8];
        let mut cursor = Cursor::new(&image);
        assert_eq!(Value::decode(&mut cursor), Err(WireError::BadTag(9)));
    }

    #[test]
    fn display_shows_active_alternative() {
        assert_eq!(Value::Integer(7).to_string(), "7");
        assert_eq!(Value::Pointer(0x10).to_string(), "0x10");
        assert_eq!(Value::String("s".to_string()).to_string(), "s");
    }
}
