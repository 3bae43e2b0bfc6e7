//! The `Wire` trait and its implementations for the base algebra.
//!
//! Fixed-layout values encode as their native bytes; strings and maps are
//! length-prefixed with a native `usize`. Map encoding follows `BTreeMap`
//! iteration order, i.e. sorted by key — the deterministic order tests rely
//! on.

use std::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::cursor::Cursor;
use crate::error::WireError;

/// A value that can be written to and read back from the wire format.
pub trait Wire: Sized {
    fn encode(&self, out: &mut Buffer);
    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError>;
}

macro_rules! wire_for_fixed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Wire for $ty {
                fn encode(&self, out: &mut Buffer) {
                    out.append(&self.to_ne_bytes());
                }

                fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
                    const WIDTH: usize = std::mem::size_of::<$ty>();
                    let raw = cursor.take(WIDTH)?;
                    let mut bytes = [0u8; WIDTH];
                    bytes.copy_from_slice(raw);
                    Ok(<$ty>::from_ne_bytes(bytes))
                }
            }
        )*
    };
}

wire_for_fixed!(u8, u16, u32, u64, i8, i16, i32, i64, usize, isize, f32, f64);

impl Wire for bool {
    fn encode(&self, out: &mut Buffer) {
        out.append(&[u8::from(*self)]);
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        Ok(cursor.take(1)?[0] != 0)
    }
}

impl Wire for String {
    fn encode(&self, out: &mut Buffer) {
        self.len().encode(out);
        out.append(self.as_bytes());
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let len = usize::decode(cursor)?;
        let raw = cursor.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }
}

impl<K: Wire + Ord, V: Wire> Wire for BTreeMap<K, V> {
    fn encode(&self, out: &mut Buffer) {
        self.len().encode(out);
        for (key, value) in self {
            key.encode(out);
            value.encode(out);
        }
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let count = usize::decode(cursor)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode(cursor)?;
            let value = V::decode(cursor)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}
