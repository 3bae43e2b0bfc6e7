//! Hierarchical map: a table of values plus named sub-tables.

use std::collections::BTreeMap;

use crate::buffer::Buffer;
use crate::cursor::Cursor;
use crate::error::WireError;
use crate::traits::Wire;

/// An ordered key→value table that can also hold nested tables by key.
///
/// Encodes as `data` followed by `sub`, each in plain map encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedMap<K: Ord, V> {
    /// Key→value pairs holding the actual data.
    pub data: BTreeMap<K, V>,
    /// Sub-tables, each under a unique key.
    pub sub: BTreeMap<K, NestedMap<K, V>>,
}

impl<K: Ord, V> NestedMap<K, V> {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            sub: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.sub.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.sub.is_empty()
    }
}

impl<K: Ord + Clone, V: Clone> NestedMap<K, V> {
    /// Merge the other map into this one, sub-tables included. Existing
    /// entries with the same key are replaced.
    pub fn merge(&mut self, other: &NestedMap<K, V>) {
        for (key, value) in &other.data {
            self.data.insert(key.clone(), value.clone());
        }
        for (key, sub) in &other.sub {
            self.sub.insert(key.clone(), sub.clone());
        }
    }

    /// The value under `key`, or `V::default()` when absent.
    pub fn value_or_default(&self, key: &K) -> V
    where
        V: Default,
    {
        self.data.get(key).cloned().unwrap_or_default()
    }
}

impl<K: Ord + Clone, V> FromIterator<(K, V)> for NestedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
            sub: BTreeMap::new(),
        }
    }
}

impl<K: Wire + Ord, V: Wire> Wire for NestedMap<K, V> {
    fn encode(&self, out: &mut Buffer) {
        self.data.encode(out);
        self.sub.encode(out);
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let data = BTreeMap::decode(cursor)?;
        let sub = BTreeMap::decode(cursor)?;
        Ok(Self { data, sub })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn roundtrip_with_sub_tables() {
        let mut map = NestedMap::<String, Value>::new();
        map.data
            .insert("answer".to_string(), Value::Integer(42));
        map.data
            .insert("label".to_string(), Value::String("deep".to_string()));
        let mut inner = NestedMap::new();
        inner
            .data
            .insert("ratio".to_string(), Value::Number(0.5));
        map.sub.insert("nested".to_string(), inner);

        let mut buffer = Buffer::new();
        map.encode(&mut buffer);
        let mut cursor = Cursor::new(buffer.as_slice());
        let decoded = NestedMap::decode(&mut cursor).expect("decode nested map");
        assert_eq!(decoded, map);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn merge_replaces_and_adds() {
        let mut left: NestedMap<String, i64> =
            [("a".to_string(), 1), ("b".to_string(), 2)].into_iter().collect();
        let right: NestedMap<String, i64> =
            [("b".to_string(), 20), ("c".to_string(), 30)].into_iter().collect();
        left.merge(&right);
        assert_eq!(left.data.get("a"), Some(&1));
        assert_eq!(left.data.get("b"), Some(&20));
        assert_eq!(left.data.get("c"), Some(&30));
    }

    #[test]
    fn value_or_default_on_missing_key() {
        let map: NestedMap<String, i64> = NestedMap::new();
        assert_eq!(map.value_or_default(&"missing".to_string()), 0);
    }
}
