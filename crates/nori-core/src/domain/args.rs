//! ArgMap / KWArgMap - タスク引数のコンテナ
//!
//! # ワイヤ表現
//! - `ArgMap`: JSON 配列。長さは `max(index) + 1` で、欠番は `null` になる
//! - `KWArgMap`: JSON オブジェクト（順序の保証なし）
//!
//! decode では配列の全要素（`null` を含む）がそれぞれの位置キーに入ります。
//! そのため欠番のある `ArgMap` は encode → decode で厳密には元に戻りません。
//! 欠番は「存在しない」、decode された `null` は「存在する null」です。

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 位置引数: index -> 任意の値
///
/// `BTreeMap` で保持するので、最大 index の取得と順序付き走査が安い。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgMap(BTreeMap<usize, Value>);

impl ArgMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 値を設定し、以前の値があれば返す。
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(index, value.into())
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(&index)
    }

    /// Handler 本体向けの取得。欠けていれば panic する。
    ///
    /// dispatch は panic を回収するので、ここでの panic は
    /// `TaskError::HandlerPanicked` になり consume ループは止まらない。
    pub fn must_get(&self, index: usize) -> &Value {
        match self.0.get(&index) {
            Some(value) => value,
            None => panic!("positional argument {index} is missing"),
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 存在する最大の index
    pub fn max_index(&self) -> Option<usize> {
        self.0.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.0.iter().map(|(index, value)| (*index, value))
    }

    /// ワイヤ表現と同じ、欠番を `null` で埋めた配列
    pub fn to_vec(&self) -> Vec<Value> {
        match self.max_index() {
            Some(max) => (0..=max)
                .map(|index| self.0.get(&index).cloned().unwrap_or(Value::Null))
                .collect(),
            None => Vec::new(),
        }
    }
}

impl From<Vec<Value>> for ArgMap {
    fn from(values: Vec<Value>) -> Self {
        Self(values.into_iter().enumerate().collect())
    }
}

impl FromIterator<(usize, Value)> for ArgMap {
    fn from_iter<I: IntoIterator<Item = (usize, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ArgMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.max_index().map_or(0, |max| max + 1);
        let mut seq = serializer.serialize_seq(Some(len))?;
        for index in 0..len {
            match self.0.get(&index) {
                Some(value) => seq.serialize_element(value)?,
                None => seq.serialize_element(&Value::Null)?,
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ArgMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // producer によっては "args": null を送ってくる
        let values = Option::<Vec<Value>>::deserialize(deserializer)?;
        Ok(values.map(ArgMap::from).unwrap_or_default())
    }
}

/// キーワード引数: 文字列キー -> 任意の値
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KWArgMap(Map<String, Value>);

impl KWArgMap {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Handler 本体向けの取得。欠けていれば panic する。
    pub fn must_get(&self, key: &str) -> &Value {
        match self.0.get(key) {
            Some(value) => value,
            None => panic!("keyword argument {key:?} is missing"),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for KWArgMap {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for KWArgMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Serialize for KWArgMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KWArgMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Option::<Map<String, Value>>::deserialize(deserializer)?;
        Ok(map.map(KWArgMap::from).unwrap_or_default())
    }
}

impl fmt::Display for ArgMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Array(self.to_vec()))
    }
}

impl fmt::Display for KWArgMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn arg_map_encodes_gaps_as_null() {
        let mut args = ArgMap::new();
        args.insert(0, "arg0");
        args.insert(2, 2);
        args.insert(3, 3.01);

        let encoded = serde_json::to_string(&args).unwrap();
        assert_eq!(encoded, r#"["arg0",null,2,3.01]"#);
    }

    #[test]
    fn arg_map_decode_keeps_null_as_present_value() {
        let args: ArgMap = serde_json::from_str(r#"["arg0",null,2,3.01]"#).unwrap();

        assert_eq!(args.len(), 4);
        assert_eq!(args.get(0), Some(&json!("arg0")));
        assert_eq!(args.get(1), Some(&Value::Null));
        assert!(args.contains(1));
        assert_eq!(args.get(2), Some(&json!(2)));
        assert_eq!(args.get(3), Some(&json!(3.01)));
    }

    #[test]
    fn arg_map_roundtrip_fills_every_index_up_to_max() {
        let mut args = ArgMap::new();
        args.insert(1, "b");
        args.insert(4, true);

        let encoded = serde_json::to_vec(&args).unwrap();
        let decoded: ArgMap = serde_json::from_slice(&encoded).unwrap();

        // 元のキーは全部残る
        for (index, value) in args.iter() {
            assert_eq!(decoded.get(index), Some(value));
        }
        // 欠番は null として埋まる
        assert_eq!(decoded.len(), 5);
        assert_eq!(decoded.get(0), Some(&Value::Null));
        assert_eq!(decoded.get(3), Some(&Value::Null));
        assert_ne!(decoded, args);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    fn arb_arg_map() -> impl Strategy<Value = BTreeMap<usize, Value>> {
        prop::collection::btree_map(0usize..64, arb_value(), 0..16)
    }

    proptest! {
        #[test]
        fn any_arg_map_survives_encode_decode(entries in arb_arg_map()) {
            let args: ArgMap = entries.clone().into_iter().collect();

            let encoded = serde_json::to_vec(&args).unwrap();
            let decoded: ArgMap = serde_json::from_slice(&encoded).unwrap();

            for (index, value) in &entries {
                prop_assert_eq!(decoded.get(*index), Some(value));
            }

            let expected_len = entries.keys().next_back().map_or(0, |max| max + 1);
            prop_assert_eq!(decoded.len(), expected_len);
            for index in (0..expected_len).filter(|index| !entries.contains_key(index)) {
                prop_assert_eq!(decoded.get(index), Some(&Value::Null));
            }
        }
    }

    #[test]
    fn empty_arg_map_encodes_as_empty_array() {
        assert_eq!(serde_json::to_string(&ArgMap::new()).unwrap(), "[]");
        assert_eq!(ArgMap::new().max_index(), None);
    }

    #[test]
    fn null_args_decode_to_empty_map() {
        let args: ArgMap = serde_json::from_str("null").unwrap();
        assert!(args.is_empty());

        let kwargs: KWArgMap = serde_json::from_str("null").unwrap();
        assert!(kwargs.is_empty());
    }

    #[test]
    #[should_panic(expected = "positional argument 1 is missing")]
    fn must_get_panics_on_absent_index() {
        let mut args = ArgMap::new();
        args.insert(0, 1);
        args.must_get(1);
    }

    #[test]
    fn kwarg_map_roundtrip() {
        let mut kwargs = KWArgMap::new();
        kwargs.insert("argKey", "argVal");
        kwargs.insert("n", 3);

        let encoded = serde_json::to_value(&kwargs).unwrap();
        assert_eq!(encoded, json!({"argKey": "argVal", "n": 3}));

        let decoded: KWArgMap = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, kwargs);
        assert_eq!(decoded.must_get("argKey"), &json!("argVal"));
        assert_eq!(decoded.get("missing"), None);
    }

    #[test]
    #[should_panic(expected = "keyword argument \"writeKey\" is missing")]
    fn kwarg_must_get_panics_on_absent_key() {
        KWArgMap::new().must_get("writeKey");
    }
}
