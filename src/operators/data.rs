//! Structured data decoding.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::sequence::Sequence;

impl Sequence<String> {
    /// Decode each element as a complete JSON document.
    pub fn json<V>(self) -> Sequence<V>
    where
        V: DeserializeOwned + Send + 'static,
    {
        self.try_map(|text| Ok(serde_json::from_str(&text)?))
    }

    /// Decode each element as one comma-separated row keyed by `columns`.
    ///
    /// Quoting is not supported; every comma separates a field.
    pub fn csv<N>(self, columns: N) -> Sequence<BTreeMap<String, String>>
    where
        N: IntoIterator,
        N::Item: Into<String>,
    {
        self.columns_named(columns, ",")
    }
}

impl<T: Serialize + Send + 'static> Sequence<T> {
    /// Encode each element as a single-line JSON document.
    pub fn to_json(self) -> Sequence<String> {
        self.try_map(|value| -> Result<String> { Ok(serde_json::to_string(&value)?) })
    }
}
