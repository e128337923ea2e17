use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Document, StoreError, StoredDocument};

/// Serializes an entity into a document body. A top-level `id` field is dropped because the
/// store keeps ids beside the data.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(other) => Err(StoreError::Malformed(format!(
            "expected an object, serialized {other}"
        ))),
        Err(err) => Err(StoreError::Malformed(err.to_string())),
    }
}

/// Rebuilds an entity from a stored document, reinstating its `id` field.
pub(crate) fn decode<T: DeserializeOwned>(document: StoredDocument) -> Result<T, StoreError> {
    let StoredDocument { id, mut data } = document;
    data.insert("id".to_string(), Value::String(id.0.clone()));
    serde_json::from_value(Value::Object(data))
        .map_err(|err| StoreError::Malformed(format!("{id}: {err}")))
}

pub(crate) fn decode_all<T: DeserializeOwned>(
    documents: Vec<StoredDocument>,
) -> Result<Vec<T>, StoreError> {
    documents.into_iter().map(decode).collect()
}

/// Single-field patch for `EntityStore::update`.
pub(crate) fn patch<I>(fields: I) -> Document
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Malformed(err.to_string()))
}
