use serde::de::DeserializeOwned;

use super::error::WorkflowError;
use super::store::records::{decode, decode_all};
use super::store::{Collection, DocumentId, EntityStore, Query, StoreError};

/// Reads and decodes one entity, turning absence into a typed `NotFound`.
pub(crate) fn fetch<S, T>(
    store: &S,
    collection: Collection,
    id: &DocumentId,
    entity: &'static str,
) -> Result<T, WorkflowError>
where
    S: EntityStore + ?Sized,
    T: DeserializeOwned,
{
    let document = store
        .get(collection, id)?
        .ok_or_else(|| WorkflowError::not_found(entity, id))?;
    Ok(decode(document)?)
}

pub(crate) fn fetch_all<S, T>(store: &S, query: &Query) -> Result<Vec<T>, WorkflowError>
where
    S: EntityStore + ?Sized,
    T: DeserializeOwned,
{
    let documents = store.query(query)?;
    Ok(decode_all(documents)?)
}

/// Maps a store-level `NotFound` on a write to the entity that vanished.
pub(crate) fn missing_as<'a>(
    entity: &'static str,
    id: &'a DocumentId,
) -> impl FnOnce(StoreError) -> WorkflowError + 'a {
    move |err| match err {
        StoreError::NotFound => WorkflowError::not_found(entity, id),
        other => other.into(),
    }
}
