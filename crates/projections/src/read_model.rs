//! Row types stored by a query store.

use common::AggregateId;
use serde::{Serialize, de::DeserializeOwned};

/// A denormalized row keyed by the id of the aggregate it was projected from.
///
/// Rows are stored as JSON; query filters compare fields of that JSON form,
/// so the serde field names are the queryable names.
pub trait ReadModel: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name under which rows of this type are stored, e.g. `"deliveries"`.
    const MODEL: &'static str;

    fn id(&self) -> AggregateId;
}
