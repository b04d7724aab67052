//! Relation wrappers and the batched prefetch plumbing.
//!
//! A relation field on a model is a wrapper type implementing [`Relation`].
//! The prefetch engine talks to wrappers only through that trait: it asks
//! for keys, obtains a type-erased loader, runs one batched query per
//! relation, and hands the batch back to each wrapper to attach its rows.

use std::any::Any;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use serde::{Serialize, Serializer};
use sqlx::AnyPool;

use crate::error::{OrmError, Result};
use crate::schema::{descriptor, Model};
use crate::value::{SqlValue, ToSqlValue};

/// Cardinality of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ToOne,
    ToMany,
}

/// A type-erased batch of related rows, downcast by the wrapper that knows
/// its row type.
pub struct RelatedRows {
    rows: Box<dyn Any + Send>,
}

impl RelatedRows {
    pub fn new<M: Send + 'static>(rows: Vec<M>) -> Self {
        Self {
            rows: Box::new(rows),
        }
    }

    pub fn downcast<M: 'static>(&self) -> Option<&Vec<M>> {
        self.rows.downcast_ref()
    }
}

/// Runs the batched query for one relation.
pub trait RelationLoader: Send + Sync {
    /// Fetches all rows whose `column` is in `keys`.
    fn fetch<'a>(
        &'a self,
        pool: &'a AnyPool,
        column: String,
        keys: Vec<SqlValue>,
    ) -> BoxFuture<'a, Result<RelatedRows>>;
}

/// Capability trait implemented by relation wrapper fields.
pub trait Relation: Send {
    fn kind(&self) -> RelationKind;

    /// The stored key: the referenced primary key for to-one wrappers, the
    /// owner key for to-many wrappers.
    fn key(&self) -> Option<SqlValue>;

    /// The foreign-key column on the related table, for to-many wrappers.
    fn related_column(&self) -> Option<&'static str> {
        None
    }

    /// Called after scanning to hand a to-many wrapper its owner key.
    fn seed(&mut self, related_column: &'static str, owner_key: SqlValue) {
        let _ = (related_column, owner_key);
    }

    fn loader(&self) -> Box<dyn RelationLoader>;

    /// Attaches the rows of this owner from a prefetched batch.
    fn attach(&mut self, batch: &RelatedRows, owner_key: &SqlValue);
}

pub(crate) struct BatchLoader<M> {
    marker: PhantomData<fn() -> M>,
}

impl<M> Default for BatchLoader<M> {
    fn default() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<M: Model + Clone> RelationLoader for BatchLoader<M> {
    fn fetch<'a>(
        &'a self,
        pool: &'a AnyPool,
        column: String,
        keys: Vec<SqlValue>,
    ) -> BoxFuture<'a, Result<RelatedRows>> {
        Box::pin(async move {
            let rows = M::query().filter(column, "IN", keys).all(pool).await?;
            Ok(RelatedRows::new(rows))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FkState<M> {
    Unset,
    Key(SqlValue),
    Loaded(Box<M>),
}

/// A to-one reference stored in a foreign-key column.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey<M> {
    state: FkState<M>,
}

impl<M> Default for ForeignKey<M> {
    fn default() -> Self {
        Self {
            state: FkState::Unset,
        }
    }
}

impl<M: Model> ForeignKey<M> {
    /// A reference by key only, not yet loaded.
    pub fn from_key(key: impl ToSqlValue) -> Self {
        match key.to_sql_value() {
            SqlValue::Null => Self::default(),
            value => Self {
                state: FkState::Key(value),
            },
        }
    }

    /// Rebuilds the wrapper from a scanned column value.
    pub fn from_value(value: Option<&SqlValue>) -> Self {
        match value {
            None | Some(SqlValue::Null) => Self::default(),
            Some(value) => Self {
                state: FkState::Key(value.clone()),
            },
        }
    }

    /// A loaded reference.
    pub fn from_row(row: M) -> Self {
        Self {
            state: FkState::Loaded(Box::new(row)),
        }
    }

    /// The value stored in the owning column: NULL while unset, otherwise
    /// the referenced primary key.
    pub fn to_value(&self) -> SqlValue {
        match &self.state {
            FkState::Unset => SqlValue::Null,
            FkState::Key(key) => key.clone(),
            FkState::Loaded(row) => row.pk(),
        }
    }

    /// The stored key, if any.
    pub fn key(&self) -> Option<SqlValue> {
        match &self.state {
            FkState::Unset => None,
            FkState::Key(key) => Some(key.clone()),
            FkState::Loaded(row) => Some(row.pk()),
        }
    }

    pub fn get(&self) -> Option<&M> {
        match &self.state {
            FkState::Loaded(row) => Some(row),
            _ => None,
        }
    }

    pub fn set(&mut self, row: M) {
        self.state = FkState::Loaded(Box::new(row));
    }

    pub fn clear(&mut self) {
        self.state = FkState::Unset;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, FkState::Loaded(_))
    }

    pub fn is_set(&self) -> bool {
        !matches!(self.state, FkState::Unset)
    }

    /// Loads the referenced row by its primary key.
    pub async fn fetch(&self, pool: &AnyPool) -> Result<M> {
        let key = self.key().ok_or(OrmError::NotFound)?;
        let related = descriptor::<M>();
        let pk_column = related
            .primary_column
            .ok_or_else(|| OrmError::MissingPrimaryKey(related.table.clone()))?;
        M::query().filter(pk_column, "=", key).first(pool).await
    }
}

impl<M: Model + Clone> Relation for ForeignKey<M> {
    fn kind(&self) -> RelationKind {
        RelationKind::ToOne
    }

    fn key(&self) -> Option<SqlValue> {
        ForeignKey::key(self)
    }

    fn loader(&self) -> Box<dyn RelationLoader> {
        Box::new(BatchLoader::<M>::default())
    }

    fn attach(&mut self, batch: &RelatedRows, _owner_key: &SqlValue) {
        let FkState::Key(key) = &self.state else {
            return;
        };
        let Some(rows) = batch.downcast::<M>() else {
            return;
        };
        if let Some(found) = rows.iter().find(|row| row.pk() == *key) {
            self.state = FkState::Loaded(Box::new(found.clone()));
        }
    }
}

impl<M: Model + Serialize> Serialize for ForeignKey<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.state {
            FkState::Loaded(row) => row.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

/// A nullable to-one reference. Identical to [`ForeignKey`] except the
/// unset state is a legitimate stored NULL rather than a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct NullForeignKey<M> {
    inner: ForeignKey<M>,
}

impl<M> Default for NullForeignKey<M> {
    fn default() -> Self {
        Self {
            inner: ForeignKey::default(),
        }
    }
}

impl<M: Model> NullForeignKey<M> {
    pub fn from_key(key: impl ToSqlValue) -> Self {
        Self {
            inner: ForeignKey::from_key(key),
        }
    }

    pub fn from_value(value: Option<&SqlValue>) -> Self {
        Self {
            inner: ForeignKey::from_value(value),
        }
    }

    pub fn from_row(row: M) -> Self {
        Self {
            inner: ForeignKey::from_row(row),
        }
    }

    pub fn to_value(&self) -> SqlValue {
        self.inner.to_value()
    }

    pub fn key(&self) -> Option<SqlValue> {
        self.inner.key()
    }

    pub fn get(&self) -> Option<&M> {
        self.inner.get()
    }

    pub fn set(&mut self, row: M) {
        self.inner.set(row);
    }

    pub fn set_null(&mut self) {
        self.inner.clear();
    }

    pub fn is_null(&self) -> bool {
        !self.inner.is_set()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    pub async fn fetch(&self, pool: &AnyPool) -> Result<M> {
        self.inner.fetch(pool).await
    }
}

impl<M: Model + Clone> Relation for NullForeignKey<M> {
    fn kind(&self) -> RelationKind {
        RelationKind::ToOne
    }

    fn key(&self) -> Option<SqlValue> {
        self.inner.key()
    }

    fn loader(&self) -> Box<dyn RelationLoader> {
        Relation::loader(&self.inner)
    }

    fn attach(&mut self, batch: &RelatedRows, owner_key: &SqlValue) {
        self.inner.attach(batch, owner_key);
    }
}

impl<M: Model + Serialize> Serialize for NullForeignKey<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

/// The virtual reverse side of a foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct OneToMany<M> {
    related_column: &'static str,
    owner_key: Option<SqlValue>,
    rows: Vec<M>,
}

impl<M> Default for OneToMany<M> {
    fn default() -> Self {
        Self {
            related_column: "",
            owner_key: None,
            rows: Vec::new(),
        }
    }
}

impl<M: Model> OneToMany<M> {
    pub fn new(related_column: &'static str) -> Self {
        Self {
            related_column,
            owner_key: None,
            rows: Vec::new(),
        }
    }

    /// Rows attached by a prefetch.
    pub fn rows(&self) -> &[M] {
        &self.rows
    }

    pub fn take_rows(&mut self) -> Vec<M> {
        std::mem::take(&mut self.rows)
    }

    /// Queries the related rows directly, bypassing any prefetched state.
    pub async fn all(&self, pool: &AnyPool) -> Result<Vec<M>> {
        let Some(owner_key) = self.owner_key.clone() else {
            return Err(OrmError::InvalidRelation {
                column: self.related_column.to_string(),
                table: descriptor::<M>().table.clone(),
            });
        };
        if self.related_column.is_empty() {
            return Err(OrmError::InvalidRelation {
                column: String::new(),
                table: descriptor::<M>().table.clone(),
            });
        }
        M::query()
            .filter(self.related_column, "=", owner_key)
            .all(pool)
            .await
    }
}

impl<M: Model + Clone> Relation for OneToMany<M> {
    fn kind(&self) -> RelationKind {
        RelationKind::ToMany
    }

    fn key(&self) -> Option<SqlValue> {
        self.owner_key.clone()
    }

    fn related_column(&self) -> Option<&'static str> {
        if self.related_column.is_empty() {
            None
        } else {
            Some(self.related_column)
        }
    }

    fn seed(&mut self, related_column: &'static str, owner_key: SqlValue) {
        self.related_column = related_column;
        self.owner_key = Some(owner_key);
    }

    fn loader(&self) -> Box<dyn RelationLoader> {
        Box::new(BatchLoader::<M>::default())
    }

    fn attach(&mut self, batch: &RelatedRows, owner_key: &SqlValue) {
        let Some(rows) = batch.downcast::<M>() else {
            return;
        };
        self.rows = rows
            .iter()
            .filter(|row| {
                row.relation(self.related_column)
                    .and_then(Relation::key)
                    .is_some_and(|key| key == *owner_key)
            })
            .cloned()
            .collect();
    }
}

impl<M: Model + Serialize> Serialize for OneToMany<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::schema::{ColumnDef, ColumnKind, Model, RowMap};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Tag {
        id: i64,
        name: String,
    }

    impl Model for Tag {
        fn columns() -> Vec<ColumnDef> {
            vec![
                ColumnDef::new("id", ColumnKind::BigInt).primary_key(),
                ColumnDef::new("name", ColumnKind::Text),
            ]
        }

        fn to_row(&self) -> RowMap {
            RowMap::new()
                .with("id", self.id)
                .with("name", self.name.as_str())
        }

        fn from_row(row: &RowMap) -> Result<Self> {
            Ok(Self {
                id: row.get_i64("id"),
                name: row.get_string("name"),
            })
        }

        fn pk(&self) -> SqlValue {
            SqlValue::Int(self.id)
        }
    }

    #[test]
    fn test_foreign_key_values() {
        let unset = ForeignKey::<Tag>::default();
        assert_eq!(unset.to_value(), SqlValue::Null);
        assert_eq!(unset.key(), None);

        let by_key = ForeignKey::<Tag>::from_key(3i64);
        assert_eq!(by_key.to_value(), SqlValue::Int(3));
        assert!(!by_key.is_loaded());

        let loaded = ForeignKey::from_row(Tag {
            id: 9,
            name: "x".to_string(),
        });
        assert_eq!(loaded.to_value(), SqlValue::Int(9));
        assert!(loaded.is_loaded());
    }

    #[test]
    fn test_foreign_key_from_null_value() {
        let fk = ForeignKey::<Tag>::from_value(Some(&SqlValue::Null));
        assert_eq!(fk.key(), None);
        let fk = ForeignKey::<Tag>::from_value(None);
        assert_eq!(fk.key(), None);
    }

    #[test]
    fn test_attach_picks_matching_row() {
        let batch = RelatedRows::new(vec![
            Tag {
                id: 1,
                name: "a".to_string(),
            },
            Tag {
                id: 2,
                name: "b".to_string(),
            },
        ]);
        let mut fk = ForeignKey::<Tag>::from_key(2i64);
        fk.attach(&batch, &SqlValue::Null);
        assert_eq!(fk.get().map(|tag| tag.id), Some(2));

        let mut missing = ForeignKey::<Tag>::from_key(5i64);
        missing.attach(&batch, &SqlValue::Null);
        assert!(!missing.is_loaded());
    }

    #[test]
    fn test_foreign_key_serializes_loaded_row_or_null() {
        let probe = WrapperProbe {
            fk: ForeignKey::<Tag>::from_key(1i64),
        };
        assert_eq!(serde_json::to_string(&probe).unwrap(), "{\"fk\":null}");

        let probe = WrapperProbe {
            fk: ForeignKey::from_row(Tag {
                id: 1,
                name: "a".to_string(),
            }),
        };
        assert_eq!(
            serde_json::to_string(&probe).unwrap(),
            "{\"fk\":{\"id\":1,\"name\":\"a\"}}"
        );
    }

    #[derive(serde::Serialize)]
    struct WrapperProbe {
        fk: ForeignKey<Tag>,
    }

    impl Serialize for Tag {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            use serde::ser::SerializeStruct;
            let mut state = serializer.serialize_struct("Tag", 2)?;
            state.serialize_field("id", &self.id)?;
            state.serialize_field("name", &self.name)?;
            state.end()
        }
    }
}
