//! Model metadata: column definitions, descriptors, the registry, and row
//! materialization.
//!
//! Models register their schema explicitly through [`Model::columns`];
//! nothing is inferred from field layout. Descriptors are cached per model
//! type (and table override) so repeated queries share one `Arc`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use chrono::NaiveDateTime;
use sqlx::any::AnyRow;
use sqlx::{Column, Row};

use crate::error::{OrmError, Result};
use crate::query::Query;
use crate::relation::Relation;
use crate::value::{parse_datetime, SqlValue, ToSqlValue};

/// Lazily resolves the descriptor of a related model. A plain function
/// pointer so column kinds stay `Copy` and comparable, and so
/// self-referential models terminate.
pub type RelatedFn = fn() -> Arc<ModelDescriptor>;

/// Action taken on referenced-row update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    NoAction,
}

impl ReferentialAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Restrict => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// The storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnKind {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Timestamp,
    /// References another model's primary key.
    ForeignKey { related: RelatedFn },
    /// Virtual reverse side of a foreign key; never stored.
    OneToMany {
        related_column: &'static str,
        related: RelatedFn,
    },
}

impl ColumnKind {
    /// A foreign key referencing `M`.
    pub fn foreign_key<M: Model>() -> Self {
        Self::ForeignKey {
            related: descriptor::<M>,
        }
    }

    /// The reverse side of the foreign key stored in `related_column` on `M`.
    pub fn one_to_many<M: Model>(related_column: &'static str) -> Self {
        Self::OneToMany {
            related_column,
            related: descriptor::<M>,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::OneToMany { .. })
    }
}

/// A column declaration, built in model `columns()` registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub primary_key: bool,
    pub null: bool,
    pub max_length: Option<u32>,
    pub type_override: Option<&'static str>,
    pub default_sql: Option<&'static str>,
    pub unique: bool,
    pub with_time_zone: bool,
    pub on_update: Option<ReferentialAction>,
    pub on_delete: Option<ReferentialAction>,
}

impl ColumnDef {
    pub fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            null: false,
            max_length: None,
            type_override: None,
            default_sql: None,
            unique: false,
            with_time_zone: false,
            on_update: None,
            on_delete: None,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, length: u32) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Overrides the rendered type, keeping key/null/reference parts.
    #[must_use]
    pub fn type_override(mut self, sql_type: &'static str) -> Self {
        self.type_override = Some(sql_type);
        self
    }

    /// Appends `DEFAULT <sql>` to the definition, verbatim.
    #[must_use]
    pub fn default_sql(mut self, sql: &'static str) -> Self {
        self.default_sql = Some(sql);
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn with_time_zone(mut self) -> Self {
        self.with_time_zone = true;
        self
    }

    #[must_use]
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }
}

/// Per-model options. The table override participates in the descriptor
/// cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelConfig {
    pub table: Option<String>,
}

/// Cached metadata for one model type.
#[derive(Debug)]
pub struct ModelDescriptor {
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub primary_column: Option<&'static str>,
}

impl ModelDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_column_def(&self) -> Option<&ColumnDef> {
        self.primary_column.and_then(|name| self.column(name))
    }

    /// Decodes a result row into a [`RowMap`] keyed by column name. Result
    /// columns the model does not declare are an error; virtual columns
    /// never appear in results.
    pub fn scan_row(&self, row: &AnyRow) -> Result<RowMap> {
        let mut data = RowMap::new();
        for (index, result_column) in row.columns().iter().enumerate() {
            let name = result_column.name();
            let column = self.column(name).ok_or_else(|| OrmError::UnknownColumn {
                column: name.to_string(),
                table: self.table.clone(),
            })?;
            if column.kind.is_virtual() {
                continue;
            }
            data.insert(name, decode_value(row, index, &column.kind)?);
        }
        Ok(data)
    }
}

fn decode_value(row: &AnyRow, index: usize, kind: &ColumnKind) -> Result<SqlValue> {
    let value = match kind {
        ColumnKind::Bool => match row.try_get::<Option<bool>, _>(index) {
            Ok(value) => value.map(SqlValue::Bool),
            // Engines with integer affinity hand booleans back as 0/1.
            Err(_) => row
                .try_get::<Option<i64>, _>(index)?
                .map(|value| SqlValue::Bool(value != 0)),
        },
        ColumnKind::TinyInt | ColumnKind::SmallInt | ColumnKind::Int | ColumnKind::BigInt => {
            row.try_get::<Option<i64>, _>(index)?.map(SqlValue::Int)
        }
        ColumnKind::Float | ColumnKind::Double => {
            row.try_get::<Option<f64>, _>(index)?.map(SqlValue::Float)
        }
        ColumnKind::Text => row.try_get::<Option<String>, _>(index)?.map(SqlValue::Text),
        ColumnKind::Timestamp => row
            .try_get::<Option<String>, _>(index)?
            .map(|text| parse_datetime(&text))
            .transpose()?
            .map(SqlValue::Timestamp),
        ColumnKind::ForeignKey { related } => {
            let related_descriptor = related();
            let pk = related_descriptor.primary_column_def().ok_or_else(|| {
                OrmError::MissingPrimaryKey(related_descriptor.table.clone())
            })?;
            if matches!(
                pk.kind,
                ColumnKind::ForeignKey { .. } | ColumnKind::OneToMany { .. }
            ) {
                return Err(OrmError::Conversion(format!(
                    "primary key of '{}' is not a scalar column",
                    related_descriptor.table
                )));
            }
            return decode_value(row, index, &pk.kind);
        }
        ColumnKind::OneToMany { .. } => None,
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Column-name-to-value mapping used for writes and map materialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    values: HashMap<String, SqlValue>,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl ToSqlValue) -> Self {
        self.insert(column, value.to_sql_value());
        self
    }

    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.values.iter()
    }

    /// Column names in sorted order, for deterministic map-driven writes.
    pub fn sorted_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.values.keys().cloned().collect();
        columns.sort();
        columns
    }

    /// Missing and NULL entries read as zero; a partial select leaves the
    /// untouched fields at their defaults.
    pub fn get_i64(&self, column: &str) -> i64 {
        match self.values.get(column) {
            Some(SqlValue::Int(value)) => *value,
            _ => 0,
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> Option<i64> {
        match self.values.get(column) {
            Some(SqlValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_f64(&self, column: &str) -> f64 {
        match self.values.get(column) {
            Some(SqlValue::Float(value)) => *value,
            _ => 0.0,
        }
    }

    pub fn get_opt_f64(&self, column: &str) -> Option<f64> {
        match self.values.get(column) {
            Some(SqlValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, column: &str) -> bool {
        matches!(self.values.get(column), Some(SqlValue::Bool(true)))
    }

    pub fn get_opt_bool(&self, column: &str) -> Option<bool> {
        match self.values.get(column) {
            Some(SqlValue::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_string(&self, column: &str) -> String {
        match self.values.get(column) {
            Some(SqlValue::Text(value)) => value.clone(),
            _ => String::new(),
        }
    }

    pub fn get_opt_string(&self, column: &str) -> Option<String> {
        match self.values.get(column) {
            Some(SqlValue::Text(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn get_timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        match self.values.get(column) {
            Some(SqlValue::Timestamp(value)) => Some(*value),
            _ => None,
        }
    }
}

/// A database-backed type with an explicit schema.
pub trait Model: Sized + Send + Sync + 'static {
    /// Table name; defaults to the lowercased type name.
    fn table() -> String {
        default_table_name::<Self>()
    }

    /// The schema declaration. Order here is the DDL and insert order.
    fn columns() -> Vec<ColumnDef>;

    /// The row image of this instance, keyed by column name.
    fn to_row(&self) -> RowMap;

    /// Rebuilds an instance from a scanned row.
    fn from_row(row: &RowMap) -> Result<Self>;

    /// The current primary-key value.
    fn pk(&self) -> SqlValue;

    /// Read access to the relation wrapper stored under `column`, if any.
    fn relation(&self, column: &str) -> Option<&dyn Relation> {
        let _ = column;
        None
    }

    /// Write access to the relation wrapper stored under `column`, if any.
    fn relation_mut(&mut self, column: &str) -> Option<&mut dyn Relation> {
        let _ = column;
        None
    }

    /// Starts a query against this model's table.
    fn query<'t>() -> Query<'t, Self> {
        Query::new(descriptor::<Self>())
    }

    /// Starts a query with per-model options (e.g. a table override).
    fn query_with<'t>(config: ModelConfig) -> Query<'t, Self> {
        Query::new(descriptor_with::<Self>(config))
    }
}

pub(crate) fn default_table_name<T>() -> String {
    std::any::type_name::<T>()
        .rsplit("::")
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

type RegistryKey = (TypeId, Option<String>);

static REGISTRY: OnceLock<RwLock<HashMap<RegistryKey, Arc<ModelDescriptor>>>> = OnceLock::new();

/// Returns the cached descriptor for `T`, building it on first use.
pub fn descriptor<T: Model>() -> Arc<ModelDescriptor> {
    descriptor_with::<T>(ModelConfig::default())
}

/// Returns the cached descriptor for `T` under `config`.
///
/// # Panics
///
/// Panics when the schema declaration is malformed: duplicate column names
/// or more than one primary key.
pub fn descriptor_with<T: Model>(config: ModelConfig) -> Arc<ModelDescriptor> {
    let key: RegistryKey = (TypeId::of::<T>(), config.table.clone());
    let registry = REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(found) = registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Arc::clone(found);
    }

    let columns = T::columns();
    let mut primary_column = None;
    for (index, column) in columns.iter().enumerate() {
        if columns[..index].iter().any(|other| other.name == column.name) {
            panic!(
                "model '{}' declares column '{}' twice",
                std::any::type_name::<T>(),
                column.name
            );
        }
        if column.primary_key {
            if primary_column.is_some() {
                panic!(
                    "model '{}' declares more than one primary key",
                    std::any::type_name::<T>()
                );
            }
            primary_column = Some(column.name);
        }
    }

    let table = config.table.clone().unwrap_or_else(T::table);
    let descriptor = Arc::new(ModelDescriptor {
        table,
        columns,
        primary_column,
    });
    Arc::clone(
        registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(descriptor),
    )
}
