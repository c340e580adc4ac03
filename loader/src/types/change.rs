use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ErrorKind, LoaderResult};
use crate::loader_error;
use crate::types::statement::{column_list, key_predicate, placeholders, quote_identifier};
use crate::types::{Cell, Statement, StatementShape};

/// Kind of a row-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Order in which merged buckets are applied.
    ///
    /// Deletes go first because they may free unique key values claimed by inserted or updated
    /// rows of the same cycle.
    pub const APPLY_ORDER: [ChangeKind; 3] =
        [ChangeKind::Delete, ChangeKind::Insert, ChangeKind::Update];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified name of a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns the back-tick quoted `schema`.`name` form.
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.quoted())
    }
}

/// Column layout and key metadata of a table, shared by every change of that table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: TableName,
    /// Every column of the table, in the order used for generated statements.
    pub columns: Vec<String>,
    /// Primary key columns, empty when the table has none.
    pub primary_key: Vec<String>,
    /// Additional unique keys, in preference order.
    pub unique_keys: Vec<Vec<String>>,
}

impl TableInfo {
    pub fn new(
        name: TableName,
        columns: Vec<String>,
        primary_key: Vec<String>,
        unique_keys: Vec<Vec<String>>,
    ) -> Self {
        Self {
            name,
            columns,
            primary_key,
            unique_keys,
        }
    }

    /// Returns the keys usable to identify a row, primary key first.
    pub fn key_candidates(&self) -> impl Iterator<Item = &[String]> {
        std::iter::once(self.primary_key.as_slice())
            .chain(self.unique_keys.iter().map(Vec::as_slice))
            .filter(|key| !key.is_empty())
    }
}

/// Identity of a row: the resolved key columns and their canonically encoded values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    columns: Vec<String>,
    values: Vec<String>,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (column, value)) in self.columns.iter().zip(&self.values).enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

/// One row-level change to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub table: Arc<TableInfo>,
    /// New row image, set for inserts and updates.
    pub values: HashMap<String, Cell>,
    /// Previous row image, set for updates and deletes.
    pub old_values: HashMap<String, Cell>,
}

impl Change {
    pub fn insert(table: Arc<TableInfo>, values: HashMap<String, Cell>) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table,
            values,
            old_values: HashMap::new(),
        }
    }

    pub fn update(
        table: Arc<TableInfo>,
        old_values: HashMap<String, Cell>,
        values: HashMap<String, Cell>,
    ) -> Self {
        Self {
            kind: ChangeKind::Update,
            table,
            values,
            old_values,
        }
    }

    pub fn delete(table: Arc<TableInfo>, old_values: HashMap<String, Cell>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table,
            values: HashMap::new(),
            old_values,
        }
    }

    pub fn table_name(&self) -> &TableName {
        &self.table.name
    }

    /// Returns the key identifying the row this change applies to.
    ///
    /// Inserts are identified by their new image, updates and deletes by their old image.
    pub fn row_key(&self) -> LoaderResult<RowKey> {
        self.resolve_row_key(self.key_image())
    }

    /// Returns the key of the row as it exists after this change.
    ///
    /// Differs from [`Change::row_key`] only for updates that change key values.
    pub fn new_row_key(&self) -> LoaderResult<RowKey> {
        match self.kind {
            ChangeKind::Insert | ChangeKind::Update => self.resolve_row_key(&self.values),
            ChangeKind::Delete => self.row_key(),
        }
    }

    /// Builds `DELETE FROM t WHERE key LIMIT 1` from the key image.
    pub fn delete_statement(&self) -> LoaderResult<Statement> {
        let image = self.key_image();
        let key_columns = self.resolve_key_columns(image)?.to_vec();
        let table = self.table_name();

        let sql = format!(
            "DELETE FROM {} WHERE {} LIMIT 1",
            table.quoted(),
            key_predicate(&key_columns)
        );
        let args = key_columns
            .iter()
            .map(|column| image.get(column).cloned().unwrap_or(Cell::Null))
            .collect();

        Ok(Statement {
            shape: StatementShape::Delete {
                table: table.clone(),
                key_columns,
            },
            sql,
            args,
        })
    }

    /// Builds `REPLACE INTO t(columns) VALUES (...)` over the full column list of the new image.
    pub fn replace_statement(&self) -> LoaderResult<Statement> {
        let columns = self.table.columns.clone();
        let table = self.table_name();

        let sql = format!(
            "REPLACE INTO {}({}) VALUES ({})",
            table.quoted(),
            column_list(&columns),
            placeholders(columns.len())
        );
        let args = self.row_values(&columns);

        Ok(Statement {
            shape: StatementShape::Replace {
                table: table.clone(),
                columns,
                rows: 1,
            },
            sql,
            args,
        })
    }

    /// Builds the statement matching the change kind: `INSERT`, `UPDATE` or `DELETE`.
    pub fn natural_statement(&self) -> LoaderResult<Statement> {
        match self.kind {
            ChangeKind::Insert => Ok(self.insert_statement()),
            ChangeKind::Update => self.update_statement(),
            ChangeKind::Delete => self.delete_statement(),
        }
    }

    fn insert_statement(&self) -> Statement {
        let columns = self.table.columns.clone();
        let table = self.table_name();

        let sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            table.quoted(),
            column_list(&columns),
            placeholders(columns.len())
        );
        let args = self.row_values(&columns);

        Statement {
            shape: StatementShape::Insert {
                table: table.clone(),
                columns,
            },
            sql,
            args,
        }
    }

    fn update_statement(&self) -> LoaderResult<Statement> {
        let key_columns = self.resolve_key_columns(&self.old_values)?.to_vec();
        let columns = self.table.columns.clone();
        let table = self.table_name();

        let assignments = columns
            .iter()
            .map(|column| format!("{} = ?", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} LIMIT 1",
            table.quoted(),
            assignments,
            key_predicate(&key_columns)
        );

        let mut args = self.row_values(&columns);
        args.extend(
            key_columns
                .iter()
                .map(|column| self.old_values.get(column).cloned().unwrap_or(Cell::Null)),
        );

        Ok(Statement {
            shape: StatementShape::Update {
                table: table.clone(),
                columns,
                key_columns,
            },
            sql,
            args,
        })
    }

    /// Returns the new image values in `columns` order, missing columns as `NULL`.
    pub(crate) fn row_values(&self, columns: &[String]) -> Vec<Cell> {
        columns
            .iter()
            .map(|column| self.values.get(column).cloned().unwrap_or(Cell::Null))
            .collect()
    }

    fn key_image(&self) -> &HashMap<String, Cell> {
        match self.kind {
            ChangeKind::Insert => &self.values,
            ChangeKind::Update | ChangeKind::Delete => &self.old_values,
        }
    }

    fn resolve_key_columns(&self, image: &HashMap<String, Cell>) -> LoaderResult<&[String]> {
        self.table
            .key_candidates()
            .find(|key| {
                key.iter()
                    .all(|column| image.get(column).is_some_and(|value| !value.is_null()))
            })
            .ok_or_else(|| {
                loader_error!(
                    ErrorKind::KeyResolutionFailed,
                    "Change record has no usable key",
                    format!(
                        "{} change on {} has no primary or unique key with all values present",
                        self.kind,
                        self.table_name()
                    )
                )
            })
    }

    fn resolve_row_key(&self, image: &HashMap<String, Cell>) -> LoaderResult<RowKey> {
        let columns = self.resolve_key_columns(image)?.to_vec();
        let values = columns
            .iter()
            .filter_map(|column| image.get(column))
            .map(Cell::key_encoding)
            .collect();

        Ok(RowKey { columns, values })
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.table_name())?;
        if let Ok(key) = self.row_key() {
            write!(f, " ({key})")?;
        }
        Ok(())
    }
}
