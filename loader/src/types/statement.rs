use std::fmt;

use crate::types::{Cell, TableName};

/// Structured form of a generated statement.
///
/// Mirrors what the SQL text does so that non-SQL databases can apply the statement without
/// parsing it. Arguments are always carried by [`Statement::args`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatementShape {
    /// Deletes at most one row matching every key column. Arguments are the key values.
    Delete {
        table: TableName,
        key_columns: Vec<String>,
    },
    /// Inserts `rows` rows, first removing any row that conflicts on a unique key. Arguments are
    /// laid out row-major over `columns`.
    Replace {
        table: TableName,
        columns: Vec<String>,
        rows: usize,
    },
    /// Inserts one row. Arguments follow `columns`.
    Insert {
        table: TableName,
        columns: Vec<String>,
    },
    /// Updates at most one row matching every key column. Arguments are the `columns` values
    /// followed by the key values.
    Update {
        table: TableName,
        columns: Vec<String>,
        key_columns: Vec<String>,
    },
    /// Statement passed through verbatim, such as DDL.
    Raw,
}

/// A SQL statement and its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub shape: StatementShape,
    pub sql: String,
    pub args: Vec<Cell>,
}

impl Statement {
    /// Creates a statement executed verbatim without arguments.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            shape: StatementShape::Raw,
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Returns the table targeted by the statement, if any.
    pub fn table(&self) -> Option<&TableName> {
        match &self.shape {
            StatementShape::Delete { table, .. }
            | StatementShape::Replace { table, .. }
            | StatementShape::Insert { table, .. }
            | StatementShape::Update { table, .. } => Some(table),
            StatementShape::Raw => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} args: [", self.sql)?;
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str("]")
    }
}

/// Quotes an identifier with back-ticks, doubling embedded back-ticks.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Returns `count` comma separated `?` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

/// Returns the quoted, comma separated column list.
pub(crate) fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns `c1 = ? AND c2 = ?` over the quoted key columns.
pub(crate) fn key_predicate(key_columns: &[String]) -> String {
    key_columns
        .iter()
        .map(|column| format!("{} = ?", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(" AND ")
}
