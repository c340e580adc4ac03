mod cell;
mod change;
mod statement;

pub use cell::Cell;
pub use change::{Change, ChangeKind, RowKey, TableInfo, TableName};
pub use statement::{Statement, StatementShape, quote_identifier};

pub(crate) use statement::{column_list, placeholders};
