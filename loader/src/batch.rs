//! Splits merged buckets into size-bounded batches and builds their statements.

use std::sync::Arc;

use crate::bail;
use crate::error::{ErrorKind, LoaderResult};
use crate::types::{Change, Statement, StatementShape, column_list, placeholders};

/// Splits `changes` into consecutive batches of at most `batch_size` changes.
///
/// Produces `ceil(len / batch_size)` batches, a `batch_size` of zero being treated as one.
pub fn split_changes(changes: Vec<Change>, batch_size: usize) -> Vec<Vec<Change>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(changes.len().div_ceil(batch_size));

    let mut changes = changes.into_iter().peekable();
    while changes.peek().is_some() {
        batches.push(changes.by_ref().take(batch_size).collect());
    }

    batches
}

/// Builds one `DELETE` statement per change, to be executed in a single transaction.
pub fn delete_statements(changes: &[Change]) -> LoaderResult<Vec<Statement>> {
    ensure_single_table(changes)?;

    changes.iter().map(Change::delete_statement).collect()
}

/// Builds a single multi-row `REPLACE` statement covering every change of the batch.
///
/// Returns `None` for an empty batch.
pub fn replace_statement(changes: &[Change]) -> LoaderResult<Option<Statement>> {
    ensure_single_table(changes)?;

    let Some(first) = changes.first() else {
        return Ok(None);
    };

    let table = first.table_name().clone();
    let columns = first.table.columns.clone();

    let row_placeholders = format!("({})", placeholders(columns.len()));
    let sql = format!(
        "REPLACE INTO {}({}) VALUES {}",
        table.quoted(),
        column_list(&columns),
        vec![row_placeholders.as_str(); changes.len()].join(",")
    );
    let args = changes
        .iter()
        .flat_map(|change| change.row_values(&columns))
        .collect();

    Ok(Some(Statement {
        shape: StatementShape::Replace {
            table,
            columns,
            rows: changes.len(),
        },
        sql,
        args,
    }))
}

fn ensure_single_table(changes: &[Change]) -> LoaderResult<()> {
    let Some(first) = changes.first() else {
        return Ok(());
    };

    if let Some(other) = changes
        .iter()
        .find(|change| change.table_name() != first.table_name())
    {
        bail!(
            ErrorKind::InvalidData,
            "Batch mixes changes of different tables",
            format!("{} and {}", first.table_name(), other.table_name())
        );
    }

    // Statements are built from the first change's columns.
    if let Some(other) = changes.iter().find(|change| {
        !Arc::ptr_eq(&change.table, &first.table) && change.table.columns != first.table.columns
    }) {
        bail!(
            ErrorKind::InvalidData,
            "Batch mixes column layouts of one table",
            format!(
                "{}: ({}) and ({})",
                first.table_name(),
                first.table.columns.join(", "),
                other.table.columns.join(", ")
            )
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use super::*;
    use crate::types::{Cell, TableInfo, TableName};

    fn table(name: &str) -> Arc<TableInfo> {
        Arc::new(TableInfo::new(
            TableName::new("test", name),
            vec!["id".into(), "v".into()],
            vec!["id".into()],
            vec![],
        ))
    }

    fn insert(table: &Arc<TableInfo>, id: i64) -> Change {
        Change::insert(
            table.clone(),
            HashMap::from([
                ("id".to_string(), Cell::I64(id)),
                ("v".to_string(), Cell::from(format!("v{id}"))),
            ]),
        )
    }

    #[test]
    fn batch_count_is_the_ceiling_of_len_over_size() {
        let table = table("t");
        for (len, size, expected) in [(0, 4, 0), (1, 4, 1), (4, 4, 1), (5, 4, 2), (9, 2, 5)] {
            let changes = (0..len).map(|id| insert(&table, id)).collect::<Vec<_>>();
            let batches = split_changes(changes, size);

            assert_eq!(batches.len(), expected, "len {len}, size {size}");
            assert!(batches.iter().all(|batch| batch.len() <= size));
        }
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let table = table("t");
        let changes = (0..3).map(|id| insert(&table, id)).collect::<Vec<_>>();

        assert_eq!(split_changes(changes, 0).len(), 3);
    }

    #[test]
    fn batches_reconstruct_the_input_set() {
        let table = table("t");
        let changes = (0..10).map(|id| insert(&table, id)).collect::<Vec<_>>();
        let expected: HashSet<_> = changes.iter().map(|c| c.row_key().unwrap()).collect();

        let mut batches = split_changes(changes, 3);
        batches.reverse();
        let actual: HashSet<_> = batches
            .iter()
            .flatten()
            .map(|c| c.row_key().unwrap())
            .collect();

        assert_eq!(actual, expected);
    }

    #[test]
    fn replace_statement_has_one_value_group_per_row() {
        let table = table("t");
        let changes = vec![insert(&table, 1), insert(&table, 2)];

        let statement = replace_statement(&changes).unwrap().unwrap();

        assert_eq!(
            statement.sql,
            "REPLACE INTO `test`.`t`(`id`,`v`) VALUES (?,?),(?,?)"
        );
        assert_eq!(
            statement.args,
            vec![
                Cell::I64(1),
                Cell::from("v1"),
                Cell::I64(2),
                Cell::from("v2")
            ]
        );
    }

    #[test]
    fn empty_batches_build_nothing() {
        assert!(replace_statement(&[]).unwrap().is_none());
        assert!(delete_statements(&[]).unwrap().is_empty());
    }

    #[test]
    fn mixing_tables_is_rejected() {
        let changes = vec![insert(&table("a"), 1), insert(&table("b"), 2)];

        let err = replace_statement(&changes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn mixing_column_layouts_of_one_table_is_rejected() {
        let widened = Arc::new(TableInfo::new(
            TableName::new("test", "t"),
            vec!["id".into(), "v".into(), "w".into()],
            vec!["id".into()],
            vec![],
        ));
        let changes = vec![insert(&table("t"), 1), insert(&widened, 2)];

        let err = replace_statement(&changes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let err = delete_statements(&changes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn equal_layouts_in_distinct_table_infos_are_accepted() {
        let changes = vec![insert(&table("t"), 1), insert(&table("t"), 2)];

        let statement = replace_statement(&changes).unwrap().unwrap();
        assert_eq!(statement.args.len(), 4);
    }

    #[test]
    fn delete_statements_are_per_row() {
        let table = table("t");
        let changes = vec![
            Change::delete(table.clone(), HashMap::from([("id".to_string(), Cell::I64(1))])),
            Change::delete(table.clone(), HashMap::from([("id".to_string(), Cell::I64(2))])),
        ];

        let statements = delete_statements(&changes).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].args, vec![Cell::I64(2)]);
    }
}
