//! Change stream read from newline-delimited JSON.
//!
//! Every non-empty line holds one replay item, either a batch of row changes:
//!
//! ```json
//! {"dml": [{"kind": "insert", "schema": "app", "table": "users", "columns": ["id", "email"],
//!           "primary_key": ["id"], "values": {"id": 1, "email": "a@x"}}]}
//! ```
//!
//! or a schema change:
//!
//! ```json
//! {"ddl": {"schema": "app", "sql": "ALTER TABLE users ADD COLUMN age INT"}}
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use loader::apply::{ChangeSource, ReplayItem};
use loader::ddl::DdlStatement;
use loader::error::{ErrorKind, LoaderResult};
use loader::loader_error;
use loader::types::{Cell, Change, ChangeKind, TableInfo, TableName};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Record {
    Dml(Vec<ChangeRecord>),
    Ddl(DdlRecord),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecordKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
struct ChangeRecord {
    kind: RecordKind,
    schema: String,
    table: String,
    columns: Vec<String>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    unique_keys: Vec<Vec<String>>,
    #[serde(default)]
    values: Map<String, Value>,
    #[serde(default)]
    old_values: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DdlRecord {
    #[serde(default)]
    schema: Option<String>,
    sql: String,
}

/// [`ChangeSource`] parsing one replay item per line.
///
/// Table metadata is shared between changes of the same table as long as it does not change.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_number: u64,
    tables: HashMap<TableName, Arc<TableInfo>>,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
            tables: HashMap::new(),
        }
    }

    fn table_info(&mut self, record: &ChangeRecord) -> Arc<TableInfo> {
        let info = TableInfo::new(
            TableName::new(record.schema.clone(), record.table.clone()),
            record.columns.clone(),
            record.primary_key.clone(),
            record.unique_keys.clone(),
        );

        match self.tables.get(&info.name) {
            Some(cached) if **cached == info => cached.clone(),
            _ => {
                debug!(table = %info.name, columns = info.columns.len(), "table layout changed");
                let info = Arc::new(info);
                self.tables.insert(info.name.clone(), info.clone());
                info
            }
        }
    }

    fn to_change(&mut self, record: ChangeRecord) -> LoaderResult<Change> {
        let table = self.table_info(&record);
        let values = to_cells(record.values);
        let old_values = to_cells(record.old_values);

        let change = match record.kind {
            RecordKind::Insert => Change::insert(table, values),
            RecordKind::Update => Change::update(table, old_values, values),
            RecordKind::Delete => Change::delete(table, old_values),
        };

        if change.kind != ChangeKind::Delete && change.values.is_empty() {
            return Err(loader_error!(
                ErrorKind::InvalidData,
                "Change record has no values",
                format!("line {}: {}", self.line_number, change.table_name())
            ));
        }

        Ok(change)
    }

    fn parse_line(&mut self, line: &str) -> LoaderResult<ReplayItem> {
        let record: Record = serde_json::from_str(line).map_err(|err| {
            loader_error!(
                ErrorKind::DeserializationError,
                "Invalid change stream record",
                format!("line {}: {err}", self.line_number),
                source: err
            )
        })?;

        match record {
            Record::Dml(records) => {
                let changes = records
                    .into_iter()
                    .map(|record| self.to_change(record))
                    .collect::<LoaderResult<Vec<_>>>()?;

                Ok(ReplayItem::Dml(changes))
            }
            Record::Ddl(record) => Ok(ReplayItem::Ddl(DdlStatement {
                schema: record.schema,
                sql: record.sql,
            })),
        }
    }
}

impl<R> ChangeSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_item(&mut self) -> LoaderResult<Option<ReplayItem>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            return self.parse_line(&line).map(Some);
        }
    }
}

fn to_cells(values: Map<String, Value>) -> HashMap<String, Cell> {
    values
        .into_iter()
        .map(|(column, value)| (column, to_cell(value)))
        .collect()
}

/// Converts a JSON value to a cell. Arrays and objects are kept as JSON documents.
fn to_cell(value: Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(value) => Cell::Bool(value),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Cell::I64(value)
            } else if let Some(value) = number.as_u64() {
                Cell::U64(value)
            } else {
                number.as_f64().map(Cell::F64).unwrap_or(Cell::Null)
            }
        }
        Value::String(value) => Cell::String(value),
        value @ (Value::Array(_) | Value::Object(_)) => Cell::Json(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &str) -> LoaderResult<Vec<ReplayItem>> {
        let mut source = JsonLinesSource::new(input.as_bytes());
        let mut items = Vec::new();
        while let Some(item) = source.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    const USERS: &str = r#""schema": "app", "table": "users", "columns": ["id", "email", "tags"], "primary_key": ["id"], "unique_keys": [["email"]]"#;

    #[tokio::test]
    async fn parses_dml_and_ddl_lines() {
        let input = format!(
            "{{\"dml\": [{{\"kind\": \"insert\", {USERS}, \"values\": {{\"id\": 1, \"email\": \"a@x\", \"tags\": [\"x\"]}}}}, \
             {{\"kind\": \"update\", {USERS}, \"old_values\": {{\"id\": 1}}, \"values\": {{\"id\": 1, \"email\": \"b@x\"}}}}]}}\n\
             \n\
             {{\"ddl\": {{\"schema\": \"app\", \"sql\": \"DROP TABLE old\"}}}}\n"
        );

        let items = read_all(&input).await.unwrap();
        assert_eq!(items.len(), 2);

        let ReplayItem::Dml(changes) = &items[0] else {
            panic!("expected row changes, got {:?}", items[0]);
        };
        assert_eq!(changes[0].kind, ChangeKind::Insert);
        assert_eq!(changes[0].values["id"], Cell::I64(1));
        assert_eq!(changes[0].values["tags"], Cell::Json(serde_json::json!(["x"])));
        assert_eq!(changes[1].kind, ChangeKind::Update);
        assert_eq!(changes[1].old_values["id"], Cell::I64(1));
        assert!(Arc::ptr_eq(&changes[0].table, &changes[1].table));
        assert_eq!(changes[0].table.unique_keys, vec![vec!["email".to_string()]]);

        assert_eq!(
            items[1],
            ReplayItem::Ddl(DdlStatement {
                schema: Some("app".to_string()),
                sql: "DROP TABLE old".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn malformed_lines_report_their_position() {
        let input = "{\"ddl\": {\"sql\": \"DROP TABLE t\"}}\n{\"dml\": [\n";

        let err = read_all(input).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().unwrap().starts_with("line 2:"));
    }

    #[tokio::test]
    async fn inserts_without_values_are_rejected() {
        let input = format!("{{\"dml\": [{{\"kind\": \"insert\", {USERS}}}]}}\n");

        let err = read_all(&input).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn converts_json_scalars() {
        assert_eq!(to_cell(Value::Null), Cell::Null);
        assert_eq!(to_cell(serde_json::json!(-3)), Cell::I64(-3));
        assert_eq!(to_cell(serde_json::json!(u64::MAX)), Cell::U64(u64::MAX));
        assert_eq!(to_cell(serde_json::json!(1.5)), Cell::F64(1.5));
        assert_eq!(to_cell(serde_json::json!("a")), Cell::from("a"));
    }
}
