//! ANSI statement builders for table slices, and client-side parameter
//! binding for positional `?` placeholders.

use crate::error::EngineError;
use crate::slice::{TablePartition, TableSlice, PARTITION_TIMESTAMP_FORMAT};
use crate::value::{ColumnSpec, SqlType, SqlValue};

/// `SELECT {cols} FROM {catalog}.{schema}.{table}` plus the partition filter.
pub fn select_statement(slice: &TableSlice) -> String {
    let col_str = if slice.columns.is_empty() {
        "*".to_string()
    } else {
        slice.columns.join(", ")
    };
    let base = format!("SELECT {} FROM {}", col_str, slice.qualified_name());
    with_partition_filter(base, slice)
}

/// `DELETE FROM {catalog}.{schema}.{table}` plus the partition filter.
pub fn cleanup_statement(slice: &TableSlice) -> String {
    let base = format!("DELETE FROM {}", slice.qualified_name());
    with_partition_filter(base, slice)
}

fn with_partition_filter(base: String, slice: &TableSlice) -> String {
    match &slice.partition {
        Some(partition) => format!("{}\n{}", base, time_window_where_clause(partition)),
        None => base,
    }
}

/// `WHERE {expr} BETWEEN TIMESTAMP '{start}' AND TIMESTAMP '{end}'`
pub fn time_window_where_clause(partition: &TablePartition) -> String {
    let window = &partition.time_window;
    format!(
        "WHERE {} BETWEEN TIMESTAMP '{}' AND TIMESTAMP '{}'",
        partition.partition_expr,
        window.start().format(PARTITION_TIMESTAMP_FORMAT),
        window.end().format(PARTITION_TIMESTAMP_FORMAT)
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the slice's table, spelling column types
/// with `type_name`.
pub fn create_table_statement(
    slice: &TableSlice,
    columns: &[ColumnSpec],
    type_name: impl Fn(&SqlType) -> String,
) -> String {
    let cols = columns
        .iter()
        .map(|c| format!("{} {}", c.name, type_name(&c.sql_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", slice.qualified_name(), cols)
}

/// Multi-row `INSERT` with one `?` per cell.
pub fn insert_statement(slice: &TableSlice, columns: &[ColumnSpec], row_count: usize) -> String {
    let names = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row.as_str(); row_count].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        slice.qualified_name(),
        names,
        values
    )
}

fn sanitize_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

/// Render a value as an SQL literal.
pub fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Boolean(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Double(d) if d.is_nan() => "nan()".to_string(),
        SqlValue::Double(d) if d.is_infinite() => {
            (if *d > 0.0 { "infinity()" } else { "-infinity()" }).to_string()
        }
        SqlValue::Double(d) => format!("{:?}", d),
        SqlValue::Varchar(s) => format!("'{}'", sanitize_sql_string(s)),
        SqlValue::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
        SqlValue::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
    }
}

/// Substitute positional `?` placeholders (outside quoted strings and
/// identifiers) with rendered literals.
pub fn bind_positional(sql: &str, params: &[SqlValue]) -> Result<String, EngineError> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = params.iter();
    let mut used = 0usize;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), c) => out.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (None, '?') => {
                let value = next.next().ok_or_else(|| {
                    EngineError::Protocol(format!(
                        "statement has more placeholders than the {} parameters given",
                        params.len()
                    ))
                })?;
                out.push_str(&render_literal(value));
                used += 1;
            }
            (None, c) => out.push(c),
        }
    }

    if used != params.len() {
        return Err(EngineError::Protocol(format!(
            "statement has {} placeholders but {} parameters were given",
            used,
            params.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::TimeWindow;
    use chrono::NaiveDate;

    fn slice() -> TableSlice {
        TableSlice::new("database_abc", "schema1", "table1").unwrap()
    }

    fn partitioned() -> TableSlice {
        let start = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 2, 3).unwrap().and_hms_opt(0, 0, 0).unwrap();
        slice().with_partition(TablePartition::new(
            TimeWindow::new(start, end).unwrap(),
            "my_timestamp_col",
        ))
    }

    #[test]
    fn test_select_all_columns() {
        assert_eq!(
            select_statement(&slice()),
            "SELECT * FROM database_abc.schema1.table1"
        );
    }

    #[test]
    fn test_select_keeps_column_order() {
        let s = slice().with_columns(vec!["banana".to_string(), "apple".to_string()]);
        assert_eq!(
            select_statement(&s),
            "SELECT banana, apple FROM database_abc.schema1.table1"
        );
    }

    #[test]
    fn test_cleanup_partitioned() {
        assert_eq!(
            cleanup_statement(&partitioned()),
            "DELETE FROM database_abc.schema1.table1\n\
             WHERE my_timestamp_col BETWEEN TIMESTAMP '2020-01-02 00:00:00' AND TIMESTAMP '2020-02-03 00:00:00'"
        );
    }

    #[test]
    fn test_create_table_statement() {
        let cols = vec![
            ColumnSpec::new("id", SqlType::BigInt),
            ColumnSpec::new("name", SqlType::Varchar),
        ];
        assert_eq!(
            create_table_statement(&slice(), &cols, |t| t.ansi_name().to_string()),
            "CREATE TABLE IF NOT EXISTS database_abc.schema1.table1 (id BIGINT, name VARCHAR)"
        );
    }

    #[test]
    fn test_insert_statement_placeholders() {
        let cols = vec![
            ColumnSpec::new("id", SqlType::BigInt),
            ColumnSpec::new("name", SqlType::Varchar),
        ];
        assert_eq!(
            insert_statement(&slice(), &cols, 2),
            "INSERT INTO database_abc.schema1.table1 (id, name) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_render_literals() {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_milli_opt(3, 4, 5, 120)
            .unwrap();
        assert_eq!(render_literal(&SqlValue::Null), "NULL");
        assert_eq!(render_literal(&SqlValue::Boolean(true)), "TRUE");
        assert_eq!(render_literal(&SqlValue::Integer(-7)), "-7");
        assert_eq!(render_literal(&SqlValue::Double(1.5)), "1.5");
        assert_eq!(render_literal(&SqlValue::Double(2.0)), "2.0");
        assert_eq!(render_literal(&SqlValue::Double(f64::NAN)), "nan()");
        assert_eq!(render_literal(&SqlValue::Varchar("it's".into())), "'it''s'");
        assert_eq!(
            render_literal(&SqlValue::Date(ts.date())),
            "DATE '2020-01-02'"
        );
        assert_eq!(
            render_literal(&SqlValue::Timestamp(ts)),
            "TIMESTAMP '2020-01-02 03:04:05.120'"
        );
    }

    #[test]
    fn test_bind_positional() {
        let sql = bind_positional(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &[SqlValue::Integer(1), SqlValue::Varchar("x".into())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = 'x'");
    }

    #[test]
    fn test_bind_positional_skips_quoted_question_marks() {
        let sql = bind_positional(
            "SELECT '?' AS q, \"col?\" FROM t WHERE a = ?",
            &[SqlValue::Integer(5)],
        )
        .unwrap();
        assert_eq!(sql, "SELECT '?' AS q, \"col?\" FROM t WHERE a = 5");
    }

    #[test]
    fn test_bind_positional_count_mismatch() {
        assert!(bind_positional("SELECT ?", &[]).is_err());
        assert!(bind_positional("SELECT 1", &[SqlValue::Integer(1)]).is_err());
    }

    #[test]
    fn test_bind_positional_escapes_injection() {
        let sql = bind_positional(
            "SELECT * FROM t WHERE name = ?",
            &[SqlValue::Varchar("'; DROP TABLE users; --".into())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE name = '''; DROP TABLE users; --'");
    }
}
