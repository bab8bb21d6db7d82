//! Minimal line-mode SQL recognizer.
//!
//! The teacher's own `handle_sql` (and every pack repo that reaches
//! for `sqlparser`) builds a full AST for a handful of statement
//! shapes it never finishes handling — most of its match arms are
//! `todo!()`. This module keeps the same entry-point-plus-dispatch
//! idea but recognizes the fixed statement grammar this engine needs
//! by hand, which sidesteps depending on an AST shape nothing here
//! actually exploits.
//!
//! Not part of the storage core: parse errors are reported back as a
//! plain `String`, never as a `StorageError` variant, and turned into
//! a single error row by the caller.

use crate::catalog::IndexType;
use crate::operator::Op;
use crate::predicate::Predicate;
use crate::value::{Column, ColumnType, Value};

#[derive(Debug, Clone)]
pub enum Statement {
    CreateTable { name: String, columns: Vec<Column> },
    Insert { table: String, values: Vec<Value> },
    Select { table: String, predicate: Option<Predicate> },
    Update { table: String, column: String, value: Value, predicate: Option<Predicate> },
    Delete { table: String, predicate: Option<Predicate> },
    CreateIndex { name: String, table: String, column: String, index_type: IndexType },
    DropTable { name: String },
    DropIndex { name: String },
    Describe { table: String },
    ShowTables,
}

/// Recognizes one statement, case-insensitively, ignoring a trailing
/// `;`. Returns a human-readable message on anything unrecognized —
/// the caller surfaces it as a single-row error result.
pub fn parse(sql: &str) -> Result<Statement, String> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let upper = sql.to_ascii_uppercase();

    if let Some(rest) = strip_prefix_ci(sql, "CREATE TABLE") {
        return parse_create_table(rest);
    }
    if let Some(rest) = strip_prefix_ci(sql, "INSERT INTO") {
        return parse_insert(rest);
    }
    if let Some(rest) = strip_prefix_ci(sql, "SELECT * FROM") {
        return parse_select(rest);
    }
    if let Some(rest) = strip_prefix_ci(sql, "UPDATE") {
        return parse_update(rest);
    }
    if let Some(rest) = strip_prefix_ci(sql, "DELETE FROM") {
        return parse_delete(rest);
    }
    if let Some(rest) = strip_prefix_ci(sql, "CREATE HASH INDEX") {
        return parse_create_index(rest, IndexType::Hash);
    }
    if let Some(rest) = strip_prefix_ci(sql, "CREATE BTREE INDEX") {
        return parse_create_index(rest, IndexType::BTree);
    }
    if let Some(rest) = strip_prefix_ci(sql, "CREATE INDEX") {
        return parse_create_index(rest, IndexType::BTree);
    }
    if let Some(rest) = strip_prefix_ci(sql, "DROP TABLE") {
        return Ok(Statement::DropTable { name: rest.trim().to_string() });
    }
    if let Some(rest) = strip_prefix_ci(sql, "DROP INDEX") {
        return Ok(Statement::DropIndex { name: rest.trim().to_string() });
    }
    if let Some(rest) = strip_prefix_ci(sql, "DESCRIBE") {
        return Ok(Statement::Describe { table: rest.trim().to_string() });
    }
    if upper == "SHOW TABLES" {
        return Ok(Statement::ShowTables);
    }

    Err(format!("unrecognized statement: {}", sql))
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() {
        return None;
    }
    if s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Splits a comma-separated list inside one pair of parentheses,
/// trimming whitespace around each item. Commas inside single-quoted
/// string literals are preserved rather than split on.
fn split_list(inner: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in inner.chars() {
        match ch {
            '\'' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn extract_parens(s: &str) -> Result<(&str, &str), String> {
    let open = s.find('(').ok_or_else(|| format!("expected '(' in: {}", s))?;
    let close = s.rfind(')').ok_or_else(|| format!("expected ')' in: {}", s))?;
    if close < open {
        return Err(format!("mismatched parentheses in: {}", s));
    }
    Ok((s[..open].trim(), &s[open + 1..close]))
}

fn parse_column_spec(spec: &str) -> Result<Column, String> {
    let spec = spec.trim();
    let split_at = spec.find(char::is_whitespace).ok_or_else(|| format!("malformed column: {}", spec))?;
    let name = spec[..split_at].trim();
    let type_spec = spec[split_at..].trim();

    let (type_name, declared_size) = if let Some(open) = type_spec.find('(') {
        let close = type_spec.find(')').ok_or_else(|| format!("malformed column type: {}", type_spec))?;
        let size: u8 = type_spec[open + 1..close]
            .trim()
            .parse()
            .map_err(|_| format!("bad declared size in: {}", type_spec))?;
        (&type_spec[..open], size)
    } else {
        (type_spec, 0u8)
    };

    let col_type = ColumnType::from_str(type_name.trim()).ok_or_else(|| format!("unknown column type: {}", type_name))?;
    Ok(Column::new(name, col_type, declared_size, true))
}

fn parse_literal(token: &str) -> Value {
    let token = token.trim();
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Value::Str(token[1..token.len() - 1].to_string());
    }
    if let Ok(v) = token.parse::<i32>() {
        return Value::Int(v);
    }
    if let Ok(v) = token.parse::<i64>() {
        return Value::BigInt(v);
    }
    if let Ok(v) = token.parse::<f32>() {
        return Value::Float(v);
    }
    Value::Str(token.to_string())
}

fn encode_literal(value: &Value) -> String {
    match value {
        Value::Int(v) => format!("i:{}", v),
        Value::BigInt(v) => format!("b:{}", v),
        Value::Float(v) => format!("f:{}", v),
        Value::Str(v) => format!("s:{}", v),
    }
}

fn decode_literal(encoded: &str) -> Value {
    if let Some(rest) = encoded.strip_prefix("i:") {
        return rest.parse().map(Value::Int).unwrap_or(Value::Str(rest.to_string()));
    }
    if let Some(rest) = encoded.strip_prefix("b:") {
        return rest.parse().map(Value::BigInt).unwrap_or(Value::Str(rest.to_string()));
    }
    if let Some(rest) = encoded.strip_prefix("f:") {
        return rest.parse().map(Value::Float).unwrap_or(Value::Str(rest.to_string()));
    }
    if let Some(rest) = encoded.strip_prefix("s:") {
        return Value::Str(rest.to_string());
    }
    Value::Str(encoded.to_string())
}

/// Parses a trailing `WHERE col OP value` clause, if present. Only a
/// single comparison is supported, matching `predicate.rs`'s one-column
/// model. The column name travels inside the predicate's `value` field
/// as a packed placeholder until [`resolve_predicate`] looks it up
/// against the target table's schema — `storage.rs` only knows column
/// indices, never names.
fn parse_where(rest: &str) -> Result<Option<Predicate>, String> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(None);
    }
    let clause = strip_prefix_ci(rest, "WHERE").ok_or_else(|| format!("expected WHERE, found: {}", rest))?.trim();

    let mut parts = clause.splitn(3, ' ');
    let column = parts.next().ok_or("empty WHERE clause")?;
    let op_str = parts.next().ok_or("WHERE clause missing operator")?;
    let value_str = parts.next().ok_or("WHERE clause missing value")?;

    let op = Op::from_str(op_str).ok_or_else(|| format!("unknown operator: {}", op_str))?;
    let value = parse_literal(value_str);
    let packed = Value::Str(format!("\0col:{}\0{}", column, encode_literal(&value)));

    Ok(Some(Predicate::new(usize::MAX, op, packed)))
}

/// Resolves a predicate produced by [`parse_where`] against `columns`,
/// turning its carried column name into a real index.
pub fn resolve_predicate(predicate: &Predicate, columns: &[Column]) -> Result<Predicate, String> {
    let Value::Str(packed) = &predicate.value else {
        return Err("malformed predicate".to_string());
    };
    let rest = packed.strip_prefix("\0col:").ok_or("malformed predicate")?;
    let (name, encoded) = rest.split_once('\0').ok_or("malformed predicate")?;
    let column_index = columns
        .iter()
        .position(|c| c.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("unknown column '{}' in WHERE clause", name))?;
    Ok(Predicate::new(column_index, predicate.op, decode_literal(encoded)))
}

fn parse_create_table(rest: &str) -> Result<Statement, String> {
    let (name, inner) = extract_parens(rest)?;
    let columns = split_list(inner).iter().map(|c| parse_column_spec(c)).collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err("CREATE TABLE needs at least one column".to_string());
    }
    Ok(Statement::CreateTable { name: name.to_string(), columns })
}

fn parse_insert(rest: &str) -> Result<Statement, String> {
    let values_pos = rest.to_ascii_uppercase().find("VALUES").ok_or("INSERT INTO missing VALUES")?;
    let table = rest[..values_pos].trim().to_string();
    let (_, inner) = extract_parens(&rest[values_pos..])?;
    let values = split_list(inner).iter().map(|v| parse_literal(v)).collect();
    Ok(Statement::Insert { table, values })
}

fn parse_select(rest: &str) -> Result<Statement, String> {
    let upper = rest.to_ascii_uppercase();
    if let Some(where_pos) = upper.find("WHERE") {
        let table = rest[..where_pos].trim().to_string();
        let predicate = parse_where(&rest[where_pos..])?;
        return Ok(Statement::Select { table, predicate });
    }
    Ok(Statement::Select { table: rest.trim().to_string(), predicate: None })
}

fn parse_update(rest: &str) -> Result<Statement, String> {
    let set_pos = rest.to_ascii_uppercase().find("SET").ok_or("UPDATE missing SET")?;
    let table = rest[..set_pos].trim().to_string();
    let after_set = rest[set_pos + 3..].trim();

    let upper = after_set.to_ascii_uppercase();
    let (assignment, where_clause) = match upper.find("WHERE") {
        Some(pos) => (&after_set[..pos], &after_set[pos..]),
        None => (after_set, ""),
    };

    let (column, value_str) = assignment.split_once('=').ok_or("SET clause missing '='")?;
    let column = column.trim().to_string();
    let value = parse_literal(value_str);
    let predicate = parse_where(where_clause)?;

    Ok(Statement::Update { table, column, value, predicate })
}

fn parse_delete(rest: &str) -> Result<Statement, String> {
    let upper = rest.to_ascii_uppercase();
    if let Some(where_pos) = upper.find("WHERE") {
        let table = rest[..where_pos].trim().to_string();
        let predicate = parse_where(&rest[where_pos..])?;
        return Ok(Statement::Delete { table, predicate });
    }
    Ok(Statement::Delete { table: rest.trim().to_string(), predicate: None })
}

fn parse_create_index(rest: &str, index_type: IndexType) -> Result<Statement, String> {
    let on_pos = rest.to_ascii_uppercase().find(" ON ").ok_or("CREATE INDEX missing ON")?;
    let name = rest[..on_pos].trim().to_string();
    let after_on = rest[on_pos + 4..].trim();
    let (table, inner) = extract_parens(after_on)?;
    let column = inner.trim().to_string();
    Ok(Statement::CreateIndex { name, table: table.to_string(), column, index_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table() {
        let stmt = parse("CREATE TABLE t (id INT, name VARCHAR(10))").unwrap();
        match stmt {
            Statement::CreateTable { name, columns } => {
                assert_eq!(name, "t");
                assert_eq!(columns.len(), 2);
                assert_eq!(columns[1].declared_size, 10);
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn parses_insert_with_string_literal() {
        let stmt = parse("INSERT INTO t VALUES (1, 'a')").unwrap();
        match stmt {
            Statement::Insert { table, values } => {
                assert_eq!(table, "t");
                assert_eq!(values, vec![Value::Int(1), Value::Str("a".to_string())]);
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn parses_select_with_where_and_resolves_column() {
        let stmt = parse("SELECT * FROM e WHERE id >= 2").unwrap();
        match stmt {
            Statement::Select { table, predicate } => {
                assert_eq!(table, "e");
                let pred = predicate.unwrap();
                let resolved = resolve_predicate(
                    &pred,
                    &[Column::new("id", ColumnType::Int, 0, false), Column::new("salary", ColumnType::Int, 0, false)],
                )
                .unwrap();
                assert_eq!(resolved.column_index, 0);
                assert_eq!(resolved.op, Op::GreaterThanOrEq);
                assert_eq!(resolved.value, Value::Int(2));
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn parses_update_set_where() {
        let stmt = parse("UPDATE e SET salary = 500 WHERE id >= 2").unwrap();
        match stmt {
            Statement::Update { table, column, value, predicate } => {
                assert_eq!(table, "e");
                assert_eq!(column, "salary");
                assert_eq!(value, Value::Int(500));
                assert!(predicate.is_some());
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn parses_create_index() {
        let stmt = parse("CREATE HASH INDEX idx_id ON e(id)").unwrap();
        match stmt {
            Statement::CreateIndex { name, table, column, index_type } => {
                assert_eq!(name, "idx_id");
                assert_eq!(table, "e");
                assert_eq!(column, "id");
                assert_eq!(index_type, IndexType::Hash);
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn rejects_unrecognized_statements() {
        assert!(parse("VACUUM t").is_err());
    }
}
