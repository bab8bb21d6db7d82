//! Line-oriented TCP front end.
//!
//! The teacher's `main.rs` wires a `pgwire`-based server around a
//! stubbed `PostgresHandler`; this rewrite keeps the one-task-per-
//! connection `tokio` shape but drops the Postgres wire protocol for a
//! plain-text line protocol, since nothing downstream of `sql.rs`
//! speaks pgwire's binary framing. Every blocking call into `Storage`
//! is dispatched through `spawn_blocking` per the concurrency model's
//! "glue, not a change to the core's synchronous contract" note.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::catalog::IndexType;
use crate::error::StorageResult;
use crate::sql::{self, Statement};
use crate::storage::Storage;
use crate::value::Value;

const WELCOME_BANNER: &str = "minidb server ready. statements end on newline; `commit`, `rollback`, `quit`, `exit`, `shutdown` are out-of-band.";

/// Binds `addr` and serves connections until `shutdown` is notified
/// (by a `SIGINT`/`SIGTERM` handler in the server binary).
pub async fn serve(addr: &str, storage: Arc<Storage>, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let storage = storage.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(%peer, "client connected");
                    if let Err(e) = handle_connection(socket, storage, shutdown).await {
                        warn!(%peer, error = %e, "connection ended with an I/O error");
                    }
                    info!(%peer, "client disconnected");
                });
            }
            _ = shutdown.notified() => {
                info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, storage: Arc<Storage>, shutdown: Arc<Notify>) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(WELCOME_BANNER.as_bytes()).await?;
    write_half.write_all(b"\n").await?;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Every statement already auto-commits (§5's per-statement
        // contract; client-initiated multi-statement transactions are
        // explicitly out of scope), so `commit`/`rollback` are accepted
        // as protocol-compatible no-ops rather than opening a real
        // explicit transaction.
        match trimmed.to_ascii_lowercase().as_str() {
            "commit" | "rollback" => {
                write_half.write_all(b"OK\n\n").await?;
                continue;
            }
            "quit" | "exit" => {
                break;
            }
            "shutdown" => {
                shutdown.notify_waiters();
                write_half.write_all(b"shutting down\n\n").await?;
                break;
            }
            _ => {}
        }

        let response = dispatch_statement(&storage, trimmed.to_string()).await;
        write_half.write_all(response.as_bytes()).await?;
        // Blank-line terminator lets the client know one result table is
        // complete even when it spans several lines.
        write_half.write_all(b"\n").await?;
    }

    Ok(())
}

/// Parses and executes one statement, auto-committing per §5's
/// per-statement contract, and formats the outcome as a result table.
async fn dispatch_statement(storage: &Arc<Storage>, text: String) -> String {
    let storage = storage.clone();
    tokio::task::spawn_blocking(move || execute(&storage, &text))
        .await
        .unwrap_or_else(|e| format!("Error: {}\n", e))
}

fn execute(storage: &Storage, text: &str) -> String {
    let statement = match sql::parse(text) {
        Ok(s) => s,
        Err(e) => return format_error(&e),
    };

    let result = storage.run_autocommit(|txn_id| run(storage, txn_id, statement));
    match result {
        Ok(body) => body,
        Err(e) => format_error(&e.to_string()),
    }
}

fn run(storage: &Storage, txn_id: u32, statement: Statement) -> StorageResult<String> {
    match statement {
        Statement::CreateTable { name, columns } => {
            storage.create_table(txn_id, &name, columns)?;
            Ok(format!("table '{}' created\n", name))
        }
        Statement::Insert { table, values } => {
            storage.insert(txn_id, &table, &values)?;
            Ok("1 record(s) inserted\n".to_string())
        }
        Statement::Select { table, predicate } => {
            let info = storage.describe(&table)?;
            let predicate = resolve(&predicate, &info)?;
            let rows = storage.scan(txn_id, &table)?;
            let rows: Vec<_> = rows.into_iter().filter(|r| predicate.as_ref().map(|p| p.matches(r)).unwrap_or(true)).collect();
            Ok(format_rows(&info, &rows))
        }
        Statement::Update { table, column, value, predicate } => {
            let info = storage.describe(&table)?;
            let predicate = resolve(&predicate, &info)?;
            let updated = storage.update(txn_id, &table, &column, &value, predicate.as_ref())?;
            Ok(format!("{} record(s) updated\n", updated))
        }
        Statement::Delete { table, predicate } => {
            let info = storage.describe(&table)?;
            let predicate = resolve(&predicate, &info)?;
            let deleted = storage.delete(txn_id, &table, predicate.as_ref())?;
            Ok(format!("{} record(s) deleted\n", deleted))
        }
        Statement::CreateIndex { name, table, column, index_type } => {
            match index_type {
                IndexType::BTree => storage.create_btree_index(txn_id, &name, &table, &column)?,
                IndexType::Hash => storage.create_hash_index(txn_id, &name, &table, &column)?,
            };
            Ok(format!("index '{}' created\n", name))
        }
        Statement::DropTable { name } => {
            storage.drop_table(txn_id, &name)?;
            Ok(format!("table '{}' dropped\n", name))
        }
        Statement::DropIndex { name } => {
            storage.drop_index(txn_id, &name)?;
            Ok(format!("index '{}' dropped\n", name))
        }
        Statement::Describe { table } => {
            let info = storage.describe(&table)?;
            let mut out = String::new();
            for c in &info {
                out.push_str(&format!("{}\t{}\n", c.name, c.col_type.as_str()));
            }
            Ok(out)
        }
        Statement::ShowTables => {
            let mut out = String::new();
            for t in storage.get_all_tables() {
                out.push_str(&t.name);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

fn resolve(
    predicate: &Option<crate::predicate::Predicate>,
    columns: &[crate::value::Column],
) -> StorageResult<Option<crate::predicate::Predicate>> {
    match predicate {
        None => Ok(None),
        Some(p) => sql::resolve_predicate(p, columns)
            .map(Some)
            .map_err(crate::error::StorageError::other),
    }
}

fn format_rows(columns: &[crate::value::Column], rows: &[Vec<Value>]) -> String {
    let mut out = String::new();
    out.push_str(&columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join("\t"));
    out.push('\n');
    for row in rows {
        let rendered: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::Int(i) => i.to_string(),
                Value::BigInt(i) => i.to_string(),
                Value::Float(f) => f.to_string(),
                Value::Str(s) => s.clone(),
            })
            .collect();
        out.push_str(&rendered.join("\t"));
        out.push('\n');
    }
    out
}

fn format_error(message: &str) -> String {
    format!("Error\t{}\n", message)
}
