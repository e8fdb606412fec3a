use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::error;

use crate::error::StoreError;
use crate::parser::extract::{Record, RecordKind};

/// Outcome of [`Store::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    /// Row existed; this many empty stored fields were filled.
    Merged(usize),
    Unchanged,
}

/// Where a chained pipeline stopped: the last upstream key it handled and
/// that key's position in upstream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub last_key: String,
    pub offset: usize,
}

/// One SQLite file, one table per [`RecordKind`]. Assumes a single writer.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Store { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let mut ddl = String::new();
        for kind in RecordKind::ALL {
            let columns = kind
                .columns()
                .iter()
                .map(|c| format!("{} TEXT NOT NULL DEFAULT ''", c))
                .collect::<Vec<_>>()
                .join(", ");
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}));\n",
                kind.table(),
                columns,
                kind.key_columns().join(", ")
            ));
        }
        ddl.push_str(
            "CREATE TABLE IF NOT EXISTS cursors (
                pipeline   TEXT PRIMARY KEY,
                last_key   TEXT NOT NULL,
                upstream_offset INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        );
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    // ── Reads ──

    pub fn get<K: AsRef<str>>(
        &self,
        kind: RecordKind,
        key: &[K],
    ) -> Result<Option<Record>, StoreError> {
        check_key(kind, key.len())?;
        let key: Vec<&str> = key.iter().map(|k| k.as_ref()).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            kind.columns().join(", "),
            kind.table(),
            key_predicate(kind, 1)
        );
        let width = kind.columns().len();
        let values = self
            .conn
            .query_row(&sql, params_from_iter(&key), |row| {
                (0..width)
                    .map(|i| row.get::<_, String>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()?;

        Ok(values.and_then(|v| Record::from_values(kind, v)))
    }

    pub fn exists<K: AsRef<str>>(&self, kind: RecordKind, key: &[K]) -> Result<bool, StoreError> {
        Ok(self.get(kind, key)?.is_some())
    }

    /// True when the row exists and `field` is non-empty.
    pub fn is_complete<K: AsRef<str>>(
        &self,
        kind: RecordKind,
        key: &[K],
        field: &str,
    ) -> Result<bool, StoreError> {
        if !kind.columns().contains(&field) {
            return Err(StoreError::UnknownColumn {
                table: kind.table(),
                column: field.to_string(),
            });
        }
        Ok(self
            .get(kind, key)?
            .is_some_and(|r| !r.get(field).is_empty()))
    }

    /// Any row of `kind` for this process number.
    pub fn has_rows_for(&self, kind: RecordKind, numero_processo: &str) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE numero_processo = ?1 LIMIT 1",
            kind.table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![numero_processo], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Process numbers in insertion order, distinct.
    pub fn keys(&self, kind: RecordKind) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT numero_processo FROM {} GROUP BY numero_processo ORDER BY MIN(rowid)",
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Process number of the most recently inserted row.
    pub fn last_key(&self, kind: RecordKind) -> Result<Option<String>, StoreError> {
        let sql = format!(
            "SELECT numero_processo FROM {} ORDER BY rowid DESC LIMIT 1",
            kind.table()
        );
        Ok(self.conn.query_row(&sql, [], |row| row.get(0)).optional()?)
    }

    // ── Writes ──

    /// Insert if absent; otherwise fill stored-empty fields from non-empty
    /// new values. Never clears or overwrites a stored value.
    pub fn upsert(&self, record: &Record) -> Result<Upsert, StoreError> {
        let kind = record.kind;
        check_arity(record)?;
        let tx = self.conn.unchecked_transaction()?;

        let stored = {
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                kind.columns().join(", "),
                kind.table(),
                key_predicate(kind, 1)
            );
            let width = kind.columns().len();
            tx.query_row(&sql, params_from_iter(record.key()), |row| {
                (0..width)
                    .map(|i| row.get::<_, String>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .optional()?
        };

        let outcome = match stored {
            None => {
                tx.execute(&insert_sql(kind, "INSERT"), params_from_iter(record.values()))?;
                Upsert::Inserted
            }
            Some(stored) => {
                let fills: Vec<(&str, &String)> = kind
                    .columns()
                    .iter()
                    .zip(stored.iter().zip(record.values()))
                    .skip(kind.key_len())
                    .filter(|(_, (old, new))| old.is_empty() && !new.is_empty())
                    .map(|(column, (_, new))| (*column, new))
                    .collect();

                if fills.is_empty() {
                    Upsert::Unchanged
                } else {
                    let columns: Vec<&str> = fills.iter().map(|(c, _)| *c).collect();
                    let values = fills.iter().map(|(_, v)| *v).chain(record.key());
                    tx.execute(&update_sql(kind, &columns), params_from_iter(values))?;
                    Upsert::Merged(fills.len())
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Whole-row overwrite on key match, insert otherwise. Keeps the row's
    /// position in insertion order.
    pub fn replace(&self, record: &Record) -> Result<(), StoreError> {
        let kind = record.kind;
        check_arity(record)?;
        let tx = self.conn.unchecked_transaction()?;

        let columns = &kind.columns()[kind.key_len()..];
        let values = record.values()[kind.key_len()..].iter().chain(record.key());
        let updated = tx.execute(&update_sql(kind, columns), params_from_iter(values))?;
        if updated == 0 {
            tx.execute(&insert_sql(kind, "INSERT"), params_from_iter(record.values()))?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Insert each record unless its key is already stored. Returns how many
    /// were new.
    pub fn insert_missing(&self, records: &[Record]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;
        for record in records {
            check_arity(record)?;
            count += tx.execute(
                &insert_sql(record.kind, "INSERT OR IGNORE"),
                params_from_iter(record.values()),
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    /// [`upsert`](Self::upsert), logging and swallowing failures.
    pub fn upsert_logged(&self, record: &Record) -> Option<Upsert> {
        self.upsert(record)
            .map_err(|e| log_failure(record, &e))
            .ok()
    }

    pub fn replace_logged(&self, record: &Record) -> bool {
        self.replace(record)
            .map_err(|e| log_failure(record, &e))
            .is_ok()
    }

    pub fn insert_missing_logged(&self, records: &[Record]) -> usize {
        match self.insert_missing(records) {
            Ok(n) => n,
            Err(e) => {
                if let Some(first) = records.first() {
                    log_failure(first, &e);
                }
                0
            }
        }
    }

    // ── Cursors ──

    pub fn cursor(&self, pipeline: &str) -> Result<Option<Cursor>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT last_key, upstream_offset FROM cursors WHERE pipeline = ?1",
                params![pipeline],
                |row| {
                    Ok(Cursor {
                        last_key: row.get(0)?,
                        offset: row.get::<_, i64>(1)? as usize,
                    })
                },
            )
            .optional()?)
    }

    pub fn set_cursor(&self, pipeline: &str, cursor: &Cursor) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO cursors (pipeline, last_key, upstream_offset) VALUES (?1, ?2, ?3)
             ON CONFLICT(pipeline) DO UPDATE SET
                last_key = excluded.last_key,
                upstream_offset = excluded.upstream_offset,
                updated_at = datetime('now')",
            params![pipeline, cursor.last_key, cursor.offset as i64],
        )?;
        Ok(())
    }

    // ── Reporting ──

    /// Row count per table, in [`RecordKind::ALL`] order.
    pub fn stats(&self) -> Result<Vec<(RecordKind, i64)>, StoreError> {
        RecordKind::ALL
            .into_iter()
            .map(|kind| -> Result<(RecordKind, i64), StoreError> {
                let n = self.conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", kind.table()),
                    [],
                    |row| row.get(0),
                )?;
                Ok((kind, n))
            })
            .collect()
    }

    /// Write the whole table as a fully quoted CSV with a header row.
    /// Returns the number of data rows.
    pub fn export_csv(&self, kind: RecordKind, path: &Path) -> Result<usize, StoreError> {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_path(path)?;
        writer.write_record(kind.columns())?;

        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            kind.columns().join(", "),
            kind.table()
        );
        let width = kind.columns().len();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|i| row.get::<_, String>(i))
                .collect::<Result<Vec<_>, _>>()?;
            writer.write_record(&values)?;
            count += 1;
        }
        writer.flush()?;
        Ok(count)
    }
}

pub(crate) fn log_failure(record: &Record, e: &StoreError) {
    error!(
        table = record.kind.table(),
        key = %record.key_label(),
        record = ?record.values(),
        "persist failed: {}",
        e
    );
}

fn check_key(kind: RecordKind, got: usize) -> Result<(), StoreError> {
    if got != kind.key_len() {
        return Err(StoreError::Arity {
            table: kind.table(),
            got,
            expected: kind.key_len(),
        });
    }
    Ok(())
}

fn check_arity(record: &Record) -> Result<(), StoreError> {
    let expected = record.kind.columns().len();
    if record.values().len() != expected {
        return Err(StoreError::Arity {
            table: record.kind.table(),
            got: record.values().len(),
            expected,
        });
    }
    Ok(())
}

/// `k1 = ?n AND k2 = ?n+1`, numbering from `first`.
fn key_predicate(kind: RecordKind, first: usize) -> String {
    kind.key_columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c, first + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn insert_sql(kind: RecordKind, verb: &str) -> String {
    let placeholders = (1..=kind.columns().len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} INTO {} ({}) VALUES ({})",
        verb,
        kind.table(),
        kind.columns().join(", "),
        placeholders
    )
}

/// `UPDATE t SET c1 = ?1, .. WHERE <key> = ?n..`: set values first, key last.
fn update_sql(kind: RecordKind, columns: &[&str]) -> String {
    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        kind.table(),
        assignments,
        key_predicate(kind, columns.len() + 1)
    )
}
