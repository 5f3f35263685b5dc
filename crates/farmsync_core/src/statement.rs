//! Row write statements built from column/value pairs.

use crate::error::CoreResult;
use crate::store::ident;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Transaction};

/// A pending insert or upsert of one row.
#[derive(Debug, Clone)]
pub(crate) struct RowWrite {
    table: &'static str,
    columns: Vec<&'static str>,
    values: Vec<SqlValue>,
}

impl RowWrite {
    pub(crate) fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Sets a column, replacing any earlier value for it.
    pub(crate) fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        let value = value.into();
        match self.columns.iter().position(|c| *c == column) {
            Some(index) => self.values[index] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }

    pub(crate) fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .map(|index| &self.values[index])
    }

    fn insert_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| ident(c)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            ident(self.table),
            columns.join(", "),
            placeholders.join(", ")
        )
    }

    fn execute(&self, tx: &Transaction<'_>, sql: &str) -> CoreResult<usize> {
        let mut stmt = tx.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(self.values.iter()))?)
    }

    /// Inserts the row and returns SQLite's rowid for it.
    pub(crate) fn insert(&self, tx: &Transaction<'_>) -> CoreResult<i64> {
        self.execute(tx, &self.insert_sql())?;
        Ok(tx.last_insert_rowid())
    }

    /// Inserts the row unless it conflicts with an existing one.
    pub(crate) fn insert_or_ignore(&self, tx: &Transaction<'_>) -> CoreResult<usize> {
        let sql = format!("{} ON CONFLICT DO NOTHING", self.insert_sql());
        self.execute(tx, &sql)
    }

    /// Inserts the row or updates the one matching `conflict`.
    ///
    /// Every column except the conflict target, `tenant_id` and `created_at`
    /// is overwritten; columns in `keep` are only filled in when still null.
    /// The update only applies when the existing row belongs to the same
    /// tenant. Returns the number of rows written.
    pub(crate) fn upsert(
        &self,
        tx: &Transaction<'_>,
        conflict: &[&str],
        keep: &[&str],
    ) -> CoreResult<usize> {
        let table = ident(self.table);
        let assignments: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !conflict.contains(*c) && **c != "tenant_id" && **c != "created_at")
            .map(|c| {
                let column = ident(c);
                if keep.contains(c) {
                    format!("{column} = COALESCE({table}.{column}, excluded.{column})")
                } else {
                    format!("{column} = excluded.{column}")
                }
            })
            .collect();
        let target: Vec<String> = conflict.iter().map(|c| ident(c)).collect();

        let sql = if assignments.is_empty() {
            format!(
                "{} ON CONFLICT ({}) DO NOTHING",
                self.insert_sql(),
                target.join(", ")
            )
        } else {
            format!(
                "{} ON CONFLICT ({}) DO UPDATE SET {} WHERE {table}.{tenant} = excluded.{tenant}",
                self.insert_sql(),
                target.join(", "),
                assignments.join(", "),
                tenant = ident("tenant_id"),
            )
        };
        self.execute(tx, &sql)
    }
}
