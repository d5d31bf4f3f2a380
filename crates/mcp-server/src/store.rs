//! In-memory table store backing the database-flavored tools.
//!
//! The store is owned by the registry and only reachable through
//! serialized dispatch, so it needs no internal locking. It mimics the
//! shape of a tiny SQL table: `create_table` must run before inserts or
//! reads, and operations against a missing table fail like a database
//! would.

use serde::Serialize;

/// One row of the `users` table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserRow {
    pub id: u64,
    pub name: String,
    pub age: i64,
}

/// Process-local table store.
#[derive(Debug, Default)]
pub struct TableStore {
    users: Option<Vec<UserRow>>,
    next_id: u64,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the `users` table exists. Idempotent.
    pub fn create_table(&mut self) {
        if self.users.is_none() {
            self.users = Some(Vec::new());
            self.next_id = 1;
        }
    }

    /// Insert a user; fails if the table was never created.
    pub fn insert_user(&mut self, name: &str, age: i64) -> Result<UserRow, String> {
        let users = self
            .users
            .as_mut()
            .ok_or_else(|| "no such table: users".to_string())?;
        let row = UserRow {
            id: self.next_id,
            name: name.to_string(),
            age,
        };
        self.next_id += 1;
        users.push(row.clone());
        Ok(row)
    }

    /// All rows, in insertion order; fails if the table was never created.
    pub fn get_users(&self) -> Result<&[UserRow], String> {
        self.users
            .as_deref()
            .ok_or_else(|| "no such table: users".to_string())
    }
}
