//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use courier_shared::{User, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a new user.  Called by the auth collaborator on signup.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, full_name, profile_pic, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.full_name,
                user.profile_pic,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, full_name, profile_pic, created_at
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a user with this id exists.
    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All users except the given one, for the contact picker.
    pub fn list_contacts(&self, exclude: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, full_name, profile_pic, created_at
             FROM users
             WHERE id != ?1
             ORDER BY full_name ASC",
        )?;

        let rows = stmt.query_map(params![exclude.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Users this user has exchanged at least one direct message with.
    /// Group messages do not create chat partners.
    pub fn chat_partners(&self, user: UserId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(
            "SELECT DISTINCT u.id, u.full_name, u.profile_pic, u.created_at
             FROM users u
             JOIN messages m
               ON (m.sender_id = ?1 AND m.receiver_id = u.id)
               OR (m.receiver_id = ?1 AND m.sender_id = u.id)
             WHERE m.receiver_id IS NOT NULL
             ORDER BY u.full_name ASC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let full_name: String = row.get(1)?;
    let profile_pic: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        full_name,
        profile_pic,
        created_at,
    })
}
