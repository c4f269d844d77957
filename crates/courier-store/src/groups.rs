//! CRUD operations for [`Group`] records and membership lookups.

use chrono::{DateTime, Utc};
use rusqlite::params;

use courier_shared::{Group, GroupId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a new group along with its membership rows, atomically.
    ///
    /// Callers build the [`Group`] through [`Group::new`], which already
    /// guarantees the creator is a deduplicated member and admin.  A
    /// member id naming no known user fails the whole call with
    /// [`StoreError::UnknownUser`] and leaves nothing behind.
    pub fn create_group(&self, group: &Group) -> Result<()> {
        for member in &group.members {
            if !self.user_exists(*member)? {
                return Err(StoreError::UnknownUser(member.to_string()));
            }
        }

        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO groups (id, name, created_by, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                group.id.to_string(),
                group.name,
                group.created_by.to_string(),
                group.avatar,
                group.created_at.to_rfc3339(),
            ],
        )?;

        for member in &group.members {
            let is_admin = group.admins.contains(member);
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, is_admin)
                 VALUES (?1, ?2, ?3)",
                params![group.id.to_string(), member.to_string(), is_admin],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Fetch a single group by id, members and admins included.
    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let (name, created_by, avatar, created_at) = self
            .conn()
            .query_row(
                "SELECT name, created_by, avatar, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        let created_by = UserId::parse(&created_by)?;
        let created_at: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&created_at).map(|dt| dt.with_timezone(&Utc))?;

        let (members, admins) = self.load_members(id)?;

        Ok(Group {
            id,
            name,
            created_by,
            members,
            admins,
            avatar,
            created_at,
        })
    }

    /// All groups the user belongs to, newest first.  Drives the room
    /// membership resolver at connect time.
    pub fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user.to_string()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(GroupId::parse(&row?)?);
        }

        let mut groups = Vec::new();
        for id in ids {
            groups.push(self.get_group(id)?);
        }
        Ok(groups)
    }

    /// Membership check used by every group operation; absence of the
    /// group itself surfaces as `NotFound` via [`Database::get_group`].
    pub fn is_group_member(&self, group_id: GroupId, user: UserId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members
             WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether any group with this id exists.
    pub fn group_exists(&self, group_id: GroupId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM groups WHERE id = ?1",
            params![group_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn load_members(&self, group_id: GroupId) -> Result<(Vec<UserId>, Vec<UserId>)> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, is_admin FROM group_members
             WHERE group_id = ?1
             ORDER BY user_id ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut members = Vec::new();
        let mut admins = Vec::new();
        for row in rows {
            let (user_str, is_admin) = row?;
            let user = UserId::parse(&user_str)?;
            members.push(user);
            if is_admin {
                admins.push(user);
            }
        }
        Ok((members, admins))
    }
}
