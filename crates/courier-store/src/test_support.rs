//! Shared helpers for the in-crate unit tests.

use chrono::Utc;

use courier_shared::{Group, User, UserId};

use crate::Database;

pub fn test_db() -> Database {
    Database::in_memory().expect("in-memory database")
}

pub fn new_user(db: &Database, name: &str) -> User {
    let user = User {
        id: UserId::new(),
        full_name: name.to_string(),
        profile_pic: String::new(),
        created_at: Utc::now(),
    };
    db.insert_user(&user).expect("insert user");
    user
}

pub fn new_group(db: &Database, creator: UserId, members: &[UserId]) -> Group {
    let group = Group::new("test group".into(), creator, members.to_vec(), String::new());
    db.create_group(&group).expect("create group");
    group
}
