//! Items that define the domain data model.
//!
//! These are the plain records that the store hands out and accepts. They are
//! used by the API layer, the PostgreSQL store and the in-memory store alike,
//! so they do not belong to either `db` or `api`.

use std::fmt;
use chrono::{DateTime, Utc};

mod key;

pub(crate) use self::key::Key;


/// A registered account.
#[derive(Clone)]
pub(crate) struct User {
    pub(crate) key: Key,
    pub(crate) name: String,
    pub(crate) email: String,

    /// Argon2 hash in PHC string format. Never the plaintext password.
    pub(crate) password_hash: String,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewUser {
    pub(crate) name: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) key: Key,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) url: String,
    pub(crate) description: String,
    pub(crate) posted_by: Key,
}

#[derive(Debug, Clone)]
pub(crate) struct NewLink {
    pub(crate) url: String,
    pub(crate) description: String,
    pub(crate) posted_by: Key,
}

/// One upvote. There is at most one vote per (user, link) pair.
#[derive(Debug, Clone)]
pub(crate) struct Vote {
    pub(crate) key: Key,
    pub(crate) user: Key,
    pub(crate) link: Key,
}
