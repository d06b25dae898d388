//! The data-access capability that everything above the persistence layer
//! talks to.
//!
//! The API layer never touches SQL directly. It only sees `dyn Store`, which
//! is implemented by the PostgreSQL store in `crate::db::store` and, for
//! tests, by an in-memory store.

use std::{fmt, pin::Pin};
use futures::Stream;
use tokio::sync::broadcast;

use crate::{
    model::{Key, Link, NewLink, NewUser, User, Vote},
    prelude::*,
};

#[cfg(test)]
pub(crate) mod memory;


/// Names of storage-level constraints. The PostgreSQL schema uses exactly
/// these names, and the in-memory store reports them in the same situations.
pub(crate) mod constraint {
    pub(crate) const UNIQUE_USER_EMAIL: &str = "unique_user_email";
    pub(crate) const UNIQUE_VOTE: &str = "unique_vote_per_user_and_link";
    pub(crate) const LINK_AUTHOR_EXISTS: &str = "link_author_exists";
    pub(crate) const VOTE_USER_EXISTS: &str = "vote_user_exists";
    pub(crate) const VOTE_LINK_EXISTS: &str = "vote_link_exists";
}

pub(crate) type StoreResult<T> = Result<T, StoreError>;

pub(crate) type EventStream<T> = Pin<Box<dyn Stream<Item = ChangeEvent<T>> + Send>>;

#[async_trait::async_trait]
pub(crate) trait Store: Send + Sync {
    /// Inserts a new user. Fails with `UniqueViolation(UNIQUE_USER_EMAIL)` if
    /// the email is already taken.
    async fn create_user(&self, new: NewUser) -> StoreResult<User>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn user_by_key(&self, key: Key) -> StoreResult<Option<User>>;

    async fn create_link(&self, new: NewLink) -> StoreResult<Link>;
    async fn link_by_key(&self, key: Key) -> StoreResult<Option<Link>>;

    /// Links, newest first.
    async fn links(&self, query: FeedQuery) -> StoreResult<Vec<Link>>;
    async fn links_posted_by(&self, user: Key) -> StoreResult<Vec<Link>>;

    async fn vote_exists(&self, user: Key, link: Key) -> StoreResult<bool>;

    /// Inserts a vote. Fails with `UniqueViolation(UNIQUE_VOTE)` if the user
    /// already voted for that link, even when racing with another insert.
    async fn create_vote(&self, user: Key, link: Key) -> StoreResult<Vote>;
    async fn votes_for_link(&self, link: Key) -> StoreResult<Vec<Vote>>;

    fn link_events(&self, filter: EventFilter) -> EventStream<Link>;
    fn vote_events(&self, filter: EventFilter) -> EventStream<Vote>;
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FeedQuery {
    /// Case-insensitive substring of either URL or description.
    pub(crate) filter: Option<String>,
    pub(crate) skip: u32,
    pub(crate) first: Option<u32>,
}

impl FeedQuery {
    pub(crate) fn matches(&self, link: &Link) -> bool {
        match &self.filter {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                link.url.to_lowercase().contains(&needle)
                    || link.description.to_lowercase().contains(&needle)
            }
        }
    }
}


// ===== Errors ==================================================================================

pub(crate) enum StoreError {
    UniqueViolation { constraint: String },
    ForeignKeyViolation { constraint: String },
    Backend(anyhow::Error),
}

impl StoreError {
    pub(crate) fn constraint(&self) -> Option<&str> {
        match self {
            Self::UniqueViolation { constraint }
            | Self::ForeignKeyViolation { constraint } => Some(constraint.as_str()),
            Self::Backend(_) => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniqueViolation { constraint } => {
                write!(f, "unique constraint '{constraint}' violated")
            }
            Self::ForeignKeyViolation { constraint } => {
                write!(f, "foreign key constraint '{constraint}' violated")
            }
            Self::Backend(e) => write!(f, "{e:#}"),
        }
    }
}

impl fmt::Debug for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "Backend({e:?})"),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl std::error::Error for StoreError {}


// ===== Change events ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, juniper::GraphQLEnum)]
pub(crate) enum MutationType {
    Created,
    Updated,
    Deleted,
}

/// A change to a single record, as delivered to subscribers.
#[derive(Debug, Clone)]
pub(crate) struct ChangeEvent<T> {
    pub(crate) mutation: MutationType,
    pub(crate) node: Option<T>,
    pub(crate) updated_fields: Vec<String>,
}

impl<T> ChangeEvent<T> {
    pub(crate) fn created(node: T) -> Self {
        Self {
            mutation: MutationType::Created,
            node: Some(node),
            updated_fields: vec![],
        }
    }
}

/// Selects which change events a subscriber receives. An empty `mutation_in`
/// lets everything through.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventFilter {
    pub(crate) mutation_in: Vec<MutationType>,
}

impl EventFilter {
    pub(crate) fn created_only() -> Self {
        Self { mutation_in: vec![MutationType::Created] }
    }

    fn accepts<T>(&self, event: &ChangeEvent<T>) -> bool {
        self.mutation_in.is_empty() || self.mutation_in.contains(&event.mutation)
    }
}

/// In-process fan-out of change events for one record type. Publishing never
/// blocks; subscribers that fall behind skip the events they missed.
pub(crate) struct EventFeed<T> {
    sender: broadcast::Sender<ChangeEvent<T>>,
    name: &'static str,
}

impl<T: Clone + Send + 'static> EventFeed<T> {
    const CAPACITY: usize = 256;

    pub(crate) fn new(name: &'static str) -> Self {
        let (sender, _) = broadcast::channel(Self::CAPACITY);
        Self { sender, name }
    }

    pub(crate) fn publish(&self, event: ChangeEvent<T>) {
        // An error only means that nobody is listening right now.
        let receivers = self.sender.send(event).unwrap_or(0);
        trace!("Published {} event to {receivers} subscriber(s)", self.name);
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> EventStream<T> {
        let name = self.name;
        let rx = self.sender.subscribe();
        futures::stream::unfold(rx, move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{name} subscriber lagged behind, skipped {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
            .filter(move |event| futures::future::ready(filter.accepts(event)))
            .boxed()
    }
}


#[cfg(test)]
mod tests {
    use super::{ChangeEvent, EventFeed, EventFilter, MutationType};
    use crate::prelude::*;

    #[tokio::test]
    async fn feed_applies_mutation_filter() {
        let feed = EventFeed::<u32>::new("test");
        let mut created = feed.subscribe(EventFilter::created_only());
        let mut all = feed.subscribe(EventFilter::default());

        feed.publish(ChangeEvent {
            mutation: MutationType::Deleted,
            node: None,
            updated_fields: vec![],
        });
        feed.publish(ChangeEvent::created(7));

        let first_all = all.next().await.unwrap();
        assert_eq!(first_all.mutation, MutationType::Deleted);

        let first_created = created.next().await.unwrap();
        assert_eq!(first_created.mutation, MutationType::Created);
        assert_eq!(first_created.node, Some(7));
    }

    #[tokio::test]
    async fn stream_ends_when_feed_is_dropped() {
        let feed = EventFeed::<u32>::new("test");
        let mut stream = feed.subscribe(EventFilter::default());
        drop(feed);
        assert!(stream.next().await.is_none());
    }
}
