//! Store implementation that keeps everything in process memory. Used by the
//! tests to run the real schema without a database.

use std::sync::Mutex;
use chrono::Utc;

use crate::model::{Key, Link, NewLink, NewUser, User, Vote};
use super::{
    constraint, ChangeEvent, EventFeed, EventFilter, EventStream, FeedQuery, Store,
    StoreError, StoreResult,
};


pub(crate) struct MemoryStore {
    state: Mutex<State>,
    link_feed: EventFeed<Link>,
    vote_feed: EventFeed<Vote>,
}

#[derive(Default)]
struct State {
    next_key: u64,
    users: Vec<User>,
    links: Vec<Link>,
    votes: Vec<Vote>,
}

impl State {
    fn new_key(&mut self) -> Key {
        self.next_key += 1;
        Key(self.next_key)
    }

    fn user_exists(&self, key: Key) -> bool {
        self.users.iter().any(|u| u.key == key)
    }
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            link_feed: EventFeed::new("link"),
            vote_feed: EventFeed::new("vote"),
        }
    }

    /// Number of stored (users, links, votes).
    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        let state = self.lock();
        (state.users.len(), state.links.len(), state.votes.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unique(name: &str) -> StoreError {
    StoreError::UniqueViolation { constraint: name.into() }
}

fn foreign_key(name: &str) -> StoreError {
    StoreError::ForeignKeyViolation { constraint: name.into() }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let mut state = self.lock();
        if state.users.iter().any(|u| u.email == new.email) {
            return Err(unique(constraint::UNIQUE_USER_EMAIL));
        }

        let user = User {
            key: state.new_key(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn user_by_key(&self, key: Key) -> StoreResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.key == key).cloned())
    }

    async fn create_link(&self, new: NewLink) -> StoreResult<Link> {
        let link = {
            let mut state = self.lock();
            if !state.user_exists(new.posted_by) {
                return Err(foreign_key(constraint::LINK_AUTHOR_EXISTS));
            }

            let link = Link {
                key: state.new_key(),
                created_at: Utc::now(),
                url: new.url,
                description: new.description,
                posted_by: new.posted_by,
            };
            state.links.push(link.clone());
            link
        };

        self.link_feed.publish(ChangeEvent::created(link.clone()));
        Ok(link)
    }

    async fn link_by_key(&self, key: Key) -> StoreResult<Option<Link>> {
        Ok(self.lock().links.iter().find(|l| l.key == key).cloned())
    }

    async fn links(&self, query: FeedQuery) -> StoreResult<Vec<Link>> {
        let state = self.lock();
        let mut links = state.links.iter()
            .filter(|l| query.matches(l))
            .cloned()
            .collect::<Vec<_>>();
        links.sort_by(|a, b| (b.created_at, b.key).cmp(&(a.created_at, a.key)));

        Ok(links.into_iter()
            .skip(query.skip as usize)
            .take(query.first.map_or(usize::MAX, |n| n as usize))
            .collect())
    }

    async fn links_posted_by(&self, user: Key) -> StoreResult<Vec<Link>> {
        let mut links = self.lock().links.iter()
            .filter(|l| l.posted_by == user)
            .cloned()
            .collect::<Vec<_>>();
        links.sort_by(|a, b| (b.created_at, b.key).cmp(&(a.created_at, a.key)));
        Ok(links)
    }

    async fn vote_exists(&self, user: Key, link: Key) -> StoreResult<bool> {
        Ok(self.lock().votes.iter().any(|v| v.user == user && v.link == link))
    }

    async fn create_vote(&self, user: Key, link: Key) -> StoreResult<Vote> {
        let vote = {
            // Checking and inserting under the same lock makes this atomic,
            // like the unique constraint in the database.
            let mut state = self.lock();
            if !state.user_exists(user) {
                return Err(foreign_key(constraint::VOTE_USER_EXISTS));
            }
            if !state.links.iter().any(|l| l.key == link) {
                return Err(foreign_key(constraint::VOTE_LINK_EXISTS));
            }
            if state.votes.iter().any(|v| v.user == user && v.link == link) {
                return Err(unique(constraint::UNIQUE_VOTE));
            }

            let vote = Vote { key: state.new_key(), user, link };
            state.votes.push(vote.clone());
            vote
        };

        self.vote_feed.publish(ChangeEvent::created(vote.clone()));
        Ok(vote)
    }

    async fn votes_for_link(&self, link: Key) -> StoreResult<Vec<Vote>> {
        Ok(self.lock().votes.iter().filter(|v| v.link == link).cloned().collect())
    }

    fn link_events(&self, filter: EventFilter) -> EventStream<Link> {
        self.link_feed.subscribe(filter)
    }

    fn vote_events(&self, filter: EventFilter) -> EventStream<Vote> {
        self.vote_feed.subscribe(filter)
    }
}


#[cfg(test)]
mod tests {
    use crate::{
        model::{Key, NewLink, NewUser},
        store::{constraint, FeedQuery, Store, StoreError},
    };
    use super::MemoryStore;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Peter".into(),
            email: email.into(),
            password_hash: "$argon2id$not-a-real-hash".into(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_violates_constraint() {
        let store = MemoryStore::new();
        store.create_user(new_user("peter@example.org")).await.unwrap();
        let err = store.create_user(new_user("peter@example.org")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { constraint: name } if name == constraint::UNIQUE_USER_EMAIL
        ));
    }

    #[tokio::test]
    async fn second_vote_violates_constraint() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@example.org")).await.unwrap();
        let link = store.create_link(NewLink {
            url: "https://example.org".into(),
            description: "Example".into(),
            posted_by: user.key,
        }).await.unwrap();

        store.create_vote(user.key, link.key).await.unwrap();
        let err = store.create_vote(user.key, link.key).await.unwrap_err();
        assert_eq!(err.constraint(), Some(constraint::UNIQUE_VOTE));

        let err = store.create_vote(user.key, Key(9999)).await.unwrap_err();
        assert_eq!(err.constraint(), Some(constraint::VOTE_LINK_EXISTS));
        assert_eq!(store.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn feed_is_newest_first_and_filtered() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@example.org")).await.unwrap();
        for (url, description) in [
            ("https://rust-lang.org", "Rust"),
            ("https://graphql.org", "GraphQL spec"),
            ("https://tokio.rs", "Async Rust runtime"),
        ] {
            store.create_link(NewLink {
                url: url.into(),
                description: description.into(),
                posted_by: user.key,
            }).await.unwrap();
        }

        let all = store.links(FeedQuery::default()).await.unwrap();
        let urls = all.iter().map(|l| l.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, ["https://tokio.rs", "https://graphql.org", "https://rust-lang.org"]);

        let rusty = store.links(FeedQuery {
            filter: Some("RUST".into()),
            skip: 1,
            first: Some(5),
        }).await.unwrap();
        assert_eq!(rusty.len(), 1);
        assert_eq!(rusty[0].url, "https://rust-lang.org");
    }
}
