//! The PostgreSQL implementation of `Store`.

use deadpool_postgres::Pool;
use tokio_postgres::{error::SqlState, Row};

use crate::{
    model::{Key, Link, NewLink, NewUser, User, Vote},
    prelude::*,
    store::{
        ChangeEvent, EventFeed, EventFilter, EventStream, FeedQuery, Store, StoreError,
        StoreResult,
    },
};
use super::{util::dbargs, DbConnection};


pub(crate) struct PgStore {
    pool: Pool,
    link_feed: EventFeed<Link>,
    vote_feed: EventFeed<Vote>,
}

impl PgStore {
    pub(crate) fn new(pool: Pool) -> Self {
        Self {
            pool,
            link_feed: EventFeed::new("link"),
            vote_feed: EventFeed::new("vote"),
        }
    }

    async fn conn(&self) -> StoreResult<DbConnection> {
        self.pool.get()
            .await
            .context("failed to get DB connection from pool")
            .map_err(StoreError::Backend)
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_error) = e.as_db_error() {
            if let Some(constraint) = db_error.constraint() {
                let constraint = constraint.to_owned();
                if *db_error.code() == SqlState::UNIQUE_VIOLATION {
                    return Self::UniqueViolation { constraint };
                }
                if *db_error.code() == SqlState::FOREIGN_KEY_VIOLATION {
                    return Self::ForeignKeyViolation { constraint };
                }
            }
        }

        Self::Backend(e.into())
    }
}


// ===== Row mapping =============================================================================

const USER_COLS: &str = "id, name, email, password_hash";
const LINK_COLS: &str = "id, created_at, url, description, posted_by";
const VOTE_COLS: &str = "id, user_id, link_id";

fn user_from_row(row: &Row) -> User {
    User {
        key: row.get(0),
        name: row.get(1),
        email: row.get(2),
        password_hash: row.get(3),
    }
}

fn link_from_row(row: &Row) -> Link {
    Link {
        key: row.get(0),
        created_at: row.get(1),
        url: row.get(2),
        description: row.get(3),
        posted_by: row.get(4),
    }
}

fn vote_from_row(row: &Row) -> Vote {
    Vote {
        key: row.get(0),
        user: row.get(1),
        link: row.get(2),
    }
}


#[async_trait::async_trait]
impl Store for PgStore {
    async fn create_user(&self, new: NewUser) -> StoreResult<User> {
        let query = format!(
            "insert into users (name, email, password_hash) values ($1, $2, $3) \
                returning {USER_COLS}",
        );
        let row = self.conn().await?
            .query_one(&*query, &[&new.name, &new.email, &new.password_hash])
            .await?;
        Ok(user_from_row(&row))
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let query = format!("select {USER_COLS} from users where email = $1");
        let row = self.conn().await?.query_opt(&*query, &[&email]).await?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn user_by_key(&self, key: Key) -> StoreResult<Option<User>> {
        let query = format!("select {USER_COLS} from users where id = $1");
        let row = self.conn().await?.query_opt(&*query, &[&key]).await?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn create_link(&self, new: NewLink) -> StoreResult<Link> {
        let query = format!(
            "insert into links (url, description, posted_by) values ($1, $2, $3) \
                returning {LINK_COLS}",
        );
        let link = self.conn().await?
            .query_one(&*query, &[&new.url, &new.description, &new.posted_by])
            .await?
            .pipe(|row| link_from_row(&row));

        debug!("Created link {:?} ({})", link.key, link.url);
        self.link_feed.publish(ChangeEvent::created(link.clone()));
        Ok(link)
    }

    async fn link_by_key(&self, key: Key) -> StoreResult<Option<Link>> {
        let query = format!("select {LINK_COLS} from links where id = $1");
        let row = self.conn().await?.query_opt(&*query, &[&key]).await?;
        Ok(row.map(|row| link_from_row(&row)))
    }

    async fn links(&self, feed: FeedQuery) -> StoreResult<Vec<Link>> {
        // `strpos` instead of `like`, so that `%` and `_` in the filter are
        // matched literally.
        let query = format!(
            "select {LINK_COLS} from links \
                where $1::text is null \
                    or strpos(lower(url), lower($1)) > 0 \
                    or strpos(lower(description), lower($1)) > 0 \
                order by created_at desc, id desc \
                offset $2 limit $3",
        );
        let skip = i64::from(feed.skip);
        let first = feed.first.map(i64::from);

        let links = self.conn().await?
            .query_raw(&*query, dbargs![&feed.filter, &skip, &first])
            .await?
            .map_ok(|row| link_from_row(&row))
            .try_collect()
            .await?;
        Ok(links)
    }

    async fn links_posted_by(&self, user: Key) -> StoreResult<Vec<Link>> {
        let query = format!(
            "select {LINK_COLS} from links where posted_by = $1 order by created_at desc, id desc",
        );
        let links = self.conn().await?
            .query_raw(&*query, dbargs![&user])
            .await?
            .map_ok(|row| link_from_row(&row))
            .try_collect()
            .await?;
        Ok(links)
    }

    async fn vote_exists(&self, user: Key, link: Key) -> StoreResult<bool> {
        let query = "select exists(select from votes where user_id = $1 and link_id = $2)";
        let row = self.conn().await?.query_one(query, &[&user, &link]).await?;
        Ok(row.get(0))
    }

    async fn create_vote(&self, user: Key, link: Key) -> StoreResult<Vote> {
        let query = format!(
            "insert into votes (user_id, link_id) values ($1, $2) returning {VOTE_COLS}",
        );
        let vote = self.conn().await?
            .query_one(&*query, &[&user, &link])
            .await?
            .pipe(|row| vote_from_row(&row));

        debug!("User {:?} voted for link {:?}", vote.user, vote.link);
        self.vote_feed.publish(ChangeEvent::created(vote.clone()));
        Ok(vote)
    }

    async fn votes_for_link(&self, link: Key) -> StoreResult<Vec<Vote>> {
        let query = format!("select {VOTE_COLS} from votes where link_id = $1 order by id");
        let votes = self.conn().await?
            .query_raw(&*query, dbargs![&link])
            .await?
            .map_ok(|row| vote_from_row(&row))
            .try_collect()
            .await?;
        Ok(votes)
    }

    fn link_events(&self, filter: EventFilter) -> EventStream<Link> {
        self.link_feed.subscribe(filter)
    }

    fn vote_events(&self, filter: EventFilter) -> EventStream<Vote> {
        self.vote_feed.subscribe(filter)
    }
}
