use chrono::{DateTime, Utc};
use juniper::graphql_object;

use crate::{
    api::{Context, err::{ApiResult, invalid_input, map_store_err, not_authenticated}, Id},
    model::{Link, NewLink, User, Vote},
    prelude::*,
    store::{constraint, FeedQuery},
};


#[graphql_object(context = Context)]
impl Link {
    fn id(&self) -> Id {
        Id::link(self.key)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn posted_by(&self, context: &Context) -> ApiResult<Option<User>> {
        Ok(context.store().user_by_key(self.posted_by).await?)
    }

    async fn votes(&self, context: &Context) -> ApiResult<Vec<Vote>> {
        Ok(context.store().votes_for_link(self.key).await?)
    }
}

impl Link {
    pub(crate) async fn post(
        url: String,
        description: String,
        context: &Context,
    ) -> ApiResult<Self> {
        let posted_by = context.caller()?;

        let link = map_store_err!(
            context.store().create_link(NewLink { url, description, posted_by }).await,
            {
                // The token is valid, but the user does not exist (anymore).
                if constraint == constraint::LINK_AUTHOR_EXISTS
                    => not_authenticated!("Not authenticated"),
            }
        )?;

        debug!("User {posted_by:?} posted link {:?}", link.key);
        Ok(link)
    }

    pub(crate) async fn load_by_id(id: Id, context: &Context) -> ApiResult<Option<Self>> {
        match id.key_for(Id::LINK_KIND) {
            Some(key) => Ok(context.store().link_by_key(key).await?),
            None => Ok(None),
        }
    }

    pub(crate) async fn feed(
        filter: Option<String>,
        skip: Option<i32>,
        first: Option<i32>,
        context: &Context,
    ) -> ApiResult<Vec<Self>> {
        let to_count = |name: &str, v: Option<i32>| -> ApiResult<Option<u32>> {
            v.map(|v| u32::try_from(v).map_err(|_| invalid_input!(
                key = "feed.negative-count",
                "'{}' must not be negative, but is {}",
                name,
                v,
            ))).transpose()
        };

        let query = FeedQuery {
            filter: filter.filter(|f| !f.is_empty()),
            skip: to_count("skip", skip)?.unwrap_or(0),
            first: to_count("first", first)?,
        };
        Ok(context.store().links(query).await?)
    }
}
