use juniper::graphql_object;

use crate::{
    api::{
        Context,
        err::{ApiResult, conflict, invalid_input, map_store_err, not_authenticated},
        Id,
    },
    model::{Link, User, Vote},
    prelude::*,
    store::constraint,
};


#[graphql_object(context = Context)]
impl Vote {
    fn id(&self) -> Id {
        Id::vote(self.key)
    }

    async fn link(&self, context: &Context) -> ApiResult<Option<Link>> {
        Ok(context.store().link_by_key(self.link).await?)
    }

    async fn user(&self, context: &Context) -> ApiResult<Option<User>> {
        Ok(context.store().user_by_key(self.user).await?)
    }
}

impl Vote {
    /// Records a vote of the calling user for the given link.
    ///
    /// The existence check only provides the nice error message. Two
    /// concurrent votes can both pass it, but the store's uniqueness
    /// constraint lets only one of them through.
    pub(crate) async fn cast(link_id: Id, context: &Context) -> ApiResult<Self> {
        let user = context.caller()?;
        let already_voted = || conflict!(
            key = "vote.duplicate",
            "Already voted for link: {}",
            link_id,
        );
        let Some(link) = link_id.key_for(Id::LINK_KIND) else {
            return Err(invalid_input!(
                key = "vote.invalid-link",
                "The given ID does not refer to a link",
            ));
        };

        if context.store().vote_exists(user, link).await? {
            return Err(already_voted());
        }

        let vote = map_store_err!(context.store().create_vote(user, link).await, {
            if constraint == constraint::UNIQUE_VOTE => already_voted(),
            if constraint == constraint::VOTE_LINK_EXISTS => invalid_input!(
                key = "vote.invalid-link",
                "Link '{}' does not exist",
                link_id,
            ),
            if constraint == constraint::VOTE_USER_EXISTS => not_authenticated!("Not authenticated"),
        })?;

        debug!("User {user:?} voted for link {link:?}");
        Ok(vote)
    }
}
