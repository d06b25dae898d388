use juniper::graphql_object;
use secrecy::SecretString;

use crate::{
    auth::{AuthPayload, NewAccount},
    model::{Link, Vote},
};
use super::{
    Context,
    err::ApiResult,
    id::Id,
};


/// The root mutation object.
pub(crate) struct Mutation;

#[graphql_object(context = Context)]
impl Mutation {
    /// Posts a new link in the name of the current user.
    async fn post(url: String, description: String, context: &Context) -> ApiResult<Link> {
        Link::post(url, description, context).await
    }

    /// Creates a new account and returns a token for it.
    async fn signup(
        email: String,
        password: String,
        name: String,
        context: &Context,
    ) -> ApiResult<AuthPayload> {
        let account = NewAccount {
            email,
            password: SecretString::from(password),
            name,
        };
        context.auth.signup(context.store(), account).await
    }

    /// Logs into an existing account and returns a new token for it.
    async fn login(email: String, password: String, context: &Context) -> ApiResult<AuthPayload> {
        context.auth.login(context.store(), &email, SecretString::from(password)).await
    }

    /// Votes for a link in the name of the current user. Every user can vote
    /// for each link only once.
    async fn vote(link_id: Id, context: &Context) -> ApiResult<Vote> {
        Vote::cast(link_id, context).await
    }
}
