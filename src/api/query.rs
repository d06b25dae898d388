use juniper::graphql_object;

use crate::model::{Link, User};
use super::{
    Context,
    Id,
    err::ApiResult,
};


/// The root query object.
pub(crate) struct Query;

#[graphql_object(context = Context)]
impl Query {
    /// A short description of this API.
    fn info() -> &'static str {
        "This is the API of a link sharing site: post links, vote for them \
            and subscribe to new links and votes."
    }

    /// Returns posted links, newest first.
    ///
    /// `filter` restricts the result to links whose URL or description
    /// contain the given string (case-insensitive). `skip` and `first` can be
    /// used for pagination.
    async fn feed(
        filter: Option<String>,
        skip: Option<i32>,
        first: Option<i32>,
        context: &Context,
    ) -> ApiResult<Vec<Link>> {
        Link::feed(filter, skip, first, context).await
    }

    /// Returns the link with the given ID or `None` if the ID does not refer
    /// to a link.
    async fn link(id: Id, context: &Context) -> ApiResult<Option<Link>> {
        Link::load_by_id(id, context).await
    }

    /// Returns the current user, or `None` if the request does not carry a
    /// valid token.
    async fn me(context: &Context) -> ApiResult<Option<User>> {
        User::load_caller(context).await
    }
}
