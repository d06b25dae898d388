use juniper::graphql_object;

use crate::{
    api::{Context, err::ApiResult, Id},
    auth::AuthPayload,
    model::{Link, User},
    prelude::*,
};


#[graphql_object(context = Context)]
impl User {
    fn id(&self) -> Id {
        Id::user(self.key)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn email(&self) -> &str {
        &self.email
    }

    /// All links posted by this user, newest first.
    async fn links(&self, context: &Context) -> ApiResult<Vec<Link>> {
        Ok(context.store().links_posted_by(self.key).await?)
    }
}

impl User {
    /// Loads the user that sent the request, if any.
    pub(crate) async fn load_caller(context: &Context) -> ApiResult<Option<Self>> {
        let Ok(key) = context.caller() else {
            return Ok(None);
        };

        let user = context.store().user_by_key(key).await?;
        if user.is_none() {
            // Valid signature, but the account is gone (e.g. DB was reset).
            debug!("Token refers to non-existing user {key:?}");
        }
        Ok(user)
    }
}

#[graphql_object(context = Context)]
impl AuthPayload {
    /// Send this as `Authorization: Bearer <token>` header to authenticate.
    fn token(&self) -> &str {
        &self.token
    }

    fn user(&self) -> &User {
        &self.user
    }
}
