use std::sync::Arc;
use hyper::HeaderMap;

use crate::{
    api::err::ApiResult,
    auth::AuthService,
    model::Key,
    store::Store,
};


/// The context that is accessible to every resolver in our API.
pub(crate) struct Context {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) auth: Arc<AuthService>,

    /// Headers of the HTTP request. Only used to find out who is calling.
    pub(crate) headers: HeaderMap,
}

impl juniper::Context for Context {}

impl Context {
    pub(crate) fn store(&self) -> &dyn Store {
        &*self.store
    }

    /// Returns the key of the calling user, or an authentication error if
    /// the request does not carry a valid token.
    pub(crate) fn caller(&self) -> ApiResult<Key> {
        self.auth.resolve_caller_id(&self.headers)
    }
}
