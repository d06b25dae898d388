use hyper::{header, HeaderMap};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    api::{
        err::{internal_server_error, invalid_input, map_store_err, not_authenticated, not_found, ApiError, ApiResult},
        Id,
    },
    model::{Key, NewUser, User},
    prelude::*,
    store::{constraint, Store},
};

mod password;
mod token;

pub(crate) use self::{
    password::PasswordHasher,
    token::{Claims, TokenError, TokenSigner},
};


/// Secrets shorter than this are accepted, but a warning is printed.
const RECOMMENDED_SECRET_LEN: usize = 32;


/// Authentication: session tokens and password hashing.
#[derive(Debug, confique::Config)]
pub(crate) struct AuthConfig {
    /// Secret key used to sign session tokens (HMAC-SHA256). Should be long
    /// and random, e.g. `openssl rand -base64 48`. Changing it invalidates
    /// all issued tokens. Can also be set via `LINKBOARD_AUTH_SECRET`.
    #[config(env = "LINKBOARD_AUTH_SECRET")]
    pub(crate) secret: SecretString,

    /// Memory cost of the Argon2id password hash in KiB.
    #[config(default = 19456)]
    pub(crate) hash_memory_kib: u32,

    /// Number of Argon2id iterations.
    #[config(default = 2)]
    pub(crate) hash_iterations: u32,
}

impl AuthConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        let len = self.secret.expose_secret().len();
        if len == 0 {
            bail!("'auth.secret' must not be empty");
        }
        if len < RECOMMENDED_SECRET_LEN {
            warn!(
                "'auth.secret' is only {len} bytes long. Please use at least \
                    {RECOMMENDED_SECRET_LEN} random bytes.",
            );
        }

        PasswordHasher::new(self.hash_memory_kib, self.hash_iterations)?;
        Ok(())
    }
}

/// Input of the signup mutation.
pub(crate) struct NewAccount {
    pub(crate) email: String,
    pub(crate) password: SecretString,
    pub(crate) name: String,
}

/// Returned by signup and login.
#[derive(Debug)]
pub(crate) struct AuthPayload {
    pub(crate) token: String,
    pub(crate) user: User,
}

/// Everything related to "who is calling". Constructed once at startup and
/// shared by all requests.
pub(crate) struct AuthService {
    signer: TokenSigner,
    hasher: PasswordHasher,
}

impl AuthService {
    pub(crate) fn new(config: &AuthConfig) -> Result<Self> {
        let hasher = PasswordHasher::new(config.hash_memory_kib, config.hash_iterations)?;
        Ok(Self::from_parts(config.secret.expose_secret().as_bytes(), hasher))
    }

    pub(crate) fn from_parts(secret: &[u8], hasher: PasswordHasher) -> Self {
        Self {
            signer: TokenSigner::new(secret),
            hasher,
        }
    }

    /// Returns a signed token for the given user. Tokens do not expire.
    pub(crate) fn issue_token(&self, user: Key) -> String {
        self.signer.sign(&Claims { user_id: Id::user(user).to_string() })
    }

    pub(crate) async fn hash_password(&self, password: SecretString) -> Result<String> {
        self.hasher.hash(password).await
    }

    /// Returns the ID of the user that sent the request, according to the
    /// `Authorization: Bearer <token>` header.
    pub(crate) fn resolve_caller_id(&self, headers: &HeaderMap) -> ApiResult<Key> {
        let not_authenticated = |reason: &str| -> ApiError {
            debug!("Rejecting request as unauthenticated: {reason}");
            not_authenticated!("Not authenticated")
        };

        let value = headers.get(header::AUTHORIZATION)
            .ok_or_else(|| not_authenticated("no 'Authorization' header"))?;
        let value = value.to_str()
            .map_err(|_| not_authenticated("'Authorization' header is not valid ASCII"))?;
        // Auth schemes are case-insensitive (RFC 7235).
        let token = value.split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token)
            .ok_or_else(|| not_authenticated("'Authorization' header is not a bearer token"))?;

        let claims = self.signer.verify(token.trim()).map_err(|e| match e {
            TokenError::Malformed(what) => not_authenticated(what),
            TokenError::UnsupportedAlgorithm => not_authenticated("unsupported signing algorithm"),
            TokenError::BadSignature => not_authenticated("invalid token signature"),
        })?;

        claims.user_id.parse::<Id>().ok()
            .and_then(|id| id.key_for(Id::USER_KIND))
            .ok_or_else(|| not_authenticated("token contains invalid user ID"))
    }

    /// Creates a new account and returns a token for it. Duplicate emails are
    /// not checked upfront; the store rejects them.
    pub(crate) async fn signup(
        &self,
        store: &dyn Store,
        account: NewAccount,
    ) -> ApiResult<AuthPayload> {
        let password_hash = self.hasher.hash(account.password).await
            .map_err(hashing_failed)?;

        let user = map_store_err!(store.create_user(NewUser {
            name: account.name,
            email: account.email,
            password_hash,
        }).await, {
            if constraint == constraint::UNIQUE_USER_EMAIL => invalid_input!(
                key = "signup.email-taken",
                "A user with this email already exists",
            ),
        })?;

        info!("New user signed up: {:?}", user.key);
        Ok(AuthPayload { token: self.issue_token(user.key), user })
    }

    pub(crate) async fn login(
        &self,
        store: &dyn Store,
        email: &str,
        password: SecretString,
    ) -> ApiResult<AuthPayload> {
        let user = store.user_by_email(email).await?
            .ok_or_else(|| not_found!("Could not find user with email: {email}"))?;

        let valid = self.hasher.verify(password, user.password_hash.clone()).await
            .map_err(hashing_failed)?;
        if !valid {
            debug!("Wrong password for {:?}", user.key);
            return Err(not_authenticated!("Invalid password"));
        }

        Ok(AuthPayload { token: self.issue_token(user.key), user })
    }
}

fn hashing_failed(e: anyhow::Error) -> ApiError {
    error!("Password hashing failed: {e:#}");
    internal_server_error!("Password hashing failed")
}


#[cfg(test)]
mod tests {
    use hyper::{header::{self, HeaderValue}, HeaderMap};
    use secrecy::SecretString;

    use crate::{
        api::{err::ApiErrorKind, Id},
        model::Key,
        store::memory::MemoryStore,
    };
    use super::{AuthService, NewAccount, PasswordHasher, TokenSigner, Claims};

    const SECRET: &[u8] = b"a-test-secret-that-is-long-enough!!";

    fn service() -> AuthService {
        AuthService::from_parts(SECRET, PasswordHasher::new(256, 1).unwrap())
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn account(email: &str, password: &str) -> NewAccount {
        NewAccount {
            email: email.into(),
            password: SecretString::from(password.to_owned()),
            name: "Alice".into(),
        }
    }

    #[test]
    fn issued_token_resolves_to_same_user() {
        let auth = service();
        let token = auth.issue_token(Key(42));
        assert_eq!(auth.resolve_caller_id(&bearer(&token)).ok(), Some(Key(42)));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let auth = service();
        let token = auth.issue_token(Key(7));
        for scheme in ["bearer", "BEARER", "BeArEr"] {
            let mut headers = HeaderMap::new();
            let value = HeaderValue::from_str(&format!("{scheme} {token}")).unwrap();
            headers.insert(header::AUTHORIZATION, value);
            assert_eq!(auth.resolve_caller_id(&headers).ok(), Some(Key(7)), "scheme '{scheme}'");
        }

        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Basic {token}")).unwrap();
        headers.insert(header::AUTHORIZATION, value);
        assert!(auth.resolve_caller_id(&headers).is_err());
    }

    #[test]
    fn missing_or_bad_headers_are_unauthenticated() {
        let auth = service();
        let check = |headers: HeaderMap| {
            let err = auth.resolve_caller_id(&headers).unwrap_err();
            assert!(matches!(err.kind, ApiErrorKind::NotAuthenticated));
            assert_eq!(err.msg, "Not authenticated");
        };

        check(HeaderMap::new());
        check(bearer("not-a-jwt"));

        let token = auth.issue_token(Key(42));
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&token).unwrap());
        check(headers);

        let foreign = TokenSigner::new(b"another secret").sign(&Claims {
            user_id: Id::user(Key(42)).to_string(),
        });
        check(bearer(&foreign));

        let wrong_kind = TokenSigner::new(SECRET).sign(&Claims {
            user_id: Id::link(Key(42)).to_string(),
        });
        check(bearer(&wrong_kind));
    }

    #[tokio::test]
    async fn signup_then_login_yields_same_user() {
        let auth = service();
        let store = MemoryStore::new();

        let signup = auth.signup(&store, account("alice@example.org", "hunter2")).await
            .unwrap_or_else(|e| panic!("signup failed: {}", e.msg));
        assert_ne!(signup.user.password_hash, "hunter2");

        let login = auth.login(&store, "alice@example.org", SecretString::from("hunter2".to_owned()))
            .await
            .unwrap_or_else(|e| panic!("login failed: {}", e.msg));
        assert_eq!(signup.user.key, login.user.key);
        assert_eq!(auth.resolve_caller_id(&bearer(&login.token)).ok(), Some(signup.user.key));
    }

    #[tokio::test]
    async fn login_failures() {
        let auth = service();
        let store = MemoryStore::new();
        assert!(auth.signup(&store, account("bob@example.org", "secret")).await.is_ok());

        let err = auth.login(&store, "nobody@example.org", SecretString::from("x".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ApiErrorKind::NotFound));
        assert_eq!(err.msg, "Could not find user with email: nobody@example.org");

        let err = auth.login(&store, "bob@example.org", SecretString::from("wrong".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ApiErrorKind::NotAuthenticated));
        assert_eq!(err.msg, "Invalid password");
    }

    #[tokio::test]
    async fn duplicate_email_is_a_validation_error() {
        let auth = service();
        let store = MemoryStore::new();
        assert!(auth.signup(&store, account("carol@example.org", "a")).await.is_ok());

        let err = auth.signup(&store, account("carol@example.org", "b")).await.unwrap_err();
        assert!(matches!(err.kind, ApiErrorKind::InvalidInput));
        assert_eq!(store.counts().0, 1);
    }
}
