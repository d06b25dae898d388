use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};

use crate::{prelude::*, util::gen_random_bytes_crypto};


/// Hashes and verifies passwords with Argon2id. Both operations are
/// deliberately slow, so they run on tokio's blocking thread pool.
#[derive(Clone)]
pub(crate) struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    pub(crate) fn new(memory_kib: u32, iterations: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|e| anyhow!("invalid password hashing parameters: {e}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Returns the PHC string (`$argon2id$v=19$...`) of the password with a
    /// fresh random salt.
    pub(crate) async fn hash(&self, password: SecretString) -> Result<String> {
        let argon2 = self.argon2();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let salt_bytes = gen_random_bytes_crypto::<16>();
            let salt = SaltString::encode_b64(salt_bytes.expose_secret())
                .map_err(|e| anyhow!("failed to encode salt: {e}"))?;
            let hash = argon2.hash_password(password.expose_secret().as_bytes(), &salt)
                .map_err(|e| anyhow!("failed to hash password: {e}"))?;
            Ok(hash.to_string())
        })
            .await
            .context("password hashing task failed")?
    }

    /// Checks the password against a stored PHC string. The cost parameters
    /// are taken from the stored hash, not from `self`.
    pub(crate) async fn verify(&self, password: SecretString, hash: String) -> Result<bool> {
        let argon2 = self.argon2();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| anyhow!("stored password hash is invalid: {e}"))?;
            match argon2.verify_password(password.expose_secret().as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(password_hash::Error::Password) => Ok(false),
                Err(e) => Err(anyhow!("failed to verify password: {e}")),
            }
        })
            .await
            .context("password verification task failed")?
    }
}


#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::PasswordHasher;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(256, 1).unwrap()
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[tokio::test]
    async fn hash_is_not_plaintext_and_verifies() {
        let hasher = hasher();
        let hash = hasher.hash(secret("correct horse")).await.unwrap();
        assert_ne!(hash, "correct horse");
        assert!(hash.starts_with("$argon2id$"));

        assert!(hasher.verify(secret("correct horse"), hash.clone()).await.unwrap());
        assert!(!hasher.verify(secret("battery staple"), hash).await.unwrap());
    }

    #[tokio::test]
    async fn salts_differ() {
        let hasher = hasher();
        let a = hasher.hash(secret("same")).await.unwrap();
        let b = hasher.hash(secret("same")).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn garbage_hash_is_an_error() {
        assert!(hasher().verify(secret("x"), "not a hash".into()).await.is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(PasswordHasher::new(1, 1).is_err());
        assert!(PasswordHasher::new(256, 0).is_err());
    }
}
