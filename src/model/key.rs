use std::fmt;

use bytes::BytesMut;
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

use crate::util::{BASE64_DIGITS, base64_decode};


/// Primary key of users, links and votes. In the database, it's a `bigint`
/// (`i64`) generated from a sequence. Implements `ToSql` and `FromSql` by
/// casting to/from `i64`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct Key(pub(crate) u64);

impl Key {
    /// Length of the base64 representation of every key.
    pub(crate) const BASE64_LEN: usize = 11;

    pub(crate) fn from_base64(s: &str) -> Option<Self> {
        let src: [u8; Self::BASE64_LEN] = s.as_bytes().try_into().ok()?;

        // `u64::MAX` encodes to `P__________`. Anything with a first digit
        // above `P` would overflow.
        if !(b'A'..=b'P').contains(&src[0]) {
            return None;
        }

        src.iter()
            .try_fold(0u64, |acc, &d| base64_decode(d).map(|n| acc * 64 + n as u64))
            .map(Key)
    }

    pub(crate) fn to_base64<'a>(&self, out: &'a mut [u8; Self::BASE64_LEN]) -> &'a str {
        // After this loop, `n` is always 0, because `u64::MAX` divided by 64
        // eleven times is 0.
        let mut n = self.0;
        for digit in out.iter_mut().rev() {
            *digit = BASE64_DIGITS[(n % 64) as usize];
            n /= 64;
        }
        debug_assert!(n == 0);

        std::str::from_utf8(out).expect("bug: base64 did produce non-ASCII character")
    }
}

impl ToSql for Key {
    fn to_sql(
        &self,
        ty: &postgres_types::Type,
        out: &mut BytesMut,
    ) -> Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        (self.0 as i64).to_sql(ty, out)
    }

    fn accepts(ty: &postgres_types::Type) -> bool {
        <i64 as ToSql>::accepts(ty)
    }

    postgres_types::to_sql_checked!();
}

impl<'a> FromSql<'a> for Key {
    fn from_sql(
        ty: &postgres_types::Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        i64::from_sql(ty, raw).map(|i| Key(i as u64))
    }

    fn accepts(ty: &postgres_types::Type) -> bool {
        <i64 as FromSql>::accepts(ty)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0; Self::BASE64_LEN];
        write!(f, "Key({} :: {})", self.0 as i64, self.to_base64(&mut buf))
    }
}


#[cfg(test)]
mod tests {
    use super::Key;

    #[test]
    fn base64_roundtrip_edges() {
        for n in [0, 1, 63, 64, 4096, i64::MAX as u64, u64::MAX - 1, u64::MAX] {
            let mut buf = [0; Key::BASE64_LEN];
            let s = Key(n).to_base64(&mut buf).to_owned();
            assert_eq!(Key::from_base64(&s), Some(Key(n)), "failed for {n}");
        }
    }

    #[test]
    fn rejects_overflow_and_garbage() {
        assert_eq!(Key::from_base64("QAAAAAAAAAA"), None);
        assert_eq!(Key::from_base64("AAAAAAAAAA"), None);
        assert_eq!(Key::from_base64("AAAAAAAAAA+"), None);
        assert_eq!(Key::from_base64("AAAAAAAAAAAA"), None);
    }
}
