use juniper::{GraphQLScalar, InputValue, ScalarValue};
use paste::paste;
use static_assertions::const_assert;
use std::fmt;

use crate::model::Key;


/// An opaque, globally-unique identifier for everything the API returns.
///
/// The first two characters define the kind of record (e.g. `us` for users),
/// the remaining 11 characters are the base64 encoded database key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, GraphQLScalar)]
#[graphql(
    name = "ID",
    description = "An opaque, globally-unique identifier",
    parse_token(String),
)]
pub(crate) struct Id {
    kind: [u8; 2],

    /// Private: use [`Self::key_for`] to get to it, which forces you to check
    /// the kind.
    key: Key,
}


// Defines a list of "kinds", each with a two alphanumeric ASCII character
// prefix. For each kind, an associated const and a constructor are emitted.
macro_rules! define_kinds {
    ($($name:ident = $val:literal ,)+) => {
        paste!(
            impl Id {
                $(
                    pub(crate) const [<$name:upper _KIND>]: [u8; 2] = *$val;

                    pub(crate) fn $name(key: Key) -> Self {
                        Self {
                            kind: Self:: [<$name:upper _KIND>],
                            key,
                        }
                    }
                )+
            }
        );

        $(
            const_assert!($val[0].is_ascii_alphanumeric());
            const_assert!($val[1].is_ascii_alphanumeric());
        )+

        // Fails to compile if two kinds share a prefix.
        #[allow(non_camel_case_types, dead_code)]
        #[repr(u16)]
        enum _KindChecker {
            $( $name = u16::from_ne_bytes(*$val), )+
        }
    };
}

define_kinds![
    user = b"us",
    link = b"li",
    vote = b"vo",
];


impl Id {
    const INVALID_KIND: [u8; 2] = *b"!!";

    /// Returns an ID that refers to nothing. Unparsable IDs become this, so
    /// that looking them up just finds nothing instead of raising a syntax
    /// error.
    fn invalid() -> Self {
        Self {
            kind: Self::INVALID_KIND,
            key: Key(0),
        }
    }

    /// Returns the key of this id if the kind is equal to `expected_kind`.
    pub(crate) fn key_for(&self, expected_kind: [u8; 2]) -> Option<Key> {
        if self.kind == expected_kind {
            Some(self.key)
        } else {
            None
        }
    }

    fn to_output<S: ScalarValue>(&self) -> juniper::Value<S> {
        juniper::Value::scalar(self.to_string())
    }

    fn from_input<S: ScalarValue>(input: &InputValue<S>) -> Result<Self, String> {
        let s = input.as_string_value().ok_or("expected string")?;
        Ok(s.parse().unwrap_or(Self::invalid()))
    }
}

impl std::str::FromStr for Id {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 + Key::BASE64_LEN {
            return Err("invalid length");
        }

        let bytes = s.as_bytes();
        let kind = [bytes[0], bytes[1]];
        if !kind.iter().all(u8::is_ascii_alphanumeric) {
            return Err("invalid kind");
        }
        let key = Key::from_base64(&s[2..]).ok_or("invalid base64")?;

        Ok(Self { kind, key })
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut key = [0; Key::BASE64_LEN];
        // The kind is always ASCII.
        let kind = std::str::from_utf8(&self.kind).unwrap_or("!!");
        write!(f, "{kind}{}", self.key.to_base64(&mut key))
    }
}


#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use super::{Id, Key};

    #[test]
    fn simple() {
        #[track_caller]
        fn check(id: Id, s: &str) {
            assert_eq!(id.to_string(), s);
            assert_eq!(Id::from_str(s), Ok(id));
        }

        check(Id::user(Key(0)), "usAAAAAAAAAAA");
        check(Id::user(Key(1)), "usAAAAAAAAAAB");
        check(Id::link(Key(62)), "liAAAAAAAAAA-");
        check(Id::link(Key(63)), "liAAAAAAAAAA_");
        check(Id::vote(Key(64)), "voAAAAAAAAABA");
        check(Id::vote(Key(u64::MAX)), "voP__________");
    }

    #[test]
    fn invalid_decode() {
        assert_eq!(Id::from_str(""), Err("invalid length"));
        assert_eq!(Id::from_str("us"), Err("invalid length"));
        assert_eq!(Id::from_str("usAAAAAAAAAAAA"), Err("invalid length"));
        assert_eq!(Id::from_str("äAAAAAAAAAAA"), Err("invalid kind"));
        assert_eq!(Id::from_str("!!AAAAAAAAAAA"), Err("invalid kind"));

        assert_eq!(Id::from_str("us0000000000*"), Err("invalid base64"));
        assert_eq!(Id::from_str("us0000000000/"), Err("invalid base64"));
        assert_eq!(Id::from_str("usQAAAAAAAAAA"), Err("invalid base64"));
    }

    #[test]
    fn key_requires_matching_kind() {
        let id = Id::link(Key(7));
        assert_eq!(id.key_for(Id::LINK_KIND), Some(Key(7)));
        assert_eq!(id.key_for(Id::USER_KIND), None);
        assert_eq!(Id::invalid().key_for(Id::USER_KIND), None);
    }
}
