use rand::{CryptoRng, RngCore};
use secrecy::SecretBox;


/// An empty `enum` for signaling the fact that a function (potentially) never returns.
/// Note that you can't construct a value of this type, so a function returning it
/// can never return. A function returning `Result<Never>` never returns
/// when it succeeds, but it might still fail.
pub(crate) enum Never {}

/// Generate random bytes with a cryptographically secure RNG.
pub(crate) fn gen_random_bytes_crypto<const N: usize>() -> SecretBox<[u8; N]> {
    // The explicit `CryptoRng` bound makes sure that swapping the RNG for a
    // non-cryptographic one does not silently compile.
    fn imp<const N: usize>(mut rng: impl RngCore + CryptoRng) -> [u8; N] {
        let mut bytes = [0; N];
        rng.fill_bytes(&mut bytes);
        bytes
    }

    SecretBox::new(Box::new(imp(rand::rng())))
}

/// The 64 digits of our URL-safe base64 flavor, in ascending order. Used to
/// encode keys.
pub(crate) const BASE64_DIGITS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

pub(crate) fn base64_decode(ascii: u8) -> Option<u8> {
    /// The reverse lookup table to `BASE64_DIGITS`. If you index by an ASCII
    /// value, you either get the corresponding digit value OR `0xFF`, signaling
    /// that the character is not a valid base64 character.
    const DECODE_TABLE: [u8; 256] = create_decode_table();

    const fn create_decode_table() -> [u8; 256] {
        let mut out = [0xFF; 256];

        // If you wonder why we are using `while` instead of a more idiomatic
        // loop: const fns are still somewhat limited and do not allow `for`.
        let mut i = 0;
        while i < BASE64_DIGITS.len() {
            out[BASE64_DIGITS[i] as usize] = i as u8;
            i += 1;
        }

        out
    }

    let raw = DECODE_TABLE[ascii as usize];
    if raw == 0xFF {
        return None;
    }

    Some(raw)
}


#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{BASE64_DIGITS, base64_decode, gen_random_bytes_crypto};

    #[test]
    fn decode_table_matches_digits() {
        for (i, &d) in BASE64_DIGITS.iter().enumerate() {
            assert_eq!(base64_decode(d), Some(i as u8));
        }
        for invalid in [b'+', b'/', b'=', b' ', b'*', 0, 0xFF] {
            assert_eq!(base64_decode(invalid), None);
        }
    }

    #[test]
    fn random_bytes_differ() {
        let a = gen_random_bytes_crypto::<32>();
        let b = gen_random_bytes_crypto::<32>();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
