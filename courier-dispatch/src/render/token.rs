//! Recipient tokens embedded in unsubscribe and view-on-site links.
//!
//! A link carries `uid`, the recipient id in base 36, and `token`, the first 20 hex
//! characters of `SHA-256("{secret}:{uid}:{address}")`.

use courier_common::{Recipient, RecipientId};
use sha2::{Digest, Sha256};

const TOKEN_LENGTH: usize = 20;
const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn uid(recipient: RecipientId) -> String {
    let mut value = recipient.0;
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[usize::try_from(value % 36).unwrap_or_default()]);
        value /= 36;
    }
    digits.reverse();

    String::from_utf8_lossy(&digits).into_owned()
}

pub fn parse_uid(uid: &str) -> Option<RecipientId> {
    u64::from_str_radix(uid, 36).ok().map(RecipientId)
}

pub fn token(secret: &str, uid: &str, address: &str) -> String {
    let digest = Sha256::digest(format!("{secret}:{uid}:{address}").as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(TOKEN_LENGTH);
    token
}

/// `(uid, token)` for a recipient.
pub fn tokenize(secret: &str, recipient: &Recipient) -> (String, String) {
    let uid = uid(recipient.id);
    let token = token(secret, &uid, &recipient.address);
    (uid, token)
}

/// Check a token presented in a link against the recipient it claims to be for.
pub fn verify_token(secret: &str, recipient: &Recipient, presented: &str) -> bool {
    let (_, expected) = tokenize(secret, recipient);
    expected.len() == presented.len()
        && expected
            .bytes()
            .zip(presented.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
