//! HMAC-SHA256 signatures for cookie values.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &str, value: &str) -> HmacSha256 {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac accepts keys of any length"),
    };
    mac.update(value.as_bytes());
    mac
}

pub fn hmac_sha256(key: &str, message: &str) -> [u8; 32] {
    keyed(key, message).finalize().into_bytes().into()
}

/// `value.<hex signature>`.
pub fn sign(secret: &str, value: &str) -> String {
    format!("{}.{}", value, hex::encode(hmac_sha256(secret, value)))
}

/// The value of a signed string, if the signature matches.
pub fn unsign<'a>(secret: &str, signed: &'a str) -> Option<&'a str> {
    let (value, signature) = signed.rsplit_once('.')?;
    let given = hex::decode(signature).ok()?;
    keyed(secret, value).verify_slice(&given).ok().map(|()| value)
}
