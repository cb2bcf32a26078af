//! Webhook signature verification and the MD5 digest used for deterministic
//! secret naming.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum webhook payload size accepted from either platform (10MB).
pub const MAX_WEBHOOK_SIZE: usize = 10 * 1024 * 1024;

/// Computes HMAC-SHA256 of `data` with `key` and returns it as a hex string.
pub fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a GitHub `X-Hub-Signature-256` header (`sha256=<hex>`) against
/// the configured shared secret, in constant time.
pub fn verify_github_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Some(provided) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let computed = hmac_sha256_hex(secret.as_bytes(), body);
    constant_time_eq(provided.as_bytes(), computed.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Hex-encoded MD5 digest of `token`, used only for secret-name stability —
/// the token itself lives in the secret body, never in the name.
pub fn md5_hex(token: &[u8]) -> String {
    format!("{:x}", md5::compute(token))
}
