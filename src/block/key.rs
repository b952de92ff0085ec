//! Cache key derivation and blob tagging
//!
//! Cache file names are HMAC-SHA256 digests of the block id, so the cache
//! directory cannot be correlated with remote block ids without the secret.
//! Every cached blob also carries a trailing HMAC tag of its payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the integrity tag appended to cached blobs
pub const TAG_LEN: usize = 32;

fn keyed(secret: &[u8]) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// Derive the on-disk cache key for block `id`
pub fn derive_cache_key(secret: &[u8], id: &str) -> String {
    let mut mac = keyed(secret);
    mac.update(id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Append the integrity tag of `data`
pub(crate) fn append_tag(secret: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = keyed(secret);
    mac.update(data);
    let tag = mac.finalize().into_bytes();

    let mut blob = Vec::with_capacity(data.len() + TAG_LEN);
    blob.extend_from_slice(data);
    blob.extend_from_slice(&tag);
    blob
}

/// Check and remove the integrity tag. `None` if the blob was not written
/// with this secret or has been modified.
pub(crate) fn verify_and_strip(secret: &[u8], mut blob: Vec<u8>) -> Option<Vec<u8>> {
    if blob.len() < TAG_LEN {
        return None;
    }
    let split = blob.len() - TAG_LEN;

    let mut mac = keyed(secret);
    mac.update(&blob[..split]);
    mac.verify_slice(&blob[split..]).ok()?;

    blob.truncate(split);
    Some(blob)
}
