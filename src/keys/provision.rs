use super::{KeyStore, StoreError};
use rand::Rng;
use tracing::info;

pub const DEFAULT_PREFIX: &str = "ETSY-SEO";
pub const MAX_BATCH: usize = 100;

const SUFFIX_LEN: usize = 8;
// Uppercase alphanumerics without 0, O, 1 and I.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_ATTEMPTS_PER_KEY: usize = 8;

/// Uppercases the prefix and drops anything that is not `A-Z`, `0-9` or `-`.
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    let cleaned: String = prefix
        .unwrap_or(DEFAULT_PREFIX)
        .trim()
        .trim_matches('-')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .map(|c| c.to_ascii_uppercase())
        .take(32)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_PREFIX.to_string()
    } else {
        cleaned
    }
}

pub fn generate_key_code<R: Rng + ?Sized>(prefix: &str, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Inserts `count` fresh keys and returns their codes. Collisions with existing
/// rows are retried with a new code.
pub async fn provision(
    store: &dyn KeyStore,
    prefix: &str,
    count: usize,
) -> Result<Vec<String>, StoreError> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        let mut inserted = None;
        for _ in 0..MAX_ATTEMPTS_PER_KEY {
            let candidate = generate_key_code(prefix, &mut rand::rng());
            if store.create(&candidate).await? {
                inserted = Some(candidate);
                break;
            }
        }
        let code = inserted.ok_or_else(|| {
            StoreError::Request(format!("could not allocate a unique key for `{prefix}`"))
        })?;
        created.push(code);
    }
    info!(target = "listing_gate.store", count = created.len(), %prefix, "keys_provisioned");
    Ok(created)
}
