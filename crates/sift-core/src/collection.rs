//! Deterministic mapping from a request scope to its vector collection.
//!
//! The name is computed the same way at write time and at query time, so a
//! lookup is a single direct index access. No naming variants are probed.

use sha2::{Digest, Sha256};

const PREFIX: &str = "sift";
const MAX_SLUG_LEN: usize = 48;

/// Collection name for `scope`: `sift_<slug>_<hash8>`.
///
/// The slug keeps lowercase ASCII alphanumerics and collapses every other run
/// of characters to a single `_`. The hash suffix is the first 8 hex digits
/// of SHA-256 over the trimmed scope, so scopes with the same slug stay
/// distinct.
///
/// ```
/// use sift_core::collection::collection_name;
///
/// let name = collection_name("HR Handbook 2024");
/// assert!(name.starts_with("sift_hr_handbook_2024_"));
/// assert_eq!(name, collection_name("  HR Handbook 2024 "));
/// ```
#[must_use]
pub fn collection_name(scope: &str) -> String {
    let trimmed = scope.trim();
    let slug = slugify(trimmed);
    let hash = short_hash(trimmed);

    if slug.is_empty() {
        format!("{PREFIX}_{hash}")
    } else {
        format!("{PREFIX}_{slug}_{hash}")
    }
}

fn slugify(scope: &str) -> String {
    let mut slug = String::with_capacity(scope.len().min(MAX_SLUG_LEN));
    let mut pending_sep = false;

    for ch in scope.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
            if slug.len() >= MAX_SLUG_LEN {
                break;
            }
        } else {
            pending_sep = true;
        }
    }

    slug
}

fn short_hash(scope: &str) -> String {
    let digest = Sha256::digest(scope.as_bytes());
    let hex = format!("{digest:x}");
    hex[..8].to_string()
}
