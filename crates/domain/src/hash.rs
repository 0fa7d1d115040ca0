//! Content hashing for turn dedup.

use sha2::{Digest, Sha256};

/// Hash turn text for dedup across the hook and transcript capture paths.
/// Whitespace is collapsed first so the two paths agree on equal content
/// that differs only in trailing newlines or indentation.
pub fn content_hash(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::content_hash;

    #[test]
    fn whitespace_variants_collide() {
        assert_eq!(content_hash("done.\n"), content_hash("  done. "));
        assert_eq!(content_hash("a  b"), content_hash("a b"));
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(content_hash("done"), content_hash("almost done"));
    }
}
