//! Content hashing and hash sidecars.
//!
//! Each content file `path` may have a sidecar `path.md5` holding the hex MD5
//! digest of the content as of the last successful ingest. A file is skipped
//! when its current digest equals the stored one exactly (after trimming
//! surrounding whitespace). Sidecars are unversioned and carry no integrity
//! data beyond the digest itself.

/// Suffix of hash sidecar files.
pub const HASH_SUFFIX: &str = ".md5";

/// Hex MD5 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(md5::compute(bytes).0)
}

/// Path of the sidecar for a content path.
pub fn hash_record_path(path: &str) -> String {
    format!("{}{}", path, HASH_SUFFIX)
}

/// Sidecars are bookkeeping, never content.
pub fn is_hash_record(path: &str) -> bool {
    path.ends_with(HASH_SUFFIX)
}

/// Whether a stored sidecar body matches the current digest.
pub fn hash_matches(stored: Option<&str>, current: &str) -> bool {
    match stored {
        Some(s) => {
            let s = s.trim();
            !s.is_empty() && s == current.trim()
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sidecar_naming() {
        assert_eq!(hash_record_path("a/b.pdf"), "a/b.pdf.md5");
        assert!(is_hash_record("a/b.pdf.md5"));
        assert!(!is_hash_record("a/b.pdf"));
    }

    #[test]
    fn matching_is_exact_after_trim() {
        let h = content_hash(b"abc");
        assert!(hash_matches(Some(&format!("{}\n", h)), &h));
        assert!(!hash_matches(Some(""), &h));
        assert!(!hash_matches(None, &h));
        assert!(!hash_matches(Some(&h.to_uppercase()), &h));
    }
}
