pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, SkeinError};
pub use types::*;

/// FNV-1a hash of content, rendered as a fixed-width hex string.
/// Used for idempotency checks on re-delivered ingestion work.
pub fn content_hash(content: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325; // FNV offset basis
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3); // FNV prime
    }
    format!("{hash:016x}")
}

/// Restrict a filename to a safe character class. Path separators and
/// anything outside `[A-Za-z0-9._-]` become underscores; leading dots are
/// stripped so the result can never be a hidden file or a traversal.
pub fn secure_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"hello2"));
        assert_eq!(content_hash(b"hello").len(), 16);
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("report.pdf"), "report.pdf");
        assert_eq!(secure_filename("../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("weird name (1).csv"), "weird_name__1_.csv");
        assert_eq!(secure_filename("..."), "");
    }

}
