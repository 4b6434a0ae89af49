use sha2::{Digest, Sha256};

use crate::MimeKind;

/// Stable identifier for a source URL: hex SHA-256 of its lowercased form.
pub fn harvest_id(source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Object-store key: `{mime}/{id}{ext}`.
pub fn storage_key(id: &str, mime: MimeKind) -> String {
    format!("{}/{id}{}", mime.as_str(), mime.extension())
}
