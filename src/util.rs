use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Stable identifier for one (label, manifest) pair.
pub fn run_id<S: AsRef<str>>(label: &str, refs: &[S]) -> String {
    let mut joined = String::from(label);
    for r in refs {
        joined.push('\n');
        joined.push_str(r.as_ref());
    }
    sha256_hex(joined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_depends_on_order() {
        let a = run_id("cats", &["x", "y"]);
        let b = run_id("cats", &["y", "x"]);
        assert_ne!(a, b);
        assert_eq!(a, run_id("cats", &["x", "y"]));
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
