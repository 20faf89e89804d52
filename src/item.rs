use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcomes always carry a unit count on the wire.
pub const OUTCOME_UNIT: u32 = 1;

/// One reference from the manifest, usually a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef(String);

impl ItemRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the reference, with query/fragment removed.
    ///
    /// Returns `None` when the reference ends in a separator or names a
    /// directory-like segment (`.`/`..`), since no object name can be formed.
    pub fn basename(&self) -> Option<&str> {
        let raw = self.0.trim();
        let end = raw.find(['?', '#']).unwrap_or(raw.len());
        let path = &raw[..end];
        let name = path.rsplit('/').next().unwrap_or(path).trim();
        match name {
            "" | "." | ".." => None,
            n => Some(n),
        }
    }

    pub fn storage_key(&self, label: &str) -> Option<StorageKey> {
        self.basename().map(|name| StorageKey {
            label: label.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ItemRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ItemRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `label/<basename>`: the object-store key, also used to name spool files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub label: String,
    pub name: String,
}

impl StorageKey {
    pub fn as_object_key(&self) -> String {
        format!("{}/{}", self.label, self.name)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.label, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    FetchFailed,
    TransformFailed,
    StoreFailed,
}

impl OutcomeKind {
    pub fn is_success(self) -> bool {
        matches!(self, OutcomeKind::Success)
    }

    /// Kind as the status sink expects it. Every failure is reported as `fail`.
    pub fn wire_kind(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::FetchFailed | OutcomeKind::TransformFailed | OutcomeKind::StoreFailed => {
                "fail"
            }
        }
    }
}

/// Terminal result of one item's pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub label: String,
    pub kind: OutcomeKind,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn success(label: &str) -> Self {
        Self {
            label: label.to_string(),
            kind: OutcomeKind::Success,
            count: OUTCOME_UNIT,
            error: None,
        }
    }

    pub fn failed(label: &str, kind: OutcomeKind, error: impl fmt::Display) -> Self {
        Self {
            label: label.to_string(),
            kind,
            count: OUTCOME_UNIT,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_strips_query_and_fragment() {
        let r = ItemRef::new("https://cdn.example.com/img/a.jpg?w=10#top");
        assert_eq!(r.basename(), Some("a.jpg"));
    }

    #[test]
    fn basename_trims_manifest_whitespace() {
        let r = ItemRef::new("http://x/b.png \r\n");
        assert_eq!(r.basename(), Some("b.png"));
    }

    #[test]
    fn no_basename_for_trailing_slash() {
        assert_eq!(ItemRef::new("http://x/dir/").basename(), None);
        assert!(ItemRef::new("http://x/..").storage_key("cats").is_none());
    }

    #[test]
    fn storage_key_is_label_scoped() {
        let key = ItemRef::new("http://x/a.jpg").storage_key("cats").unwrap();
        assert_eq!(key.as_object_key(), "cats/a.jpg");
        assert_eq!(key.to_string(), "cats/a.jpg");
        assert_eq!(Some(key), ItemRef::new("http://x/a.jpg").storage_key("cats"));
    }

    #[test]
    fn failures_share_wire_kind() {
        assert_eq!(OutcomeKind::Success.wire_kind(), "success");
        assert_eq!(OutcomeKind::FetchFailed.wire_kind(), "fail");
        assert_eq!(OutcomeKind::TransformFailed.wire_kind(), "fail");
        assert_eq!(OutcomeKind::StoreFailed.wire_kind(), "fail");
    }
}
