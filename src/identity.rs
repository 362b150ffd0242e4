//! Member identities.
//!
//! Identities are owned elsewhere; the aggregator only reads them to label
//! its output. [`Directory`] is a simple JSON-file backed implementation.

use crate::core::MemberId;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Display identity of a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberIdentity {
    pub id: MemberId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl MemberIdentity {
    /// Identity for a member the directory does not know: the id doubles as
    /// the username.
    pub fn fallback(id: &MemberId) -> Self {
        Self {
            id: id.clone(),
            username: id.to_string(),
            display_name: None,
        }
    }
}

/// Read-only lookup of member identities.
pub trait IdentityStore: Send + Sync {
    fn resolve(&self, id: &MemberId) -> Option<MemberIdentity>;

    fn resolve_or_fallback(&self, id: &MemberId) -> MemberIdentity {
        self.resolve(id)
            .unwrap_or_else(|| MemberIdentity::fallback(id))
    }
}

/// In-memory identity directory.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    members: HashMap<MemberId, MemberIdentity>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: impl IntoIterator<Item = MemberIdentity>) -> Self {
        let mut directory = Self::new();
        for member in members {
            directory.insert(member);
        }
        directory
    }

    pub fn insert(&mut self, member: MemberIdentity) {
        self.members.insert(member.id.clone(), member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Load a JSON array of identities.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let members: Vec<MemberIdentity> = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), count = members.len(), "identity directory loaded");
        Ok(Self::from_members(members))
    }
}

impl IdentityStore for Directory {
    fn resolve(&self, id: &MemberId) -> Option<MemberIdentity> {
        self.members.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_member_falls_back_to_id() {
        let directory = Directory::new();
        let identity = directory.resolve_or_fallback(&MemberId::new("u42"));
        assert_eq!(identity.username, "u42");
        assert!(identity.display_name.is_none());
    }

    #[test]
    fn test_load_directory_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("members.json");
        std::fs::write(
            &path,
            r#"[
                {"id": "u1", "username": "alice", "display_name": "Alice"},
                {"id": "u2", "username": "bob"}
            ]"#,
        )
        .unwrap();

        let directory = Directory::load(&path).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(
            directory.resolve(&MemberId::new("u1")).unwrap().display_name.as_deref(),
            Some("Alice")
        );
        assert_eq!(directory.resolve(&MemberId::new("u2")).unwrap().username, "bob");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Directory::load(&dir.path().join("absent.json")).is_err());
    }
}
