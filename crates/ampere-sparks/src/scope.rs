// File access scopes carried by sparks. Scopes only ever narrow: read and
// write pattern sets intersect, forbidden patterns union, and NoAccess
// dominates everything.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum FileAccessScope {
    Permissive,
    NoAccess,
    Scoped {
        read: BTreeSet<String>,
        write: BTreeSet<String>,
        forbidden: BTreeSet<String>,
    },
}

impl FileAccessScope {
    pub fn scoped<I, J, K>(read: I, write: J, forbidden: K) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        J: IntoIterator,
        J::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        FileAccessScope::Scoped {
            read: read.into_iter().map(Into::into).collect(),
            write: write.into_iter().map(Into::into).collect(),
            forbidden: forbidden.into_iter().map(Into::into).collect(),
        }
    }

    /// Combine two scopes into the narrower of the pair.
    pub fn intersect(&self, other: &FileAccessScope) -> FileAccessScope {
        match (self, other) {
            (FileAccessScope::NoAccess, _) | (_, FileAccessScope::NoAccess) => {
                FileAccessScope::NoAccess
            }
            (FileAccessScope::Permissive, scope) | (scope, FileAccessScope::Permissive) => {
                scope.clone()
            }
            (
                FileAccessScope::Scoped {
                    read: read_a,
                    write: write_a,
                    forbidden: forbidden_a,
                },
                FileAccessScope::Scoped {
                    read: read_b,
                    write: write_b,
                    forbidden: forbidden_b,
                },
            ) => FileAccessScope::Scoped {
                read: read_a.intersection(read_b).cloned().collect(),
                write: write_a.intersection(write_b).cloned().collect(),
                forbidden: forbidden_a.union(forbidden_b).cloned().collect(),
            },
        }
    }

    pub fn allows_read(&self, path: &str) -> bool {
        match self {
            FileAccessScope::Permissive => true,
            FileAccessScope::NoAccess => false,
            FileAccessScope::Scoped {
                read, forbidden, ..
            } => {
                !matches_any(forbidden, path) && matches_any(read, path)
            }
        }
    }

    pub fn allows_write(&self, path: &str) -> bool {
        match self {
            FileAccessScope::Permissive => true,
            FileAccessScope::NoAccess => false,
            FileAccessScope::Scoped {
                write, forbidden, ..
            } => !matches_any(forbidden, path) && matches_any(write, path),
        }
    }

    pub fn forbidden_patterns(&self) -> BTreeSet<String> {
        match self {
            FileAccessScope::Scoped { forbidden, .. } => forbidden.clone(),
            _ => BTreeSet::new(),
        }
    }
}

fn matches_any(patterns: &BTreeSet<String>, path: &str) -> bool {
    patterns.iter().any(|pattern| glob_matches(pattern, path))
}

/// Minimal glob support: `*` matches within a segment, `**` matches across
/// segments. Enough for the scoped path patterns sparks use.
pub fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern == "**" || pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return value == prefix || value.starts_with(&format!("{prefix}/"));
    }
    if !pattern.contains('*') {
        return pattern == value;
    }
    let mut remaining = value;
    let mut is_first = true;
    for part in pattern.split('*') {
        if part.is_empty() {
            is_first = false;
            continue;
        }
        if is_first {
            if let Some(stripped) = remaining.strip_prefix(part) {
                remaining = stripped;
            } else {
                return false;
            }
            is_first = false;
            continue;
        }
        if let Some(index) = remaining.find(part) {
            remaining = &remaining[index + part.len()..];
        } else {
            return false;
        }
    }
    pattern.ends_with('*') || remaining.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(read: &[&str], write: &[&str], forbidden: &[&str]) -> FileAccessScope {
        FileAccessScope::scoped(
            read.iter().copied(),
            write.iter().copied(),
            forbidden.iter().copied(),
        )
    }

    #[test]
    fn glob_matching_handles_segments() {
        assert!(glob_matches("src/**", "src/lib.rs"));
        assert!(glob_matches("src/**", "src/nested/mod.rs"));
        assert!(!glob_matches("src/**", "tests/lib.rs"));
        assert!(glob_matches("*.toml", "Cargo.toml"));
        assert!(glob_matches("**", "anything/at/all"));
        assert!(!glob_matches(".env*", "config.json"));
        assert!(glob_matches(".env*", ".env.local"));
    }

    #[test]
    fn no_access_dominates() {
        let scope = scoped(&["src/**"], &["src/**"], &[]);
        assert_eq!(
            scope.intersect(&FileAccessScope::NoAccess),
            FileAccessScope::NoAccess
        );
        assert_eq!(
            FileAccessScope::NoAccess.intersect(&FileAccessScope::Permissive),
            FileAccessScope::NoAccess
        );
    }

    #[test]
    fn permissive_is_identity() {
        let scope = scoped(&["src/**"], &[], &["secrets/**"]);
        assert_eq!(FileAccessScope::Permissive.intersect(&scope), scope);
        assert_eq!(scope.intersect(&FileAccessScope::Permissive), scope);
    }

    #[test]
    fn scoped_intersection_narrows() {
        let a = scoped(&["src/**", "tests/**"], &["src/**"], &["secrets/**"]);
        let b = scoped(&["src/**"], &["src/**", "docs/**"], &[".env*"]);
        let combined = a.intersect(&b);
        assert!(combined.allows_read("src/lib.rs"));
        assert!(!combined.allows_read("tests/it.rs"));
        assert!(combined.allows_write("src/lib.rs"));
        assert_eq!(
            combined.forbidden_patterns(),
            BTreeSet::from(["secrets/**".to_string(), ".env*".to_string()])
        );
    }

    #[test]
    fn forbidden_wins_over_read_grant() {
        let scope = scoped(&["**"], &["**"], &["secrets/**"]);
        assert!(scope.allows_read("src/lib.rs"));
        assert!(!scope.allows_read("secrets/key.pem"));
        assert!(!scope.allows_write("secrets/key.pem"));
    }
}
