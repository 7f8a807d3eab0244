use std::fmt::{self, Display};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// A validated module descriptor as served to store clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModuleManifest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub repository: Url,
    pub author: Author,
    pub category: Category,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub requirements: Requirements,

    /// Stamped by the index builder from the verification ledger.
    #[serde(default)]
    pub verified: bool,

    #[serde(default)]
    pub stats: ModuleStats,
}

impl ModuleManifest {
    /// Copy of this manifest in the form used for fingerprinting.
    ///
    /// Tags compare as a set, so the canonical form sorts them. Everything
    /// else is already order-significant or normalized by the validator.
    pub fn canonical(&self) -> ModuleManifest {
        let mut canonical = self.clone();
        canonical.tags = self.tags.sorted();
        canonical
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
}

/// Runtime requirements a client must satisfy to be offered the module.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Requirements {
    /// Supported OS identifiers, lowercased and sorted. Empty means any OS.
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_madmin_version: Option<Version>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Networking,
    Monitoring,
    Security,
    Utilities,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Networking,
        Category::Monitoring,
        Category::Security,
        Category::Utilities,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Networking => "networking",
            Category::Monitoring => "monitoring",
            Category::Security => "security",
            Category::Utilities => "utilities",
            Category::Other => "other",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Exact, case-sensitive match. Unknown values are rejected, never
    /// mapped onto `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown category '{}', expected one of: {}",
                    s,
                    Category::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}

/// Ordered, deduplicated set of lowercase tags.
///
/// Insertion order is kept for display; equality ignores order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a single tag: trimmed and lowercased.
    pub fn normalize(tag: &str) -> String {
        tag.trim().to_lowercase()
    }

    /// Insert a tag, returning `false` if it was empty or already present.
    pub fn insert(&mut self, tag: &str) -> bool {
        let tag = Self::normalize(tag);
        if tag.is_empty() || self.0.contains(&tag) {
            return false;
        }
        self.0.push(tag);
        true
    }

    pub fn contains(&self, tag: &str) -> bool {
        let tag = Self::normalize(tag);
        self.0.iter().any(|t| *t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sorted(&self) -> TagSet {
        let mut tags = self.0.clone();
        tags.sort();
        TagSet(tags)
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|t| other.0.contains(t))
    }
}

impl Eq for TagSet {}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

/// Release notes keyed by release tag, in release order (newest first).
///
/// Serialized as a JSON object whose keys keep that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changelog(Vec<(String, String)>);

impl Changelog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append notes for `tag`. Returns `false` if the tag is already present.
    pub fn push(&mut self, tag: impl Into<String>, notes: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.get(&tag).is_some() {
            return false;
        }
        self.0.push((tag, notes.into()));
        true
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, notes)| notes.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(tag, _)| tag.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Into<String>, N: Into<String>> FromIterator<(T, N)> for Changelog {
    fn from_iter<I: IntoIterator<Item = (T, N)>>(iter: I) -> Self {
        let mut changelog = Changelog::new();
        for (tag, notes) in iter {
            changelog.push(tag, notes);
        }
        changelog
    }
}

impl Serialize for Changelog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(tag, notes)| (tag, notes)))
    }
}

impl<'de> Deserialize<'de> for Changelog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChangelogVisitor;

        impl<'de> Visitor<'de> for ChangelogVisitor {
            type Value = Changelog;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of release tags to notes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Changelog, A::Error> {
                let mut changelog = Changelog::new();
                while let Some((tag, notes)) = map.next_entry::<String, String>()? {
                    changelog.push(tag, notes);
                }
                Ok(changelog)
            }
        }

        deserializer.deserialize_map(ChangelogVisitor)
    }
}

/// Repository statistics attached by the enrichment step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModuleStats {
    pub version: String,
    pub stars: u64,
    pub downloads: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Changelog::is_empty")]
    pub changelog: Changelog,
}

impl Default for ModuleStats {
    fn default() -> Self {
        Self {
            version: "0.0.0".to_string(),
            stars: 0,
            downloads: 0,
            updated_at: None,
            changelog: Changelog::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_rejects_unknown_values() {
        assert_eq!("security".parse::<Category>(), Ok(Category::Security));
        assert!("Security".parse::<Category>().is_err());
        assert!("games".parse::<Category>().is_err());
    }

    #[test]
    fn test_tag_set_dedup_and_order() {
        let tags: TagSet = ["VPN", "wireguard", " vpn ", "", "Tunnel"].into_iter().collect();
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec!["vpn", "wireguard", "tunnel"]);

        let reordered: TagSet = ["tunnel", "vpn", "wireguard"].into_iter().collect();
        assert_eq!(tags, reordered);
        assert_ne!(tags, ["vpn"].into_iter().collect::<TagSet>());
    }

    #[test]
    fn test_stats_defaults_match_registry_output() {
        let stats: ModuleStats = serde_json::from_str(
            r#"{"version": "0.0.0", "stars": 0, "downloads": 0}"#,
        )
        .unwrap();
        assert_eq!(stats, ModuleStats::default());
    }

    #[test]
    fn test_changelog_keeps_release_order() {
        let changelog: Changelog = [("v1.10", "newest"), ("v1.9", "older"), ("v1.10", "dup")]
            .into_iter()
            .collect();
        assert_eq!(changelog.tags().collect::<Vec<_>>(), vec!["v1.10", "v1.9"]);
        assert_eq!(changelog.get("v1.10"), Some("newest"));

        let json = serde_json::to_string(&changelog).unwrap();
        assert_eq!(json, r#"{"v1.10":"newest","v1.9":"older"}"#);
        let parsed: Changelog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tags().collect::<Vec<_>>(), vec!["v1.10", "v1.9"]);
    }
}
