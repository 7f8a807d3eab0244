//! Schema validation for submitted module manifests
//!
//! Submissions arrive as untrusted bytes. [`SchemaValidator::validate`] converts them into a
//! [`ModuleManifest`] only after every check has passed; otherwise it returns a
//! [`SchemaViolation`] listing every problem it found, in check order, so that authors can fix
//! a submission in one round trip.
//!
//! Checks never consult the network or the filesystem, so validating the same bytes twice
//! always produces the same result.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use madmin_types::{Author, Category, ModuleManifest, ModuleStats, Requirements, TagSet};

use crate::config::ValidationLimits;
use crate::error::ErrorKind;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$").expect("identifier pattern is valid")
});

static OS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("os pattern is valid"));

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

const MAX_ICON_LENGTH: usize = 64;

/// A single problem with one field of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field, `$` for the document itself.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every reason a submission was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("manifest '{location}' failed validation with {} error(s)", .errors.len())]
pub struct SchemaViolation {
    /// Provenance of the submission, e.g. its path in the modules directory.
    pub location: String,
    pub errors: Vec<FieldError>,
}

impl SchemaViolation {
    fn structural(location: &str, message: impl Into<String>) -> Self {
        Self {
            location: location.to_string(),
            errors: vec![FieldError {
                field: "$".to_string(),
                message: message.into(),
            }],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SchemaViolation
    }

    /// Names of the fields that failed, in report order.
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    fn into_violation(self, location: &str) -> SchemaViolation {
        SchemaViolation {
            location: location.to_string(),
            errors: self.errors,
        }
    }
}

/// Validates raw manifest submissions against the registry schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    limits: ValidationLimits,
}

impl SchemaValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Validate one submission.
    ///
    /// `location` is only used to attribute errors. A submitted `verified` flag or
    /// repository statistics are ignored; those are owned by the registry.
    pub fn validate(
        &self,
        bytes: &[u8],
        location: &str,
    ) -> Result<ModuleManifest, SchemaViolation> {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(e) => {
                return Err(SchemaViolation::structural(
                    location,
                    format!("invalid JSON: {}", e),
                ));
            }
        };
        let Value::Object(map) = &value else {
            return Err(SchemaViolation::structural(
                location,
                "expected a JSON object",
            ));
        };

        let mut errors = Collector::default();

        // Presence and types
        let id = required_str(map, "id", "id", &mut errors);
        let name = required_str(map, "name", "name", &mut errors);
        let description = required_str(map, "description", "description", &mut errors);
        let repository = required_str(map, "repository", "repository", &mut errors);
        let author = required_object(map, "author", "author", &mut errors);
        let author_name = author.and_then(|a| required_str(a, "name", "author.name", &mut errors));
        let author_email =
            author.and_then(|a| optional_str(a, "email", "author.email", &mut errors));
        let author_url = author.and_then(|a| optional_str(a, "url", "author.url", &mut errors));
        let category = required_str(map, "category", "category", &mut errors);
        let icon = optional_str(map, "icon", "icon", &mut errors);
        let tags = string_list(map, "tags", "tags", &mut errors);
        let features = string_list(map, "features", "features", &mut errors);
        let requirements = optional_object(map, "requirements", "requirements", &mut errors);
        let os = requirements
            .map(|r| string_list(r, "os", "requirements.os", &mut errors))
            .unwrap_or_default();
        let min_version = requirements.and_then(|r| {
            optional_str(
                r,
                "min_madmin_version",
                "requirements.min_madmin_version",
                &mut errors,
            )
        });

        // Content checks
        if let Some(id) = id {
            self.check_identifier(id, &mut errors);
        }
        let category = category.and_then(|raw| match raw.parse::<Category>() {
            Ok(category) => Some(category),
            Err(message) => {
                errors.push("category", message);
                None
            }
        });
        let repository = repository.and_then(|raw| self.check_url(raw, "repository", &mut errors));
        let author_url = author_url.and_then(|raw| self.check_url(raw, "author.url", &mut errors));
        if let Some(email) = author_email {
            if !EMAIL_PATTERN.is_match(email) {
                errors.push("author.email", format!("'{}' is not a valid email address", email));
            }
        }
        let min_version = min_version.and_then(|raw| check_min_version(raw, &mut errors));
        let os = self.check_os(&os, &mut errors);
        let tags = self.check_tags(&tags, &mut errors);
        let features = self.check_features(&features, &mut errors);
        if let Some(icon) = icon {
            if icon.len() > MAX_ICON_LENGTH || icon.chars().any(char::is_whitespace) {
                errors.push(
                    "icon",
                    format!(
                        "must be a single token of at most {} characters",
                        MAX_ICON_LENGTH
                    ),
                );
            }
        }

        if !errors.is_empty() {
            return Err(errors.into_violation(location));
        }

        let (Some(id), Some(name), Some(description), Some(repository), Some(author_name), Some(category)) =
            (id, name, description, repository, author_name, category)
        else {
            errors.push("$", "incomplete manifest");
            return Err(errors.into_violation(location));
        };

        Ok(ModuleManifest {
            id: id.to_string(),
            name: name.trim().to_string(),
            description: description.trim().to_string(),
            repository,
            author: Author {
                name: author_name.trim().to_string(),
                email: author_email.map(str::to_string),
                url: author_url,
            },
            category,
            tags,
            icon: icon.map(str::to_string),
            features,
            requirements: Requirements {
                os,
                min_madmin_version: min_version,
            },
            verified: false,
            stats: ModuleStats::default(),
        })
    }

    fn check_identifier(&self, id: &str, errors: &mut Collector) {
        let len = id.chars().count();
        if len < self.limits.id_min_length || len > self.limits.id_max_length {
            errors.push(
                "id",
                format!(
                    "must be between {} and {} characters, got {}",
                    self.limits.id_min_length, self.limits.id_max_length, len
                ),
            );
        }
        if !ID_PATTERN.is_match(id) {
            errors.push(
                "id",
                "must contain only lowercase letters, digits and hyphens, \
                 and start and end with a letter or digit",
            );
        }
    }

    fn check_url(&self, raw: &str, field: &str, errors: &mut Collector) -> Option<Url> {
        let url = match Url::parse(raw.trim()) {
            Ok(url) => url,
            Err(e) => {
                errors.push(field, format!("'{}' is not a valid URL: {}", raw, e));
                return None;
            }
        };

        if !self
            .limits
            .allowed_url_schemes
            .iter()
            .any(|scheme| scheme == url.scheme())
        {
            errors.push(
                field,
                format!(
                    "scheme '{}' is not allowed, expected one of: {}",
                    url.scheme(),
                    self.limits.allowed_url_schemes.join(", ")
                ),
            );
            return None;
        }
        if url.host_str().is_none_or(str::is_empty) {
            errors.push(field, "must include a host");
            return None;
        }
        Some(url)
    }

    fn check_os(&self, entries: &[(usize, &str)], errors: &mut Collector) -> Vec<String> {
        let mut os = BTreeSet::new();
        for (i, raw) in entries {
            let value = raw.trim().to_lowercase();
            let field = format!("requirements.os[{}]", i);
            if value.is_empty() {
                errors.push(field, "must not be empty");
            } else if value.len() > self.limits.max_os_length || !OS_PATTERN.is_match(&value) {
                errors.push(field, format!("'{}' is not a recognized OS identifier", raw));
            } else {
                os.insert(value);
            }
        }
        os.into_iter().collect()
    }

    fn check_tags(&self, entries: &[(usize, &str)], errors: &mut Collector) -> TagSet {
        if entries.len() > self.limits.max_tags {
            errors.push(
                "tags",
                format!(
                    "at most {} tags are allowed, got {}",
                    self.limits.max_tags,
                    entries.len()
                ),
            );
        }

        let mut tags = TagSet::new();
        for (i, raw) in entries {
            let normalized = TagSet::normalize(raw);
            if normalized.is_empty() {
                errors.push(format!("tags[{}]", i), "must not be empty");
            } else if normalized.chars().count() > self.limits.max_tag_length {
                errors.push(
                    format!("tags[{}]", i),
                    format!("must be at most {} characters", self.limits.max_tag_length),
                );
            } else {
                tags.insert(&normalized);
            }
        }
        tags
    }

    fn check_features(&self, entries: &[(usize, &str)], errors: &mut Collector) -> Vec<String> {
        if entries.len() > self.limits.max_features {
            errors.push(
                "features",
                format!(
                    "at most {} features are allowed, got {}",
                    self.limits.max_features,
                    entries.len()
                ),
            );
        }

        let mut features = Vec::with_capacity(entries.len());
        for (i, raw) in entries {
            let feature = raw.trim();
            if feature.is_empty() {
                errors.push(format!("features[{}]", i), "must not be empty");
            } else if feature.chars().count() > self.limits.max_feature_length {
                errors.push(
                    format!("features[{}]", i),
                    format!(
                        "must be at most {} characters",
                        self.limits.max_feature_length
                    ),
                );
            } else {
                features.push(feature.to_string());
            }
        }
        features
    }
}

fn check_min_version(raw: &str, errors: &mut Collector) -> Option<Version> {
    const FIELD: &str = "requirements.min_madmin_version";

    match Version::parse(raw.trim()) {
        Ok(version) if version.pre.is_empty() && version.build.is_empty() => Some(version),
        Ok(_) => {
            errors.push(
                FIELD,
                "must be MAJOR.MINOR.PATCH without pre-release or build metadata",
            );
            None
        }
        Err(e) => {
            errors.push(
                FIELD,
                format!("'{}' is not a valid semantic version: {}", raw, e),
            );
            None
        }
    }
}

fn required_str<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Collector,
) -> Option<&'a str> {
    match map.get(key) {
        None | Some(Value::Null) => {
            errors.push(field, "is required");
            None
        }
        Some(value) => string_value(value, field, errors),
    }
}

fn optional_str<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Collector,
) -> Option<&'a str> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => string_value(value, field, errors),
    }
}

fn string_value<'a>(value: &'a Value, field: &str, errors: &mut Collector) -> Option<&'a str> {
    match value {
        Value::String(s) if s.trim().is_empty() => {
            errors.push(field, "must not be empty");
            None
        }
        Value::String(s) => Some(s.as_str()),
        _ => {
            errors.push(field, "must be a string");
            None
        }
    }
}

fn required_object<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Collector,
) -> Option<&'a Map<String, Value>> {
    match map.get(key) {
        None | Some(Value::Null) => {
            errors.push(field, "is required");
            None
        }
        Some(Value::Object(object)) => Some(object),
        Some(_) => {
            errors.push(field, "must be an object");
            None
        }
    }
}

fn optional_object<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Collector,
) -> Option<&'a Map<String, Value>> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Object(object)) => Some(object),
        Some(_) => {
            errors.push(field, "must be an object");
            None
        }
    }
}

/// Entries of a string array paired with their original position.
fn string_list<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    field: &str,
    errors: &mut Collector,
) -> Vec<(usize, &'a str)> {
    match map.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) => Some((i, s.as_str())),
                _ => {
                    errors.push(format!("{}[{}]", field, i), "must be a string");
                    None
                }
            })
            .collect(),
        Some(_) => {
            errors.push(field, "must be an array of strings");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_manifest() -> Value {
        json!({
            "id": "vpn-guard",
            "name": "VPN Guard",
            "description": "WireGuard tunnel management",
            "repository": "https://github.com/acme/vpn-guard",
            "author": {
                "name": "Acme",
                "email": "dev@acme.io",
                "url": "https://acme.io"
            },
            "category": "networking",
            "tags": ["VPN", "wireguard", "vpn"],
            "icon": "shield",
            "features": ["Tunnel status", "Peer management"],
            "requirements": {
                "os": ["Linux", "linux", "macos"],
                "min_madmin_version": "2.0.0"
            }
        })
    }

    fn validate(value: &Value) -> Result<ModuleManifest, SchemaViolation> {
        let bytes = serde_json::to_vec(value).unwrap();
        SchemaValidator::default().validate(&bytes, "modules/vpn-guard.json")
    }

    #[test]
    fn test_valid_manifest_is_normalized() {
        let manifest = validate(&valid_manifest()).unwrap();

        assert_eq!(manifest.id, "vpn-guard");
        assert_eq!(manifest.category, Category::Networking);
        assert_eq!(manifest.tags.iter().collect::<Vec<_>>(), vec!["vpn", "wireguard"]);
        assert_eq!(manifest.requirements.os, vec!["linux", "macos"]);
        assert_eq!(
            manifest.requirements.min_madmin_version,
            Some(Version::new(2, 0, 0))
        );
        assert!(!manifest.verified);
    }

    #[test]
    fn test_missing_repository_reports_only_that_field() {
        let mut value = valid_manifest();
        value.as_object_mut().unwrap().remove("repository");

        let violation = validate(&value).unwrap_err();
        assert_eq!(violation.kind(), ErrorKind::SchemaViolation);
        assert_eq!(violation.fields(), vec!["repository"]);
        assert_eq!(violation.errors[0].message, "is required");
        assert_eq!(violation.location, "modules/vpn-guard.json");
    }

    #[test]
    fn test_reports_every_problem() {
        let value = json!({
            "id": "VPN_Guard",
            "name": "VPN Guard",
            "description": "x",
            "repository": "ftp://example.com/repo",
            "author": { "name": "Acme", "email": "not-an-email" },
            "category": "games",
            "tags": ["ok", 7],
            "requirements": { "os": ["linux", "win dows"], "min_madmin_version": "2.0" }
        });

        let violation = validate(&value).unwrap_err();
        assert_eq!(
            violation.fields(),
            vec![
                "tags[1]",
                "id",
                "category",
                "repository",
                "author.email",
                "requirements.min_madmin_version",
                "requirements.os[1]",
            ]
        );
    }

    #[test]
    fn test_structural_failure() {
        let violation = SchemaValidator::default()
            .validate(b"{ not json", "broken.json")
            .unwrap_err();
        assert_eq!(violation.fields(), vec!["$"]);

        let violation = SchemaValidator::default()
            .validate(b"[1, 2, 3]", "array.json")
            .unwrap_err();
        assert_eq!(violation.fields(), vec!["$"]);
    }

    #[test]
    fn test_submitted_verification_and_stats_are_ignored() {
        let mut value = valid_manifest();
        let object = value.as_object_mut().unwrap();
        object.insert("verified".to_string(), json!(true));
        object.insert("stars".to_string(), json!(9000));

        let manifest = validate(&value).unwrap();
        assert!(!manifest.verified);
        assert_eq!(manifest.stats, ModuleStats::default());
    }

    #[test]
    fn test_prerelease_min_version_is_rejected() {
        let mut value = valid_manifest();
        value["requirements"]["min_madmin_version"] = json!("2.0.0-beta.1");

        let violation = validate(&value).unwrap_err();
        assert_eq!(violation.fields(), vec!["requirements.min_madmin_version"]);
    }

    #[test]
    fn test_list_bounds() {
        let limits = ValidationLimits {
            max_tags: 2,
            max_features: 1,
            ..Default::default()
        };
        let mut value = valid_manifest();
        value["tags"] = json!(["a", "b", "c"]);
        value["features"] = json!(["one", "two"]);

        let bytes = serde_json::to_vec(&value).unwrap();
        let violation = SchemaValidator::new(limits)
            .validate(&bytes, "bounded.json")
            .unwrap_err();
        assert_eq!(violation.fields(), vec!["tags", "features"]);
    }

    #[test]
    fn test_identifier_length_bounds() {
        let mut value = valid_manifest();
        value["id"] = json!("a".repeat(65));
        assert_eq!(validate(&value).unwrap_err().fields(), vec!["id"]);

        value["id"] = json!("-leading");
        assert_eq!(validate(&value).unwrap_err().fields(), vec!["id"]);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let mut value = valid_manifest();
        value["category"] = json!("unknown");
        value["author"]["url"] = json!("not a url");

        let bytes = serde_json::to_vec(&value).unwrap();
        let validator = SchemaValidator::default();
        assert_eq!(
            validator.validate(&bytes, "a.json"),
            validator.validate(&bytes, "a.json")
        );

        let valid = serde_json::to_vec(&valid_manifest()).unwrap();
        assert_eq!(
            validator.validate(&valid, "b.json"),
            validator.validate(&valid, "b.json")
        );
    }
}
