//! Client eligibility checks
//!
//! Eligibility is evaluated per request against the requesting client's version and OS, never
//! stored in the index, so one snapshot serves every client. A dimension the client does not
//! declare is not filtered on.

use std::cmp::Ordering;
use std::fmt::Display;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use madmin_types::Requirements;

/// Application version reported by a client, compared on (major, minor, patch) only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ClientVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn cmp_required(&self, required: &Version) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(required.major, required.minor, required.patch))
    }
}

impl FromStr for ClientVersion {
    type Err = String;

    /// Lenient parse: `v2.1`, `2.1.0-beta+abc` and `2` are all accepted; missing
    /// components are zero and suffixes are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();

        let parts: Vec<&str> = core.split('.').collect();
        if core.is_empty() || parts.len() > 3 {
            return Err(format!("'{}' is not a version", s));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("'{}' is not a version", s))?;
        }

        Ok(ClientVersion::new(numbers[0], numbers[1], numbers[2]))
    }
}

impl Display for ClientVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The requesting client as seen by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientProfile {
    version: Option<Result<ClientVersion, String>>,
    os: Option<String>,
}

impl ClientProfile {
    /// A client that declared nothing. Every manifest is eligible for it.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(client_version: Option<&str>, os: Option<&str>) -> Self {
        Self {
            version: client_version
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.parse::<ClientVersion>().map_err(|_| v.trim().to_string())),
            os: os
                .map(|o| o.trim().to_lowercase())
                .filter(|o| !o.is_empty()),
        }
    }

    pub fn with_version(mut self, version: ClientVersion) -> Self {
        self.version = Some(Ok(version));
        self
    }

    pub fn os(&self) -> Option<&str> {
        self.os.as_deref()
    }
}

/// Why a manifest is hidden from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum IneligibleReason {
    ClientTooOld {
        required: Version,
        client: ClientVersion,
    },
    InvalidClientVersion {
        raw: String,
        required: Version,
    },
    UnsupportedOs {
        os: String,
        supported: Vec<String>,
    },
}

impl Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IneligibleReason::ClientTooOld { required, client } => {
                write!(f, "requires client version {} or newer, client is {}", required, client)
            }
            IneligibleReason::InvalidClientVersion { raw, required } => {
                write!(f, "requires client version {} or newer, could not parse '{}'", required, raw)
            }
            IneligibleReason::UnsupportedOs { os, supported } => {
                write!(f, "OS '{}' is not supported (supported: {})", os, supported.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Decide whether `requirements` admit `client`.
///
/// The version constraint is checked before the OS constraint, so a client failing both
/// is told about its version. Undeclared version or OS passes the matching constraint.
pub fn check_eligibility(client: &ClientProfile, requirements: &Requirements) -> Eligibility {
    if let Some(required) = &requirements.min_madmin_version {
        match &client.version {
            None => {}
            Some(Err(raw)) => {
                return Eligibility::Ineligible(IneligibleReason::InvalidClientVersion {
                    raw: raw.clone(),
                    required: required.clone(),
                });
            }
            Some(Ok(version)) if version.cmp_required(required) == Ordering::Less => {
                return Eligibility::Ineligible(IneligibleReason::ClientTooOld {
                    required: required.clone(),
                    client: *version,
                });
            }
            Some(Ok(_)) => {}
        }
    }

    if !requirements.os.is_empty() {
        match &client.os {
            None => {}
            Some(os) if !requirements.os.iter().any(|s| s.eq_ignore_ascii_case(os)) => {
                return Eligibility::Ineligible(IneligibleReason::UnsupportedOs {
                    os: os.clone(),
                    supported: requirements.os.clone(),
                });
            }
            Some(_) => {}
        }
    }

    Eligibility::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requires(min: Option<&str>, os: &[&str]) -> Requirements {
        Requirements {
            os: os.iter().map(|s| s.to_string()).collect(),
            min_madmin_version: min.map(|v| Version::parse(v).unwrap()),
        }
    }

    fn client(version: &str) -> ClientProfile {
        ClientProfile::new(Some(version), None)
    }

    #[test]
    fn test_min_version_boundary() {
        let req = requires(Some("2.0.0"), &[]);

        assert!(matches!(
            check_eligibility(&client("1.9.9"), &req),
            Eligibility::Ineligible(IneligibleReason::ClientTooOld { .. })
        ));
        assert!(check_eligibility(&client("2.0.0"), &req).is_eligible());
        assert!(check_eligibility(&client("2.5.0"), &req).is_eligible());
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let req = requires(Some("9.9.9"), &[]);
        assert!(check_eligibility(&client("10.0.0"), &req).is_eligible());
        assert!(check_eligibility(&client("9.10.0"), &req).is_eligible());
        assert!(!check_eligibility(&client("9.9.8"), &req).is_eligible());
    }

    #[test]
    fn test_unconstrained_manifest_accepts_anything() {
        let req = requires(None, &[]);
        assert!(check_eligibility(&ClientProfile::anonymous(), &req).is_eligible());
        assert!(check_eligibility(&client("garbage"), &req).is_eligible());
        assert!(check_eligibility(&client("0.0.1"), &req).is_eligible());
    }

    #[test]
    fn test_undeclared_and_invalid_client_version() {
        let req = requires(Some("1.0.0"), &["linux"]);
        assert!(check_eligibility(&ClientProfile::anonymous(), &req).is_eligible());
        assert!(check_eligibility(&ClientProfile::new(Some("  "), None), &req).is_eligible());
        assert!(matches!(
            check_eligibility(&client("one.two"), &req),
            Eligibility::Ineligible(IneligibleReason::InvalidClientVersion { .. })
        ));
    }

    #[test]
    fn test_lenient_client_version_parsing() {
        assert_eq!("v2.1".parse::<ClientVersion>(), Ok(ClientVersion::new(2, 1, 0)));
        assert_eq!("3".parse::<ClientVersion>(), Ok(ClientVersion::new(3, 0, 0)));
        assert_eq!(
            "2.0.0-beta.1+build".parse::<ClientVersion>(),
            Ok(ClientVersion::new(2, 0, 0))
        );
        assert!("1.2.3.4".parse::<ClientVersion>().is_err());
        assert!("".parse::<ClientVersion>().is_err());
        assert!("1..2".parse::<ClientVersion>().is_err());
    }

    #[test]
    fn test_os_membership_is_case_insensitive() {
        let req = requires(None, &["linux", "macos"]);

        let linux = ClientProfile::new(None, Some("Linux"));
        assert!(check_eligibility(&linux, &req).is_eligible());

        let windows = ClientProfile::new(None, Some("windows"));
        assert!(matches!(
            check_eligibility(&windows, &req),
            Eligibility::Ineligible(IneligibleReason::UnsupportedOs { .. })
        ));

        let version_only = ClientProfile::new(Some("2.0.0"), None);
        assert!(check_eligibility(&version_only, &req).is_eligible());
    }

    #[test]
    fn test_eligibility_is_monotonic_in_version() {
        let mins = ["0.0.1", "1.0.0", "1.9.9", "2.0.0", "2.10.3", "10.0.0"];
        let clients: Vec<ClientVersion> = (0..12)
            .flat_map(|major| {
                (0..12).flat_map(move |minor| {
                    (0..4).map(move |patch| ClientVersion::new(major, minor, patch))
                })
            })
            .collect();

        for min in mins {
            let req = requires(Some(min), &[]);
            for v in &clients {
                if !check_eligibility(&ClientProfile::anonymous().with_version(*v), &req).is_eligible() {
                    continue;
                }
                for newer in clients.iter().filter(|c| *c >= v) {
                    assert!(
                        check_eligibility(&ClientProfile::anonymous().with_version(*newer), &req)
                            .is_eligible(),
                        "{} eligible for {} but {} is not",
                        v,
                        min,
                        newer
                    );
                }
            }
        }
    }
}
