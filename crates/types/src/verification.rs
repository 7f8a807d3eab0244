use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trust designation applied by reviewers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    /// Whether a reviewer may move an identifier from `self` to `target`.
    pub fn can_transition_to(&self, target: VerificationStatus) -> bool {
        use VerificationStatus::*;

        matches!(
            (self, target),
            (Unverified, Pending)
                | (Pending, Verified)
                | (Pending, Rejected)
                | (Verified, Pending)
                | (Rejected, Pending)
        )
    }
}

impl Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unverified" => Ok(VerificationStatus::Unverified),
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("unknown verification status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::VerificationStatus::*;

    #[test]
    fn test_transitions() {
        assert!(Unverified.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Verified));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Verified.can_transition_to(Pending));
        assert!(Rejected.can_transition_to(Pending));

        assert!(!Unverified.can_transition_to(Verified));
        assert!(!Rejected.can_transition_to(Verified));
        assert!(!Verified.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Unverified));
    }
}
