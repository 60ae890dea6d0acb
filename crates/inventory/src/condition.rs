//! Item condition and the condition tracker's resolution rule.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use iequip_core::DomainError;

/// Physical state of a borrowable item.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Good,
    SlightlyDamaged,
    Damaged,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Good => "good",
            Condition::SlightlyDamaged => "slightly_damaged",
            Condition::Damaged => "damaged",
        }
    }
}

impl core::fmt::Display for Condition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the three canonical names are accepted.
impl FromStr for Condition {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "good" => Ok(Condition::Good),
            "slightly_damaged" => Ok(Condition::SlightlyDamaged),
            "damaged" => Ok(Condition::Damaged),
            other => Err(DomainError::validation(format!(
                "condition must be one of good, slightly_damaged, damaged (got '{other}')"
            ))),
        }
    }
}

/// Stored condition after a return.
///
/// The most recently returned condition replaces the previous one; there is no
/// averaging and no memory beyond the latest value. History, when wanted, is
/// kept by the audit log, not here.
pub fn resolve_condition(_previous: Condition, returned: Condition) -> Condition {
    returned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_condition_always_wins() {
        let all = [Condition::Good, Condition::SlightlyDamaged, Condition::Damaged];
        for prev in all {
            for ret in all {
                assert_eq!(resolve_condition(prev, ret), ret);
            }
        }
    }

    #[test]
    fn rejects_conditions_outside_the_enumeration() {
        assert!("broken".parse::<Condition>().is_err());
        assert!("Good".parse::<Condition>().is_err());
        assert_eq!(
            "slightly_damaged".parse::<Condition>().unwrap(),
            Condition::SlightlyDamaged
        );
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&Condition::SlightlyDamaged).unwrap();
        assert_eq!(json, "\"slightly_damaged\"");
        assert!(serde_json::from_str::<Condition>("\"lost\"").is_err());
    }
}
