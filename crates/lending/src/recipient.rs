use core::str::FromStr;

use serde::{Deserialize, Serialize};

use iequip_core::{DomainError, ValueObject};

/// Department a recipient belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Administration,
    Finance,
    Engineering,
    Health,
    Education,
    SocialWelfare,
    Agriculture,
    Other,
}

impl Department {
    pub const ALL: [Department; 8] = [
        Department::Administration,
        Department::Finance,
        Department::Engineering,
        Department::Health,
        Department::Education,
        Department::SocialWelfare,
        Department::Agriculture,
        Department::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Department::Administration => "administration",
            Department::Finance => "finance",
            Department::Engineering => "engineering",
            Department::Health => "health",
            Department::Education => "education",
            Department::SocialWelfare => "social_welfare",
            Department::Agriculture => "agriculture",
            Department::Other => "other",
        }
    }
}

impl FromStr for Department {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Department::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown department '{s}'")))
    }
}

pub const MINIMUM_AGE: u32 = 18;

/// The person receiving a borrowed item or distributed supplies.
///
/// Copied into each transaction; two transactions for the same person simply
/// carry equal recipients (no identity merge).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    pub age: u32,
    pub contact_number: String,
    pub address: String,
    #[serde(default)]
    pub department: Option<Department>,
}

impl ValueObject for Recipient {}

impl Recipient {
    /// Check every field a transaction needs before any stock is touched.
    pub fn validate(&self) -> Result<(), DomainError> {
        require("name", &self.name)?;
        require("email", &self.email)?;
        require("contact_number", &self.contact_number)?;
        require("address", &self.address)?;

        if self.age < MINIMUM_AGE {
            return Err(DomainError::validation(format!(
                "recipient must be at least {MINIMUM_AGE} years old"
            )));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(DomainError::validation("email is malformed"));
        }
        if !is_plausible_phone(self.contact_number.trim()) {
            return Err(DomainError::validation(
                "contact_number must be 7-15 digits with an optional leading '+'",
            ));
        }
        Ok(())
    }

    /// Case-insensitive substring match over name and email.
    pub fn matches(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&needle) || self.email.to_lowercase().contains(&needle)
    }

    /// Copy with surrounding whitespace trimmed.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            age: self.age,
            contact_number: self.contact_number.trim().to_string(),
            address: self.address.trim().to_string(),
            department: self.department,
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

fn is_plausible_phone(number: &str) -> bool {
    let digits = number.strip_prefix('+').unwrap_or(number);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}
