use core::str::FromStr;

use serde::{Deserialize, Serialize};

use iequip_core::DomainError;

/// Catalogue category of an inventory entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Electronics,
    Furniture,
    Tools,
    OfficeSupplies,
    CleaningSupplies,
    MedicalSupplies,
    SportsEquipment,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Electronics,
        Category::Furniture,
        Category::Tools,
        Category::OfficeSupplies,
        Category::CleaningSupplies,
        Category::MedicalSupplies,
        Category::SportsEquipment,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Electronics => "electronics",
            Category::Furniture => "furniture",
            Category::Tools => "tools",
            Category::OfficeSupplies => "office_supplies",
            Category::CleaningSupplies => "cleaning_supplies",
            Category::MedicalSupplies => "medical_supplies",
            Category::SportsEquipment => "sports_equipment",
            Category::Other => "other",
        }
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| DomainError::validation(format!("unknown category '{s}'")))
    }
}
