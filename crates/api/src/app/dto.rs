//! Request DTOs and their mapping onto ledger inputs.
//!
//! Field names are snake_case on the wire; camelCase aliases are accepted for
//! clients that send the form field names verbatim.

use chrono::NaiveDate;
use serde::Deserialize;

use iequip_core::{EntityId, TransactionId};
use iequip_infra::{
    BorrowRequest, DetailsChange, DistributionRequest, NewEntity, ReturnRequest,
};
use iequip_inventory::{Category, Condition, StockKind};
use iequip_lending::{BORROW_QUANTITY, Department, LineItem, Recipient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoodKind {
    Item,
    Supply,
}

#[derive(Debug, Deserialize)]
pub struct CreateGoodRequest {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub unit: Option<String>,
    pub kind: GoodKind,
    #[serde(default, alias = "quantityTotal", alias = "quantity")]
    pub quantity_total: Option<u64>,
    /// Initial condition of an item; ignored for supplies.
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default, alias = "photoRef")]
    pub photo_ref: Option<String>,
}

impl CreateGoodRequest {
    pub fn into_new_entity(self) -> NewEntity {
        let (kind, default_total, default_unit) = match self.kind {
            GoodKind::Item => (
                StockKind::Item {
                    condition: self.condition.unwrap_or_default(),
                },
                1,
                "unit",
            ),
            GoodKind::Supply => (StockKind::Supply, 0, "pcs"),
        };
        NewEntity {
            name: self.name,
            category: self.category,
            unit: self.unit.unwrap_or_else(|| default_unit.to_string()),
            kind,
            quantity_total: self.quantity_total.unwrap_or(default_total),
            photo_ref: self.photo_ref,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateGoodRequest {
    /// Version the client last saw; omitted means "don't check".
    #[serde(default, alias = "expectedVersion")]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, alias = "photoRef")]
    pub photo_ref: Option<String>,
}

impl UpdateGoodRequest {
    pub fn into_change(self) -> DetailsChange {
        DetailsChange {
            name: self.name,
            category: self.category,
            unit: self.unit,
            photo_ref: self.photo_ref,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientBody {
    pub name: String,
    pub email: String,
    pub age: u32,
    #[serde(alias = "contactNumber")]
    pub contact_number: String,
    pub address: String,
    #[serde(default)]
    pub department: Option<Department>,
}

impl From<RecipientBody> for Recipient {
    fn from(body: RecipientBody) -> Self {
        Recipient {
            name: body.name,
            email: body.email,
            age: body.age,
            contact_number: body.contact_number,
            address: body.address,
            department: body.department,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBorrowRequest {
    pub recipient: RecipientBody,
    #[serde(alias = "itemId")]
    pub item_id: EntityId,
    #[serde(alias = "endDate")]
    pub end_date: NaiveDate,
    #[serde(default, alias = "testedBy")]
    pub tested_by: Option<String>,
}

impl CreateBorrowRequest {
    pub fn into_request(self, actor: &str) -> BorrowRequest {
        BorrowRequest {
            recipient: self.recipient.into(),
            item_id: self.item_id,
            end_date: self.end_date,
            tested_by: self.tested_by.unwrap_or_else(|| actor.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReturnBorrowRequest {
    #[serde(alias = "transactionId")]
    pub transaction_id: TransactionId,
    pub condition: Condition,
    #[serde(default, alias = "returnedQuantity")]
    pub quantity: Option<u64>,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl ReturnBorrowRequest {
    pub fn into_request(self) -> ReturnRequest {
        ReturnRequest {
            transaction_id: self.transaction_id,
            condition: self.condition,
            quantity: self.quantity.unwrap_or(BORROW_QUANTITY),
            remarks: self.remarks,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LineBody {
    #[serde(alias = "entityId", alias = "supplyId")]
    pub entity_id: EntityId,
    pub quantity: u64,
}

#[derive(Debug, Deserialize)]
pub struct CreateDistributionRequest {
    pub recipient: RecipientBody,
    #[serde(alias = "entities")]
    pub lines: Vec<LineBody>,
    #[serde(default, alias = "releasedBy")]
    pub released_by: Option<String>,
    #[serde(default, alias = "proofImageRef")]
    pub proof_image_ref: Option<String>,
}

impl CreateDistributionRequest {
    pub fn into_request(self, actor: &str) -> DistributionRequest {
        DistributionRequest {
            recipient: self.recipient.into(),
            lines: self
                .lines
                .into_iter()
                .map(|l| LineItem {
                    entity_id: l.entity_id,
                    quantity: l.quantity,
                })
                .collect(),
            released_by: self.released_by.unwrap_or_else(|| actor.to_string()),
            proof_image_ref: self.proof_image_ref,
        }
    }
}

/// Raw query string of `GET /transactions`; parsed in the handler so bad
/// values surface as validation errors.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionListParams {
    pub status: Option<String>,
    pub category: Option<String>,
    pub recipient: Option<String>,
    pub sort: Option<String>,
    pub direction: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GoodsListParams {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverdueParams {
    #[serde(alias = "asOf")]
    pub as_of: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn items_default_to_one_good_unit() {
        let body: CreateGoodRequest = serde_json::from_value(json!({
            "name": "Projector",
            "category": "electronics",
            "kind": "item",
        }))
        .unwrap();
        let entity = body.into_new_entity();
        assert_eq!(entity.quantity_total, 1);
        assert_eq!(
            entity.kind,
            StockKind::Item {
                condition: Condition::Good
            }
        );
    }

    #[test]
    fn camel_case_form_fields_are_accepted() {
        let body: CreateBorrowRequest = serde_json::from_value(json!({
            "recipient": {
                "name": "Ana Cruz",
                "email": "ana@example.org",
                "age": 30,
                "contactNumber": "09171234567",
                "address": "Rizal St",
            },
            "itemId": EntityId::new(),
            "endDate": "2030-01-31",
        }))
        .unwrap();
        let request = body.into_request("clerk");
        assert_eq!(request.tested_by, "clerk");
        assert_eq!(request.recipient.contact_number, "09171234567");
    }

    #[test]
    fn return_quantity_defaults_to_the_borrowed_unit() {
        let body: ReturnBorrowRequest = serde_json::from_value(json!({
            "transactionId": TransactionId::new(),
            "condition": "slightly_damaged",
        }))
        .unwrap();
        let request = body.into_request();
        assert_eq!(request.quantity, BORROW_QUANTITY);
        assert_eq!(request.condition, Condition::SlightlyDamaged);
    }
}
