//! Car document and its partial-update form

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Stored car record. Storage calls the primary key `_id`; on the wire it is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Car {
    #[serde(alias = "_id")]
    pub id: i64,
    #[validate(length(max = 100))]
    pub name: String,
    pub price: i64,
    #[validate(length(max = 100))]
    pub year: String,
}

/// Car fields without the id, as sent in a PUT body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CarFields {
    #[validate(length(max = 100))]
    pub name: String,
    pub price: i64,
    #[validate(length(max = 100))]
    pub year: String,
}

/// PATCH body: only present fields are applied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CarPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 100))]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 100))]
    pub year: Option<String>,
}

impl Car {
    pub fn from_fields(id: i64, fields: CarFields) -> Self {
        Self {
            id,
            name: fields.name,
            price: fields.price,
            year: fields.year,
        }
    }

    /// Apply a patch in place, leaving absent fields untouched
    pub fn apply(&mut self, patch: &CarPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(year) = &patch.year {
            self.year = year.clone();
        }
    }
}

impl CarPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.year.is_none()
    }
}
