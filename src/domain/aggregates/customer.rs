//! Customer and delivery address, as supplied by the account directory.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub wallet_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub line1: String,
    pub city: String,
    pub pincode: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), email: email.into(), wallet_amount: Decimal::ZERO }
    }
}

impl Address {
    pub fn belongs_to(&self, user_id: Uuid) -> bool { self.user_id == user_id }
}
