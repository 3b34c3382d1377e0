//! Caller identity, as established by the upstream auth layer.
//!
//! The gateway in front of this service verifies the bearer token and
//! forwards the caller as `x-auth-email` / `x-auth-role`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use super::AppState;
use crate::error::SettlementError;

pub const EMAIL_HEADER: &str = "x-auth-email";
pub const ROLE_HEADER: &str = "x-auth-role";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role { User, Restaurant, Admin }

#[derive(Clone, Debug)]
pub struct Identity {
    pub email: String,
    pub role: Role,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "restaurant" => Some(Self::Restaurant),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = SettlementError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty());
        let email = header(EMAIL_HEADER).ok_or(SettlementError::Forbidden)?.to_string();
        let role = header(ROLE_HEADER).and_then(Role::parse).ok_or(SettlementError::Forbidden)?;
        Ok(Self { email, role })
    }
}

impl Identity {
    fn require(&self, role: Role) -> Result<(), SettlementError> {
        if self.role != role {
            return Err(SettlementError::Forbidden);
        }
        Ok(())
    }

    pub async fn user_id(&self, state: &AppState) -> Result<Uuid, SettlementError> {
        self.require(Role::User)?;
        let user = state.engine.store().find_user_by_email(&self.email).await?;
        user.map(|u| u.id).ok_or(SettlementError::UserNotFound)
    }

    pub async fn restaurant_id(&self, state: &AppState) -> Result<Uuid, SettlementError> {
        self.require(Role::Restaurant)?;
        let restaurant = state.engine.store().find_restaurant_by_email(&self.email).await?;
        restaurant.map(|r| r.id).ok_or(SettlementError::RestaurantNotFound)
    }

    pub fn admin(&self) -> Result<(), SettlementError> {
        self.require(Role::Admin)
    }
}
