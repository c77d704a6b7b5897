use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated identity of a channel or REST caller. Admin sees the
/// whole platform; kitchen and agent principals are scoped to one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Principal {
    Admin,
    Kitchen { kitchen_id: Uuid },
    Agent { agent_id: Uuid },
}

impl Principal {
    pub fn role_label(&self) -> &'static str {
        match self {
            Principal::Admin => "admin",
            Principal::Kitchen { .. } => "kitchen",
            Principal::Agent { .. } => "agent",
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        match self {
            Principal::Admin => Ok(()),
            _ => Err(AppError::Forbidden("admin access required".to_string())),
        }
    }

    pub fn require_kitchen(&self) -> Result<Uuid, AppError> {
        match self {
            Principal::Kitchen { kitchen_id } => Ok(*kitchen_id),
            _ => Err(AppError::Forbidden("kitchen access required".to_string())),
        }
    }

    pub fn require_agent(&self) -> Result<Uuid, AppError> {
        match self {
            Principal::Agent { agent_id } => Ok(*agent_id),
            _ => Err(AppError::Forbidden("delivery agent access required".to_string())),
        }
    }
}

/// Credential verification boundary. The engine trusts the returned
/// principal and never parses credentials itself; issuance policy lives
/// with the collaborator behind this trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AppError>;

    async fn issue(&self, principal: Principal) -> Result<String, AppError>;
}

/// In-memory token table. Seeded with the configured admin token; agent
/// and kitchen tokens are minted through the admin onboarding endpoints.
pub struct StaticAuth {
    tokens: DashMap<String, Principal>,
}

impl StaticAuth {
    pub fn with_admin_token(admin_token: &str) -> Self {
        let tokens = DashMap::new();
        tokens.insert(admin_token.to_string(), Principal::Admin);
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticAuth {
    async fn verify(&self, token: &str) -> Result<Principal, AppError> {
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| AppError::Unauthenticated("invalid token".to_string()))
    }

    async fn issue(&self, principal: Principal) -> Result<String, AppError> {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), principal);
        Ok(token)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthenticated("missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("malformed authorization header".to_string()))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthenticated("expected bearer token".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        state.auth.verify(token).await
    }
}
