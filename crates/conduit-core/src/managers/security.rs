//! Security capability: authentication and authorization.

use std::collections::{HashMap, HashSet};

use http::header::AUTHORIZATION;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::BoxFuture;

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Principal {
    /// A human user, typically from a bearer token.
    User {
        /// Stable user identifier.
        user_id: String,
        /// Granted roles.
        roles: Vec<String>,
    },
    /// A machine client identified by an API key.
    ApiKey {
        /// Key identifier. Never the secret itself.
        key_id: String,
        /// Granted scopes, treated as roles.
        scopes: Vec<String>,
    },
}

impl Principal {
    /// Creates a user principal.
    #[must_use]
    pub fn user(user_id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::User {
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an API-key principal.
    #[must_use]
    pub fn api_key(
        key_id: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::ApiKey {
            key_id: key_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Identifier safe to write to logs.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::User { user_id, .. } => format!("user:{user_id}"),
            Self::ApiKey { key_id, .. } => format!("apikey:{key_id}"),
        }
    }

    /// Roles used for authorization.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        match self {
            Self::User { roles, .. } => roles,
            Self::ApiKey { scopes, .. } => scopes,
        }
    }
}

/// Authenticates callers and authorizes their actions.
pub trait Security: Send + Sync {
    /// Resolves the caller from request headers.
    ///
    /// Returns `Ok(None)` when no credentials were presented or they are not
    /// recognized.
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Result<Option<Principal>>>;

    /// Decides whether `principal` may perform `action`.
    fn authorize<'a>(&'a self, principal: &'a Principal, action: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// A [`Security`] backed by fixed credential and role tables.
///
/// Credentials are looked up from `Authorization: Bearer <token>` and then
/// from the `x-api-key` header. A role may grant `"*"` to allow every action.
///
/// # Example
///
/// ```
/// use conduit_core::managers::{Principal, Security, StaticSecurity};
/// use http::HeaderMap;
///
/// let security = StaticSecurity::new()
///     .with_credential("s3cret", Principal::user("alice", ["editor"]))
///     .with_grant("editor", "articles:write");
///
/// # tokio_test::block_on(async {
/// let mut headers = HeaderMap::new();
/// headers.insert("authorization", "Bearer s3cret".parse().unwrap());
/// let alice = security.authenticate(&headers).await.unwrap().unwrap();
/// assert!(security.authorize(&alice, "articles:write").await.unwrap());
/// assert!(!security.authorize(&alice, "articles:delete").await.unwrap());
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSecurity {
    credentials: HashMap<String, Principal>,
    grants: HashMap<String, HashSet<String>>,
}

impl StaticSecurity {
    /// Creates an empty table; nothing authenticates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a bearer token or API key to a principal.
    #[must_use]
    pub fn with_credential(mut self, secret: impl Into<String>, principal: Principal) -> Self {
        self.credentials.insert(secret.into(), principal);
        self
    }

    /// Grants `action` to everyone holding `role`.
    #[must_use]
    pub fn with_grant(mut self, role: impl Into<String>, action: impl Into<String>) -> Self {
        self.grants
            .entry(role.into())
            .or_default()
            .insert(action.into());
        self
    }

    fn presented_secret(headers: &HeaderMap) -> Option<&str> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        bearer.or_else(|| {
            headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
    }

    fn allows(&self, principal: &Principal, action: &str) -> bool {
        principal.roles().iter().any(|role| {
            self.grants
                .get(role)
                .is_some_and(|actions| actions.contains("*") || actions.contains(action))
        })
    }
}

impl Security for StaticSecurity {
    fn authenticate<'a>(&'a self, headers: &'a HeaderMap) -> BoxFuture<'a, Result<Option<Principal>>> {
        let principal = Self::presented_secret(headers).and_then(|s| self.credentials.get(s).cloned());
        Box::pin(async move { Ok(principal) })
    }

    fn authorize<'a>(&'a self, principal: &'a Principal, action: &'a str) -> BoxFuture<'a, Result<bool>> {
        let allowed = self.allows(principal, action);
        Box::pin(async move { Ok(allowed) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> StaticSecurity {
        StaticSecurity::new()
            .with_credential("tok-admin", Principal::user("root", ["admin"]))
            .with_credential("key-ci", Principal::api_key("ci", ["deploy"]))
            .with_grant("admin", "*")
            .with_grant("deploy", "releases:create")
    }

    #[tokio::test]
    async fn test_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, "key-ci".parse().unwrap());
        let principal = security().authenticate(&headers).await.unwrap().unwrap();
        assert_eq!(principal.log_id(), "apikey:ci");
    }

    #[tokio::test]
    async fn test_unknown_or_missing_credentials() {
        let mut headers = HeaderMap::new();
        assert!(security().authenticate(&headers).await.unwrap().is_none());

        headers.insert(AUTHORIZATION, "Bearer nope".parse().unwrap());
        assert!(security().authenticate(&headers).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wildcard_grant() {
        let s = security();
        let admin = Principal::user("root", ["admin"]);
        assert!(s.authorize(&admin, "anything:at-all").await.unwrap());

        let ci = Principal::api_key("ci", ["deploy"]);
        assert!(s.authorize(&ci, "releases:create").await.unwrap());
        assert!(!s.authorize(&ci, "releases:delete").await.unwrap());
    }

    #[test]
    fn test_principal_serializes_tagged() {
        let json = serde_json::to_value(Principal::user("u1", ["a"])).unwrap();
        assert_eq!(json["type"], "user");
        assert_eq!(json["user_id"], "u1");
    }
}
