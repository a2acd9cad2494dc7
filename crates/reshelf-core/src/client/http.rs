//! REST client for the storage service.
//!
//! Speaks the service's JSON API with a pre-issued bearer token. Tenant
//! sessions are the same client with an `As-User` header attached.
//!
//! # Usage
//!
//! ```rust,no_run
//! use reshelf_core::client::http::HttpClient;
//! use reshelf_core::client::ResourceClient;
//!
//! #[tokio::main]
//! async fn main() -> reshelf_core::Result<()> {
//!     let client = HttpClient::new("https://api.box.com/2.0", "token")?;
//!     let me = client.current_account().await?;
//!     println!("{}", me.login);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{AccountAdmin, ResourceClient};
use crate::error::{Error, Result};
use crate::types::{Account, NodeKind, Page, ResourceNode, Role, SharingGrant, TenantId};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const NODE_FIELDS: &str = "id,type,name,parent";

/// HTTP client for the storage service
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
    /// Account to act as; `None` acts as the token's own account
    as_user: Option<String>,
}

struct Inner {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url)
            .field("as_user", &self.as_user)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client with the default request timeout
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reshelf/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token: token.into(),
                client,
            }),
            as_user: None,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, Option::<()>::None).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::PUT, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self.send(Method::DELETE, path, Option::<()>::None).await?;
        let _ = resp.bytes().await;
        Ok(())
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<T> {
        let resp = self.send(method, path, body).await?;
        resp.json()
            .await
            .map_err(|e| Error::Other(format!("Failed to parse response for {}: {}", path, e)))
    }

    /// Send a request and map any non-success status to an `Error`
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.inner.base_url, path);
        debug!(%method, %url, as_user = ?self.as_user, "API request");

        let mut req = self
            .inner
            .client
            .request(method, &url)
            .bearer_auth(&self.inner.token);
        if let Some(ref user) = self.as_user {
            req = req.header("As-User", user);
        }
        if let Some(ref b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                Error::transient(format!("{} {}: {}", path, "request failed", e))
            } else {
                Error::Other(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = resp.text().await.unwrap_or_default();
        Err(map_error(status, &text, retry_after, path))
    }
}

/// Translate an error response into the client error taxonomy
fn map_error(status: StatusCode, body: &str, retry_after: Option<Duration>, path: &str) -> Error {
    let parsed: Option<ApiError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.code.clone()).unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.to_string());

    if code == "user_already_collaborator" {
        return Error::AlreadyGrantee {
            node_id: String::new(),
            grantee_id: String::new(),
        };
    }

    if status == StatusCode::CONFLICT && code == "item_name_in_use" {
        let existing = parsed
            .and_then(|e| e.context_info)
            .and_then(|c| c.conflicts.into_iter().next())
            .map(ResourceNode::from);
        return match existing {
            Some(existing) => Error::Conflict { existing },
            None => Error::remote(status.as_u16(), message),
        };
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        StatusCode::NOT_FOUND => Error::NotFound(path.to_string()),
        s if s.is_server_error() => {
            Error::transient(format!("{} {}: {}", s.as_u16(), path, message))
        }
        s => Error::remote(s.as_u16(), message),
    }
}

#[async_trait]
impl ResourceClient for HttpClient {
    fn as_tenant(&self, tenant: &TenantId) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            as_user: Some(tenant.as_str().to_string()),
        }
    }

    async fn current_account(&self) -> Result<Account> {
        let user: ApiUser = self.get("/users/me").await?;
        Ok(user.into())
    }

    async fn list_children(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<ResourceNode>> {
        let path = format!(
            "/folders/{}/items?limit={}&offset={}&fields={}",
            node_id, limit, offset, NODE_FIELDS
        );
        let items: ApiCollection<ApiItem> = self.get(&path).await?;
        Ok(Page {
            total_count: items.total_count.unwrap_or(items.entries.len()),
            entries: items.entries.into_iter().map(ResourceNode::from).collect(),
        })
    }

    async fn get_node(&self, node_id: &str) -> Result<ResourceNode> {
        let item: ApiItem = self
            .get(&format!("/folders/{}?fields={}", node_id, NODE_FIELDS))
            .await?;
        Ok(item.into())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<ResourceNode> {
        let body = json!({ "name": name, "parent": { "id": parent_id } });
        let item: ApiItem = self.post("/folders", &body).await?;
        Ok(item.into())
    }

    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<ResourceNode> {
        let body = json!({ "parent": { "id": new_parent_id } });
        let item: ApiItem = self.put(&format!("/folders/{}", node_id), &body).await?;
        Ok(item.into())
    }

    async fn list_grants(&self, node_id: &str) -> Result<Vec<SharingGrant>> {
        let collabs: ApiCollection<ApiCollaboration> = self
            .get(&format!("/folders/{}/collaborations", node_id))
            .await?;
        Ok(collabs
            .entries
            .into_iter()
            .map(|c| c.into_grant(node_id))
            .collect())
    }

    async fn add_grant(
        &self,
        node_id: &str,
        grantee_id: &str,
        role: Role,
    ) -> Result<SharingGrant> {
        let body = json!({
            "item": { "type": "folder", "id": node_id },
            "accessible_by": { "type": "user", "id": grantee_id },
            "role": role.as_str(),
        });
        match self.post::<ApiCollaboration, _>("/collaborations", &body).await {
            Ok(collab) => Ok(collab.into_grant(node_id)),
            Err(Error::AlreadyGrantee { .. }) => Err(Error::AlreadyGrantee {
                node_id: node_id.to_string(),
                grantee_id: grantee_id.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    async fn remove_grant(&self, grant_id: &str) -> Result<()> {
        self.delete(&format!("/collaborations/{}", grant_id)).await
    }
}

#[async_trait]
impl AccountAdmin for HttpClient {
    async fn create_account(&self, name: &str) -> Result<Account> {
        let body = json!({ "name": name, "is_platform_access_only": true });
        let user: ApiUser = self.post("/users", &body).await?;
        Ok(user.into())
    }

    async fn list_accounts(&self, limit: usize) -> Result<Vec<Account>> {
        let users: ApiCollection<ApiUser> = self
            .get(&format!("/users?limit={}&user_type=all", limit))
            .await?;
        Ok(users.entries.into_iter().map(Account::from).collect())
    }

    async fn transfer_content(&self, from_id: &str, to_id: &str) -> Result<ResourceNode> {
        let body = json!({ "owned_by": { "id": to_id } });
        let item: ApiItem = self
            .put(&format!("/users/{}/folders/0", from_id), &body)
            .await?;
        Ok(item.into())
    }

    async fn delete_account(&self, account_id: &str, force: bool) -> Result<()> {
        self.delete(&format!("/users/{}?notify=false&force={}", account_id, force))
            .await
    }

    async fn delete_folder(&self, node_id: &str, recursive: bool) -> Result<()> {
        self.delete(&format!("/folders/{}?recursive={}", node_id, recursive))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiCollection<T> {
    total_count: Option<usize>,
    #[serde(default = "Vec::new")]
    entries: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    name: String,
    parent: Option<ApiRef>,
}

impl From<ApiItem> for ResourceNode {
    fn from(item: ApiItem) -> Self {
        ResourceNode {
            id: item.id,
            name: item.name,
            parent_id: item.parent.map(|p| p.id),
            kind: item.kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    login: String,
    #[serde(default)]
    name: String,
}

impl From<ApiUser> for Account {
    fn from(user: ApiUser) -> Self {
        Account {
            id: user.id,
            login: user.login,
            name: user.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCollaboration {
    id: String,
    accessible_by: Option<ApiRef>,
    item: Option<ApiRef>,
    role: Role,
}

impl ApiCollaboration {
    fn into_grant(self, fallback_node_id: &str) -> SharingGrant {
        SharingGrant {
            id: self.id,
            grantee_id: self.accessible_by.map(|a| a.id).unwrap_or_default(),
            node_id: self
                .item
                .map(|i| i.id)
                .unwrap_or_else(|| fallback_node_id.to_string()),
            role: self.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
    message: Option<String>,
    context_info: Option<ApiConflictInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiConflictInfo {
    #[serde(default)]
    conflicts: Vec<ApiItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_carries_existing_folder() {
        let body = r#"{
            "type": "error", "status": 409, "code": "item_name_in_use",
            "message": "Item with the same name already exists",
            "context_info": { "conflicts": [
                { "type": "folder", "id": "123", "name": "HOUSE_LIST", "parent": { "id": "0" } }
            ]}
        }"#;
        match map_error(StatusCode::CONFLICT, body, None, "/folders") {
            Error::Conflict { existing } => {
                assert_eq!(existing.id, "123");
                assert_eq!(existing.name, "HOUSE_LIST");
                assert_eq!(existing.parent_id.as_deref(), Some("0"));
                assert!(existing.is_folder());
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_already_collaborator_maps_to_already_grantee() {
        let body = r#"{"type": "error", "status": 400,
            "code": "user_already_collaborator",
            "message": "User is already a collaborator"}"#;
        let err = map_error(StatusCode::BAD_REQUEST, body, None, "/collaborations");
        assert!(matches!(err, Error::AlreadyGrantee { .. }));
    }

    #[test]
    fn test_status_classification() {
        let err = map_error(
            StatusCode::TOO_MANY_REQUESTS,
            "",
            Some(Duration::from_secs(3)),
            "/folders/0/items",
        );
        assert!(matches!(
            err,
            Error::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(3)
        ));

        assert!(map_error(StatusCode::BAD_GATEWAY, "", None, "/x").is_transient());
        assert!(map_error(StatusCode::NOT_FOUND, "", None, "/x").is_not_found());

        let err = map_error(StatusCode::FORBIDDEN, r#"{"message":"denied"}"#, None, "/x");
        assert!(matches!(err, Error::Remote { status: 403, ref message } if message == "denied"));
    }

    #[test]
    fn test_owner_collaboration_does_not_break_listing() {
        let body = r#"{"total_count": 2, "entries": [
            { "id": "11", "role": "editor",
              "accessible_by": { "id": "7" }, "item": { "id": "3" } },
            { "id": "12", "role": "owner",
              "accessible_by": { "id": "8" }, "item": { "id": "3" } }
        ]}"#;
        let listing: ApiCollection<ApiCollaboration> = serde_json::from_str(body).unwrap();
        let grants: Vec<SharingGrant> =
            listing.entries.into_iter().map(|c| c.into_grant("3")).collect();

        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].role, Role::Editor);
        assert_eq!(grants[1].role, Role::Owner);
        assert_eq!(grants[1].grantee_id, "8");
    }

    #[test]
    fn test_tenant_session_shares_connection() {
        let client = HttpClient::new("https://example.invalid/2.0/", "t").unwrap();
        let tenant = client.as_tenant(&TenantId::from("42"));
        assert!(Arc::ptr_eq(&client.inner, &tenant.inner));
        assert_eq!(tenant.as_user.as_deref(), Some("42"));
        assert_eq!(client.inner.base_url, "https://example.invalid/2.0");
    }
}
