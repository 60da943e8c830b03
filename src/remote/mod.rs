use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RemoteError;
use crate::session::Credentials;

pub mod model;
pub mod queries;

use model::{NewParentOrder, ParentOrder, Pick, SubOrder};

/// One row returned by a data query, keyed by column alias.
pub type Row = Map<String, Value>;

/// Calls the runner makes against the remote ERP.
///
/// Every call is a fallible remote procedure call; none is retried here.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<String, RemoteError>;

    async fn logout(&self) -> Result<(), RemoteError>;

    /// Install (or drop) the bearer token used by subsequent calls.
    async fn set_token(&self, token: Option<String>);

    async fn query(&self, sql: &str) -> Result<Vec<Row>, RemoteError>;

    async fn create_parent_order(&self, order: &NewParentOrder)
        -> Result<ParentOrder, RemoteError>;

    async fn issue_parent_order(&self, parent_id: i64) -> Result<(), RemoteError>;

    async fn close_short_parent_order(&self, parent_id: i64) -> Result<(), RemoteError>;

    async fn delete_parent_order(&self, parent_id: i64) -> Result<(), RemoteError>;

    async fn get_pick(&self, sub_order_id: i64) -> Result<Pick, RemoteError>;

    async fn save_pick(&self, pick: &Pick) -> Result<Pick, RemoteError>;

    async fn get_sub_order(&self, sub_order_id: i64) -> Result<SubOrder, RemoteError>;

    async fn save_sub_order(&self, sub_order: &SubOrder) -> Result<SubOrder, RemoteError>;
}

pub struct RemoteClient {
    http: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

impl RemoteClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent("assembly-runner/0.1")
            .timeout(timeout)
            .build()
            .map_err(|source| RemoteError::Transport {
                operation: "build_client",
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, RemoteError> {
        let base_url = Url::parse(&cfg.remote.base_url)
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid remote.base_url: {e}")))?;
        Self::new(base_url, Duration::from_secs(cfg.remote.timeout_seconds))
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid endpoint {path}: {e}")))
    }

    /// Build an authenticated request; fails when no token is installed.
    pub async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self.endpoint(path)?;
        let token = self.token.read().await.clone();
        let Some(token) = token else {
            return Err(RemoteError::NotAuthenticated);
        };
        debug!(%method, %url, "remote request");
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token)))
    }

    async fn send_raw(
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<String, RemoteError> {
        let res = builder
            .send()
            .await
            .map_err(|source| RemoteError::Transport { operation, source })?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| RemoteError::Transport { operation, source })?;
        if !status.is_success() {
            warn!(operation, status = status.as_u16(), %body, "remote call rejected");
            return Err(RemoteError::Status {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let body = Self::send_raw(operation, builder).await?;
        serde_json::from_str(&body).map_err(|source| RemoteError::Decode { operation, source })
    }
}

#[async_trait]
impl RemoteService for RemoteClient {
    async fn login(&self, credentials: &Credentials) -> Result<String, RemoteError> {
        let url = self.endpoint("api/login")?;
        let body = json!({
            "appName": credentials.app_name,
            "appId": credentials.app_id,
            "username": credentials.username,
            "password": credentials.password,
        });
        let resp: LoginResponse =
            Self::send_json("login", self.http.post(url).json(&body)).await?;
        *self.token.write().await = Some(resp.token.clone());
        Ok(resp.token)
    }

    async fn logout(&self) -> Result<(), RemoteError> {
        let req = self.request(Method::POST, "api/logout").await?;
        let result = Self::send_raw("logout", req).await.map(|_| ());
        *self.token.write().await = None;
        result
    }

    async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, RemoteError> {
        let req = self
            .request(Method::POST, "api/data-query")
            .await?
            .header("Content-Type", "text/plain")
            .body(sql.to_string());
        Self::send_json("query", req).await
    }

    async fn create_parent_order(
        &self,
        order: &NewParentOrder,
    ) -> Result<ParentOrder, RemoteError> {
        let req = self
            .request(Method::POST, "api/manufacture-orders")
            .await?
            .json(order);
        Self::send_json("create_parent_order", req).await
    }

    async fn issue_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let path = format!("api/manufacture-orders/{parent_id}/issue");
        let req = self.request(Method::POST, &path).await?;
        Self::send_raw("issue_parent_order", req).await.map(|_| ())
    }

    async fn close_short_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let path = format!("api/manufacture-orders/{parent_id}/close-short");
        let req = self.request(Method::POST, &path).await?;
        Self::send_raw("close_short_parent_order", req).await.map(|_| ())
    }

    async fn delete_parent_order(&self, parent_id: i64) -> Result<(), RemoteError> {
        let path = format!("api/manufacture-orders/{parent_id}");
        let req = self.request(Method::DELETE, &path).await?;
        Self::send_raw("delete_parent_order", req).await.map(|_| ())
    }

    async fn get_pick(&self, sub_order_id: i64) -> Result<Pick, RemoteError> {
        let path = format!("api/work-orders/{sub_order_id}/pick");
        let req = self.request(Method::GET, &path).await?;
        Self::send_json("get_pick", req).await
    }

    async fn save_pick(&self, pick: &Pick) -> Result<Pick, RemoteError> {
        let path = format!("api/picks/{}", pick.id);
        let req = self.request(Method::POST, &path).await?.json(pick);
        Self::send_json("save_pick", req).await
    }

    async fn get_sub_order(&self, sub_order_id: i64) -> Result<SubOrder, RemoteError> {
        let path = format!("api/work-orders/{sub_order_id}");
        let req = self.request(Method::GET, &path).await?;
        Self::send_json("get_sub_order", req).await
    }

    async fn save_sub_order(&self, sub_order: &SubOrder) -> Result<SubOrder, RemoteError> {
        let path = format!("api/work-orders/{}", sub_order.id);
        let req = self.request(Method::POST, &path).await?.json(sub_order);
        Self::send_json("save_sub_order", req).await
    }
}
