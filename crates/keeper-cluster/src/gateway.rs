//! Clusters reached through their HTTP REST gateway.
//!
//! Every seed node is tried in order; the first node that answers becomes
//! the session endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keeper_config::{Cluster, Credentials};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::{ClusterClient, ClusterConnector, ClusterResult};
use crate::error::ClusterError;
use crate::record::*;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

pub struct GatewayConnector {
    scheme: String,
}

impl GatewayConnector {
    pub fn new(tls: bool) -> Self {
        Self {
            scheme: if tls { "https" } else { "http" }.to_string(),
        }
    }
}

impl Default for GatewayConnector {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl ClusterConnector for GatewayConnector {
    async fn connect(&self, cluster: &Cluster) -> ClusterResult<Arc<dyn ClusterClient>> {
        let timeout = cluster
            .conn_timeout
            .filter(|t| *t > 0)
            .map(|t| t as u64)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(timeout))
            .build()
            .map_err(|e| ClusterError::Unreachable(e.to_string()))?;

        let mut last_error = ClusterError::Unreachable("no seed nodes".to_string());
        for seed in &cluster.seed_nodes {
            let client = GatewayClient {
                http: http.clone(),
                base_url: format!("{}://{}", self.scheme, seed.address()),
                credentials: cluster.credentials.clone(),
            };
            match client.namespaces().await {
                Ok(_) => {
                    debug!("Connected to cluster gateway at {}", client.base_url);
                    return Ok(Arc::new(client));
                }
                Err(ClusterError::Authentication(msg)) => {
                    return Err(ClusterError::Authentication(msg));
                }
                Err(e) => {
                    warn!("Seed node {} failed: {}", seed.address(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

pub struct GatewayClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

#[derive(Serialize, Deserialize)]
struct PutRequest<'a> {
    record: std::borrow::Cow<'a, Record>,
    policy: WritePolicy,
}

#[derive(Serialize, Deserialize)]
struct CountResponse {
    count: u64,
}

impl GatewayClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.credentials {
            Some(Credentials {
                user: Some(user),
                password,
            }) => builder.basic_auth(user, password.as_ref()),
            _ => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ClusterResult<T> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClusterError::Rejected(format!("invalid gateway response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClusterError::Authentication(body),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ClusterError::Timeout(body),
            StatusCode::NOT_FOUND => ClusterError::NamespaceNotFound(body),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
                ClusterError::Unreachable(body)
            }
            _ => ClusterError::Rejected(format!("{}: {}", status, body)),
        })
    }

    async fn send_empty(&self, builder: RequestBuilder) -> ClusterResult<()> {
        self.send::<serde_json::Value>(builder).await.map(|_| ())
    }
}

fn transport_error(error: reqwest::Error) -> ClusterError {
    if error.is_timeout() {
        ClusterError::Timeout(error.to_string())
    } else {
        ClusterError::Unreachable(error.to_string())
    }
}

#[async_trait]
impl ClusterClient for GatewayClient {
    async fn namespaces(&self) -> ClusterResult<Vec<String>> {
        self.send(self.request(Method::GET, "/v1/namespaces")).await
    }

    async fn scan(&self, request: &ScanRequest) -> ClusterResult<Vec<Record>> {
        self.send(self.request(Method::POST, "/v1/scan").json(request))
            .await
    }

    async fn put(&self, record: &Record, policy: &WritePolicy) -> ClusterResult<WriteOutcome> {
        let body = PutRequest {
            record: std::borrow::Cow::Borrowed(record),
            policy: *policy,
        };
        self.send(self.request(Method::POST, "/v1/records").json(&body))
            .await
    }

    async fn udfs(&self) -> ClusterResult<Vec<Udf>> {
        self.send(self.request(Method::GET, "/v1/udfs")).await
    }

    async fn put_udf(&self, udf: &Udf) -> ClusterResult<()> {
        self.send_empty(self.request(Method::POST, "/v1/udfs").json(udf))
            .await
    }

    async fn indexes(&self, namespace: &str) -> ClusterResult<Vec<SecondaryIndex>> {
        self.send(self.request(Method::GET, &format!("/v1/indexes/{}", namespace)))
            .await
    }

    async fn create_index(&self, index: &SecondaryIndex) -> ClusterResult<()> {
        self.send_empty(self.request(Method::POST, "/v1/indexes").json(index))
            .await
    }

    async fn users(&self) -> ClusterResult<Vec<User>> {
        self.send(self.request(Method::GET, "/v1/users")).await
    }

    async fn roles(&self) -> ClusterResult<Vec<Role>> {
        self.send(self.request(Method::GET, "/v1/roles")).await
    }

    async fn object_count(&self, namespace: &str) -> ClusterResult<u64> {
        let response: CountResponse = self
            .send(self.request(Method::GET, &format!("/v1/namespaces/{}/objects", namespace)))
            .await?;
        Ok(response.count)
    }

    async fn configure_shipping(&self, target: &ShippingTarget) -> ClusterResult<()> {
        self.send_empty(self.request(Method::POST, "/v1/xdr/dcs").json(target))
            .await
    }

    async fn truncate(&self, namespace: &str, set: Option<&str>) -> ClusterResult<()> {
        let path = match set {
            Some(set) => format!("/v1/namespaces/{}/sets/{}/truncate", namespace, set),
            None => format!("/v1/namespaces/{}/truncate", namespace),
        };
        self.send_empty(self.request(Method::POST, &path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use keeper_config::SeedNode;

    async fn spawn_gateway() -> u16 {
        let app = Router::new()
            .route(
                "/v1/namespaces",
                get(|headers: HeaderMap| async move {
                    match headers.get("authorization") {
                        // "admin:secret"
                        Some(value) if value == "Basic YWRtaW46c2VjcmV0" => {
                            Ok(Json(vec!["test".to_string()]))
                        }
                        _ => Err(axum::http::StatusCode::UNAUTHORIZED),
                    }
                }),
            )
            .route(
                "/v1/namespaces/test/objects",
                get(|| async { Json(CountResponse { count: 42 }) }),
            )
            .route(
                "/v1/records",
                post(|Json(body): Json<PutRequest<'static>>| async move {
                    if body.policy.exists == ExistsAction::CreateOnly {
                        Json(WriteOutcome::Existed)
                    } else {
                        Json(WriteOutcome::Inserted)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn cluster(port: u16, password: &str) -> Cluster {
        Cluster {
            seed_nodes: vec![SeedNode {
                host_name: "127.0.0.1".into(),
                port: port as i64,
                tls_name: None,
            }],
            credentials: Some(Credentials {
                user: Some("admin".into()),
                password: Some(password.into()),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_gateway_session() {
        let port = spawn_gateway().await;
        let client = GatewayConnector::default()
            .connect(&cluster(port, "secret"))
            .await
            .unwrap();
        assert_eq!(client.object_count("test").await.unwrap(), 42);

        let record = Record {
            namespace: "test".into(),
            set: String::new(),
            digest: Digest::of("", "k"),
            bins: Bins::new(),
            generation: 1,
            last_update_time: 0,
            void_time: 0,
        };
        let policy = WritePolicy {
            exists: ExistsAction::CreateOnly,
            ..Default::default()
        };
        assert_eq!(client.put(&record, &policy).await.unwrap(), WriteOutcome::Existed);
    }

    #[tokio::test]
    async fn test_gateway_errors_are_classified() {
        let port = spawn_gateway().await;
        let err = GatewayConnector::default()
            .connect(&cluster(port, "wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClusterError::Authentication(_)));

        // Nothing listens on port 1
        let err = GatewayConnector::default()
            .connect(&cluster(1, "secret"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClusterError::Unreachable(_)));
    }
}
