//! REST implementation of [`DocumentStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::{self, Credential, MasterKey, ResourceTokens};
use crate::error::{ClientError, Result};
use crate::headers;
use crate::link::{child_link, database_link, feed_link, ResourceKind, ResourcePath};
use crate::resolver::ResolverRegistry;
use crate::store::DocumentStore;
use crate::types::{
    Collection, Database, Document, FeedOptions, PartitionKey, Permission, QuerySpec,
    StoredProcedure, User,
};

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Connection settings for [`RestClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Service endpoint, e.g. `https://localhost:8081/`
    pub endpoint: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Skip TLS certificate validation (local emulator certificates)
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:8081/".to_string(),
            request_timeout_ms: 30_000,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    code: Option<String>,
    message: Option<String>,
}

fn service_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    let parsed: Option<ServiceErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(ServiceErrorBody { code, message }) => (code, message),
        None => (None, None),
    };
    ClientError::Service {
        status: status.as_u16(),
        code: code.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown")
                .replace(' ', "")
        }),
        message: message.unwrap_or_else(|| body.to_string()),
    }
}

/// Talks to the service over its REST API.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    credential: Arc<Credential>,
    resolvers: ResolverRegistry,
}

impl RestClient {
    pub fn new(config: ClientConfig, credential: Credential) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
            credential: Arc::new(credential),
            resolvers: ResolverRegistry::new(),
        })
    }

    /// Client authenticating with the base64 account key.
    pub fn with_master_key(config: ClientConfig, master_key: &str) -> Result<Self> {
        let key = MasterKey::from_base64(master_key)?;
        Self::new(config, Credential::MasterKey(key))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request URL for `path`, escaping each segment. Signing uses the
    /// unescaped path.
    fn url(&self, path: &str) -> String {
        let escaped: Vec<String> = path
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            escaped.join("/")
        )
    }

    fn request(&self, method: Method, link: &str) -> Result<RequestBuilder> {
        let resource = ResourcePath::parse(link)?;
        let date = auth::rfc1123_now();
        let authorization = self.credential.header(method.as_str(), &resource, &date)?;
        let path = resource.path();

        debug!(method = %method, path = %path, "sending request");

        Ok(self
            .http
            .request(method, self.url(&path))
            .header(headers::DATE, date)
            .header(headers::VERSION, headers::API_VERSION)
            .header(headers::AUTHORIZATION, authorization)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), "request failed");
        Err(service_error(status, &body))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads every page of a feed, following continuation tokens.
    async fn read_feed<T: DeserializeOwned>(
        &self,
        method: Method,
        link: &str,
        kind: ResourceKind,
        query: Option<&QuerySpec>,
        options: &FeedOptions,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut builder = self.request(method.clone(), link)?;
            if let Some(query) = query {
                builder = builder
                    .header(headers::IS_QUERY, "True")
                    .header(CONTENT_TYPE, headers::QUERY_CONTENT_TYPE)
                    .body(serde_json::to_vec(query)?);
            }
            if let Some(partition) = &options.partition_key {
                builder = builder.header(headers::PARTITION_KEY, partition.header_value());
            }
            if options.enable_cross_partition {
                builder = builder.header(headers::ENABLE_CROSS_PARTITION, "True");
            }
            if let Some(max) = options.max_item_count {
                builder = builder.header(headers::MAX_ITEM_COUNT, max.to_string());
            }
            if let Some(token) = &continuation {
                builder = builder.header(headers::CONTINUATION, token.as_str());
            }

            let response = self.send(builder).await?;
            continuation = response
                .headers()
                .get(headers::CONTINUATION)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            let mut page: Value = Self::json(response).await?;
            let page_items = page
                .get_mut(kind.feed_key())
                .map(Value::take)
                .ok_or_else(|| {
                    ClientError::InvalidResponse(format!(
                        "feed has no '{}' array",
                        kind.feed_key()
                    ))
                })?;
            let page_items: Vec<T> = serde_json::from_value(page_items)?;
            items.extend(page_items);

            if continuation.is_none() {
                break;
            }
        }

        Ok(items)
    }

    async fn read_item<T: DeserializeOwned>(&self, link: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, link)?).await?;
        Self::json(response).await
    }

    async fn delete_item(&self, link: &str, partition: Option<&PartitionKey>) -> Result<()> {
        let mut builder = self.request(Method::DELETE, link)?;
        if let Some(partition) = partition {
            builder = builder.header(headers::PARTITION_KEY, partition.header_value());
        }
        self.send(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for RestClient {
    async fn read_database(&self, id: &str) -> Result<Database> {
        self.read_item(&database_link(id)).await
    }

    async fn read_collection(&self, database_link: &str, id: &str) -> Result<Collection> {
        self.read_item(&child_link(database_link, ResourceKind::Collection, id))
            .await
    }

    async fn create_document(
        &self,
        target_link: &str,
        mut document: Document,
        partition: &PartitionKey,
    ) -> Result<Document> {
        let collection = self.resolvers.resolve_target(target_link, &document)?;
        if document.id.is_empty() {
            document.id = uuid::Uuid::new_v4().to_string();
        }
        let builder = self
            .request(
                Method::POST,
                &feed_link(&collection, ResourceKind::Document),
            )?
            .header(headers::PARTITION_KEY, partition.header_value())
            .json(&document);
        Self::json(self.send(builder).await?).await
    }

    async fn delete_document(&self, document_link: &str, partition: &PartitionKey) -> Result<()> {
        self.delete_item(document_link, Some(partition)).await
    }

    async fn query_documents(
        &self,
        collection_link: &str,
        query: &QuerySpec,
        options: &FeedOptions,
    ) -> Result<Vec<Document>> {
        self.read_feed(
            Method::POST,
            &feed_link(collection_link, ResourceKind::Document),
            ResourceKind::Document,
            Some(query),
            options,
        )
        .await
    }

    async fn create_stored_procedure(
        &self,
        collection_link: &str,
        procedure: &StoredProcedure,
    ) -> Result<StoredProcedure> {
        let body = json!({ "id": procedure.id, "body": procedure.body });
        let builder = self
            .request(
                Method::POST,
                &feed_link(collection_link, ResourceKind::StoredProcedure),
            )?
            .json(&body);
        Self::json(self.send(builder).await?).await
    }

    async fn read_stored_procedure(
        &self,
        collection_link: &str,
        id: &str,
    ) -> Result<StoredProcedure> {
        self.read_item(&child_link(
            collection_link,
            ResourceKind::StoredProcedure,
            id,
        ))
        .await
    }

    async fn delete_stored_procedure(&self, link: &str) -> Result<()> {
        self.delete_item(link, None).await
    }

    async fn execute_stored_procedure(
        &self,
        link: &str,
        params: &[Value],
        partition: &PartitionKey,
    ) -> Result<Value> {
        let builder = self
            .request(Method::POST, link)?
            .header(headers::PARTITION_KEY, partition.header_value())
            .json(&params);
        let response = self.send(builder).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn read_user(&self, database_link: &str, id: &str) -> Result<User> {
        self.read_item(&child_link(database_link, ResourceKind::User, id))
            .await
    }

    async fn create_user(&self, database_link: &str, id: &str) -> Result<User> {
        let builder = self
            .request(Method::POST, &feed_link(database_link, ResourceKind::User))?
            .json(&json!({ "id": id }));
        Self::json(self.send(builder).await?).await
    }

    async fn delete_user(&self, link: &str) -> Result<()> {
        self.delete_item(link, None).await
    }

    async fn list_permissions(&self, user_link: &str) -> Result<Vec<Permission>> {
        self.read_feed(
            Method::GET,
            &feed_link(user_link, ResourceKind::Permission),
            ResourceKind::Permission,
            None,
            &FeedOptions::default(),
        )
        .await
    }

    async fn create_permission(
        &self,
        user_link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let mut builder = self
            .request(
                Method::POST,
                &feed_link(user_link, ResourceKind::Permission),
            )?
            .json(&permission.definition());
        if let Some(partition) = partition {
            builder = builder.header(headers::PARTITION_KEY, partition.header_value());
        }
        Self::json(self.send(builder).await?).await
    }

    async fn replace_permission(
        &self,
        link: &str,
        permission: &Permission,
        partition: Option<&PartitionKey>,
    ) -> Result<Permission> {
        let mut builder = self
            .request(Method::PUT, link)?
            .json(&permission.definition());
        if let Some(partition) = partition {
            builder = builder.header(headers::PARTITION_KEY, partition.header_value());
        }
        Self::json(self.send(builder).await?).await
    }

    async fn delete_permission(&self, link: &str) -> Result<()> {
        self.delete_item(link, None).await
    }

    fn with_permission_feed(&self, permissions: &[Permission]) -> Result<Arc<dyn DocumentStore>> {
        let tokens = ResourceTokens::from_permissions(permissions);
        if tokens.is_empty() {
            return Err(ClientError::Unauthorized(
                "permission feed carries no resource tokens".to_string(),
            ));
        }
        Ok(Arc::new(RestClient {
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            credential: Arc::new(Credential::ResourceTokens(tokens)),
            resolvers: ResolverRegistry::new(),
        }))
    }

    fn resolvers(&self) -> &ResolverRegistry {
        &self.resolvers
    }
}
