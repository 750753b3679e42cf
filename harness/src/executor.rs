//! One-shot GraphQL queries and mutations over HTTP.

use std::collections::BTreeMap;
use std::time::Duration;

use log::*;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use secrecy::ExposeSecret;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::auth::Principal;
use crate::error::{protocol_error, server_error, Error, ProtocolErrorKind, ServerErrorKind};
use crate::operation::Operation;
use crate::outcome::{round_millis, RequestOutcome};
use crate::response::into_data;
use crate::schema::Schema;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends operations to the GraphQL HTTP endpoint and times them.
///
/// No retries happen here. Callers that want them wrap the call themselves.
pub struct QueryExecutor {
    client: Client,
    endpoint: String,
    headers: HeaderMap,
    introspection: bool,
    schema: OnceCell<Schema>,
}

impl QueryExecutor {
    pub fn new(endpoint: impl Into<String>, headers: &BTreeMap<String, String>) -> Result<Self, Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            headers: header_map(headers)?,
            introspection: true,
            schema: OnceCell::new(),
        })
    }

    /// Enables or disables fetching the schema before the first operation.
    pub fn with_introspection(mut self, enabled: bool) -> Self {
        self.introspection = enabled;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Executes `operation` as `principal`, returning its data and round-trip latency.
    ///
    /// The latency covers the operation's own request only, not the one-time
    /// introspection that may precede it.
    pub async fn execute(
        &self,
        principal: &Principal,
        operation: &Operation,
    ) -> Result<RequestOutcome, Error> {
        if self.introspection {
            self.schema(principal).await?.validate(operation)?;
        }

        debug!("Executing '{}' as {}", operation.name(), principal.id);
        let start = Instant::now();
        let response = self.post(principal, operation).await?;
        let elapsed_ms = round_millis(start.elapsed());

        info!("'{}' returned in {} ms", operation.name(), elapsed_ms);
        Ok(RequestOutcome {
            response,
            elapsed_ms,
        })
    }

    async fn schema(&self, principal: &Principal) -> Result<&Schema, Error> {
        self.schema
            .get_or_try_init(|| async {
                debug!("Fetching schema from {}", self.endpoint);
                let introspection = Schema::introspection_operation()?;
                let data = self.post(principal, &introspection).await?;
                Schema::from_introspection(data)
            })
            .await
    }

    async fn post(&self, principal: &Principal, operation: &Operation) -> Result<serde_json::Value, Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .bearer_auth(principal.token().expose_secret())
            .json(&operation.request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("'{}' failed with HTTP {}: {}", operation.name(), status, body);
            return Err(server_error(
                ServerErrorKind::Status(status.as_u16()),
                &format!("HTTP {status} from {}: {body}", self.endpoint),
            ));
        }

        into_data(response.json().await?)
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| protocol_error(ProtocolErrorKind::InvalidHeader, name))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| protocol_error(ProtocolErrorKind::InvalidHeader, value))?;
        map.insert(name, value);
    }
    Ok(map)
}
