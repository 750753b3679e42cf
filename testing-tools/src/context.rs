//! Everything a scenario needs: endpoints, two synthetic users and the shared
//! fixtures built on top of them.

use anyhow::{anyhow, ensure, Context, Result};
use harness::{
    BackoffPolicy, DualOutcome, DualSessionHarness, Operation, PayloadCatalog, Principal,
    QueryExecutor, RequestOutcome, SessionTarget, SubscriptionSpec, WsProtocol,
};
use log::*;
use serde_json::Value;
use service::config::{Config, Endpoints};
use tokio::sync::OnceCell;

use crate::output::print_success;

/// Body of every message the fixtures send.
pub const TEXT_MESSAGE: &str = "This is my text message";

#[derive(Clone, Debug)]
pub struct Conversation {
    pub id: String,
    pub api_id: String,
}

pub struct TestContext {
    pub endpoints: Endpoints,
    pub catalog: PayloadCatalog,
    /// Creator of the shared conversation and listener of every subscription.
    pub user1: Principal,
    /// The other participant. Triggers the events `user1` listens for.
    pub user2: Principal,
    pub time_assert_ms: u64,
    executor: QueryExecutor,
    harness: DualSessionHarness,
    conversation: OnceCell<Conversation>,
}

impl TestContext {
    pub fn new(config: &Config) -> Result<Self> {
        let endpoints = config.resolve()?;
        Self::for_endpoints(config, endpoints)
    }

    /// Like [`TestContext::new`], with endpoints that need not follow the host conventions.
    pub fn for_endpoints(config: &Config, endpoints: Endpoints) -> Result<Self> {
        let introspection = config.introspection_enabled(&endpoints);
        let headers = config.gql_headers();

        let signing_key = config
            .jwt_key()
            .context("a JWT signing key is required: pass --jwt-key or set JWT_KEY")?;
        let ttl = chrono::Duration::minutes(config.token_ttl_minutes);
        let user1 = Principal::provision(signing_key, ttl)?;
        let user2 = Principal::provision(signing_key, ttl)?;

        let protocol: WsProtocol = config
            .ws_protocol
            .parse()
            .map_err(|_| anyhow!("unsupported sub-protocol '{}'", config.ws_protocol))?;

        let executor = QueryExecutor::new(&endpoints.graphql_endpoint, &headers)?
            .with_introspection(introspection);
        let target = SessionTarget::new(&endpoints.ws_endpoint, headers, protocol)
            .with_introspection(introspection);
        let harness = DualSessionHarness::new(target)
            .with_deadline(config.deadline())
            .with_grace_period(config.grace_period())
            .with_backoff(BackoffPolicy::default().with_max_elapsed(config.retry_budget()));

        info!(
            "Targeting {} ({}), introspection {}",
            endpoints.host,
            endpoints.environment,
            if introspection { "on" } else { "off" }
        );

        Ok(Self {
            endpoints,
            catalog: PayloadCatalog::new(&config.payload_dir),
            user1,
            user2,
            time_assert_ms: config.time_assert_ms,
            executor,
            harness,
            conversation: OnceCell::new(),
        })
    }

    /// Runs a query or mutation over HTTP as `principal`.
    pub async fn execute(&self, principal: &Principal, operation: &Operation) -> Result<RequestOutcome> {
        self.executor
            .execute(principal, operation)
            .await
            .with_context(|| format!("'{}' failed", operation.name()))
    }

    /// Subscribes as user 1 and triggers as user 2 on two fresh sessions.
    pub async fn run_dual(&self, subscription: &SubscriptionSpec, trigger: &Operation) -> Result<DualOutcome> {
        self.harness
            .run(&self.user1, &self.user2, subscription, trigger)
            .await
            .with_context(|| {
                format!(
                    "'{}' triggered by '{}' failed",
                    subscription.operation.name(),
                    trigger.name()
                )
            })
    }

    pub fn ensure_latency(&self, name: &str, elapsed_ms: u64) -> Result<()> {
        ensure!(
            elapsed_ms <= self.time_assert_ms,
            "'{name}' took {elapsed_ms} ms, above the {} ms limit",
            self.time_assert_ms
        );
        info!("'{name}' elapsed time: {elapsed_ms} ms");
        Ok(())
    }

    /// The conversation between both users, created on first use and shared afterwards.
    pub async fn conversation(&self) -> Result<&Conversation> {
        self.conversation
            .get_or_try_init(|| async {
                let operation = self
                    .catalog
                    .mutation("createConversation_fixture_cut")?
                    .with_variable("participant", self.user2.id.as_str());
                let outcome = self.execute(&self.user1, &operation).await?;

                let conversation = &outcome.body()["conversation"];
                let conversation = Conversation {
                    id: string_at(conversation, "id")?,
                    api_id: string_at(conversation, "apiId")?,
                };
                print_success(&format!("Conversation created: {}", conversation.id));
                Ok::<_, anyhow::Error>(conversation)
            })
            .await
    }

    /// Sends a fresh text message from user 1 to the shared conversation and returns its id.
    pub async fn send_text_message(&self) -> Result<String> {
        let conversation = self.conversation().await?;
        let operation = self
            .catalog
            .mutation("sendTextMessage_fixture_cut")?
            .with_variable("conversation_id", conversation.id.as_str())
            .with_variable("message", TEXT_MESSAGE);
        let outcome = self.execute(&self.user1, &operation).await?;

        let message_id = string_at(&outcome.body()["message"], "id")?;
        print_success(&format!("Message sent, messageId: {message_id}"));
        Ok(message_id)
    }

    /// The shared conversation's messages as seen by user 2.
    pub async fn messages_by_conversation(&self) -> Result<RequestOutcome> {
        let conversation = self.conversation().await?;
        let operation = self
            .catalog
            .query("messagesByConversation")?
            .with_variable("conversation_id", conversation.id.as_str());
        self.execute(&self.user2, &operation).await
    }
}

/// The string at `value[field]`, failing with the surrounding payload when absent.
pub fn string_at(value: &Value, field: &str) -> Result<String> {
    value[field]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("no string '{field}' in {value}"))
}
