use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use std::time::Instant;

use crate::context::TestContext;
use crate::output::{print_failure, print_success, TestResult};

pub mod conversations;
pub mod delivery;
pub mod presence;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// User 1 creates a conversation with User 2
    CreateConversation,
    /// User 1 lists their conversations
    GetConversations,
    /// User 1 lists their conversations with User 2
    ConversationsWith,
    /// User 1 tags the shared conversation
    AddConversationTag,
    /// User 1 removes the tag from the shared conversation
    RemoveConversationTag,
    /// User 2 fetching a message marks it delivered
    MessageReceived,
    /// User 2 marks a message as read
    MarkAsRead,
    /// User 1 is notified when User 2 receives a message
    MessageDelivered,
    /// User 1 is notified when User 2 reads a message
    MessageRead,
    /// User 2 lists their unread messages
    UnreadMessages,
    /// User 1 reports being online
    LastSeen,
    /// User 1 is notified when User 2 comes online
    UserOnline,
    /// User 1 fetches their unread count and profile
    UserMeta,
    /// Participants with unread messages over the last day
    ParticipantsWithUnreadMessages,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Suite {
    Conversations,
    DeliveryReadReceipts,
    UserPresence,
    /// Every scenario, in suite order
    All,
}

/// Every scenario in the order a full run executes them.
pub const ALL_SCENARIOS: [Scenario; 14] = [
    Scenario::CreateConversation,
    Scenario::GetConversations,
    Scenario::ConversationsWith,
    Scenario::AddConversationTag,
    Scenario::RemoveConversationTag,
    Scenario::MessageReceived,
    Scenario::MarkAsRead,
    Scenario::MessageDelivered,
    Scenario::MessageRead,
    Scenario::UnreadMessages,
    Scenario::LastSeen,
    Scenario::UserOnline,
    Scenario::UserMeta,
    Scenario::ParticipantsWithUnreadMessages,
];

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::CreateConversation => "create_conversation",
            Scenario::GetConversations => "get_conversations",
            Scenario::ConversationsWith => "conversations_with",
            Scenario::AddConversationTag => "add_conversation_tag",
            Scenario::RemoveConversationTag => "remove_conversation_tag",
            Scenario::MessageReceived => "message_received",
            Scenario::MarkAsRead => "mark_as_read",
            Scenario::MessageDelivered => "message_delivered",
            Scenario::MessageRead => "message_read",
            Scenario::UnreadMessages => "unread_messages",
            Scenario::LastSeen => "last_seen",
            Scenario::UserOnline => "user_online",
            Scenario::UserMeta => "user_meta",
            Scenario::ParticipantsWithUnreadMessages => "participants_with_unread_messages",
        }
    }

    pub fn suite(&self) -> Suite {
        match self {
            Scenario::CreateConversation
            | Scenario::GetConversations
            | Scenario::ConversationsWith
            | Scenario::AddConversationTag
            | Scenario::RemoveConversationTag => Suite::Conversations,
            Scenario::MessageReceived
            | Scenario::MarkAsRead
            | Scenario::MessageDelivered
            | Scenario::MessageRead
            | Scenario::UnreadMessages => Suite::DeliveryReadReceipts,
            Scenario::LastSeen
            | Scenario::UserOnline
            | Scenario::UserMeta
            | Scenario::ParticipantsWithUnreadMessages => Suite::UserPresence,
        }
    }

    async fn check(&self, ctx: &TestContext) -> Result<()> {
        match self {
            Scenario::CreateConversation => conversations::create_conversation(ctx).await,
            Scenario::GetConversations => conversations::get_conversations(ctx).await,
            Scenario::ConversationsWith => conversations::conversations_with(ctx).await,
            Scenario::AddConversationTag => conversations::add_conversation_tag(ctx).await,
            Scenario::RemoveConversationTag => conversations::remove_conversation_tag(ctx).await,
            Scenario::MessageReceived => delivery::message_received(ctx).await,
            Scenario::MarkAsRead => delivery::mark_as_read(ctx).await,
            Scenario::MessageDelivered => delivery::message_delivered(ctx).await,
            Scenario::MessageRead => delivery::message_read(ctx).await,
            Scenario::UnreadMessages => delivery::unread_messages(ctx).await,
            Scenario::LastSeen => presence::last_seen(ctx).await,
            Scenario::UserOnline => presence::user_online(ctx).await,
            Scenario::UserMeta => presence::user_meta(ctx).await,
            Scenario::ParticipantsWithUnreadMessages => {
                presence::participants_with_unread_messages(ctx).await
            }
        }
    }
}

impl Suite {
    pub fn scenarios(&self) -> Vec<Scenario> {
        ALL_SCENARIOS
            .into_iter()
            .filter(|scenario| *self == Suite::All || scenario.suite() == *self)
            .collect()
    }
}

/// Runs one scenario, turning any failure into a failed result.
pub async fn run_scenario(scenario: Scenario, ctx: &TestContext) -> TestResult {
    let start = Instant::now();

    println!(
        "\n{}",
        format!("=== TEST: {} ===", scenario.name()).bright_cyan().bold()
    );

    let (passed, message) = match scenario.check(ctx).await {
        Ok(()) => {
            print_success("Scenario passed");
            (true, None)
        }
        Err(e) => {
            print_failure(&format!("{e:#}"));
            (false, Some(format!("{e:#}")))
        }
    };

    TestResult {
        scenario: scenario.name().to_string(),
        passed,
        message,
        duration: start.elapsed(),
    }
}

/// Python-like truthiness: null, false, zero and empty values are falsy.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub(crate) fn is_str(value: &Value, expected: &str) -> bool {
    value.as_str() == Some(expected)
}

/// The `edges` list of a connection payload.
pub(crate) fn edges(connection: &Value) -> Result<&Vec<Value>> {
    connection["edges"]
        .as_array()
        .with_context(|| format!("no 'edges' list in {connection}"))
}
