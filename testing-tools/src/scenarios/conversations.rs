use anyhow::{ensure, Context, Result};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;

use crate::context::TestContext;
use crate::output::{print_response, print_step, print_success};
use crate::scenarios::{edges, is_str, truthy};

const TITLE: &str = "Test conversation";
const TAG: &str = "conspector";

pub async fn create_conversation(ctx: &TestContext) -> Result<()> {
    let (user1, user2) = (&ctx.user1, &ctx.user2);
    let operation = ctx
        .catalog
        .mutation("createConversation")?
        .with_variable("participant", user2.id.as_str());

    // The server stamps createdAt itself, so either minute around submission is fine
    let now = Utc::now();
    let accepted = [now, now + Duration::minutes(1)].map(|t| t.format("%Y-%m-%dT%H:%M").to_string());

    print_step("User 1 creating a conversation with User 2...");
    let outcome = ctx.execute(user1, &operation).await?;
    print_response("User 1", &outcome);

    let conversation = &outcome.body()["conversation"];
    let created_at = conversation["createdAt"].as_str().unwrap_or_default();
    let minute = created_at.get(..16).unwrap_or(created_at);
    ensure!(
        accepted.iter().any(|m| m == minute),
        "createdAt '{created_at}' is not within a minute of {}",
        accepted[0]
    );
    ensure!(truthy(&conversation["id"]), "conversation has no id");
    ensure!(
        is_str(&conversation["title"], TITLE),
        "unexpected title {}",
        conversation["title"]
    );

    let creator = &conversation["creator"];
    ensure!(
        is_str(&creator["apiId"], &user1.id),
        "creator is {}, expected {}",
        creator["apiId"],
        user1.id
    );
    ensure!(truthy(&creator["id"]), "creator has no id");
    ensure!(!truthy(&creator["isOnline"]), "fresh creator reported online");
    ensure!(!truthy(&creator["lastSeen"]), "fresh creator has a lastSeen");

    let participants = edges(&conversation["participants"])?
        .iter()
        .map(|edge| edge["node"]["apiId"].as_str().unwrap_or_default())
        .collect::<BTreeSet<_>>();
    let expected = BTreeSet::from([user1.id.as_str(), user2.id.as_str()]);
    ensure!(
        participants == expected,
        "participants {participants:?}, expected {expected:?}"
    );

    ctx.ensure_latency("createConversation", outcome.elapsed_ms)?;
    print_success(&format!(
        "Conversation created: {}",
        conversation["id"].as_str().unwrap_or_default()
    ));
    Ok(())
}

pub async fn get_conversations(ctx: &TestContext) -> Result<()> {
    let conversation = ctx.conversation().await?;
    let (user1, user2) = (&ctx.user1, &ctx.user2);
    let operation = ctx
        .catalog
        .query("conversations")?
        .with_variable("tagsFilter", "-");

    print_step("User 1 fetching their conversations...");
    let outcome = ctx.execute(user1, &operation).await?;
    print_response("User 1", &outcome);

    let body = outcome.body();
    let edge = edges(body)?
        .iter()
        .find(|edge| is_str(&edge["node"]["id"], &conversation.id))
        .with_context(|| format!("conversation {} not listed", conversation.id))?;

    let cursor = edge["cursor"].as_str().unwrap_or_default();
    ensure!(!cursor.is_empty(), "edge has no cursor");
    let page_info = body["pageInfo"]
        .as_object()
        .context("no pageInfo in response")?;
    ensure!(
        page_info.values().any(|value| is_str(value, cursor)),
        "cursor {cursor} is neither start nor end cursor"
    );

    let node = &edge["node"];
    ensure!(is_str(&node["title"], TITLE), "unexpected title {}", node["title"]);
    ensure!(
        is_str(&node["creator"]["apiId"], &user1.id),
        "creator is {}, expected {}",
        node["creator"]["apiId"],
        user1.id
    );
    ensure!(node["lastMessage"].is_null(), "new conversation already has a last message");

    let participants = edges(&node["participants"])?;
    ensure!(
        participants.len() == 2
            && is_str(&participants[0]["node"]["apiId"], &user1.id)
            && is_str(&participants[1]["node"]["apiId"], &user2.id),
        "participants are not [{}, {}]",
        user1.id,
        user2.id
    );

    ensure!(!truthy(&page_info["hasNextPage"]), "unexpected next page");
    ensure!(!truthy(&page_info["hasPreviousPage"]), "unexpected previous page");

    ctx.ensure_latency("conversations", outcome.elapsed_ms)?;
    print_success(&format!("Conversation fetched: {}", conversation.id));
    Ok(())
}

pub async fn conversations_with(ctx: &TestContext) -> Result<()> {
    let conversation = ctx.conversation().await?;
    let operation = ctx
        .catalog
        .query("conversationsWith")?
        .with_variable("user_id", ctx.user2.id.as_str())
        .with_variable("tagsFilter", "-");

    print_step("User 1 fetching their conversations with User 2...");
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);

    let listed = edges(outcome.body())?;
    ensure!(!listed.is_empty(), "no conversations with {}", ctx.user2.id);
    ensure!(
        listed
            .iter()
            .any(|edge| is_str(&edge["node"]["id"], &conversation.id)),
        "conversation {} not listed",
        conversation.id
    );

    ctx.ensure_latency("conversationsWith", outcome.elapsed_ms)?;
    print_success(&format!("Conversation fetched: {}", conversation.id));
    Ok(())
}

pub async fn add_conversation_tag(ctx: &TestContext) -> Result<()> {
    let conversation = ctx.conversation().await?;
    let operation = ctx
        .catalog
        .mutation("addConversationTag")?
        .with_variable("conversationApiId", conversation.api_id.as_str())
        .with_variable("tagName", TAG);

    print_step(&format!("User 1 tagging the conversation '{TAG}'..."));
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);
    ctx.ensure_latency("addConversationTag", outcome.elapsed_ms)?;

    let tagged = tagged_conversations(ctx).await?;
    let edge = tagged
        .iter()
        .find(|edge| is_str(&edge["node"]["id"], &conversation.id))
        .with_context(|| format!("conversation {} not found with tag '{TAG}'", conversation.id))?;

    ensure!(
        is_str(&edge["node"]["creator"]["apiId"], &ctx.user1.id),
        "creator is {}, expected {}",
        edge["node"]["creator"]["apiId"],
        ctx.user1.id
    );
    ensure!(
        edge["node"]["tags"] == serde_json::json!([TAG]),
        "tags are {}",
        edge["node"]["tags"]
    );

    print_success(&format!("Conversation with tag '{TAG}' found: {}", conversation.id));
    Ok(())
}

pub async fn remove_conversation_tag(ctx: &TestContext) -> Result<()> {
    let conversation = ctx.conversation().await?;
    let operation = ctx
        .catalog
        .mutation("removeConversationTag")?
        .with_variable("conversationApiId", conversation.api_id.as_str())
        .with_variable("tagName", TAG);

    print_step(&format!("User 1 removing tag '{TAG}'..."));
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);
    ctx.ensure_latency("removeConversationTag", outcome.elapsed_ms)?;

    let tagged = tagged_conversations(ctx).await?;
    ensure!(
        tagged.is_empty(),
        "{} conversation(s) still tagged '{TAG}'",
        tagged.len()
    );

    print_success(&format!("Conversation with tag '{TAG}' not found"));
    Ok(())
}

/// User 1's conversations filtered by the scenario tag.
async fn tagged_conversations(ctx: &TestContext) -> Result<Vec<serde_json::Value>> {
    let operation = ctx
        .catalog
        .query("conversations")?
        .with_variable("tagsFilter", TAG);
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    Ok(edges(outcome.body())?.clone())
}
