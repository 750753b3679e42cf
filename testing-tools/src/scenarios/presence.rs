use anyhow::{ensure, Context, Result};
use chrono::{Duration, Utc};
use harness::SubscriptionSpec;
use serde_json::json;

use crate::context::TestContext;
use crate::output::{print_response, print_step, print_success};
use crate::scenarios::delivery::{first_event, info_trigger};
use crate::scenarios::{edges, is_str, truthy};

pub async fn last_seen(ctx: &TestContext) -> Result<()> {
    let operation = ctx.catalog.mutation("lastSeen")?;

    print_step("User 1 reporting activity...");
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);

    ensure!(truthy(&outcome.body()["success"]), "lastSeen was not acknowledged");
    ctx.ensure_latency("lastSeen", outcome.elapsed_ms)?;
    print_success("Last seen updated");
    Ok(())
}

pub async fn user_online(ctx: &TestContext) -> Result<()> {
    let conversation = ctx.conversation().await?;
    let subscription = SubscriptionSpec::new(
        ctx.catalog
            .subscription("userOnline")?
            .with_variable("conversation_id", json!([conversation.id])),
    );
    let trigger = ctx.catalog.mutation("lastSeen")?;

    print_step("User 1 subscribing to userOnline, User 2 reporting activity...");
    let outcome = ctx.run_dual(&subscription, &trigger).await?;
    let event = first_event(&outcome)?;

    let user = &event.body()["user"];
    ensure!(
        is_str(&user["apiId"], &ctx.user2.id),
        "online user is {}, expected {}",
        user["apiId"],
        ctx.user2.id
    );
    ensure!(truthy(&user["isOnline"]), "{} is not reported online", ctx.user2.id);
    ensure!(
        truthy(&outcome.trigger.body()["success"]),
        "lastSeen was not acknowledged"
    );

    ctx.ensure_latency("userOnline", outcome.subscription.elapsed_ms.unwrap_or_default())?;
    info_trigger(&outcome);
    Ok(())
}

pub async fn user_meta(ctx: &TestContext) -> Result<()> {
    let operation = ctx.catalog.query("userMeta")?;

    print_step("User 1 fetching their metadata...");
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);

    let meta = outcome.body();
    let unread = meta["unreadCount"]
        .as_i64()
        .with_context(|| format!("unreadCount is not an integer: {}", meta["unreadCount"]))?;
    ensure!(
        is_str(&meta["user"]["apiId"], &ctx.user1.id),
        "metadata belongs to {}, expected {}",
        meta["user"]["apiId"],
        ctx.user1.id
    );

    ctx.ensure_latency("userMeta", outcome.elapsed_ms)?;
    print_success(&format!("{} has {unread} unread message(s)", ctx.user1.id));
    Ok(())
}

pub async fn participants_with_unread_messages(ctx: &TestContext) -> Result<()> {
    let since = (Utc::now() - Duration::hours(24)).timestamp();
    let operation = ctx
        .catalog
        .query("participantsWithUnreadMessages")?
        .with_variable("timestamp", since);

    print_step("User 1 fetching participants with unread messages over the last day...");
    let outcome = ctx.execute(&ctx.user1, &operation).await?;
    print_response("User 1", &outcome);

    let node = edges(outcome.body())?
        .first()
        .map(|edge| &edge["node"])
        .context("no participants with unread messages")?;
    ensure!(truthy(&node["conversation"]), "participant has no conversation");
    ensure!(truthy(&node["id"]), "participant has no id");
    ensure!(truthy(&node["user"]["apiId"]), "participant has no user");

    ctx.ensure_latency("participantsWithUnreadMessages", outcome.elapsed_ms)?;
    print_success(&format!(
        "Participant with unread messages: {}",
        node["user"]["apiId"].as_str().unwrap_or_default()
    ));
    Ok(())
}
