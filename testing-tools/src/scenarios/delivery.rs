use anyhow::{ensure, Context, Result};
use harness::{DualOutcome, Event, SubscriptionSpec};

use crate::context::{TestContext, TEXT_MESSAGE};
use crate::output::{print_event, print_response, print_step, print_success};
use crate::scenarios::{edges, is_str};

pub async fn message_received(ctx: &TestContext) -> Result<()> {
    let message_id = ctx.send_text_message().await?;
    let fetched = ctx.messages_by_conversation().await?;
    let conversation_id = edges(fetched.body())?
        .first()
        .and_then(|edge| edge["node"]["conversation"]["id"].as_str())
        .context("User 2 sees no message in the conversation")?;

    print_step("User 2 fetching the conversation's messages again...");
    let operation = ctx
        .catalog
        .query("messagesByConversation")?
        .with_variable("conversation_id", conversation_id);
    let outcome = ctx.execute(&ctx.user2, &operation).await?;
    print_response("User 2", &outcome);

    let recipient = edges(outcome.body())?
        .last()
        .map(|edge| &edge["node"]["deliveredTo"][0]["apiId"])
        .context("no messages returned")?;
    ensure!(
        is_str(recipient, &ctx.user2.id),
        "message delivered to {recipient}, expected {}",
        ctx.user2.id
    );

    print_success(&format!("Message '{message_id}' received by {}", ctx.user2.id));
    Ok(())
}

pub async fn mark_as_read(ctx: &TestContext) -> Result<()> {
    let message_id = ctx.send_text_message().await?;
    let operation = ctx
        .catalog
        .mutation("markAsRead")?
        .with_variable("message_id", message_id.as_str());

    print_step("User 2 marking the message as read...");
    let outcome = ctx.execute(&ctx.user2, &operation).await?;
    print_response("User 2", &outcome);

    let message = &outcome.body()["message"];
    ensure!(
        is_str(&message["id"], &message_id),
        "marked {} instead of {message_id}",
        message["id"]
    );
    ensure!(
        is_str(&message["readBy"][0]["apiId"], &ctx.user2.id),
        "message read by {}, expected {}",
        message["readBy"][0]["apiId"],
        ctx.user2.id
    );

    ctx.ensure_latency("markAsRead", outcome.elapsed_ms)?;
    print_success(&format!("Message '{message_id}' is read by {}", ctx.user2.id));
    Ok(())
}

pub async fn message_delivered(ctx: &TestContext) -> Result<()> {
    let message_id = ctx.send_text_message().await?;
    let conversation = ctx.conversation().await?;
    let subscription = SubscriptionSpec::new(ctx.catalog.subscription("messageDelivered")?);
    let trigger = ctx
        .catalog
        .query("messagesByConversation")?
        .with_variable("conversation_id", conversation.id.as_str());

    print_step("User 1 subscribing to messageDelivered, User 2 fetching the conversation...");
    let outcome = ctx.run_dual(&subscription, &trigger).await?;
    let event = first_event(&outcome)?;

    ensure!(
        is_str(&event.body()["message"]["id"], &message_id),
        "event for message {}, expected {message_id}",
        event.body()["message"]["id"]
    );
    ensure!(
        is_str(&event.body()["recipient"]["apiId"], &ctx.user2.id),
        "event recipient {}, expected {}",
        event.body()["recipient"]["apiId"],
        ctx.user2.id
    );

    let node = edges(outcome.trigger.body())?
        .first()
        .map(|edge| &edge["node"])
        .context("User 2 sees no message in the conversation")?;
    ensure!(
        is_str(&node["id"], &message_id),
        "latest message is {}, expected {message_id}",
        node["id"]
    );
    ensure!(
        is_str(&node["body"], TEXT_MESSAGE),
        "unexpected message body {}",
        node["body"]
    );

    ctx.ensure_latency("messageDelivered", outcome.subscription.elapsed_ms.unwrap_or_default())?;
    info_trigger(&outcome);
    Ok(())
}

pub async fn message_read(ctx: &TestContext) -> Result<()> {
    let message_id = ctx.send_text_message().await?;
    let subscription = SubscriptionSpec::new(ctx.catalog.subscription("messageRead")?);
    let trigger = ctx
        .catalog
        .mutation("markAsRead")?
        .with_variable("message_id", message_id.as_str());

    print_step("User 1 subscribing to messageRead, User 2 marking the message as read...");
    let outcome = ctx.run_dual(&subscription, &trigger).await?;
    let event = first_event(&outcome)?;

    ensure!(
        is_str(&event.body()["message"]["id"], &message_id),
        "event for message {}, expected {message_id}",
        event.body()["message"]["id"]
    );
    ensure!(
        is_str(&event.body()["reader"]["apiId"], &ctx.user2.id),
        "event reader {}, expected {}",
        event.body()["reader"]["apiId"],
        ctx.user2.id
    );

    let message = &outcome.trigger.body()["message"];
    ensure!(
        is_str(&message["id"], &message_id),
        "marked {} instead of {message_id}",
        message["id"]
    );
    ensure!(
        is_str(&message["readBy"][0]["apiId"], &ctx.user2.id),
        "message read by {}, expected {}",
        message["readBy"][0]["apiId"],
        ctx.user2.id
    );

    ctx.ensure_latency("messageRead", outcome.subscription.elapsed_ms.unwrap_or_default())?;
    info_trigger(&outcome);
    Ok(())
}

pub async fn unread_messages(ctx: &TestContext) -> Result<()> {
    let message_id = ctx.send_text_message().await?;
    let conversation = ctx.conversation().await?;
    let operation = ctx
        .catalog
        .query("unreadMessages")?
        .with_variable("conversation_id", conversation.id.as_str());

    print_step("User 2 fetching unread messages...");
    let outcome = ctx.execute(&ctx.user2, &operation).await?;
    print_response("User 2", &outcome);

    let node = edges(outcome.body())?
        .first()
        .map(|edge| &edge["node"])
        .context("User 2 has no unread messages")?;
    ensure!(
        is_str(&node["id"], &message_id),
        "first unread message is {}, expected {message_id}",
        node["id"]
    );
    ensure!(
        is_str(&node["body"], TEXT_MESSAGE),
        "unexpected message body {}",
        node["body"]
    );

    ctx.ensure_latency("unreadMessages", outcome.elapsed_ms)?;
    print_success(&format!("Got unread message: {message_id}"));
    Ok(())
}

/// The single event a dual run waited for, printed along with the trigger's response.
pub(crate) fn first_event(outcome: &DualOutcome) -> Result<&Event> {
    let event = outcome
        .subscription
        .first()
        .context("subscription got no events")?;
    print_event("User 1", event);
    print_response("User 2", &outcome.trigger);
    Ok(event)
}

pub(crate) fn info_trigger(outcome: &DualOutcome) {
    log::info!(
        "'{}' elapsed time: {} ms",
        outcome.trigger.event_name().unwrap_or_default(),
        outcome.trigger.elapsed_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{config_for, mock_operation, mock_schema};
    use mockito::Server;
    use serde_json::json;

    #[tokio::test]
    async fn test_mark_as_read_checks_reader() {
        let mut server = Server::new_async().await;
        let _schema = mock_schema(&mut server).await;
        let ctx = TestContext::new(&config_for(&server)).unwrap();

        let _create = mock_operation(
            &mut server,
            "createConversation",
            json!({ "createConversation": { "conversation": { "id": "c1", "apiId": "api-c1" } } }),
        )
        .await;
        let _send = mock_operation(
            &mut server,
            "sendTextMessage",
            json!({ "sendTextMessage": { "message": { "id": "m1" } } }),
        )
        .await;
        let _mark = mock_operation(
            &mut server,
            "markAsRead",
            json!({ "markAsRead": { "message": { "id": "m1", "readBy": [{ "apiId": ctx.user2.id }] } } }),
        )
        .await;

        mark_as_read(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_unread_messages_requires_the_new_message_first() {
        let mut server = Server::new_async().await;
        let _schema = mock_schema(&mut server).await;
        let ctx = TestContext::new(&config_for(&server)).unwrap();

        let _create = mock_operation(
            &mut server,
            "createConversation",
            json!({ "createConversation": { "conversation": { "id": "c1", "apiId": "api-c1" } } }),
        )
        .await;
        let _send = mock_operation(
            &mut server,
            "sendTextMessage",
            json!({ "sendTextMessage": { "message": { "id": "m2" } } }),
        )
        .await;
        let _unread = mock_operation(
            &mut server,
            "unreadMessages",
            json!({ "unreadMessages": { "edges": [{ "node": { "id": "m1", "body": TEXT_MESSAGE } }] } }),
        )
        .await;

        let err = unread_messages(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("expected m2"));
    }
}
