//! In-process GraphQL over WebSocket server for integration tests.
//!
//! Speaks both `graphql-ws` and `graphql-transport-ws`, answering with the
//! flavour the client asked for during the upgrade. Queries and mutations get
//! the configured result for their root field, `{ "id": "mock" }` by default.
//! Subscription events come from [`MockServer::publish`] or, when configured,
//! from every query and mutation other than introspection.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use harness::{Operation, OperationKind};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default)]
pub struct Behavior {
    /// Data published to subscribers each time a query or mutation is executed.
    pub publish_on_trigger: Option<Value>,
    /// Copies of `publish_on_trigger` sent per trigger.
    pub events_per_trigger: usize,
    /// Completes a subscription after this many events.
    pub complete_after: Option<usize>,
    /// Drops the connection without a close frame after this many events.
    pub hang_up_after: Option<usize>,
    /// Answers `connection_init` with `connection_error`.
    pub reject_init: bool,
    /// Refuses the upgrade with this HTTP status.
    pub reject_upgrade: Option<u16>,
    /// Acknowledges the connection but never answers an operation.
    pub ignore_operations: bool,
    /// Result per root field of queries and mutations.
    pub responses: BTreeMap<String, Value>,
}

impl Behavior {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn publishing(data: Value) -> Self {
        Self {
            publish_on_trigger: Some(data),
            events_per_trigger: 1,
            ..Self::default()
        }
    }

    pub fn responding(mut self, root_field: &str, data: Value) -> Self {
        self.responses.insert(root_field.to_string(), data);
        self
    }
}

struct State {
    behavior: Mutex<Behavior>,
    events: broadcast::Sender<Value>,
    open_connections: AtomicUsize,
    subscribers: AtomicUsize,
    stops: AtomicUsize,
    init_payloads: Mutex<Vec<Value>>,
    upgrade_headers: Mutex<Vec<BTreeMap<String, String>>>,
}

pub struct MockServer {
    pub url: String,
    state: Arc<State>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events, _) = broadcast::channel(64);

        let state = Arc::new(State {
            behavior: Mutex::new(behavior),
            events,
            open_connections: AtomicUsize::new(0),
            subscribers: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            init_payloads: Mutex::new(Vec::new()),
            upgrade_headers: Mutex::new(Vec::new()),
        });

        let handle = tokio::spawn(accept_loop(listener, state.clone()));

        Self {
            url: format!("ws://{addr}/graphql-ws"),
            state,
            handle,
        }
    }

    /// Applies to connections accepted from now on.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// Sends `data` to every active subscription.
    pub fn publish(&self, data: Value) {
        let _ = self.state.events.send(data);
    }

    pub fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn init_payloads(&self) -> Vec<Value> {
        self.state.init_payloads.lock().unwrap().clone()
    }

    pub fn upgrade_headers(&self) -> Vec<BTreeMap<String, String>> {
        self.state.upgrade_headers.lock().unwrap().clone()
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        self.wait_until(|state| state.subscribers.load(Ordering::SeqCst) >= count)
            .await;
    }

    pub async fn wait_for_stops(&self, count: usize) {
        self.wait_until(|state| state.stops.load(Ordering::SeqCst) >= count)
            .await;
    }

    pub async fn wait_until_idle(&self) {
        self.wait_until(|state| state.open_connections.load(Ordering::SeqCst) == 0)
            .await;
    }

    async fn wait_until(&self, condition: impl Fn(&State) -> bool) {
        let start = Instant::now();
        while !condition(&self.state) {
            assert!(start.elapsed() < WAIT_LIMIT, "mock server condition not reached");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Address nothing listens on.
pub async fn unused_ws_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/graphql-ws")
}

async fn accept_loop(listener: TcpListener, state: Arc<State>) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(handle_connection(stream, state.clone()));
    }
}

struct ActiveSubscription {
    id: String,
    events: broadcast::Receiver<Value>,
    sent: usize,
}

async fn handle_connection(stream: TcpStream, state: Arc<State>) {
    let requested = Arc::new(Mutex::new(None::<String>));
    let requested_for_callback = requested.clone();
    let state_for_callback = state.clone();
    let behavior = state.behavior.lock().unwrap().clone();
    let reject_upgrade = behavior.reject_upgrade;

    let ws = tokio_tungstenite::accept_hdr_async(stream, move |request: &Request, mut response: Response| {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect::<BTreeMap<_, _>>();

        // The client refuses the upgrade unless its sub-protocol is echoed back
        if let Some(protocol) = headers.get("sec-websocket-protocol").cloned() {
            if let Ok(value) = HeaderValue::from_str(&protocol) {
                response.headers_mut().insert("sec-websocket-protocol", value);
            }
            *requested_for_callback.lock().unwrap() = Some(protocol);
        }
        state_for_callback.upgrade_headers.lock().unwrap().push(headers);

        if let Some(status) = reject_upgrade {
            let mut rejection = ErrorResponse::new(Some("Unauthorized".to_string()));
            *rejection.status_mut() = StatusCode::from_u16(status).unwrap();
            return Err(rejection);
        }
        Ok(response)
    })
    .await;

    let Ok(mut ws) = ws else {
        return;
    };

    let transport_ws = requested.lock().unwrap().as_deref() == Some("graphql-transport-ws");
    state.open_connections.fetch_add(1, Ordering::SeqCst);
    serve(&mut ws, &state, &behavior, transport_ws).await;
    state.open_connections.fetch_sub(1, Ordering::SeqCst);
}

async fn serve(ws: &mut WebSocketStream<TcpStream>, state: &State, behavior: &Behavior, transport_ws: bool) {
    let data_type = if transport_ws { "next" } else { "data" };
    let mut subscription: Option<ActiveSubscription> = None;

    loop {
        tokio::select! {
            incoming = ws.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };
                let message: Value = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(_) => continue,
                };

                match message["type"].as_str().unwrap_or_default() {
                    "connection_init" => {
                        state.init_payloads.lock().unwrap().push(message["payload"].clone());
                        if behavior.reject_init {
                            send(ws, json!({ "type": "connection_error", "payload": { "message": "Unauthorized" } })).await;
                            return;
                        }
                        send(ws, json!({ "type": "connection_ack" })).await;
                        if !transport_ws {
                            send(ws, json!({ "type": "ka" })).await;
                        }
                    }
                    "start" | "subscribe" if behavior.ignore_operations => {}
                    "start" | "subscribe" => {
                        let id = message["id"].as_str().unwrap_or_default().to_string();
                        let query = message["payload"]["query"].as_str().unwrap_or_default();
                        let Ok(operation) = Operation::parse(query) else {
                            send(ws, json!({ "id": id, "type": "error", "payload": [{ "message": "parse error" }] })).await;
                            continue;
                        };

                        if operation.kind() == OperationKind::Subscription {
                            subscription = Some(ActiveSubscription {
                                id,
                                events: state.events.subscribe(),
                                sent: 0,
                            });
                            state.subscribers.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }

                        let introspection = operation.root_fields().iter().any(|field| field == "__schema");
                        let data = if introspection {
                            introspection_data()
                        } else {
                            let root = operation.root_fields().first().cloned().unwrap_or_default();
                            let result = behavior.responses.get(&root).cloned().unwrap_or_else(|| json!({ "id": "mock" }));
                            let mut data = serde_json::Map::new();
                            data.insert(root, result);
                            Value::Object(data)
                        };
                        send(ws, json!({ "id": id, "type": data_type, "payload": { "data": data } })).await;
                        send(ws, json!({ "id": id, "type": "complete" })).await;

                        if !introspection {
                            if let Some(event) = &behavior.publish_on_trigger {
                                for _ in 0..behavior.events_per_trigger {
                                    let _ = state.events.send(event.clone());
                                }
                            }
                        }
                    }
                    "stop" | "complete" => {
                        state.stops.fetch_add(1, Ordering::SeqCst);
                        subscription = None;
                    }
                    "connection_terminate" => return,
                    _ => {}
                }
            }
            event = next_event(&mut subscription) => {
                let Some(active) = subscription.as_mut() else { continue };
                active.sent += 1;
                let id = active.id.clone();
                let done = behavior.complete_after.is_some_and(|limit| active.sent >= limit);

                send(ws, json!({ "id": id, "type": data_type, "payload": { "data": event } })).await;
                if behavior.hang_up_after.is_some_and(|limit| active.sent >= limit) {
                    return;
                }
                if done {
                    send(ws, json!({ "id": id, "type": "complete" })).await;
                    subscription = None;
                }
            }
        }
    }
}

async fn next_event(subscription: &mut Option<ActiveSubscription>) -> Value {
    match subscription {
        Some(active) => loop {
            match active.events.recv().await {
                Ok(event) => return event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
            }
        },
        None => std::future::pending().await,
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, message: Value) {
    let _ = ws.send(Message::text(message.to_string())).await;
}

fn introspection_data() -> Value {
    json!({ "__schema": {
        "queryType": { "name": "Query" },
        "mutationType": { "name": "Mutation" },
        "subscriptionType": { "name": "Subscription" },
        "types": [
            { "name": "Query", "fields": [{ "name": "userMeta" }, { "name": "messagesByConversation" }] },
            { "name": "Mutation", "fields": [{ "name": "markAsRead" }, { "name": "lastSeen" }] },
            { "name": "Subscription", "fields": [
                { "name": "messageRead" }, { "name": "messageDelivered" }, { "name": "userOnline" }
            ] }
        ]
    } })
}
