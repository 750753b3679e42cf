//! Authenticated GraphQL sessions over WebSocket.
//!
//! A session is one WebSocket connection speaking either the legacy Apollo
//! `graphql-ws` sub-protocol or `graphql-transport-ws`. It is owned by exactly
//! one task at a time; every method takes `&mut self`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use futures_util::{stream, SinkExt, Stream, StreamExt};
use log::*;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::Principal;
use crate::error::{
    protocol_error, server_error, Error, ErrorKind, ProtocolErrorKind, ServerErrorKind,
    TransportErrorKind,
};
use crate::operation::{Operation, OperationKind};
use crate::outcome::{round_millis, RequestOutcome};
use crate::response::{error_messages, into_data};
use crate::schema::Schema;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WsProtocol {
    /// Legacy Apollo `subscriptions-transport-ws`.
    GraphqlWs,
    GraphqlTransportWs,
}

#[derive(Debug, PartialEq, Eq)]
pub struct WsProtocolParseError;

impl FromStr for WsProtocol {
    type Err = WsProtocolParseError;
    fn from_str(protocol: &str) -> Result<WsProtocol, Self::Err> {
        match protocol {
            "graphql-ws" => Ok(WsProtocol::GraphqlWs),
            "graphql-transport-ws" => Ok(WsProtocol::GraphqlTransportWs),
            _ => Err(WsProtocolParseError),
        }
    }
}

impl fmt::Display for WsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.subprotocol())
    }
}

impl WsProtocol {
    pub fn subprotocol(&self) -> &'static str {
        match self {
            WsProtocol::GraphqlWs => "graphql-ws",
            WsProtocol::GraphqlTransportWs => "graphql-transport-ws",
        }
    }

    fn start_type(&self) -> &'static str {
        match self {
            WsProtocol::GraphqlWs => "start",
            WsProtocol::GraphqlTransportWs => "subscribe",
        }
    }

    fn stop_type(&self) -> &'static str {
        match self {
            WsProtocol::GraphqlWs => "stop",
            WsProtocol::GraphqlTransportWs => "complete",
        }
    }
}

/// Messages a server may send, across both sub-protocols.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "ka")]
    KeepAlive,
    Ping,
    Pong,
    #[serde(alias = "next")]
    Data { id: String, payload: Value },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete { id: String },
    #[serde(other)]
    Unknown,
}

/// Where sessions connect and how they authenticate.
#[derive(Clone, Debug)]
pub struct SessionTarget {
    pub endpoint: String,
    /// Headers sent on the upgrade request and in the `connection_init` payload.
    pub headers: BTreeMap<String, String>,
    pub protocol: WsProtocol,
    pub introspection: bool,
    /// Bound on each setup step: the upgrade, the `connection_ack` and the introspection result.
    pub handshake_timeout: Duration,
}

impl SessionTarget {
    pub fn new(endpoint: impl Into<String>, headers: BTreeMap<String, String>, protocol: WsProtocol) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers,
            protocol,
            introspection: true,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_introspection(mut self, enabled: bool) -> Self {
        self.introspection = enabled;
        self
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }
}

pub struct Session {
    label: String,
    protocol: WsProtocol,
    stream: Option<WsStream>,
    next_id: u64,
    subscriptions: Vec<String>,
    schema: Option<Schema>,
}

impl Session {
    /// Connects, authenticates as `principal` and waits for the server's acknowledgment.
    pub async fn open(target: &SessionTarget, principal: &Principal, label: &str) -> Result<Self, Error> {
        let headers = principal.authorized_headers(&target.headers);

        let mut request = target.endpoint.as_str().into_client_request()?;
        let request_headers = request.headers_mut();
        request_headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(target.protocol.subprotocol()),
        );
        for (name, value) in &headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| protocol_error(ProtocolErrorKind::InvalidHeader, name))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| protocol_error(ProtocolErrorKind::InvalidHeader, value))?;
            request_headers.insert(name, value);
        }

        debug!("[{label}] connecting to {}", target.endpoint);
        let limit = target.handshake_timeout;
        let (stream, _) = within(limit, "upgrade response", async {
            Ok(connect_async(request).await?)
        })
        .await?;

        let mut session = Session {
            label: label.to_string(),
            protocol: target.protocol,
            stream: Some(stream),
            next_id: 0,
            subscriptions: Vec::new(),
            schema: None,
        };

        session
            .send(json!({ "type": "connection_init", "payload": headers }))
            .await?;
        within(limit, "connection_ack", session.await_ack()).await?;

        if target.introspection {
            let introspection = Schema::introspection_operation()?;
            let data =
                within(limit, "introspection result", session.request(&introspection)).await?;
            session.schema = Some(Schema::from_introspection(data)?);
        }

        info!("[{label}] session open on {}", target.endpoint);
        Ok(session)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Executes a query or mutation and waits for its single result.
    pub async fn execute(&mut self, operation: &Operation) -> Result<RequestOutcome, Error> {
        self.validate(operation)?;

        let start = Instant::now();
        let response = self.request(operation).await?;
        let elapsed_ms = round_millis(start.elapsed());

        Ok(RequestOutcome {
            response,
            elapsed_ms,
        })
    }

    /// Subscribes lazily: nothing is sent until the returned stream is first polled.
    ///
    /// The stream yields the `data` of every result and ends when the server
    /// completes the subscription. An error ends it as well, after being yielded.
    pub fn subscribe<'a>(
        &'a mut self,
        operation: &'a Operation,
    ) -> impl Stream<Item = Result<serde_json::Value, Error>> + 'a {
        enum State {
            Idle,
            Active(String),
            Done,
        }

        stream::unfold((self, State::Idle), move |(session, state)| async move {
            let id = match state {
                State::Done => return None,
                State::Active(id) => id,
                State::Idle => {
                    let started = match session.validate(operation) {
                        Ok(()) => session.start(operation).await,
                        Err(err) => Err(err),
                    };
                    match started {
                        Ok(id) => id,
                        Err(err) => return Some((Err(err), (session, State::Done))),
                    }
                }
            };

            loop {
                match session.recv().await {
                    Ok(ServerMessage::Data { id: msg_id, payload }) if msg_id == id => {
                        return Some((into_data(payload), (session, State::Active(id))));
                    }
                    Ok(ServerMessage::Error { id: msg_id, payload }) if msg_id == id => {
                        session.forget(&id);
                        let err = server_error(ServerErrorKind::GraphQl, &error_messages(&payload));
                        return Some((Err(err), (session, State::Done)));
                    }
                    Ok(ServerMessage::Complete { id: msg_id }) if msg_id == id => {
                        session.forget(&id);
                        return None;
                    }
                    Ok(other) => trace!("[{}] skipping {other:?}", session.label),
                    Err(err) => return Some((Err(err), (session, State::Done))),
                }
            }
        })
    }

    /// Asks the server to stop every subscription still running on this session.
    pub async fn stop_subscriptions(&mut self) -> Result<(), Error> {
        for id in std::mem::take(&mut self.subscriptions) {
            debug!("[{}] stopping subscription {id}", self.label);
            self.send(json!({ "id": id, "type": self.protocol.stop_type() }))
                .await?;
        }
        Ok(())
    }

    /// Closes the connection. Closing an already closed session does nothing.
    pub async fn close(&mut self) -> Result<(), Error> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.subscriptions.clear();
        debug!("[{}] closing session", self.label);

        if self.protocol == WsProtocol::GraphqlWs {
            let terminate = Message::text(json!({ "type": "connection_terminate" }).to_string());
            if let Err(err) = stream.send(terminate).await {
                return ignore_closed(err);
            }
        }
        match stream.close(None).await {
            Ok(()) => Ok(()),
            Err(err) => ignore_closed(err),
        }
    }

    fn validate(&self, operation: &Operation) -> Result<(), Error> {
        match &self.schema {
            Some(schema) => schema.validate(operation),
            None => Ok(()),
        }
    }

    async fn start(&mut self, operation: &Operation) -> Result<String, Error> {
        self.next_id += 1;
        let id = self.next_id.to_string();

        self.send(json!({
            "id": id,
            "type": self.protocol.start_type(),
            "payload": operation.request_body(),
        }))
        .await?;

        if operation.kind() == OperationKind::Subscription {
            self.subscriptions.push(id.clone());
        }
        debug!("[{}] started '{}' as {id}", self.label, operation.name());
        Ok(id)
    }

    fn forget(&mut self, id: &str) {
        self.subscriptions.retain(|active| active != id);
    }

    async fn request(&mut self, operation: &Operation) -> Result<serde_json::Value, Error> {
        let id = self.start(operation).await?;

        loop {
            match self.recv().await? {
                ServerMessage::Data { id: msg_id, payload } if msg_id == id => {
                    return into_data(payload);
                }
                ServerMessage::Error { id: msg_id, payload } if msg_id == id => {
                    return Err(server_error(ServerErrorKind::GraphQl, &error_messages(&payload)));
                }
                ServerMessage::Complete { id: msg_id } if msg_id == id => {
                    return Err(server_error(
                        ServerErrorKind::MissingData,
                        &format!("'{}' completed without a result", operation.name()),
                    ));
                }
                other => trace!("[{}] skipping {other:?}", self.label),
            }
        }
    }

    async fn await_ack(&mut self) -> Result<(), Error> {
        loop {
            match self.recv().await? {
                ServerMessage::ConnectionAck => return Ok(()),
                ServerMessage::ConnectionError { payload } => {
                    return Err(protocol_error(
                        ProtocolErrorKind::ConnectionRejected,
                        &error_messages(&payload),
                    ));
                }
                ServerMessage::KeepAlive | ServerMessage::Pong | ServerMessage::Unknown => {}
                other => {
                    return Err(protocol_error(
                        ProtocolErrorKind::UnexpectedMessage,
                        &format!("{other:?} before connection_ack"),
                    ));
                }
            }
        }
    }

    async fn send(&mut self, message: serde_json::Value) -> Result<(), Error> {
        let stream = self.stream.as_mut().ok_or_else(closed_error)?;
        stream.send(Message::text(message.to_string())).await?;
        Ok(())
    }

    /// Next protocol message, answering pings on the way.
    async fn recv(&mut self) -> Result<ServerMessage, Error> {
        let stream = self.stream.as_mut().ok_or_else(closed_error)?;

        loop {
            let frame = stream.next().await.ok_or_else(|| {
                Error::new(
                    ErrorKind::Transport(TransportErrorKind::Closed),
                    "server ended the stream",
                )
            })??;

            match frame {
                Message::Text(text) => match serde_json::from_str(&text)? {
                    ServerMessage::Ping => {
                        if self.protocol == WsProtocol::GraphqlTransportWs {
                            let pong = json!({ "type": "pong" }).to_string();
                            stream.send(Message::text(pong)).await?;
                        }
                    }
                    message => return Ok(message),
                },
                Message::Close(frame) => {
                    return Err(Error::new(
                        ErrorKind::Transport(TransportErrorKind::Closed),
                        format!("server closed the connection: {frame:?}"),
                    ));
                }
                _ => {}
            }
        }
    }
}

/// Runs one setup step, failing as a connect error once `limit` has passed.
async fn within<T>(
    limit: Duration,
    step: &str,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    timeout(limit, future).await.map_err(|_| {
        Error::new(
            ErrorKind::Transport(TransportErrorKind::Connect),
            format!("no {step} within {limit:?}"),
        )
    })?
}

fn closed_error() -> Error {
    Error::new(
        ErrorKind::Transport(TransportErrorKind::Closed),
        "session is closed",
    )
}

fn ignore_closed(err: tungstenite::Error) -> Result<(), Error> {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Ok(()),
        other => Err(other.into()),
    }
}
