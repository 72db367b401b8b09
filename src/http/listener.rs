//! HTTP emulation listener: routing, transport cache and correlation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::transport::Transport;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::auth::HttpCredentials;
use super::pump::{run_output_pump, PendingResponses};
use super::transport::ServerHttpTransport;
use super::{command_status, notification_status, reason_to_status};
use crate::config::ListenerConfig;
use crate::envelope::{
    Command, CommandMethod, Document, DocumentRegistry, Envelope, Identity, MediaType, Message,
    Notification, NotificationEvent, Reason,
};
use crate::error::{LimeError, Result};
use crate::storage::{EnvelopeStorage, InMemoryEnvelopeStorage};

const ACCEPT_QUEUE_CAPACITY: usize = 32;

/// Translates HTTP requests into LIME envelopes over cached per-client
/// transports.
///
/// The listener produces an axum [`Router`] for the hosting process to
/// serve; newly created transports are handed to the host through
/// [`accept_transport`](Self::accept_transport) so it can establish a
/// session over each one.
pub struct HttpTransportListener {
    inner: Arc<ListenerInner>,
    accept_rx: Mutex<mpsc::Receiver<Arc<ServerHttpTransport>>>,
}

pub(crate) struct ListenerInner {
    config: ListenerConfig,
    transports: std::sync::Mutex<HashMap<String, Arc<ServerHttpTransport>>>,
    pending: Arc<PendingResponses>,
    message_storage: Arc<dyn EnvelopeStorage>,
    notification_storage: Arc<dyn EnvelopeStorage>,
    documents: DocumentRegistry,
    accept_tx: mpsc::Sender<Arc<ServerHttpTransport>>,
}

impl HttpTransportListener {
    /// Create a listener with in-memory storages.
    pub fn new(config: ListenerConfig) -> Self {
        Self::with_storages(
            config,
            Arc::new(InMemoryEnvelopeStorage::new()),
            Arc::new(InMemoryEnvelopeStorage::new()),
        )
    }

    /// Create a listener with the given message and notification storages.
    pub fn with_storages(
        config: ListenerConfig,
        message_storage: Arc<dyn EnvelopeStorage>,
        notification_storage: Arc<dyn EnvelopeStorage>,
    ) -> Self {
        Self::with_document_registry(
            config,
            message_storage,
            notification_storage,
            DocumentRegistry::new(),
        )
    }

    /// Create a listener validating content against a custom document
    /// registry.
    pub fn with_document_registry(
        config: ListenerConfig,
        message_storage: Arc<dyn EnvelopeStorage>,
        notification_storage: Arc<dyn EnvelopeStorage>,
        documents: DocumentRegistry,
    ) -> Self {
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_CAPACITY);
        Self {
            inner: Arc::new(ListenerInner {
                config,
                transports: std::sync::Mutex::new(HashMap::new()),
                pending: Arc::new(PendingResponses::default()),
                message_storage,
                notification_storage,
                documents,
                accept_tx,
            }),
            accept_rx: Mutex::new(accept_rx),
        }
    }

    /// The message storage backing `/storage/messages/`.
    pub fn message_storage(&self) -> Arc<dyn EnvelopeStorage> {
        self.inner.message_storage.clone()
    }

    /// The notification storage backing `/storage/notifications/`.
    pub fn notification_storage(&self) -> Arc<dyn EnvelopeStorage> {
        self.inner.notification_storage.clone()
    }

    /// Await the next transport created for a new client, so a session can
    /// be established over it.
    pub async fn accept_transport(&self) -> Result<Arc<ServerHttpTransport>> {
        let mut accept_rx = self.accept_rx.lock().await;
        accept_rx.recv().await.ok_or(LimeError::Closed)
    }

    /// The router exposing the HTTP emulation surface.
    pub fn router(&self) -> Router {
        let messages = get(get_message).post(post_message);
        let stored_messages = get(get_stored_messages);
        let stored_notifications = get(get_stored_notifications);
        let notifications = post(post_notification);
        let commands = get(get_command).post(post_command).delete(delete_command);

        Router::new()
            .route("/messages", messages.clone())
            .route("/messages/", messages)
            .route("/storage/messages", stored_messages.clone())
            .route("/storage/messages/", stored_messages)
            .route("/storage/messages/{id}", delete(delete_stored_message))
            .route("/storage/notifications", stored_notifications.clone())
            .route("/storage/notifications/", stored_notifications)
            .route("/notifications", notifications.clone())
            .route("/notifications/", notifications)
            .route("/commands/{*resource}", commands)
            .layer(DefaultBodyLimit::max(self.inner.config.max_body_size))
            .with_state(self.inner.clone())
    }
}

/// A transport that finished establishing, ready to carry envelopes for
/// the request.
struct RequestContext {
    transport: Arc<ServerHttpTransport>,
    session_id: Uuid,
    deadline: Instant,
}

impl RequestContext {
    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Authenticate the request and resolve its transport, establishing a
/// session for first-time clients.
async fn acquire(
    inner: &Arc<ListenerInner>,
    headers: &HeaderMap,
) -> std::result::Result<RequestContext, Response> {
    let deadline = Instant::now() + inner.config.request_timeout();

    let credentials = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(unauthorized)
        .and_then(|value| HttpCredentials::from_header(value).map_err(|_| unauthorized()))?;

    let key = credentials.transport_key();
    let (transport, created) = {
        let mut transports = inner.transports.lock().expect("transports lock");
        match transports.get(&key) {
            Some(transport) if transport.is_connected() => (transport.clone(), false),
            _ => {
                let transport =
                    Arc::new(ServerHttpTransport::new(&credentials, &inner.config.domain));
                transports.insert(key.clone(), transport.clone());
                (transport, true)
            }
        }
    };

    if created {
        tokio::spawn(run_output_pump(
            transport.clone(),
            inner.pending.clone(),
            inner.message_storage.clone(),
            inner.notification_storage.clone(),
        ));
        spawn_eviction(inner, key, transport.clone());
        if inner.accept_tx.send(transport.clone()).await.is_err() {
            return Err(inner.internal_error(&LimeError::Closed));
        }
    }

    match transport
        .wait_established(deadline.saturating_duration_since(Instant::now()))
        .await
    {
        Ok(session_id) => Ok(RequestContext {
            transport,
            session_id,
            deadline,
        }),
        Err(LimeError::Timeout(_)) => {
            let _ = transport.close().await;
            Err(StatusCode::REQUEST_TIMEOUT.into_response())
        }
        Err(LimeError::SessionFailed(reason)) => Err(reason_response(&reason)),
        Err(error) => Err(inner.internal_error(&error)),
    }
}

/// Remove the transport from the cache when it closes. The removal is
/// keyed by instance, so a transport recreated under the same key is
/// never evicted by a stale closing signal.
fn spawn_eviction(inner: &Arc<ListenerInner>, key: String, transport: Arc<ServerHttpTransport>) {
    let inner = inner.clone();
    let mut closed = transport.closed_signal();
    tokio::spawn(async move {
        if closed.wait_for(|closed| *closed).await.is_err() {
            return;
        }
        let mut transports = inner.transports.lock().expect("transports lock");
        if transports
            .get(&key)
            .is_some_and(|cached| Arc::ptr_eq(cached, &transport))
        {
            transports.remove(&key);
            tracing::debug!("Evicted a closed transport");
        }
    });
}

impl ListenerInner {
    fn internal_error(&self, error: &LimeError) -> Response {
        tracing::warn!("Request failed: {error}");
        if self.config.write_exceptions_to_output {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        } else {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Basic realm=\"lime\"")],
    )
        .into_response()
}

fn reason_response(reason: &Reason) -> Response {
    let status = reason_to_status(reason);
    match &reason.description {
        Some(description) => (status, description.clone()).into_response(),
        None => status.into_response(),
    }
}

fn with_session_id(session_id: Uuid, response: Response) -> Response {
    let mut response = response;
    if let Ok(value) = session_id.to_string().parse() {
        response.headers_mut().insert("X-Session-Id", value);
    }
    response
}

fn bad_request(description: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, description.into()).into_response()
}

fn parse_id(params: &HashMap<String, String>) -> std::result::Result<Option<Uuid>, Response> {
    match params.get("id") {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| bad_request(format!("Invalid envelope id: {raw}"))),
    }
}

/// Oldest stored envelope for the identity, removed from the store.
async fn dequeue_oldest(
    storage: &Arc<dyn EnvelopeStorage>,
    identity: &Identity,
) -> Option<Envelope> {
    loop {
        let id = *storage.get_ids(identity).await.first()?;
        let envelope = storage.get(identity, id).await;
        // The delete arbitrates between concurrent consumers; the loser
        // moves on to the next id.
        if storage.delete(identity, id).await {
            if let Some(envelope) = envelope {
                return Some(envelope);
            }
        }
    }
}

// === Message handlers ===

/// `GET /messages/`: dequeue one stored message for the authenticated
/// identity. 204 when the queue is empty.
async fn get_message(State(inner): State<Arc<ListenerInner>>, headers: HeaderMap) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    let identity = context.transport.node().identity();
    let response = match dequeue_oldest(&inner.message_storage, &identity).await {
        Some(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    with_session_id(context.session_id, response)
}

/// `POST /messages/`: send a message through the channel. Without an `id`
/// query parameter the send is fire-and-forget (202); with one, the
/// response is derived from the correlated notification.
async fn post_message(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };

    let id = match parse_id(&params) {
        Ok(id) => id,
        Err(response) => return with_session_id(context.session_id, response),
    };
    let mut message: Message = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(error) => {
            return with_session_id(context.session_id, bad_request(error.to_string()))
        }
    };
    if message.to.is_none() {
        return with_session_id(
            context.session_id,
            bad_request("The message has no destination"),
        );
    }
    if let Err(error) = inner
        .documents
        .create(&message.media_type, message.content.clone())
    {
        return with_session_id(context.session_id, bad_request(error.to_string()));
    }
    message.id = id;
    message.from = Some(context.transport.node().clone());

    let Some(id) = id else {
        // Fire-and-forget
        let response = match context.transport.submit(message.into()).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(error) => inner.internal_error(&error),
        };
        return with_session_id(context.session_id, response);
    };

    let Some(receiver) = inner.pending.insert(id) else {
        return with_session_id(
            context.session_id,
            StatusCode::CONFLICT.into_response(),
        );
    };
    if let Err(error) = context.transport.submit(message.into()).await {
        inner.pending.remove(id);
        return with_session_id(context.session_id, inner.internal_error(&error));
    }

    let response = match tokio::time::timeout(context.remaining(), receiver).await {
        Ok(Ok(Envelope::Notification(notification))) => notification_status(&notification)
            .map(|status| match &notification.reason {
                Some(reason) if status.is_client_error() || status.is_server_error() => {
                    reason_response(reason)
                }
                _ => status.into_response(),
            })
            .unwrap_or_else(|| StatusCode::OK.into_response()),
        Ok(Ok(_)) | Ok(Err(_)) => inner.internal_error(&LimeError::Closed),
        Err(_) => {
            inner.pending.remove(id);
            let _ = context.transport.close().await;
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    };
    with_session_id(context.session_id, response)
}

// === Storage handlers ===

/// `GET /storage/messages/`: list the stored messages for the identity.
/// 204 when the queue is empty.
async fn get_stored_messages(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    let identity = context.transport.node().identity();
    let ids = inner.message_storage.get_ids(&identity).await;
    let mut envelopes = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(envelope) = inner.message_storage.get(&identity, id).await {
            envelopes.push(envelope);
        }
    }
    let response = if envelopes.is_empty() {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::OK, Json(envelopes)).into_response()
    };
    with_session_id(context.session_id, response)
}

/// `DELETE /storage/messages/{id}`: remove one stored message.
async fn delete_stored_message(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    let identity = context.transport.node().identity();
    let response = if inner.message_storage.delete(&identity, id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    };
    with_session_id(context.session_id, response)
}

/// `GET /storage/notifications/`: dequeue one stored notification.
/// 204 when the queue is empty.
async fn get_stored_notifications(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    let identity = context.transport.node().identity();
    let response = match dequeue_oldest(&inner.notification_storage, &identity).await {
        Some(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    with_session_id(context.session_id, response)
}

// === Notification handlers ===

#[derive(serde::Deserialize)]
struct NotificationBody {
    event: NotificationEvent,
    #[serde(default)]
    reason: Option<Reason>,
}

/// `POST /notifications/?id={guid}`: inject a notification toward the
/// channel for a previously received message.
async fn post_notification(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    let id = match parse_id(&params) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return with_session_id(
                context.session_id,
                bad_request("The notification id is required"),
            )
        }
        Err(response) => return with_session_id(context.session_id, response),
    };
    let body: NotificationBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(error) => {
            return with_session_id(context.session_id, bad_request(error.to_string()))
        }
    };

    let mut notification = Notification::new(id, body.event);
    notification.reason = body.reason;
    notification.from = Some(context.transport.node().clone());

    let response = match context.transport.submit(notification.into()).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(error) => inner.internal_error(&error),
    };
    with_session_id(context.session_id, response)
}

// === Command handlers ===

async fn get_command(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Path(resource): Path<String>,
) -> Response {
    execute_command(inner, headers, CommandMethod::Get, resource, None).await
}

async fn post_command(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Path(resource): Path<String>,
    body: Bytes,
) -> Response {
    let media_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(MediaType::json);
    let resource_data = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(error) => return bad_request(error.to_string()),
    };
    let document = match inner.documents.create(&media_type, resource_data) {
        Ok(document) => document,
        Err(error) => return bad_request(error.to_string()),
    };
    execute_command(inner, headers, CommandMethod::Set, resource, Some(document)).await
}

async fn delete_command(
    State(inner): State<Arc<ListenerInner>>,
    headers: HeaderMap,
    Path(resource): Path<String>,
) -> Response {
    execute_command(inner, headers, CommandMethod::Delete, resource, None).await
}

/// `GET|POST|DELETE /commands/{resource}/`: translate the request into a
/// command envelope and synchronously await the correlated response.
async fn execute_command(
    inner: Arc<ListenerInner>,
    headers: HeaderMap,
    method: CommandMethod,
    resource: String,
    document: Option<Document>,
) -> Response {
    let context = match acquire(&inner, &headers).await {
        Ok(context) => context,
        Err(response) => return response,
    };

    let uri = format!("/{}", resource.trim_matches('/'));
    let mut command = Command::new(method, uri);
    command.from = Some(context.transport.node().clone());
    if let Some(document) = document {
        command = command.with_resource(document);
    }
    let id = command.id.expect("requests carry an id");

    let Some(receiver) = inner.pending.insert(id) else {
        return with_session_id(context.session_id, StatusCode::CONFLICT.into_response());
    };
    if let Err(error) = context.transport.submit(command.into()).await {
        inner.pending.remove(id);
        return with_session_id(context.session_id, inner.internal_error(&error));
    }

    let response = match tokio::time::timeout(context.remaining(), receiver).await {
        Ok(Ok(Envelope::Command(response))) => command_response(&response),
        Ok(Ok(_)) | Ok(Err(_)) => inner.internal_error(&LimeError::Closed),
        Err(_) => {
            inner.pending.remove(id);
            let _ = context.transport.close().await;
            StatusCode::REQUEST_TIMEOUT.into_response()
        }
    };
    with_session_id(context.session_id, response)
}

fn command_response(command: &Command) -> Response {
    let Some(status) = command_status(command) else {
        return StatusCode::OK.into_response();
    };
    if status.is_client_error() || status.is_server_error() {
        return match &command.reason {
            Some(reason) => reason_response(reason),
            None => status.into_response(),
        };
    }
    match command.resource_document() {
        Some(document) => {
            let body = document.data.to_string();
            (
                status,
                [(CONTENT_TYPE, document.media_type.to_string())],
                body,
            )
                .into_response()
        }
        None => status.into_response(),
    }
}
