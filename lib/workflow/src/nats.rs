//! NATS request/reply transport.
//!
//! Subjects:
//! - `conduit.task.<service>`: task dispatch to the worker for a service
//! - `conduit.trigger`: trigger ingress into the execution engine
//!
//! Bodies are JSON [`Envelope`]s. Every request is bounded by a timeout.

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::ingress::{TriggerAck, TriggerRequest, TriggerSink};
use crate::step::{TaskDispatcher, TaskRequest, TaskResponse};
use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Subject prefix for task dispatch.
const TASK_SUBJECT_PREFIX: &str = "conduit.task";

/// Subject for trigger ingress.
pub const TRIGGER_SUBJECT: &str = "conduit.trigger";

/// Connects to the NATS server.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(url: &str) -> conduit_core::Result<async_nats::Client, TransportError> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            message: e.to_string(),
        })?;
    Ok(client)
}

fn task_subject(service: &str) -> String {
    format!("{TASK_SUBJECT_PREFIX}.{service}")
}

async fn request<Req, Resp>(
    client: &async_nats::Client,
    subject: String,
    body: Req,
    timeout: Duration,
) -> Result<Resp, TransportError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let bytes = Envelope::new(body).encode()?;
    let reply = tokio::time::timeout(timeout, client.request(subject, bytes.into()))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| match e.kind() {
            RequestErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::RequestFailed {
                message: e.to_string(),
            },
        })?;
    Ok(Envelope::<Resp>::decode(&reply.payload)?.into_payload())
}

/// Dispatches tasks to workers listening on `conduit.task.<service>`.
pub struct NatsTaskDispatcher {
    client: async_nats::Client,
    timeout: Duration,
}

impl NatsTaskDispatcher {
    #[must_use]
    pub fn new(client: async_nats::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl TaskDispatcher for NatsTaskDispatcher {
    async fn dispatch(
        &self,
        service: &str,
        request_body: TaskRequest,
    ) -> Result<TaskResponse, TransportError> {
        request(
            &self.client,
            task_subject(service),
            request_body,
            self.timeout,
        )
        .await
    }
}

/// Sends trigger requests to a remote ingress on `conduit.trigger`.
pub struct NatsTriggerClient {
    client: async_nats::Client,
    timeout: Duration,
}

impl NatsTriggerClient {
    #[must_use]
    pub fn new(client: async_nats::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl TriggerSink for NatsTriggerClient {
    async fn trigger(&self, request_body: TriggerRequest) -> Result<TriggerAck, TransportError> {
        request(
            &self.client,
            TRIGGER_SUBJECT.to_string(),
            request_body,
            self.timeout,
        )
        .await
    }
}

/// Answers trigger requests on `conduit.trigger` until `shutdown` resolves.
///
/// Malformed requests are answered with a rejected ack.
///
/// # Errors
///
/// Returns an error if the subscription cannot be created.
pub async fn serve_triggers(
    client: async_nats::Client,
    sink: Arc<dyn TriggerSink>,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), TransportError> {
    let mut subscriber =
        client
            .subscribe(TRIGGER_SUBJECT)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                message: e.to_string(),
            })?;
    info!(subject = TRIGGER_SUBJECT, "serving trigger requests");

    tokio::pin!(shutdown);
    loop {
        let message = tokio::select! {
            () = &mut shutdown => break,
            message = subscriber.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let Some(reply) = message.reply else {
            warn!("trigger request without reply subject ignored");
            continue;
        };

        let ack = handle_trigger(sink.as_ref(), &message.payload).await;
        match Envelope::new(ack).encode() {
            Ok(bytes) => {
                if let Err(e) = client.publish(reply, bytes.into()).await {
                    warn!(error = %e, "failed to reply to trigger request");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode trigger ack"),
        }
    }

    debug!("trigger server stopped");
    Ok(())
}

async fn handle_trigger(sink: &dyn TriggerSink, body: &[u8]) -> TriggerAck {
    let request = match Envelope::<TriggerRequest>::decode(body) {
        Ok(envelope) => envelope.into_payload(),
        Err(e) => {
            warn!(error = %e, "rejecting malformed trigger request");
            return TriggerAck::rejected();
        }
    };
    match sink.trigger(request).await {
        Ok(ack) => ack,
        Err(e) => {
            warn!(error = %e, "trigger sink failed");
            TriggerAck::rejected()
        }
    }
}
