use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::MerossConfig;

/// How long a request waits for the cloud to answer before giving up
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A push notification delivered by the vendor cloud outside of any
/// request/response the adapter initiated.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub subdevice_id: String,
    pub namespace: String,
    pub payload: serde_json::Value,
}

/// Request method on the vendor envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Set,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Set => "SET",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cloud transport not connected")]
    NotConnected,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("device reported error: {0}")]
    Device(String),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("response channel closed")]
    ChannelClosed,
}

/// Seam to the vendor cloud session.
///
/// Session establishment, authentication, and delivery guarantees live behind
/// this trait; the integration only issues requests against a device and
/// polls for push notifications. The trait also allows mocking the cloud for
/// testing purposes.
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Connect to the vendor cloud broker
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Issue a request against a device and wait for its acknowledgement.
    ///
    /// Resolves with the response payload once the cloud answers, which makes
    /// command completion an explicit future rather than a callback.
    async fn request(
        &mut self,
        uuid: &str,
        namespace: &str,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;

    /// Poll for the next push notification from subscribed devices
    ///
    /// Returns None if the connection is gone.
    async fn poll_push(&mut self) -> Option<PushMessage>;
}

/// Vendor message envelope: a header describing the message and an opaque
/// payload interpreted per namespace.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    header: Header,
    payload: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    message_id: String,
    namespace: String,
    method: String,
    #[serde(default)]
    payload_version: u8,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: u64,
}

type PendingMap =
    Arc<StdMutex<HashMap<String, oneshot::Sender<Result<serde_json::Value, TransportError>>>>>;

/// Real cloud transport over the vendor's MQTT broker, using rumqttc
pub struct MerossMqttTransport {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// Topic the cloud answers our requests on
    response_topic: String,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Push notification receiver (created in connect())
    push_rx: Option<mpsc::UnboundedReceiver<PushMessage>>,

    /// In-flight requests awaiting their acknowledgement, keyed by message id
    pending: PendingMap,

    /// Monotonic source for message ids
    message_counter: AtomicU64,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl MerossMqttTransport {
    /// Create a new transport from configuration
    pub fn new(config: &MerossConfig) -> anyhow::Result<Self> {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_credentials(config.user_id.clone(), config.key.clone());

        Ok(Self {
            mqtt_options,
            response_topic: format!("/app/{}/subscribe", config.user_id),
            client: None,
            push_rx: None,
            pending: Arc::new(StdMutex::new(HashMap::new())),
            message_counter: AtomicU64::new(1),
            event_loop_task: None,
        })
    }

    fn next_message_id(&self) -> String {
        format!(
            "{:032x}",
            self.message_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn complete_request(pending: &PendingMap, envelope: Envelope) {
        let waiter = pending
            .lock()
            .ok()
            .and_then(|mut map| map.remove(&envelope.header.message_id));

        match waiter {
            Some(tx) => {
                let result = if envelope.header.method == "ERROR" {
                    Err(TransportError::Device(envelope.payload.to_string()))
                } else {
                    Ok(envelope.payload)
                };
                // Requester may have timed out already
                let _ = tx.send(result);
            }
            None => {
                tracing::debug!(
                    "Unmatched response {} on {}",
                    envelope.header.message_id,
                    envelope.header.namespace
                );
            }
        }
    }
}

#[async_trait]
impl CloudTransport for MerossMqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        // Create client and event loop
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);

        // Channel for push notifications
        let (push_tx, push_rx) = mpsc::unbounded_channel();

        let pending = self.pending.clone();

        // Spawn background task to poll the event loop. Acknowledgements are
        // matched against the pending map; everything else is a push.
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let envelope: Envelope = match serde_json::from_slice(&publish.payload) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::warn!("Discarding undecodable cloud message: {}", e);
                                continue;
                            }
                        };

                        if envelope.header.method == "PUSH" {
                            let subdevice_id = envelope
                                .payload
                                .get("id")
                                .and_then(|v| v.as_str())
                                .map(str::to_string);

                            match subdevice_id {
                                Some(subdevice_id) => {
                                    let msg = PushMessage {
                                        subdevice_id,
                                        namespace: envelope.header.namespace,
                                        payload: envelope.payload,
                                    };

                                    // Send to channel; if receiver dropped, exit
                                    if push_tx.send(msg).is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    tracing::debug!(
                                        "Push without subdevice id on {}",
                                        envelope.header.namespace
                                    );
                                }
                            }
                        } else {
                            Self::complete_request(&pending, envelope);
                        }
                    }
                    Ok(_) => {
                        // Ignore other events (connack, puback, etc.)
                    }
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        // Sleep briefly before retrying
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("Meross cloud event loop task exiting");
        });

        client
            .subscribe(&self.response_topic, QoS::AtLeastOnce)
            .await?;

        self.client = Some(client);
        self.push_rx = Some(push_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn request(
        &mut self,
        uuid: &str,
        namespace: &str,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;

        let message_id = self.next_message_id();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let envelope = Envelope {
            header: Header {
                message_id: message_id.clone(),
                namespace: namespace.to_string(),
                method: method.as_str().to_string(),
                payload_version: 1,
                from: self.response_topic.clone(),
                timestamp,
            },
            payload,
        };
        let body = serde_json::to_vec(&envelope)?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut map) = self.pending.lock() {
            map.insert(message_id.clone(), tx);
        }

        let topic = format!("/appliance/{}/subscribe", uuid);
        if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, body).await {
            if let Ok(mut map) = self.pending.lock() {
                map.remove(&message_id);
            }
            return Err(e.into());
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                if let Ok(mut map) = self.pending.lock() {
                    map.remove(&message_id);
                }
                Err(TransportError::Timeout(REQUEST_TIMEOUT))
            }
        }
    }

    async fn poll_push(&mut self) -> Option<PushMessage> {
        match &mut self.push_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for MerossMqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

/// Mock cloud transport for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Scripted responses, keyed by namespace, consumed front to back
    pub responses: HashMap<String, std::collections::VecDeque<Result<serde_json::Value, TransportError>>>,
    /// Every request issued through this transport
    pub requests: Vec<RecordedRequest>,
    /// Queued push notifications
    pub pushes: std::collections::VecDeque<PushMessage>,
    pub is_connected: bool,
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub uuid: String,
    pub namespace: String,
    pub method: Method,
    pub payload: serde_json::Value,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful response for the next request on a namespace
    pub fn respond(&mut self, namespace: &str, payload: serde_json::Value) {
        self.responses
            .entry(namespace.to_string())
            .or_default()
            .push_back(Ok(payload));
    }

    /// Script a failure for the next request on a namespace
    pub fn fail(&mut self, namespace: &str) {
        self.responses
            .entry(namespace.to_string())
            .or_default()
            .push_back(Err(TransportError::Device("scripted failure".to_string())));
    }

    /// Queue a push notification
    #[allow(dead_code)]
    pub fn add_push(&mut self, subdevice_id: &str, namespace: &str, payload: serde_json::Value) {
        self.pushes.push_back(PushMessage {
            subdevice_id: subdevice_id.to_string(),
            namespace: namespace.to_string(),
            payload,
        });
    }

    /// Requests issued on a namespace
    pub fn requests_on(&self, namespace: &str) -> Vec<&RecordedRequest> {
        self.requests
            .iter()
            .filter(|r| r.namespace == namespace)
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl CloudTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.is_connected = true;
        Ok(())
    }

    async fn request(
        &mut self,
        uuid: &str,
        namespace: &str,
        method: Method,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.requests.push(RecordedRequest {
            uuid: uuid.to_string(),
            namespace: namespace.to_string(),
            method,
            payload,
        });

        match self.responses.get_mut(namespace).and_then(|q| q.pop_front()) {
            Some(result) => result,
            // Unscripted requests succeed with an empty acknowledgement
            None => Ok(serde_json::json!({})),
        }
    }

    async fn poll_push(&mut self) -> Option<PushMessage> {
        self.pushes.pop_front()
    }
}
