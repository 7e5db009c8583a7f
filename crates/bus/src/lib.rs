use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use shared::protocol::Envelope;
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

const DELIVERY_CHANNEL_CAPACITY: usize = 256;

/// One raw message delivered for a subscription, tagged with the topic it
/// arrived on. The payload is the untouched framing blob; the consumer owns
/// the parsing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bus rejected {operation} for topic {topic} with status {status}")]
    Rejected {
        operation: &'static str,
        topic: String,
        status: u16,
    },
    #[error("{0}")]
    Other(String),
}

/// Topic CRUD, subscription CRUD and publish, as exposed by the external
/// task-management framework's event bus. Every call goes over the wire and
/// may fail.
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn list_topics(&self) -> Result<Vec<String>, BusError>;
    async fn create_topic(&self, topic: &str) -> Result<(), BusError>;
    async fn delete_topic(&self, topic: &str) -> Result<(), BusError>;
    async fn list_subscribers(&self, topic: &str) -> Result<Vec<String>, BusError>;
    async fn subscribe(&self, topic: &str, subscriber: &str) -> Result<(), BusError>;
    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<(), BusError>;
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError>;
}

/// HTTP client for the bus. Subscribing opens a long-lived delivery stream
/// whose chunks are forwarded, untouched, into the channel handed out by
/// [`HttpBusClient::new`].
pub struct HttpBusClient {
    http: Client,
    base_url: String,
    deliveries: mpsc::Sender<Delivery>,
    streams: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl HttpBusClient {
    pub fn new(base_url: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let client = Arc::new(Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            deliveries: tx,
            streams: Mutex::new(HashMap::new()),
        });
        (client, rx)
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{topic}", self.base_url)
    }

    fn subscriber_url(&self, topic: &str, subscriber: &str) -> String {
        format!("{}/subscribers/{subscriber}", self.topic_url(topic))
    }

    fn spawn_delivery_stream(&self, topic: &str, subscriber: &str) -> JoinHandle<()> {
        let http = self.http.clone();
        let url = format!("{}/stream", self.subscriber_url(topic, subscriber));
        let tx = self.deliveries.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let response = match http.get(&url).send().await {
                Ok(response) => response,
                Err(error) => {
                    warn!(topic = %topic, %error, "bus: could not open delivery stream");
                    return;
                }
            };
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let payload = String::from_utf8_lossy(&bytes).into_owned();
                        let delivery = Delivery {
                            topic: topic.clone(),
                            payload,
                        };
                        if tx.send(delivery).await.is_err() {
                            // consumer gone, nothing left to deliver to
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(topic = %topic, %error, "bus: delivery stream failed");
                        break;
                    }
                }
            }
            debug!(topic = %topic, "bus: delivery stream closed");
        })
    }
}

fn expect_success(
    response: &reqwest::Response,
    operation: &'static str,
    topic: &str,
) -> Result<(), BusError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(BusError::Rejected {
            operation,
            topic: topic.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl BusClient for HttpBusClient {
    async fn list_topics(&self) -> Result<Vec<String>, BusError> {
        let topics = self
            .http
            .get(format!("{}/topics", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(topics)
    }

    async fn create_topic(&self, topic: &str) -> Result<(), BusError> {
        let response = self.http.post(self.topic_url(topic)).send().await?;
        expect_success(&response, "create", topic)
    }

    async fn delete_topic(&self, topic: &str) -> Result<(), BusError> {
        let response = self.http.delete(self.topic_url(topic)).send().await?;
        expect_success(&response, "delete", topic)
    }

    async fn list_subscribers(&self, topic: &str) -> Result<Vec<String>, BusError> {
        let subscribers = self
            .http
            .get(format!("{}/subscribers", self.topic_url(topic)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(subscribers)
    }

    async fn subscribe(&self, topic: &str, subscriber: &str) -> Result<(), BusError> {
        let response = self
            .http
            .post(self.subscriber_url(topic, subscriber))
            .send()
            .await?;
        expect_success(&response, "subscribe", topic)?;

        let handle = self.spawn_delivery_stream(topic, subscriber);
        let key = (topic.to_string(), subscriber.to_string());
        if let Some(previous) = self.streams.lock().await.insert(key, handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<(), BusError> {
        let response = self
            .http
            .delete(self.subscriber_url(topic, subscriber))
            .send()
            .await?;
        expect_success(&response, "unsubscribe", topic)?;

        let key = (topic.to_string(), subscriber.to_string());
        if let Some(handle) = self.streams.lock().await.remove(&key) {
            handle.abort();
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), BusError> {
        let response = self
            .http
            .post(format!("{}/messages", self.topic_url(topic)))
            .json(envelope)
            .send()
            .await?;
        expect_success(&response, "publish", topic)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
