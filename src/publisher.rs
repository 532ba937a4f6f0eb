//! Pub/sub transport: the `Publisher` seam consumed by the runner and its
//! rumqttc implementation.
//!
//! The broker event loop runs on its own task; connectivity is exposed to
//! the runner through a single mutex-guarded state cell that both contexts
//! go through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};

/// Pub/sub delivery seam.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Register a last-will payload; must be called before `connect`.
    fn set_last_will(&mut self, topic: &str, payload: &str) -> Result<()>;

    /// Start connecting; progress is observed via `is_connected`.
    async fn connect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Error recorded at the last disconnect, if any.
    fn connection_error(&self) -> Option<String>;

    /// Publish a structured payload with deterministic key ordering.
    /// Publishing after `close` is a silent no-op.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<()>;

    /// Stop delivery and wait until fully disconnected.
    async fn close(&mut self);
}

#[derive(Default)]
struct ConnState {
    connected: bool,
    last_error: Option<String>,
}

pub struct MqttPublisher {
    config: MqttConfig,
    last_will: Option<LastWill>,
    client: Option<AsyncClient>,
    state: Arc<Mutex<ConnState>>,
    event_loop: Option<JoinHandle<()>>,
    shutdown: bool,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            last_will: None,
            client: None,
            state: Arc::new(Mutex::new(ConnState::default())),
            event_loop: None,
            shutdown: false,
        }
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    fn client_id(&self) -> String {
        self.config.client_id.clone().unwrap_or_else(|| {
            format!("pvbridge-{}", rand::thread_rng().gen_range(1..=9_999_999_999u64))
        })
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn set_last_will(&mut self, topic: &str, payload: &str) -> Result<()> {
        if self.client.is_some() {
            return Err(BridgeError::connection("will must be set before connecting"));
        }
        // the client carries a single will; the last registered topic wins
        self.last_will =
            Some(LastWill::new(topic, payload.to_owned(), self.qos(), self.config.retain));
        Ok(())
    }

    async fn connect(&mut self) -> Result<()> {
        let mut options =
            MqttOptions::new(self.client_id(), &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keepalive));
        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), password.clone());
        }
        if let Some(will) = self.last_will.clone() {
            options.set_last_will(will);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let state = Arc::clone(&self.state);
        self.event_loop = Some(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let mut state = state.lock();
                        state.connected = true;
                        state.last_error = None;
                        debug!("MQTT connected");
                    },
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        state.lock().connected = false;
                        debug!("MQTT disconnected by broker");
                    },
                    Ok(_) => {},
                    Err(e) => {
                        // no internal reconnect: record and stop, recovery
                        // is an external restart
                        let mut state = state.lock();
                        state.connected = false;
                        state.last_error = Some(e.to_string());
                        drop(state);
                        error!("MQTT event loop stopped: {e}");
                        break;
                    },
                }
            }
        }));

        self.client = Some(client);
        debug!("MQTT is connecting to {}:{}", self.config.host, self.config.port);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connection_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        if self.shutdown {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(BridgeError::not_connected(self.connection_error()));
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BridgeError::not_connected(None))?;

        // serde_json maps are sorted, so key order is deterministic
        let body = serde_json::to_string(payload)?;
        client
            .publish(topic, self.qos(), self.config.retain, body.clone())
            .await?;

        info!("sent - topic: '{topic}' | payload: '{body}'");
        Ok(())
    }

    async fn close(&mut self) {
        self.shutdown = true;
        self.state.lock().connected = false;
        if let Some(client) = self.client.take() {
            let _ = client.disconnect().await;
        }
        if let Some(event_loop) = self.event_loop.take() {
            // bounded wait for the event loop to drain the disconnect
            let abort = event_loop.abort_handle();
            if tokio::time::timeout(Duration::from_secs(5), event_loop).await.is_err() {
                debug!("MQTT event loop did not stop in time");
                abort.abort();
            }
        }
        debug!("MQTT publisher closed");
    }
}
