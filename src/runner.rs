//! Cadence scheduler: stretches the register batches over sub-ticks of the
//! quick period, drains the tier queues when their deliveries come due and
//! publishes the shaped payloads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{BridgeError, Result};
use crate::processor::{Processor, TierQueue};
use crate::publisher::Publisher;
use crate::registry::{Tier, TICK_COUNT};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MQTT_CONNECT_LIMIT: Duration = Duration::from_secs(10);

/// Tolerance added to the tick period before a fetch counts as an overrun;
/// tasks only get checked at poll granularity.
const OVERRUN_SLACK: Duration = Duration::from_millis(500);

const ROUND_FLOAT_DIGITS: i32 = 7;

const JSON_STATUS: &str = "status";
const JSON_TIMESTAMP: &str = "timestamp";

/// One publication cadence with its topic and due time.
struct Delivery {
    period: Duration,
    topic: Option<String>,
    next_trigger: Instant,
}

impl Delivery {
    fn new(period: Duration, topic: Option<String>) -> Self {
        // due immediately; the first cycle delivers right away
        Self { period, topic, next_trigger: Instant::now() }
    }

    fn is_due(&self) -> bool {
        Instant::now() >= self.next_trigger
    }

    fn retrigger(&mut self) {
        self.next_trigger = Instant::now() + self.period;
    }
}

type TickOutcome = Option<(Tier, TierQueue)>;

pub struct Runner {
    processor: Arc<Mutex<Processor>>,
    publisher: Box<dyn Publisher>,

    fetch_timeout: Duration,
    last_will: Option<String>,
    hide_items: HashSet<String>,

    // quick.period is the tick period; a full quick cycle spans TICK_COUNT+1
    // phases
    quick: Delivery,
    medium: Delivery,
    slow: Delivery,

    tick_phase: u32,
    tick_task: Option<(JoinHandle<Result<TickOutcome>>, Instant)>,
    overrun_count: u32,

    cancel: CancellationToken,
}

impl Runner {
    pub fn new(
        config: &RunnerConfig,
        processor: Processor,
        publisher: Box<dyn Publisher>,
        cancel: CancellationToken,
    ) -> Self {
        let tick_period =
            Duration::from_secs_f64(config.delivery_time_quick / f64::from(TICK_COUNT));
        Self {
            processor: Arc::new(Mutex::new(processor)),
            publisher,
            fetch_timeout: Duration::from_secs_f64(config.fetch_timeout),
            last_will: config.message_last_will.clone(),
            hide_items: config.hide_items.iter().cloned().collect(),
            quick: Delivery::new(tick_period, config.topic_quick.clone()),
            medium: Delivery::new(
                Duration::from_secs_f64(config.delivery_time_medium),
                config.topic_medium.clone(),
            ),
            slow: Delivery::new(
                Duration::from_secs_f64(config.delivery_time_slow),
                config.topic_slow.clone(),
            ),
            tick_phase: 0,
            tick_task: None,
            overrun_count: 0,
            cancel,
        }
    }

    /// Connect both transports and loop until cancelled or a fault.
    pub async fn run(&mut self) -> Result<()> {
        self.connect().await?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("shutdown requested");
                    return Ok(());
                },
                () = sleep(POLL_INTERVAL) => {},
            }

            if self.quick.is_due() {
                self.run_next_tick().await?;
            } else if !self.publisher.is_connected() {
                return Err(BridgeError::not_connected(self.publisher.connection_error()));
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if let Some(message) = self.last_will.clone() {
            for topic in [&self.quick.topic, &self.medium.topic, &self.slow.topic] {
                if let Some(topic) = topic.clone() {
                    self.publisher.set_last_will(&topic, &message)?;
                }
            }
        }
        self.publisher.connect().await?;
        self.wait_for_connection().await?;

        self.processor.lock().await.open().await?;
        Ok(())
    }

    async fn wait_for_connection(&self) -> Result<()> {
        let probe = async {
            while !self.publisher.is_connected() {
                sleep(POLL_INTERVAL).await;
            }
        };
        timeout(MQTT_CONNECT_LIMIT, probe).await.map_err(|_| {
            BridgeError::timeout(format!(
                "couldn't connect to MQTT (within {}s)",
                MQTT_CONNECT_LIMIT.as_secs()
            ))
        })
    }

    /// Advance the phase machine by one tick. A still-running fetch keeps
    /// the machine where it is; the trigger is simply skipped.
    async fn run_next_tick(&mut self) -> Result<()> {
        if let Some((task, _)) = &self.tick_task {
            if !task.is_finished() {
                return Ok(());
            }
            self.handle_results().await?;
        }

        if let Some(task) = self.spawn_phase(self.tick_phase) {
            self.tick_task = Some((task, Instant::now()));
        }

        self.quick.retrigger();
        self.tick_phase += 1;
        if self.tick_phase > TICK_COUNT {
            self.tick_phase = 0;
        }
        Ok(())
    }

    /// The batches are stretched over the phases so a single tick never
    /// issues more than one Modbus request.
    fn spawn_phase(&mut self, phase: u32) -> Option<JoinHandle<Result<TickOutcome>>> {
        let processor = Arc::clone(&self.processor);
        let fetch_timeout = self.fetch_timeout;

        let work: futures::future::BoxFuture<'static, Result<TickOutcome>> = match phase {
            // feeds the power caches; must come first
            0 => Box::pin(async move {
                processor.lock().await.process_inverter().await?;
                Ok(None)
            }),
            1 => Box::pin(async move {
                processor.lock().await.process_mppt().await?;
                Ok(None)
            }),
            2 => Box::pin(async move {
                let mut processor = processor.lock().await;
                processor.process_meter().await?;
                Ok(Some((Tier::Quick, processor.drain_tier(Tier::Quick))))
            }),
            3 => {
                if !self.medium.is_due() {
                    return None;
                }
                self.medium.retrigger();
                Box::pin(async move {
                    Ok(Some((Tier::Medium, processor.lock().await.drain_tier(Tier::Medium))))
                })
            },
            _ => {
                if !self.slow.is_due() {
                    return None;
                }
                self.slow.retrigger();
                Box::pin(async move {
                    let mut processor = processor.lock().await;
                    processor.process_storage().await?;
                    Ok(Some((Tier::Slow, processor.drain_tier(Tier::Slow))))
                })
            },
        };

        Some(tokio::spawn(async move {
            match timeout(fetch_timeout, work).await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::timeout(format!(
                    "timeout ({:.1}s) - abort",
                    fetch_timeout.as_secs_f64()
                ))),
            }
        }))
    }

    /// Collect the finished tick. Any fault announces an error payload on
    /// every delivery topic, then propagates.
    async fn handle_results(&mut self) -> Result<()> {
        let Some((task, started)) = self.tick_task.take() else {
            return Ok(());
        };

        let outcome = match task.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.send_failure().await;
                return Err(e);
            },
            Err(e) => {
                self.send_failure().await;
                return Err(BridgeError::internal(format!("tick task panicked: {e}")));
            },
        };

        let used = started.elapsed();
        if used >= self.quick.period + OVERRUN_SLACK {
            self.overrun_count += 1;
            if self.overrun_count < 50 {
                warn!(
                    "fetching data took too long - wrong timing (?): duration={:.1}s; \
                     max-expected={:.1}s (quick-time / {}); timeout={:.1}s",
                    used.as_secs_f64(),
                    self.quick.period.as_secs_f64(),
                    TICK_COUNT,
                    self.fetch_timeout.as_secs_f64(),
                );
            } else if self.overrun_count % 50 == 0 {
                warn!("fetching data took too long - too many errors, reporting muted");
            }
        }

        let Some((tier, values)) = outcome else {
            return Ok(());
        };
        if values.is_empty() {
            return Ok(());
        }

        let payload = self.shape_payload(values);
        let topic = match tier {
            Tier::Quick => self.quick.topic.clone(),
            Tier::Medium => self.medium.topic.clone(),
            Tier::Slow => self.slow.topic.clone(),
        };
        if let Some(topic) = topic {
            self.publisher.publish(&topic, &payload).await?;
        }
        Ok(())
    }

    /// Round and stamp one drained tier queue, then strip the hidden items.
    /// Hiding runs last, so even the stamped fields can be suppressed.
    fn shape_payload(&self, values: TierQueue) -> Value {
        let mut map = Map::new();
        for (name, value) in values {
            map.insert(name.to_string(), round_float(value));
        }

        if map.get(JSON_TIMESTAMP).map_or(true, Value::is_null) {
            map.insert(JSON_TIMESTAMP.to_string(), Value::from(timestamp()));
        }
        if map.get(JSON_STATUS).map_or(true, Value::is_null) {
            map.insert(JSON_STATUS.to_string(), Value::from("ok"));
        }

        map.retain(|name, _| !self.hide_items.contains(name.as_str()));
        Value::Object(map)
    }

    async fn send_failure(&self) {
        let mut map = Map::new();
        map.insert(JSON_STATUS.to_string(), Value::from("error"));
        map.insert(JSON_TIMESTAMP.to_string(), Value::from(timestamp()));
        let payload = Value::Object(map);

        for topic in [&self.quick.topic, &self.medium.topic, &self.slow.topic] {
            let Some(topic) = topic else { continue };
            if let Err(e) = self.publisher.publish(topic, &payload).await {
                error!("could not publish the error message to '{topic}': {e}");
            }
        }
    }

    /// Announce the configured last-will message once more, then shut both
    /// transports down.
    pub async fn close(&mut self) {
        if let Some(message) = self.last_will.clone() {
            let payload = serde_json::from_str(&message)
                .unwrap_or_else(|_| Value::from(message.clone()));
            for topic in [&self.quick.topic, &self.medium.topic, &self.slow.topic] {
                let Some(topic) = topic else { continue };
                if let Err(e) = self.publisher.publish(topic, &payload).await {
                    error!("could not publish the final service message to '{topic}': {e}");
                }
            }
        }

        if let Some((task, _)) = self.tick_task.take() {
            task.abort();
        }
        self.processor.lock().await.close().await;
        self.publisher.close().await;
        debug!("runner closed");
    }
}

fn timestamp() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

/// Round float payload values to a stable number of digits; integers and
/// non-numbers pass through untouched.
fn round_float(value: Value) -> Value {
    match value.as_f64() {
        Some(f) if value.is_f64() => {
            let factor = 10f64.powi(ROUND_FLOAT_DIGITS);
            Value::from((f * factor).round() / factor)
        },
        _ => value,
    }
}
