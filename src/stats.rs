//! Queue statistics tracking for supervisor sockets.
//!
//! The supervisor socket pushes an initial ACD status snapshot (event 5000) followed by
//! incremental updates (event 5012). [`QueueStatistics`] keeps the current and previous view of
//! every queue and reports counters that grew by at least a configured threshold between two
//! consecutive updates.

use crate::api::ApiClientError;
use crate::httpclient::methods::QueueInfo;
use crate::vcc::Event;
use crate::wsclient::handlers::{Disposition, EventHandler, HandlerContext};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Queue id the VCC uses for the all-queues aggregate; never alerted on
pub const AGGREGATE_QUEUE_ID: &str = "0";
pub const ACD_STATUS: &str = "ACD_STATUS";
pub const EVENT_STATISTICS_SNAPSHOT: &str = "5000";
pub const EVENT_STATISTICS_UPDATE: &str = "5012";
/// Client extension name the tracker is stored under
pub const EXTENSION_NAME: &str = "queue_statistics";

pub type QueueCounters = BTreeMap<String, i64>;

/// Counter name to minimum increase that raises an alert
pub fn default_alert_rules() -> BTreeMap<String, i64> {
    BTreeMap::from([("callsInQueue".to_string(), 1)])
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueueAlert {
    pub queue_id: String,
    pub queue_name: String,
    pub counter: String,
    pub current_value: i64,
    pub previous_value: i64,
    pub difference: i64,
}

impl fmt::Display for QueueAlert {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {} -> {} (+{})",
            self.queue_name, self.counter, self.previous_value, self.current_value, self.difference
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueueStatistics {
    queue_names: HashMap<String, String>,
    current: BTreeMap<String, QueueCounters>,
    previous: BTreeMap<String, QueueCounters>,
    rules: BTreeMap<String, i64>,
}

impl QueueStatistics {
    pub fn new(queue_names: HashMap<String, String>, rules: BTreeMap<String, i64>) -> QueueStatistics {
        QueueStatistics {
            queue_names,
            current: BTreeMap::new(),
            previous: BTreeMap::new(),
            rules,
        }
    }

    /// Tracker naming queues after the domain queue directory
    pub fn from_directory(queues: &[QueueInfo], rules: BTreeMap<String, i64>) -> QueueStatistics {
        let names = queues
            .iter()
            .map(|queue| (queue.id.clone(), queue.name.clone()))
            .collect();
        QueueStatistics::new(names, rules)
    }

    pub fn current(&self) -> &BTreeMap<String, QueueCounters> {
        &self.current
    }

    pub fn previous(&self) -> &BTreeMap<String, QueueCounters> {
        &self.previous
    }

    pub fn rules(&self) -> &BTreeMap<String, i64> {
        &self.rules
    }

    /// Display name of a queue, its id when the directory does not know it
    pub fn queue_name<'a>(&'a self, queue_id: &'a str) -> &'a str {
        self.queue_names
            .get(queue_id)
            .map(String::as_str)
            .unwrap_or(queue_id)
    }

    /// Rotates the snapshots, merges `batch` into the current one and returns the alerts.
    ///
    /// Queues missing from `batch` keep their counters, and so do counters missing from a queue
    /// entry. A queue seen for the first time compares against zero.
    pub fn update(&mut self, batch: BTreeMap<String, QueueCounters>) -> Vec<QueueAlert> {
        log::debug!("Previous Snapshot: {:?}", self.previous);
        self.previous = self.current.clone();
        for (queue_id, counters) in batch {
            self.current.entry(queue_id).or_default().extend(counters);
        }
        log::debug!("Current Snapshot: {:?}", self.current);
        self.alerts()
    }

    /// Alerts for the current pair of snapshots
    pub fn alerts(&self) -> Vec<QueueAlert> {
        let mut alerts = vec![];
        for (queue_id, counters) in &self.current {
            if queue_id == AGGREGATE_QUEUE_ID {
                continue;
            }
            for (counter, threshold) in &self.rules {
                let current_value = counters.get(counter).copied().unwrap_or(0);
                let previous_value = self
                    .previous
                    .get(queue_id)
                    .and_then(|prior| prior.get(counter))
                    .copied()
                    .unwrap_or(0);
                let difference = current_value.saturating_sub(previous_value);
                log::trace!(
                    "Comparing Thresholds: {} - {}: Current [{}] Previous [{}]",
                    self.queue_name(queue_id),
                    counter,
                    current_value,
                    previous_value
                );
                if difference >= *threshold {
                    alerts.push(QueueAlert {
                        queue_id: queue_id.clone(),
                        queue_name: self.queue_name(queue_id).to_string(),
                        counter: counter.clone(),
                        current_value,
                        previous_value,
                        difference,
                    });
                }
            }
        }
        alerts
    }
}

/// Converts ACD status records into a batch. Only integral fields other than `id` are kept as
/// counters; records without an id are skipped.
pub fn records_to_batch(records: &[serde_json::Value]) -> BTreeMap<String, QueueCounters> {
    let mut batch = BTreeMap::new();
    for record in records {
        let queue_id = match record.get("id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => {
                log::warn!("Queue record without id: {}", record);
                continue;
            }
        };
        let counters: QueueCounters = record
            .as_object()
            .into_iter()
            .flatten()
            .filter(|(name, _)| name.as_str() != "id")
            .filter_map(|(name, value)| value.as_i64().map(|count| (name.clone(), count)))
            .collect();
        batch.insert(queue_id, counters);
    }
    batch
}

/// Feeds ACD status events into the shared [`QueueStatistics`] extension.
///
/// The tracker is created on first use from the domain queue directory. When that lookup fails
/// the error is returned and the next event tries again.
pub struct QueueStatisticsHandler {
    event_id: &'static str,
    field: &'static str,
    rules: BTreeMap<String, i64>,
    alerts: Option<UnboundedSender<QueueAlert>>,
}

impl QueueStatisticsHandler {
    /// Handler for the initial snapshot, event 5000
    pub fn snapshot() -> QueueStatisticsHandler {
        QueueStatisticsHandler {
            event_id: EVENT_STATISTICS_SNAPSHOT,
            field: "data",
            rules: default_alert_rules(),
            alerts: None,
        }
    }

    /// Handler for incremental updates, event 5012
    pub fn update() -> QueueStatisticsHandler {
        QueueStatisticsHandler {
            event_id: EVENT_STATISTICS_UPDATE,
            field: "updated",
            rules: default_alert_rules(),
            alerts: None,
        }
    }

    /// Rules used if this handler is the one creating the tracker
    pub fn with_rules(mut self, rules: BTreeMap<String, i64>) -> QueueStatisticsHandler {
        self.rules = rules;
        self
    }

    /// Also forward every alert to `sink`
    pub fn with_alert_sink(mut self, sink: UnboundedSender<QueueAlert>) -> QueueStatisticsHandler {
        self.alerts = Some(sink);
        self
    }
}

#[async_trait]
impl EventHandler for QueueStatisticsHandler {
    fn event_id(&self) -> &str {
        self.event_id
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        event: &Event,
    ) -> Result<Disposition, ApiClientError> {
        log::debug!("Stats Handler EVENT: {} - {}", event.event_id(), event.payload);

        let tracker = ctx
            .extensions
            .get_or_try_init::<Mutex<QueueStatistics>, _, _>(EXTENSION_NAME, || async {
                let queues = ctx.supervisor().domain_queues().await?;
                Ok::<_, ApiClientError>(Mutex::new(QueueStatistics::from_directory(
                    &queues,
                    self.rules.clone(),
                )))
            })
            .await?;

        for record in event.records() {
            if record.get("dataSource").and_then(|source| source.as_str()) != Some(ACD_STATUS) {
                continue;
            }
            let entries = match record.get(self.field).and_then(|entries| entries.as_array()) {
                Some(entries) => entries,
                None => {
                    log::warn!("ACD status record without '{}'", self.field);
                    continue;
                }
            };

            let alerts = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(records_to_batch(entries));
            for alert in alerts {
                log::info!("Queue Alert: {}", alert);
                if let Some(sink) = &self.alerts {
                    if sink.send(alert).is_err() {
                        log::debug!("Queue alert receiver dropped");
                    }
                }
            }
        }
        Ok(Disposition::Handled)
    }
}
