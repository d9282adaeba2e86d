use chrono::{DateTime, Utc};
use llmbot_core::UserId;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::record::{EventRecord, Interaction};
use crate::sink::EventSink;

/// Wall clock that never goes backwards within one process.
#[derive(Debug)]
struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().max(*last);
        *last = now;
        now
    }
}

/// Fans every recorded action out to the append log and the relational store.
///
/// Recording is best-effort: a sink failure is logged and swallowed, never
/// stops the other sink, and never reaches the caller.
pub struct AnalyticsRecorder {
    sinks: [Arc<dyn EventSink>; 2],
    model_name: String,
    clock: MonotonicClock,
}

impl AnalyticsRecorder {
    pub fn new(
        log_sink: Arc<dyn EventSink>,
        relational_sink: Arc<dyn EventSink>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            sinks: [log_sink, relational_sink],
            model_name: model_name.into(),
            clock: MonotonicClock::new(),
        }
    }

    /// Record one user action in both sinks.
    pub async fn record(&self, user_id: UserId, interaction: Interaction) {
        let record = EventRecord::new(user_id, self.clock.now(), &self.model_name, interaction);

        for sink in &self.sinks {
            match sink.write(&record).await {
                Ok(()) => debug!(
                    user_id = %user_id,
                    action = %record.action(),
                    sink = sink.name(),
                    "Recorded action"
                ),
                Err(e) => warn!(
                    user_id = %user_id,
                    action = %record.action(),
                    sink = sink.name(),
                    error = %e,
                    "Failed to record action"
                ),
            }
        }
    }
}
