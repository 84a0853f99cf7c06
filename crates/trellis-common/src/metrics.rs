// Metrics for the coordination layer
// Counters recorded through the `metrics` facade; installing an exporter is up to the host

use metrics::{counter, describe_counter};

/// Describe every counter emitted by Trellis
/// Should be called once at startup, before the directories are used
pub fn init_metrics() {
    describe_counter!(
        "trellis_membership_conflicts_total",
        "Total number of membership writes rejected by the version check"
    );
    describe_counter!(
        "trellis_membership_writes_total",
        "Total number of accepted structural membership writes"
    );
    describe_counter!(
        "trellis_defunct_silos_removed_total",
        "Total number of dead silo entries removed by cleanup"
    );
    describe_counter!(
        "trellis_reminders_upserted_total",
        "Total number of reminder upserts"
    );
    describe_counter!(
        "trellis_reminders_removed_total",
        "Total number of reminders removed by conditional delete"
    );

    tracing::info!("Metrics initialized");
}

/// Record the outcome of a conditional membership write
pub fn record_membership_write(operation: &'static str, accepted: bool) {
    if accepted {
        counter!("trellis_membership_writes_total", "operation" => operation).increment(1);
    } else {
        counter!("trellis_membership_conflicts_total", "operation" => operation).increment(1);
    }
}

/// Record removed defunct silo entries
pub fn record_defunct_silos_removed(cluster_id: &str, count: usize) {
    counter!("trellis_defunct_silos_removed_total", "cluster" => cluster_id.to_string())
        .increment(count as u64);
}

/// Record a reminder upsert
pub fn record_reminder_upserted() {
    counter!("trellis_reminders_upserted_total").increment(1);
}

/// Record a reminder removed by a matching etag
pub fn record_reminder_removed() {
    counter!("trellis_reminders_removed_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::{
        Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Recorder summing every counter by name, labels ignored
    #[derive(Default)]
    struct CountingRecorder {
        counters: Mutex<HashMap<String, Arc<AtomicU64>>>,
    }

    impl CountingRecorder {
        fn value(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .get(name)
                .map_or(0, |c| c.load(Ordering::Relaxed))
        }
    }

    impl Recorder for CountingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            let handle = self
                .counters
                .lock()
                .unwrap()
                .entry(key.name().to_string())
                .or_default()
                .clone();
            Counter::from_arc(handle)
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_membership_write("insert", true);
        record_membership_write("update", false);
        record_defunct_silos_removed("c1", 2);
        record_reminder_upserted();
        record_reminder_removed();
    }

    #[test]
    fn test_counters_track_outcomes() {
        let recorder = CountingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_membership_write("insert", true);
            record_membership_write("update", true);
            record_membership_write("update", false);
            record_defunct_silos_removed("c1", 3);
            record_reminder_upserted();
            record_reminder_removed();
        });

        assert_eq!(recorder.value("trellis_membership_writes_total"), 2);
        assert_eq!(recorder.value("trellis_membership_conflicts_total"), 1);
        assert_eq!(recorder.value("trellis_defunct_silos_removed_total"), 3);
        assert_eq!(recorder.value("trellis_reminders_upserted_total"), 1);
        assert_eq!(recorder.value("trellis_reminders_removed_total"), 1);
    }
}
