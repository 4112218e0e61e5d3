//! Alarm fan-out: one message, many sinks.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::models::AlarmSeverity;
use crate::domain::ports::AlarmSink;

/// Composite sink delegating to registered sinks in registration order.
///
/// Delivery is best-effort: sinks are expected to swallow their own
/// failures, and a misbehaving sink never prevents later sinks from
/// receiving the message.
#[derive(Default)]
pub struct CompositeAlarmSink {
    sinks: Vec<Arc<dyn AlarmSink>>,
}

impl CompositeAlarmSink {
    pub fn new(sinks: Vec<Arc<dyn AlarmSink>>) -> Self {
        Self { sinks }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlarmSink>) {
        self.sinks.push(sink);
    }
}

#[async_trait]
impl AlarmSink for CompositeAlarmSink {
    async fn push(&self, message: &str, severity: AlarmSeverity) {
        for sink in &self.sinks {
            sink.push(message, severity).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collector {
        received: Mutex<Vec<(String, AlarmSeverity)>>,
    }

    #[async_trait]
    impl AlarmSink for Collector {
        async fn push(&self, message: &str, severity: AlarmSeverity) {
            self.received
                .lock()
                .unwrap()
                .push((message.to_string(), severity));
        }
    }

    #[tokio::test]
    async fn test_delivers_to_all_sinks_in_order() {
        let a = Arc::new(Collector {
            received: Mutex::new(vec![]),
        });
        let b = Arc::new(Collector {
            received: Mutex::new(vec![]),
        });

        let composite = CompositeAlarmSink::new(vec![a.clone(), b.clone()]);
        composite.push("disk full", AlarmSeverity::Alarm).await;

        for sink in [&a, &b] {
            let got = sink.received.lock().unwrap();
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].0, "disk full");
            assert_eq!(got[0].1, AlarmSeverity::Alarm);
        }
    }
}
