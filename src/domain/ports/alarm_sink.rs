//! Alarm sink port.

use async_trait::async_trait;

use crate::domain::models::AlarmSeverity;

/// Destination for alarm messages.
///
/// Implementations (adapters) deliver to chat webhooks, the persistent
/// history log, or test collectors. Delivery is best-effort and not
/// transactional; a failing sink must log and swallow its own error.
#[async_trait]
pub trait AlarmSink: Send + Sync {
    /// Deliver one alarm message with a severity.
    async fn push(&self, message: &str, severity: AlarmSeverity);
}
