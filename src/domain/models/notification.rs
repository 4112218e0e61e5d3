//! Planned-maintenance restart notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::object::ObjectRef;

/// An authored time window during which restarts and outages of one
/// object are considered planned.
///
/// A notification covers time `T` iff `valid_from <= T <= valid_until`.
/// Any cover downgrades a produced alarm to informational severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartNotification {
    pub id: Uuid,
    pub creation_time: DateTime<Utc>,
    pub object: ObjectRef,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl RestartNotification {
    pub fn new(object: ObjectRef, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            creation_time: Utc::now(),
            object,
            valid_from,
            valid_until,
        }
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && at <= self.valid_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_covers_is_inclusive_on_both_ends() {
        let from = Utc::now();
        let until = from + Duration::hours(1);
        let n = RestartNotification::new(ObjectRef::container("svc-a"), from, until);

        assert!(n.covers(from));
        assert!(n.covers(until));
        assert!(n.covers(from + Duration::minutes(30)));
        assert!(!n.covers(from - Duration::seconds(1)));
        assert!(!n.covers(until + Duration::seconds(1)));
    }
}
