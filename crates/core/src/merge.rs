use chrono::{DateTime, Utc};

use crate::types::{Observer, StockReport, Store};

/// What the merge did to the report sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// No report existed for the (store, flag) pair; one was appended.
    Created,
    /// A new observer joined an existing report.
    Corroborated,
    /// The user had already observed this report; only the timestamp moved.
    Repeated,
}

impl MergeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Corroborated => "corroborated",
            Self::Repeated => "repeated",
        }
    }
}

/// Merges one observation into an item's report sequence in place.
///
/// At most one report exists per (store id, flag) pair. The observer roster
/// only grows for users not already on it, so `seen_count` always equals the
/// number of distinct observers. New reports are appended, keeping
/// first-seen order.
pub fn merge_report(
    reports: &mut Vec<StockReport>,
    store: &Store,
    user_id: &str,
    now: DateTime<Utc>,
    in_stock: bool,
) -> MergeAction {
    if let Some(report) = reports
        .iter_mut()
        .find(|report| report.matches(&store.id, in_stock))
    {
        let action = if report.has_observer(user_id) {
            MergeAction::Repeated
        } else {
            report.observers.push(Observer {
                user_id: user_id.to_string(),
                observed_at: now,
            });
            report.seen_count += 1;
            MergeAction::Corroborated
        };
        report.updated_at = now;
        return action;
    }

    reports.push(StockReport {
        store: store.clone(),
        observers: vec![Observer {
            user_id: user_id.to_string(),
            observed_at: now,
        }],
        updated_at: now,
        in_stock,
        seen_count: 1,
    });
    MergeAction::Created
}

/// Value-returning form of [`merge_report`].
pub fn merge(
    mut reports: Vec<StockReport>,
    store: &Store,
    user_id: &str,
    now: DateTime<Utc>,
    in_stock: bool,
) -> Vec<StockReport> {
    merge_report(&mut reports, store, user_id, now, in_stock);
    reports
}
