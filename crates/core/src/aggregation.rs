use std::{fmt, future::Future, sync::Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::merge::{merge_report, MergeAction};
use crate::types::{Item, Store};

/// Transactional item persistence keyed by normalized item name.
///
/// `apply` must run fetch, mutate and store as one atomic unit: concurrent
/// calls for the same name are serialized or retried by the implementation,
/// and a failed call leaves no partial mutation behind. `mutate` may be
/// invoked more than once when the implementation retries, so it has to be
/// a pure function of the item it is handed.
pub trait ItemStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn apply<F>(
        &self,
        name: &str,
        mutate: F,
    ) -> impl Future<Output = Result<Item, Self::Error>> + Send
    where
        F: Fn(&mut Item) + Send + Sync;
}

/// One availability list of an upload, already normalized and deduplicated.
#[derive(Debug, Clone, Copy)]
pub struct ReportBatch<'a> {
    pub store: &'a Store,
    pub user_id: &'a str,
    pub now: DateTime<Utc>,
    pub in_stock: bool,
    pub item_names: &'a [String],
}

/// Tally of a best-effort batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    /// Applied items whose (store, flag) report did not exist before.
    pub created: usize,
    pub failures: usize,
    pub first_error: Option<ItemFailure>,
}

impl BatchOutcome {
    fn record_failure(&mut self, failure: ItemFailure) {
        self.failures += 1;
        if self.first_error.is_none() {
            self.first_error = Some(failure);
        }
    }

    /// Folds a later batch into this one, keeping the earliest error.
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.applied += other.applied;
        self.created += other.created;
        self.failures += other.failures;
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
    }

    /// Converts the tally into success (items applied) or a [`BatchFailure`].
    pub fn into_result(self) -> Result<usize, BatchFailure> {
        match self.first_error {
            None => Ok(self.applied),
            Some(first) => Err(BatchFailure {
                failures: self.failures,
                applied: self.applied,
                first,
            }),
        }
    }
}

/// The item name and message of a failed unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_name: String,
    pub message: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {:?}: {}", self.item_name, self.message)
    }
}

/// A batch in which at least one item could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("encountered {failures} failures, recorded the first one: {first}")]
pub struct BatchFailure {
    pub failures: usize,
    pub applied: usize,
    pub first: ItemFailure,
}

/// Applies every item of `batch` in its own unit of work.
///
/// A failing item never stops the batch: remaining items are still applied,
/// failures are counted and only the first error is kept.
pub async fn apply_batch<S: ItemStore>(store: &S, batch: ReportBatch<'_>) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();

    for name in batch.item_names {
        // Overwritten on every retry; the committed attempt writes last.
        let last_action = Mutex::new(None);
        let result = store
            .apply(name, |item: &mut Item| {
                let action = merge_report(
                    &mut item.reports,
                    batch.store,
                    batch.user_id,
                    batch.now,
                    batch.in_stock,
                );
                if let Ok(mut slot) = last_action.lock() {
                    *slot = Some(action);
                }
            })
            .await;

        match result {
            Ok(item) => {
                let action = last_action.into_inner().ok().flatten();
                outcome.applied += 1;
                if action == Some(MergeAction::Created) {
                    outcome.created += 1;
                }
                debug!(
                    stage = "report",
                    item = %name,
                    store_id = %batch.store.id,
                    in_stock = batch.in_stock,
                    action = action.map_or("unknown", MergeAction::as_str),
                    reports = item.reports.len(),
                    "stock report applied"
                );
            }
            Err(err) => {
                warn!(
                    stage = "report",
                    item = %name,
                    store_id = %batch.store.id,
                    in_stock = batch.in_stock,
                    error = %err,
                    "stock report failed"
                );
                outcome.record_failure(ItemFailure {
                    item_name: name.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    outcome
}

/// Applies an upload: in-stock names first, then out-of-stock names.
///
/// Both lists are attempted regardless of failures in the first; the
/// combined tally reports the total failure count and the earliest error.
pub async fn apply_upload<S: ItemStore>(
    store: &S,
    shop: &Store,
    user_id: &str,
    now: DateTime<Utc>,
    in_stock: &[String],
    out_of_stock: &[String],
) -> BatchOutcome {
    let mut outcome = apply_batch(
        store,
        ReportBatch {
            store: shop,
            user_id,
            now,
            in_stock: true,
            item_names: in_stock,
        },
    )
    .await;

    let out_outcome = apply_batch(
        store,
        ReportBatch {
            store: shop,
            user_id,
            now,
            in_stock: false,
            item_names: out_of_stock,
        },
    )
    .await;
    outcome.absorb(out_outcome);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;
    use chrono::TimeZone;
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    #[derive(Debug, Error)]
    #[error("simulated storage failure for {0}")]
    struct FakeError(String);

    #[derive(Default)]
    struct FakeStore {
        items: Mutex<HashMap<String, Item>>,
        fail_on: HashSet<String>,
    }

    impl FakeStore {
        fn failing_on(names: &[&str]) -> Self {
            Self {
                fail_on: names.iter().map(|name| name.to_string()).collect(),
                ..Self::default()
            }
        }

        fn get(&self, name: &str) -> Option<Item> {
            self.items.lock().expect("items guard").get(name).cloned()
        }
    }

    impl ItemStore for FakeStore {
        type Error = FakeError;

        async fn apply<F>(&self, name: &str, mutate: F) -> Result<Item, FakeError>
        where
            F: Fn(&mut Item) + Send + Sync,
        {
            if self.fail_on.contains(name) {
                return Err(FakeError(name.to_string()));
            }
            let mut items = self.items.lock().expect("items guard");
            let mut item = items
                .get(name)
                .cloned()
                .unwrap_or_else(|| Item::empty(name));
            mutate(&mut item);
            items.insert(name.to_string(), item.clone());
            Ok(item)
        }
    }

    fn shop() -> Store {
        Store {
            id: "s-1".to_string(),
            name: "Corner Market".to_string(),
            address: "1 Main St, Springfield, IL 62701".to_string(),
            coordinate: Coordinate::new(39.78, -89.65),
            created_at: Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 1, 9, 30, 0).unwrap()
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn batch_continues_past_failing_item() {
        let store = FakeStore::failing_on(&["item-3"]);
        let shop = shop();
        let items = names(&["item-1", "item-2", "item-3", "item-4", "item-5"]);

        let outcome = apply_batch(
            &store,
            ReportBatch {
                store: &shop,
                user_id: "u-1",
                now: now(),
                in_stock: true,
                item_names: &items,
            },
        )
        .await;

        assert_eq!(outcome.applied, 4);
        assert_eq!(outcome.failures, 1);
        let failure = outcome.clone().into_result().expect_err("should fail");
        assert_eq!(failure.failures, 1);
        assert_eq!(failure.first.item_name, "item-3");
        assert!(failure.to_string().contains("encountered 1 failures"));
        assert!(failure.to_string().contains("simulated storage failure for item-3"));

        for name in ["item-1", "item-2", "item-4", "item-5"] {
            let item = store.get(name).expect("item persisted");
            assert_eq!(item.reports.len(), 1);
            assert_eq!(item.reports[0].seen_count, 1);
        }
        assert!(store.get("item-3").is_none());
    }

    #[tokio::test]
    async fn first_error_is_kept_and_all_failures_counted() {
        let store = FakeStore::failing_on(&["b", "d"]);
        let shop = shop();
        let items = names(&["a", "b", "c", "d"]);

        let failure = apply_batch(
            &store,
            ReportBatch {
                store: &shop,
                user_id: "u-1",
                now: now(),
                in_stock: false,
                item_names: &items,
            },
        )
        .await
        .into_result()
        .expect_err("should fail");

        assert_eq!(failure.failures, 2);
        assert_eq!(failure.applied, 2);
        assert_eq!(failure.first.item_name, "b");
    }

    #[tokio::test]
    async fn upload_applies_both_lists_and_reports_success() {
        let store = FakeStore::default();
        let shop = shop();

        let applied = apply_upload(
            &store,
            &shop,
            "u-1",
            now(),
            &names(&["rice", "beans"]),
            &names(&["flour"]),
        )
        .await
        .into_result()
        .expect("upload succeeds");

        assert_eq!(applied, 3);
        assert!(store.get("rice").expect("rice").reports[0].in_stock);
        assert!(!store.get("flour").expect("flour").reports[0].in_stock);
    }

    #[tokio::test]
    async fn upload_tallies_failures_across_lists() {
        let store = FakeStore::failing_on(&["rice", "flour"]);
        let shop = shop();

        let failure = apply_upload(
            &store,
            &shop,
            "u-1",
            now(),
            &names(&["rice", "beans"]),
            &names(&["flour", "yeast"]),
        )
        .await
        .into_result()
        .expect_err("should fail");

        assert_eq!(failure.failures, 2);
        assert_eq!(failure.applied, 2);
        assert_eq!(failure.first.item_name, "rice");
        assert!(store.get("yeast").is_some());
    }

    #[tokio::test]
    async fn repeated_upload_from_same_user_does_not_double_count() {
        let store = FakeStore::default();
        let shop = shop();
        let items = names(&["masks"]);

        for _ in 0..2 {
            apply_upload(&store, &shop, "u-1", now(), &items, &[])
                .await
                .into_result()
                .expect("upload succeeds");
        }
        apply_upload(&store, &shop, "u-2", now(), &items, &[])
            .await
            .into_result()
            .expect("upload succeeds");

        let item = store.get("masks").expect("masks");
        assert_eq!(item.reports.len(), 1);
        assert_eq!(item.reports[0].seen_count, 2);
        assert_eq!(item.reports[0].observers.len(), 2);
    }

    #[tokio::test]
    async fn created_counts_only_new_reports() {
        let store = FakeStore::default();
        let shop = shop();

        let first = apply_upload(
            &store,
            &shop,
            "u-1",
            now(),
            &names(&["rice", "beans"]),
            &names(&["flour"]),
        )
        .await;
        assert_eq!(first.applied, 3);
        assert_eq!(first.created, 3);

        let corroborated = apply_upload(
            &store,
            &shop,
            "u-2",
            now(),
            &names(&["rice"]),
            &names(&["rice", "beans"]),
        )
        .await;
        assert_eq!(corroborated.applied, 3);
        assert_eq!(corroborated.created, 2);

        let repeated = apply_upload(&store, &shop, "u-2", now(), &names(&["rice"]), &[]).await;
        assert_eq!(repeated.applied, 1);
        assert_eq!(repeated.created, 0);
    }
}
