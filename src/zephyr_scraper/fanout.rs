// zephyr_scraper - Weather station telemetry acquisition and health monitoring
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Helpers for running work per type group: one task per group, bounded concurrency within.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::task::JoinError;

/// Default number of in-flight adapter calls within a single type group.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Group `items` by the type tag returned by `key`, preserving the input order within each group.
pub fn partition_by_type<T, F>(items: Vec<T>, key: F) -> BTreeMap<String, Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        let k = key(&item).to_owned();
        groups.entry(k).or_default().push(item);
    }

    groups
}

/// Spawn `run` for every group and wait for all of them, whether they succeed or not.
///
/// A group that panics is reported as a `JoinError` for that group only.
pub async fn settle_groups<T, R, F, Fut>(groups: BTreeMap<String, Vec<T>>, run: F) -> Vec<(String, Result<R, JoinError>)>
where
    F: Fn(String, Vec<T>) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let (types, tasks): (Vec<String>, Vec<_>) = groups
        .into_iter()
        .map(|(type_tag, items)| {
            let task = tokio::spawn(run(type_tag.clone(), items));
            (type_tag, task)
        })
        .unzip();

    types.into_iter().zip(join_all(tasks).await).collect()
}

/// Run `f` for every item with at most `limit` futures in flight, collecting results in
/// completion order.
pub async fn bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items).map(f).buffer_unordered(limit.max(1)).collect().await
}

#[cfg(test)]
mod tests {
    use super::{bounded, partition_by_type, settle_groups};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_partition_by_type() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let groups = partition_by_type(items, |i| i.0);

        assert_eq!(2, groups.len());
        assert_eq!(vec![("a", 1), ("a", 3)], groups["a"]);
        assert_eq!(vec![("b", 2)], groups["b"]);
    }

    #[tokio::test]
    async fn test_settle_groups_isolates_panics() {
        let groups = partition_by_type(vec!["good", "bad"], |i| *i);
        let results = settle_groups(groups, |type_tag, items| async move {
            if type_tag == "bad" {
                panic!("group exploded");
            }
            items.len()
        })
        .await;

        assert_eq!(2, results.len());
        for (type_tag, res) in results {
            match type_tag.as_str() {
                "good" => assert_eq!(1, res.unwrap()),
                "bad" => assert!(res.unwrap_err().is_panic()),
                other => panic!("unexpected group {}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_bounded_limits_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = bounded((0..20).collect(), 5, |i: usize| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i
            }
        })
        .await;

        assert_eq!(20, results.len());
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }
}
