//! Adaptive map-reduce over chunked work.
//!
//! Items are cut into ordered chunks and each chunk is mapped concurrently,
//! bounded by a semaphore. A chunk whose map fails is halved and each half is
//! retried within the same task; halving stops at the size floor or the depth
//! limit, where the mapper's deterministic fallback produces the result
//! instead. Partial results come back in chunk order so the stage's reduce can
//! restore any ordering the concurrent maps lost.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Recovery policy for one executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Chunks mapped at the same time.
    pub max_concurrency: usize,
    /// Units with this many items or fewer are not split further.
    pub min_unit_size: usize,
    /// Maximum number of halvings below a top-level chunk.
    pub max_depth: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            min_unit_size: 1,
            max_depth: 12,
        }
    }
}

/// Cut `items` into windows of `size` that advance by `size - overlap`.
///
/// The last window always reaches the end of the input. A `size` of zero
/// yields the whole input as one chunk; empty input yields no chunks.
pub fn chunked<T: Clone>(items: &[T], size: usize, overlap: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![items.to_vec()];
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < items.len() {
        let end = (start + size).min(items.len());
        out.push(items[start..end].to_vec());
        if end >= items.len() {
            break;
        }
        start += step;
    }
    out
}

/// A slice of stage input handed to a mapper.
#[derive(Debug, Clone)]
pub struct WorkUnit<T> {
    pub items: Vec<T>,
    /// Item budget of this unit. Strictly smaller than its parent's.
    pub budget: usize,
    /// Correlation tag, e.g. `align#3.1.2`.
    pub tag: String,
    pub depth: u32,
    /// Index of the top-level chunk this unit descends from.
    pub chunk_index: usize,
}

impl<T: Clone> WorkUnit<T> {
    pub fn root(stage: &str, chunk_index: usize, items: Vec<T>) -> Self {
        Self {
            budget: items.len(),
            items,
            tag: format!("{stage}#{}", chunk_index + 1),
            depth: 0,
            chunk_index,
        }
    }

    /// Halve the unit. `None` when it holds fewer than two items.
    pub fn split(&self) -> Option<(Self, Self)> {
        if self.items.len() < 2 {
            return None;
        }
        let mid = self.items.len() / 2;
        let child = |items: Vec<T>, n: u8| Self {
            budget: items.len(),
            items,
            tag: format!("{}.{n}", self.tag),
            depth: self.depth + 1,
            chunk_index: self.chunk_index,
        };
        Some((
            child(self.items[..mid].to_vec(), 1),
            child(self.items[mid..].to_vec(), 2),
        ))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Order-preserving merge of sibling partial results.
///
/// Implementations concatenate list fields in argument order and drop
/// duplicates by a stage-specific identity, sum counters, and keep the first
/// non-empty value of first-wins fields.
pub trait PartialMerge: Sized {
    fn merge(parts: Vec<Self>) -> Self;
}

/// Stage-specific map step with its deterministic fallback.
#[async_trait]
pub trait ChunkMapper<T>: Send + Sync + 'static {
    type Output: PartialMerge + Send + 'static;

    /// Map one unit, typically through a model call.
    async fn map(&self, unit: &WorkUnit<T>) -> crate::Result<Self::Output>;

    /// Local best-effort result for a unit that could not be mapped. Must not fail.
    fn fallback(&self, unit: &WorkUnit<T>) -> Self::Output;
}

/// Outcome counters of one map phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapReport {
    pub stage: String,
    pub chunks: usize,
    /// Top-level chunks mapped on the first try.
    pub direct: usize,
    /// Units that failed and were split in half.
    pub splits: usize,
    /// Units resolved by the deterministic fallback.
    pub fallbacks: usize,
    /// Failed map calls at any depth.
    pub failed_maps: usize,
}

impl fmt::Display for MapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} chunks, {} direct, {} splits, {} fallbacks",
            self.stage, self.chunks, self.direct, self.splits, self.fallbacks
        )
    }
}

#[derive(Default)]
struct Counters {
    direct: AtomicUsize,
    splits: AtomicUsize,
    fallbacks: AtomicUsize,
    failed_maps: AtomicUsize,
}

/// Bounded-concurrency map-reduce with recursive failure narrowing.
#[derive(Debug, Clone, Default)]
pub struct ChunkRecoveryExecutor {
    config: RecoveryConfig,
}

impl ChunkRecoveryExecutor {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Chunk `items`, map every chunk with recovery, and fold the ordered
    /// partials with `reduce`.
    pub async fn map_reduce<T, M, O>(
        &self,
        stage: &str,
        items: &[T],
        chunk_size: usize,
        overlap: usize,
        mapper: Arc<M>,
        reduce: impl FnOnce(Vec<M::Output>) -> O,
    ) -> (O, MapReport)
    where
        T: Clone + Send + Sync + 'static,
        M: ChunkMapper<T>,
    {
        let chunks = chunked(items, chunk_size, overlap);
        let (partials, report) = self.map_chunks(stage, chunks, mapper).await;
        (reduce(partials), report)
    }

    /// Map pre-cut chunks. The returned partials are in chunk order, one per
    /// non-empty chunk.
    pub async fn map_chunks<T, M>(
        &self,
        stage: &str,
        chunks: Vec<Vec<T>>,
        mapper: Arc<M>,
    ) -> (Vec<M::Output>, MapReport)
    where
        T: Clone + Send + Sync + 'static,
        M: ChunkMapper<T>,
    {
        let units: Vec<WorkUnit<T>> = chunks
            .into_iter()
            .filter(|c| !c.is_empty())
            .enumerate()
            .map(|(i, items)| WorkUnit::root(stage, i, items))
            .collect();
        let total = units.len();
        info!(stage, chunks = total, workers = self.config.max_concurrency, "Mapping chunks");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let counters = Arc::new(Counters::default());
        let mut tasks = JoinSet::new();

        for unit in units.iter().cloned() {
            let semaphore = semaphore.clone();
            let counters = counters.clone();
            let mapper = mapper.clone();
            let policy = self.config.clone();
            tasks.spawn(async move {
                let index = unit.chunk_index;
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let output = recover(mapper.as_ref(), unit, &policy, &counters).await;
                (index, output)
            });
        }

        let mut slots: Vec<Option<M::Output>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, output)) => slots[index] = Some(output),
                Err(e) => warn!(stage, error = %e, "Chunk task aborted"),
            }
        }

        let partials: Vec<M::Output> = slots
            .into_iter()
            .zip(units.iter())
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    mapper.fallback(unit)
                })
            })
            .collect();

        let report = MapReport {
            stage: stage.to_string(),
            chunks: total,
            direct: counters.direct.load(Ordering::Relaxed),
            splits: counters.splits.load(Ordering::Relaxed),
            fallbacks: counters.fallbacks.load(Ordering::Relaxed),
            failed_maps: counters.failed_maps.load(Ordering::Relaxed),
        };
        info!(%report, "Map phase finished");
        (partials, report)
    }
}

/// Map a unit, narrowing on failure until it succeeds or reaches the fallback.
fn recover<'a, T, M>(
    mapper: &'a M,
    unit: WorkUnit<T>,
    policy: &'a RecoveryConfig,
    counters: &'a Counters,
) -> BoxFuture<'a, M::Output>
where
    T: Clone + Send + Sync + 'static,
    M: ChunkMapper<T>,
{
    async move {
        let error = match mapper.map(&unit).await {
            Ok(output) => {
                if unit.depth == 0 {
                    counters.direct.fetch_add(1, Ordering::Relaxed);
                }
                debug!(tag = %unit.tag, size = unit.len(), "Unit mapped");
                return output;
            }
            Err(e) => e,
        };
        counters.failed_maps.fetch_add(1, Ordering::Relaxed);

        let splittable = unit.len() > policy.min_unit_size.max(1) && unit.depth < policy.max_depth;
        if splittable && let Some((left, right)) = unit.split() {
            warn!(
                tag = %unit.tag,
                size = unit.len(),
                depth = unit.depth,
                error = %error,
                "Unit failed, splitting in half"
            );
            counters.splits.fetch_add(1, Ordering::Relaxed);
            let left = recover(mapper, left, policy, counters).await;
            let right = recover(mapper, right, policy, counters).await;
            return M::Output::merge(vec![left, right]);
        }

        warn!(
            tag = %unit.tag,
            size = unit.len(),
            depth = unit.depth,
            error = %error,
            "Unit failed at recovery floor, using fallback"
        );
        counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        mapper.fallback(&unit)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::time::Duration;

    /// Ordered, deduplicated collection of mapped items.
    #[derive(Debug, Clone, PartialEq, Default)]
    struct Collected {
        values: Vec<u32>,
        fallback_values: usize,
    }

    impl PartialMerge for Collected {
        fn merge(parts: Vec<Self>) -> Self {
            let mut out = Collected::default();
            for part in parts {
                for v in part.values {
                    if !out.values.contains(&v) {
                        out.values.push(v);
                    }
                }
                out.fallback_values += part.fallback_values;
            }
            out
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        AlwaysOk,
        AlwaysFail,
        FailAboveOne,
    }

    struct TestMapper {
        behavior: Behavior,
        seen: Mutex<Vec<(String, usize)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl TestMapper {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                seen: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ChunkMapper<u32> for TestMapper {
        type Output = Collected;

        async fn map(&self, unit: &WorkUnit<u32>) -> crate::Result<Collected> {
            self.seen.lock().push((unit.tag.clone(), unit.len()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let ok = match self.behavior {
                Behavior::AlwaysOk => true,
                Behavior::AlwaysFail => false,
                Behavior::FailAboveOne => unit.len() == 1,
            };
            if ok {
                Ok(Collected {
                    values: unit.items.clone(),
                    fallback_values: 0,
                })
            } else {
                Err(crate::Error::Other("model unavailable".to_string()))
            }
        }

        fn fallback(&self, unit: &WorkUnit<u32>) -> Collected {
            Collected {
                values: unit.items.clone(),
                fallback_values: unit.len(),
            }
        }
    }

    fn executor(max_depth: u32) -> ChunkRecoveryExecutor {
        ChunkRecoveryExecutor::new(RecoveryConfig {
            max_concurrency: 3,
            min_unit_size: 1,
            max_depth,
        })
    }

    #[rstest]
    #[case(5, 2, 0, vec![vec![0, 1], vec![2, 3], vec![4]])]
    #[case(5, 3, 1, vec![vec![0, 1, 2], vec![2, 3, 4]])]
    #[case(4, 4, 0, vec![vec![0, 1, 2, 3]])]
    #[case(3, 0, 0, vec![vec![0, 1, 2]])]
    #[case(3, 2, 5, vec![vec![0, 1], vec![1, 2]])]
    #[case(0, 3, 0, vec![])]
    fn test_chunked(
        #[case] n: u32,
        #[case] size: usize,
        #[case] overlap: usize,
        #[case] expected: Vec<Vec<u32>>,
    ) {
        let items: Vec<u32> = (0..n).collect();
        assert_eq!(chunked(&items, size, overlap), expected);
    }

    #[test]
    fn test_split_shrinks_budget() {
        let unit = WorkUnit::root("s", 0, vec![1, 2, 3, 4, 5]);
        let (left, right) = unit.split().unwrap();
        assert_eq!(left.items, vec![1, 2]);
        assert_eq!(right.items, vec![3, 4, 5]);
        assert!(left.budget < unit.budget && right.budget < unit.budget);
        assert_eq!(left.tag, "s#1.1");
        assert_eq!(right.depth, 1);
        assert!(WorkUnit::root("s", 0, vec![1]).split().is_none());
    }

    #[tokio::test]
    async fn test_result_independent_of_chunking() {
        let items: Vec<u32> = (0..37).collect();
        let mut results = Vec::new();
        for size in [1, 2, 5, 8, 37, 100] {
            for overlap in [0, 1] {
                let (merged, report) = executor(8)
                    .map_reduce("prop", &items, size, overlap, TestMapper::new(Behavior::AlwaysOk), Collected::merge)
                    .await;
                assert_eq!(report.fallbacks, 0);
                results.push(merged);
            }
        }
        assert!(results.iter().all(|r| r.values == items));
    }

    #[tokio::test]
    async fn test_always_failing_mapper_terminates_with_fallback() {
        let items: Vec<u32> = (0..20).collect();
        let mapper = TestMapper::new(Behavior::AlwaysFail);
        let (merged, report) = executor(16)
            .map_reduce("fail", &items, 8, 0, mapper.clone(), Collected::merge)
            .await;

        assert_eq!(merged.values, items);
        assert_eq!(merged.fallback_values, 20);
        assert_eq!(report.fallbacks, 20);
        assert_eq!(report.direct, 0);
        // Every unit seen has a parent that was strictly larger.
        let seen = mapper.seen.lock().clone();
        for (tag, len) in &seen {
            if let Some((parent, _)) = tag.rsplit_once('.') {
                let parent_len = seen.iter().find(|(t, _)| t == parent).map(|(_, l)| *l).unwrap();
                assert!(parent_len > *len);
            }
        }
    }

    #[tokio::test]
    async fn test_singletons_recover_without_data_loss() {
        let items: Vec<u32> = (0..13).collect();
        let (merged, report) = executor(16)
            .map_reduce("narrow", &items, 6, 0, TestMapper::new(Behavior::FailAboveOne), Collected::merge)
            .await;

        assert_eq!(merged.values, items);
        assert_eq!(merged.fallback_values, 0);
        assert_eq!(report.fallbacks, 0);
        assert!(report.splits > 0);
    }

    #[tokio::test]
    async fn test_depth_limit_goes_straight_to_fallback() {
        let items: Vec<u32> = (0..8).collect();
        let mapper = TestMapper::new(Behavior::FailAboveOne);
        let (merged, report) = executor(0)
            .map_reduce("flat", &items, 4, 0, mapper.clone(), Collected::merge)
            .await;

        assert_eq!(merged.values, items);
        assert_eq!(report.splits, 0);
        assert_eq!(report.fallbacks, 2);
        assert_eq!(mapper.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_size_floor_stops_splitting() {
        let items: Vec<u32> = (0..8).collect();
        let exec = ChunkRecoveryExecutor::new(RecoveryConfig {
            max_concurrency: 2,
            min_unit_size: 4,
            max_depth: 10,
        });
        let (merged, report) = exec
            .map_reduce("floor", &items, 8, 0, TestMapper::new(Behavior::FailAboveOne), Collected::merge)
            .await;
        assert_eq!(merged.values, items);
        assert_eq!(report.splits, 1);
        assert_eq!(report.fallbacks, 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_order_kept() {
        let mapper = Arc::new(TestMapper {
            delay: Duration::from_millis(20),
            ..Arc::try_unwrap(TestMapper::new(Behavior::AlwaysOk)).ok().unwrap()
        });
        let chunks: Vec<Vec<u32>> = (0..10).map(|i| vec![i]).collect();
        let (partials, report) = executor(4).map_chunks("bounded", chunks, mapper.clone()).await;

        assert_eq!(report.chunks, 10);
        assert_eq!(report.direct, 10);
        assert!(mapper.peak.load(Ordering::SeqCst) <= 3);
        let order: Vec<u32> = partials.iter().map(|p| p.values[0]).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_input_reduces_nothing() {
        let (merged, report) = executor(4)
            .map_reduce("empty", &[] as &[u32], 4, 0, TestMapper::new(Behavior::AlwaysOk), Collected::merge)
            .await;
        assert_eq!(merged, Collected::default());
        assert_eq!(report.chunks, 0);
    }
}
