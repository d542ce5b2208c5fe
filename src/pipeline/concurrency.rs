/*!
 * Bounded-parallelism mapping over a list.
 *
 * Work items run as cooperative futures inside the caller's task; at most
 * `concurrency` of them are in flight at once. Results always come back in
 * input order regardless of completion order. Per-model-tier limits mirror
 * the provider rate limits.
 */

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Model tiers with separate concurrency caps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Cheap, fast model (transcription refinement, translation)
    Fast,
    /// Slower, high-quality model (proofreading, glossary, review)
    HighQuality,
}

/// Concurrency caps per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub fast: usize,
    pub high_quality: usize,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self { fast: 5, high_quality: 2 }
    }
}

impl TierLimits {
    /// Cap for a tier, never below 1
    pub fn for_tier(&self, tier: ModelTier) -> usize {
        match tier {
            ModelTier::Fast => self.fast.max(1),
            ModelTier::HighQuality => self.high_quality.max(1),
        }
    }
}

/// Run `worker` over every item with at most `concurrency` in flight.
///
/// The worker receives the item and its input index. One item's failure (when
/// `R` is a `Result`) does not affect siblings.
pub async fn map_in_order<T, R, F, Fut>(items: Vec<T>, concurrency: usize, worker: F) -> Vec<R>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = R>,
{
    let total = items.len();
    let worker = &worker;
    let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();

    let mut completed = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| async move { (index, worker(item, index).await) })
        .buffer_unordered(concurrency.max(1));

    while let Some((index, result)) = completed.next().await {
        slots[index] = Some(result);
    }

    slots.into_iter().flatten().collect()
}

/// Like [`map_in_order`], but stops at the first error and drops in-flight work.
pub async fn try_map_in_order<T, R, E, F, Fut>(items: Vec<T>, concurrency: usize, worker: F) -> Result<Vec<R>, E>
where
    F: Fn(T, usize) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let total = items.len();
    let worker = &worker;

    let mut indexed: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| async move { worker(item, index).await.map(|r| (index, r)) })
        .buffer_unordered(concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await?;

    debug_assert_eq!(indexed.len(), total);
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, r)| r).collect())
}
