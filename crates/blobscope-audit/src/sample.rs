//! Bounded random draws over the active-blob set.

use rand::Rng;
use rand::seq::index;

use crate::config::SampleStrategy;

/// Draw `min(count, items.len())` items.
///
/// With replacement each draw picks a uniform index independently, so items
/// may repeat; without replacement the draws are distinct.
pub fn sample<'a, T, R>(items: &'a [T], count: usize, strategy: SampleStrategy, rng: &mut R) -> Vec<&'a T>
where
    R: Rng + ?Sized,
{
    let draws = count.min(items.len());
    match strategy {
        SampleStrategy::WithReplacement => (0..draws)
            .map(|_| &items[rng.gen_range(0..items.len())])
            .collect(),
        SampleStrategy::WithoutReplacement => index::sample(rng, items.len(), draws)
            .into_iter()
            .map(|i| &items[i])
            .collect(),
    }
}
