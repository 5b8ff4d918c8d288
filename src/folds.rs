//! Group-aware cross-validation folds.
//!
//! Every tile belongs to the group of its source image and groups are the
//! unit of assignment: a group lands in exactly one split of each fold and in
//! exactly one fold's test set. All shuffles are driven by seeded `StdRng`s,
//! one per fold and purpose, so a seed reproduces the whole assignment.

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

pub type TileId = u64;

/// What the partitioner needs to know about a generated tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSummary {
    pub tile_id: TileId,
    pub group: String,
    pub positive: bool,
}

impl TileSummary {
    pub fn new(tile_id: TileId, group: impl Into<String>, positive: bool) -> Self {
        Self {
            tile_id,
            group: group.into(),
            positive,
        }
    }
}

/// Train/val/test proportions used when a single holdout fold is requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> Result<()> {
        let parts = [self.train, self.val, self.test];
        let in_range = parts.iter().all(|p| (0.0..=1.0).contains(p));
        if !in_range || (parts.iter().sum::<f64>() - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidSplitRatios {
                train: self.train,
                val: self.val,
                test: self.test,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldConfig {
    pub folds: usize,
    /// Share of the non-test groups moved to validation.
    pub val_fraction: f64,
    pub seed: u64,
    /// Fraction of negative training tiles to keep; `None` keeps them all.
    pub negative_keep: Option<f64>,
    /// Used instead of K-fold rotation when `folds == 1`.
    pub holdout: SplitRatios,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            val_fraction: 0.2,
            seed: 42,
            negative_keep: None,
            holdout: SplitRatios::default(),
        }
    }
}

impl FoldConfig {
    /// Checks that do not depend on the dataset.
    pub fn validate_settings(&self) -> Result<()> {
        if self.folds == 0 {
            return Err(Error::InvalidFoldCount(self.folds));
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            return Err(Error::InvalidFraction {
                name: "validation fraction",
                value: self.val_fraction,
                range: "[0, 1)",
            });
        }
        if let Some(keep) = self.negative_keep {
            if !(keep > 0.0 && keep <= 1.0) {
                return Err(Error::InvalidFraction {
                    name: "negative keep fraction",
                    value: keep,
                    range: "(0, 1]",
                });
            }
        }
        if self.folds == 1 {
            self.holdout.validate()?;
        }
        Ok(())
    }

    pub fn validate(&self, group_count: usize) -> Result<()> {
        self.validate_settings()?;
        if self.folds > group_count {
            return Err(Error::NotEnoughGroups {
                folds: self.folds,
                groups: group_count,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitStats {
    pub tiles: usize,
    pub positives: usize,
    pub negatives: usize,
    pub positive_ratio: f64,
}

impl SplitStats {
    pub fn from_tiles(tiles: &[TileSummary]) -> Self {
        let positives = tiles.iter().filter(|t| t.positive).count();
        let total = tiles.len();
        let positive_ratio = if total == 0 {
            0.0
        } else {
            (positives as f64 / total as f64 * 10_000.0).round() / 10_000.0
        };
        Self {
            tiles: total,
            positives,
            negatives: total - positives,
            positive_ratio,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldStats {
    pub train: SplitStats,
    pub val: SplitStats,
    pub test: SplitStats,
    /// Negative training tiles removed by down-sampling.
    pub dropped_negatives: usize,
}

/// Group and tile membership of one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldAssignment {
    pub index: usize,
    pub train_groups: Vec<String>,
    pub val_groups: Vec<String>,
    pub test_groups: Vec<String>,
    pub train: Vec<TileId>,
    pub val: Vec<TileId>,
    pub test: Vec<TileId>,
    pub stats: FoldStats,
}

/// Tiles keyed by group name; iteration order is the sorted group name so
/// shuffles start from the same sequence regardless of tiling order.
pub type Groups = BTreeMap<String, Vec<TileSummary>>;

pub fn group_tiles(tiles: &[TileSummary]) -> Groups {
    let mut groups = Groups::new();
    for tile in tiles {
        groups
            .entry(tile.group.clone())
            .or_default()
            .push(tile.clone());
    }
    groups
}

/// Shuffle `groups` and cut them into `k` chunks whose sizes differ by at
/// most one, larger chunks first.
pub fn kfold_groups<R: Rng + ?Sized>(groups: &[String], k: usize, rng: &mut R) -> Vec<Vec<String>> {
    let mut shuffled = groups.to_vec();
    shuffled.shuffle(rng);

    let k = k.max(1);
    let (base, extra) = (shuffled.len() / k, shuffled.len() % k);
    let mut rest = shuffled.as_slice();
    let mut chunks = Vec::with_capacity(k);
    for i in 0..k {
        let size = base + usize::from(i < extra);
        let (head, tail) = rest.split_at(size);
        chunks.push(head.to_vec());
        rest = tail;
    }
    chunks
}

/// Shuffle `groups` and move `ceil(len * fraction)` of them to the second
/// side, always leaving at least one group on the first side.
///
/// A single group cannot be split and stays entirely on the first side.
pub fn split_groups<R: Rng + ?Sized>(
    groups: &[String],
    fraction: f64,
    rng: &mut R,
) -> (Vec<String>, Vec<String>) {
    if groups.len() <= 1 {
        return (groups.to_vec(), Vec::new());
    }
    let mut shuffled = groups.to_vec();
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let second = (ceil_share(n, fraction) as usize).min(n - 1);
    let first = shuffled.split_off(second);
    (first, shuffled)
}

/// Number of negatives kept out of `count` for a keep fraction.
pub fn negative_keep_count(count: usize, keep: f64) -> usize {
    if count == 0 {
        return 0;
    }
    let wanted = ceil_share(count, keep).max(1.0) as usize;
    wanted.min(count)
}

// Rounded to nine decimals first so 10 * 0.3 = 3.0000000000000004 stays 3.
fn ceil_share(count: usize, fraction: f64) -> f64 {
    let share = (count as f64 * fraction * 1e9).round() / 1e9;
    share.ceil().max(0.0)
}

/// Keep every positive tile and a uniform sample of negatives, then shuffle.
pub fn downsample_negatives<R: Rng + ?Sized>(
    tiles: Vec<TileSummary>,
    keep: f64,
    rng: &mut R,
) -> Vec<TileSummary> {
    let (mut kept, negatives): (Vec<_>, Vec<_>) = tiles.into_iter().partition(|t| t.positive);
    let target = negative_keep_count(negatives.len(), keep);
    let chosen = index::sample(rng, negatives.len(), target);
    kept.extend(chosen.into_iter().map(|i| negatives[i].clone()));
    kept.shuffle(rng);
    kept
}

fn mix_seed(seed: u64, fold: usize, stream: u64) -> u64 {
    seed ^ (fold as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ stream.rotate_left(32)
}

fn split_rng(seed: u64, fold: usize) -> StdRng {
    StdRng::seed_from_u64(mix_seed(seed, fold, 1))
}

fn sampling_rng(seed: u64, fold: usize) -> StdRng {
    StdRng::seed_from_u64(mix_seed(seed, fold, 2))
}

fn collect_tiles(groups: &Groups, names: &[String]) -> Vec<TileSummary> {
    names
        .iter()
        .filter_map(|name| groups.get(name))
        .flatten()
        .cloned()
        .collect()
}

fn ids(tiles: &[TileSummary]) -> Vec<TileId> {
    tiles.iter().map(|t| t.tile_id).collect()
}

fn assemble(
    index: usize,
    train_groups: Vec<String>,
    val_groups: Vec<String>,
    test_groups: Vec<String>,
    groups: &Groups,
    config: &FoldConfig,
) -> FoldAssignment {
    let mut train = collect_tiles(groups, &train_groups);
    let val = collect_tiles(groups, &val_groups);
    let test = collect_tiles(groups, &test_groups);

    let before = train.len();
    if let Some(keep) = config.negative_keep {
        train = downsample_negatives(train, keep, &mut sampling_rng(config.seed, index));
    }

    FoldAssignment {
        index,
        stats: FoldStats {
            train: SplitStats::from_tiles(&train),
            val: SplitStats::from_tiles(&val),
            test: SplitStats::from_tiles(&test),
            dropped_negatives: before - train.len(),
        },
        train: ids(&train),
        val: ids(&val),
        test: ids(&test),
        train_groups,
        val_groups,
        test_groups,
    }
}

/// Partition the tile inventory into folds.
///
/// With `folds >= 2` each fold takes one K-fold chunk as test and splits the
/// remaining groups into train/val. With `folds == 1` a single holdout
/// train/val/test split is produced from [`FoldConfig::holdout`].
pub fn build_folds(tiles: &[TileSummary], config: &FoldConfig) -> Result<Vec<FoldAssignment>> {
    let groups = group_tiles(tiles);
    let names: Vec<String> = groups.keys().cloned().collect();
    config.validate(names.len())?;

    let mut rng = StdRng::seed_from_u64(config.seed);

    if config.folds == 1 {
        let SplitRatios { train, val, test } = config.holdout;
        let (rest, test_groups) = split_groups(&names, test, &mut rng);
        let val_share = if train + val > 0.0 { val / (train + val) } else { 0.0 };
        let (train_groups, val_groups) = split_groups(&rest, val_share, &mut split_rng(config.seed, 0));
        return Ok(vec![assemble(0, train_groups, val_groups, test_groups, &groups, config)]);
    }

    let chunks = kfold_groups(&names, config.folds, &mut rng);
    let folds = chunks
        .iter()
        .enumerate()
        .map(|(index, test_groups)| {
            let rest: Vec<String> = chunks
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .flat_map(|(_, chunk)| chunk.iter().cloned())
                .collect();
            let (train_groups, val_groups) =
                split_groups(&rest, config.val_fraction, &mut split_rng(config.seed, index));
            assemble(index, train_groups, val_groups, test_groups.clone(), &groups, config)
        })
        .collect();
    Ok(folds)
}
