#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{BTreeSet, HashMap};

    use cocotile::folds::{
        downsample_negatives, group_tiles, kfold_groups, negative_keep_count, split_groups,
        SplitStats,
    };
    use cocotile::{build_folds, Error, FoldConfig, SplitRatios, TileSummary};

    /// `groups` groups of three tiles each; the first tile of every even
    /// group is positive.
    fn inventory(groups: usize) -> Vec<TileSummary> {
        let mut tiles = Vec::new();
        for g in 0..groups {
            for t in 0..3 {
                let id = (g * 3 + t) as u64 + 1;
                tiles.push(TileSummary::new(id, format!("image_{:02}", g), g % 2 == 0 && t == 0));
            }
        }
        tiles
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("g{}", i)).collect()
    }

    #[test]
    fn test_kfold_chunk_sizes() {
        let mut rng = StdRng::seed_from_u64(1);
        let chunks = kfold_groups(&names(7), 3, &mut rng);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);

        let all: BTreeSet<String> = chunks.into_iter().flatten().collect();
        assert_eq!(all, names(7).into_iter().collect::<BTreeSet<String>>());
    }

    #[test]
    fn test_split_groups_sizes() {
        let mut rng = StdRng::seed_from_u64(3);
        let (train, val) = split_groups(&names(8), 0.2, &mut rng);
        assert_eq!((train.len(), val.len()), (6, 2));

        // The first side is never emptied.
        let (train, val) = split_groups(&names(3), 0.99, &mut rng);
        assert_eq!((train.len(), val.len()), (1, 2));

        let (train, val) = split_groups(&names(4), 0.0, &mut rng);
        assert_eq!((train.len(), val.len()), (4, 0));
    }

    #[test]
    fn test_split_single_group_stays_in_train() {
        let mut rng = StdRng::seed_from_u64(3);
        let (train, val) = split_groups(&names(1), 0.5, &mut rng);
        assert_eq!(train, names(1));
        assert!(val.is_empty());

        let (train, val) = split_groups(&[], 0.5, &mut rng);
        assert!(train.is_empty() && val.is_empty());
    }

    #[test]
    fn test_negative_keep_count() {
        assert_eq!(negative_keep_count(10, 0.3), 3);
        assert_eq!(negative_keep_count(3, 0.1), 1);
        assert_eq!(negative_keep_count(7, 1.0), 7);
        assert_eq!(negative_keep_count(0, 0.5), 0);
        assert_eq!(negative_keep_count(5, 0.5), 3);
    }

    #[test]
    fn test_keep_count_rounding() {
        // 10 * 0.3 is 3.0000000000000004 in floating point.
        assert_eq!(negative_keep_count(10, 0.3), 3);
        assert_eq!(negative_keep_count(9, 0.1 / 0.9), 1);
        // A share just above an integer still rounds up.
        assert_eq!(negative_keep_count(1000, 0.002_000_000_000_8), 3);
        assert_eq!(negative_keep_count(1000, 0.002), 2);
    }

    #[test]
    fn test_downsample_keeps_all_positives() {
        let mut tiles: Vec<TileSummary> = (1..=4).map(|id| TileSummary::new(id, "a", true)).collect();
        tiles.extend((5..=14).map(|id| TileSummary::new(id, "b", false)));

        let kept = downsample_negatives(tiles, 0.3, &mut StdRng::seed_from_u64(11));
        assert_eq!(kept.iter().filter(|t| t.positive).count(), 4);
        assert_eq!(kept.iter().filter(|t| !t.positive).count(), 3);

        let ids: BTreeSet<u64> = kept.iter().map(|t| t.tile_id).collect();
        assert_eq!(ids.len(), 7);
        assert!((1..=4).all(|id| ids.contains(&id)));
    }

    #[test]
    fn test_group_tiles_collects_by_name() {
        let groups = group_tiles(&inventory(4));
        assert_eq!(groups.len(), 4);
        assert!(groups.values().all(|tiles| tiles.len() == 3));
        let keys: Vec<&String> = groups.keys().collect();
        assert_eq!(keys[0], "image_00");
    }

    #[test]
    fn test_folds_cover_every_group_once_as_test() {
        let tiles = inventory(10);
        let config = FoldConfig::default();
        let folds = build_folds(&tiles, &config).unwrap();
        assert_eq!(folds.len(), 5);

        let mut test_count: HashMap<String, usize> = HashMap::new();
        for fold in &folds {
            assert_eq!(fold.test_groups.len(), 2);
            for group in &fold.test_groups {
                *test_count.entry(group.clone()).or_default() += 1;
            }
        }
        assert_eq!(test_count.len(), 10);
        assert!(test_count.values().all(|&c| c == 1));
    }

    #[test]
    fn test_folds_never_leak_groups() {
        let tiles = inventory(10);
        let group_of: HashMap<u64, &str> = tiles.iter().map(|t| (t.tile_id, t.group.as_str())).collect();
        let folds = build_folds(&tiles, &FoldConfig::default()).unwrap();

        for fold in &folds {
            let train: BTreeSet<&String> = fold.train_groups.iter().collect();
            let val: BTreeSet<&String> = fold.val_groups.iter().collect();
            let test: BTreeSet<&String> = fold.test_groups.iter().collect();
            assert!(train.is_disjoint(&val));
            assert!(train.is_disjoint(&test));
            assert!(val.is_disjoint(&test));
            assert_eq!(train.len() + val.len() + test.len(), 10);
            assert_eq!(val.len(), 2);

            for (ids, groups) in [(&fold.train, &train), (&fold.val, &val), (&fold.test, &test)] {
                for id in ids {
                    assert!(groups.contains(&group_of[id].to_string()));
                }
            }
            assert_eq!(fold.train.len() + fold.val.len() + fold.test.len(), 30);
        }
    }

    #[test]
    fn test_folds_are_deterministic() {
        let tiles = inventory(9);
        let config = FoldConfig {
            folds: 3,
            negative_keep: Some(0.5),
            ..FoldConfig::default()
        };
        let first = build_folds(&tiles, &config).unwrap();

        let mut reversed = tiles.clone();
        reversed.reverse();
        let second = build_folds(&reversed, &config).unwrap();

        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.train_groups, b.train_groups);
            assert_eq!(a.val_groups, b.val_groups);
            assert_eq!(a.test_groups, b.test_groups);
        }
        assert_eq!(first, build_folds(&tiles, &config).unwrap());
    }

    #[test]
    fn test_negative_downsampling_only_touches_train() {
        let tiles = inventory(10);
        let config = FoldConfig {
            negative_keep: Some(0.25),
            ..FoldConfig::default()
        };
        let baseline = build_folds(&tiles, &FoldConfig::default()).unwrap();
        let sampled = build_folds(&tiles, &config).unwrap();

        for (full, down) in baseline.iter().zip(&sampled) {
            assert_eq!(full.val, down.val);
            assert_eq!(full.test, down.test);
            assert_eq!(down.stats.train.positives, full.stats.train.positives);
            let negatives = full.stats.train.negatives;
            assert_eq!(
                down.stats.train.negatives,
                negative_keep_count(negatives, 0.25)
            );
            assert_eq!(down.stats.dropped_negatives, negatives - down.stats.train.negatives);
            assert_eq!(full.stats.dropped_negatives, 0);
        }
    }

    #[test]
    fn test_not_enough_groups() {
        let tiles = inventory(3);
        let err = build_folds(&tiles, &FoldConfig::default()).unwrap_err();
        assert!(matches!(err, Error::NotEnoughGroups { folds: 5, groups: 3 }));
    }

    #[test]
    fn test_invalid_fold_settings() {
        let zero = FoldConfig {
            folds: 0,
            ..FoldConfig::default()
        };
        assert!(matches!(zero.validate_settings(), Err(Error::InvalidFoldCount(0))));

        let val = FoldConfig {
            val_fraction: 1.0,
            ..FoldConfig::default()
        };
        assert!(matches!(val.validate_settings(), Err(Error::InvalidFraction { .. })));

        let holdout = FoldConfig {
            folds: 1,
            holdout: SplitRatios {
                train: 0.7,
                val: 0.2,
                test: 0.2,
            },
            ..FoldConfig::default()
        };
        assert!(matches!(
            holdout.validate_settings(),
            Err(Error::InvalidSplitRatios { .. })
        ));
    }

    #[test]
    fn test_holdout_split() {
        let tiles = inventory(10);
        let config = FoldConfig {
            folds: 1,
            ..FoldConfig::default()
        };
        let folds = build_folds(&tiles, &config).unwrap();
        assert_eq!(folds.len(), 1);

        let fold = &folds[0];
        assert_eq!(fold.test_groups.len(), 1);
        assert_eq!(fold.val_groups.len(), 1);
        assert_eq!(fold.train_groups.len(), 8);
        assert_eq!(fold.train.len() + fold.val.len() + fold.test.len(), 30);
    }

    #[test]
    fn test_split_stats() {
        let tiles = vec![
            TileSummary::new(1, "a", true),
            TileSummary::new(2, "a", false),
            TileSummary::new(3, "a", false),
        ];
        let stats = SplitStats::from_tiles(&tiles);
        assert_eq!((stats.tiles, stats.positives, stats.negatives), (3, 1, 2));
        assert_relative_eq!(stats.positive_ratio, 0.3333);
        assert_eq!(SplitStats::from_tiles(&[]).positive_ratio, 0.0);
    }
}
