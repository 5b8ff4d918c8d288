#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use clap::Parser;
    use image::{DynamicImage, GenericImageView};

    use cocotile::config::{validate_fraction, validate_keep, validate_size};
    use cocotile::{
        intersection_area, intersection_over_area, project_annotation, project_annotations,
        tile_rects, Annotation, Args, BBox, CocoDataset, Error, Segmentation, TileGrid, TileRect,
        TilingConfig, TilingEngine,
    };

    fn origins(config: &TilingConfig, width: u32, height: u32) -> Vec<(u32, u32)> {
        tile_rects(config, width, height)
            .unwrap()
            .iter()
            .map(|rect| rect.offset())
            .collect()
    }

    fn unit_rect(x: u32, y: u32, size: u32) -> TileRect {
        TileRect {
            x,
            y,
            width: size,
            height: size,
            scale: 1.0,
        }
    }

    #[test]
    fn test_intersection_area() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 10.0, 10.0);
        assert_relative_eq!(intersection_area(&a, &b), 25.0);

        // Touching edges share no area.
        let c = BBox::new(10.0, 0.0, 5.0, 5.0);
        assert_eq!(intersection_area(&a, &c), 0.0);
        assert!(a.is_disjoint(&c));
    }

    #[test]
    fn test_intersection_over_area() {
        let region = BBox::new(0.0, 0.0, 100.0, 100.0);
        let half = BBox::new(90.0, 0.0, 20.0, 10.0);
        assert_relative_eq!(intersection_over_area(&half, &region), 0.5);

        let inside = BBox::new(10.0, 10.0, 5.0, 5.0);
        assert_relative_eq!(intersection_over_area(&inside, &region), 1.0);

        let empty = BBox::new(10.0, 10.0, 0.0, 5.0);
        assert_eq!(intersection_over_area(&empty, &region), 0.0);
    }

    #[test]
    fn test_grid_exact_multiple() {
        let config = TilingConfig::new(512, 512, 0);
        assert_eq!(
            origins(&config, 1024, 1024),
            vec![(0, 0), (512, 0), (0, 512), (512, 512)]
        );
    }

    #[test]
    fn test_grid_edge_and_corner_order() {
        let config = TilingConfig::new(512, 512, 0);
        assert_eq!(
            origins(&config, 1100, 1100),
            vec![
                (0, 0),
                (512, 0),
                (0, 512),
                (512, 512),
                (588, 0),
                (588, 512),
                (0, 588),
                (512, 588),
                (588, 588),
            ]
        );
    }

    #[test]
    fn test_grid_single_step_image() {
        // 512 + 512 > 1000, so the regular walk stops after one step per axis.
        let config = TilingConfig::new(512, 512, 0);
        assert_eq!(
            origins(&config, 1000, 1000),
            vec![(0, 0), (488, 0), (0, 488), (488, 488)]
        );
    }

    #[test]
    fn test_grid_width_only_remainder() {
        let config = TilingConfig::new(100, 100, 0);
        let grid = TileGrid::new(&config, 250, 200).unwrap();
        assert!(grid.has_right_edge());
        assert!(!grid.has_bottom_edge());
        assert_eq!(
            grid.map(|r| r.offset()).collect::<Vec<_>>(),
            vec![(0, 0), (100, 0), (0, 100), (100, 100), (150, 0), (150, 100)]
        );
    }

    #[test]
    fn test_grid_height_only_remainder() {
        let config = TilingConfig::new(100, 100, 0);
        let grid = TileGrid::new(&config, 200, 250).unwrap();
        assert!(!grid.has_right_edge());
        assert!(grid.has_bottom_edge());
        assert_eq!(
            grid.map(|r| r.offset()).collect::<Vec<_>>(),
            vec![(0, 0), (100, 0), (0, 100), (100, 100), (0, 150), (100, 150)]
        );
    }

    #[test]
    fn test_grid_with_overlap() {
        let config = TilingConfig::new(100, 100, 20);
        // Stride 80: regular origins 0, 80; 80 + 100 = 180 reaches the edge.
        assert_eq!(
            origins(&config, 180, 100),
            vec![(0, 0), (80, 0)]
        );
    }

    #[test]
    fn test_grid_covers_every_pixel() {
        let config = TilingConfig::new(64, 48, 10);
        let (width, height) = (301, 157);
        let rects = tile_rects(&config, width, height).unwrap();
        let mut covered = vec![false; (width * height) as usize];
        for rect in &rects {
            assert_eq!((rect.width, rect.height), (64, 48));
            assert!(rect.x + rect.width <= width);
            assert!(rect.y + rect.height <= height);
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    covered[(y * width + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_grid_undersized_image_is_empty() {
        let config = TilingConfig::new(512, 512, 0);
        let grid = TileGrid::new(&config, 511, 2000).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.len(), 0);
    }

    #[test]
    fn test_grid_is_restartable() {
        let config = TilingConfig::new(100, 100, 30);
        let mut grid = TileGrid::new(&config, 333, 222).unwrap();
        let first: Vec<TileRect> = grid.by_ref().collect();
        assert_eq!(grid.len(), 0);
        grid.reset();
        assert_eq!(grid.len(), first.len());
        let second: Vec<TileRect> = grid.collect();
        assert_eq!(first, second);
        assert_eq!(first, tile_rects(&config, 333, 222).unwrap());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            TilingConfig::new(100, 100, 100).validate(),
            Err(Error::InvalidStride { .. })
        ));
        assert!(matches!(
            TilingConfig::new(0, 100, 0).validate(),
            Err(Error::InvalidTileSize { .. })
        ));
        assert!(matches!(
            TilingConfig::new(100, 100, 0).with_min_coverage(1.5).validate(),
            Err(Error::InvalidCoverage(_))
        ));
        assert!(matches!(
            TilingConfig::new(100, 100, 0).with_resize(0, 50).validate(),
            Err(Error::InvalidResize { .. })
        ));
        assert!(TileGrid::new(&TilingConfig::new(50, 50, 60), 500, 500).is_err());
    }

    #[test]
    fn test_scale_uses_smaller_ratio() {
        let config = TilingConfig::new(200, 100, 0).with_resize(100, 100);
        assert_relative_eq!(config.scale(), 0.5);
        let rect = tile_rects(&config, 200, 100).unwrap()[0];
        assert_eq!(rect.output_size(), (100, 50));
        assert_relative_eq!(TilingConfig::default().scale(), 1.0);
    }

    #[test]
    fn test_projection_coverage_threshold() {
        let rect = unit_rect(0, 0, 100);
        // 10x10 boxes hanging off the right edge by different amounts.
        let at = |x: f64| Annotation::new(1, 1, 1, [x, 10.0, 10.0, 10.0]);

        assert!(project_annotation(&at(97.1), &rect, 0.30).is_none()); // IoA 0.29
        assert!(project_annotation(&at(97.0), &rect, 0.30).is_some()); // IoA 0.30
        assert!(project_annotation(&at(96.9), &rect, 0.30).is_some()); // IoA 0.31
    }

    #[test]
    fn test_projection_clips_box_and_recomputes_area() {
        let rect = unit_rect(100, 100, 100);
        let ann = Annotation::new(7, 3, 2, [180.0, 150.0, 40.0, 20.0]);
        let projected = project_annotation(&ann, &rect, 0.3).unwrap();

        assert_eq!(projected.bbox, [80.0, 50.0, 20.0, 20.0]);
        assert_relative_eq!(projected.area, 400.0);
        assert_eq!(projected.category_id, 2);

        let provenance = projected.provenance.unwrap();
        assert_eq!(provenance.source_annotation_id, 7);
        assert_eq!(provenance.original_bbox, [180.0, 150.0, 40.0, 20.0]);
        assert_relative_eq!(provenance.intersection_over_area, 0.5);
        assert_eq!((provenance.tile_offset.x, provenance.tile_offset.y), (100, 100));
    }

    #[test]
    fn test_projection_fully_inside_and_disjoint() {
        let rect = unit_rect(0, 0, 100);
        let inside = Annotation::new(1, 1, 1, [10.0, 20.0, 30.0, 40.0]);
        let projected = project_annotation(&inside, &rect, 1.0).unwrap();
        assert_eq!(projected.bbox, inside.bbox);
        assert_relative_eq!(projected.provenance.unwrap().intersection_over_area, 1.0);

        let outside = Annotation::new(2, 1, 1, [150.0, 20.0, 30.0, 40.0]);
        let touching = Annotation::new(3, 1, 1, [100.0, 20.0, 30.0, 40.0]);
        assert!(project_annotations(&[outside, touching], &rect, 0.0).is_empty());
    }

    #[test]
    fn test_projection_scales_box_and_polygons() {
        let rect = TileRect {
            x: 200,
            y: 100,
            width: 100,
            height: 100,
            scale: 0.5,
        };
        let ann = Annotation::new(1, 1, 1, [210.0, 120.0, 20.0, 10.0])
            .with_polygons(vec![vec![210.0, 120.0, 230.0, 120.0, 230.0, 130.0]]);
        let projected = project_annotation(&ann, &rect, 0.3).unwrap();

        assert_eq!(projected.bbox, [5.0, 10.0, 10.0, 5.0]);
        assert_relative_eq!(projected.area, 50.0);
        assert_eq!(
            projected.segmentation,
            Some(Segmentation::Polygons(vec![vec![5.0, 10.0, 15.0, 10.0, 15.0, 15.0]]))
        );
    }

    #[test]
    fn test_projection_leaves_polygons_unclipped() {
        let rect = unit_rect(0, 0, 100);
        let ann = Annotation::new(1, 1, 1, [80.0, 0.0, 40.0, 10.0])
            .with_polygons(vec![vec![80.0, 0.0, 120.0, 0.0, 120.0, 10.0]]);
        let projected = project_annotation(&ann, &rect, 0.3).unwrap();

        assert_eq!(projected.bbox, [80.0, 0.0, 20.0, 10.0]);
        match projected.segmentation {
            Some(Segmentation::Polygons(polygons)) => assert_eq!(polygons[0][2], 120.0),
            other => panic!("unexpected segmentation {:?}", other),
        }
    }

    #[test]
    fn test_projection_drops_rle_segmentation() {
        let rect = unit_rect(0, 0, 100);
        let mut ann = Annotation::new(1, 1, 1, [10.0, 10.0, 10.0, 10.0]);
        ann.segmentation = Some(Segmentation::Other(serde_json::json!({
            "counts": [0, 5, 95],
            "size": [100, 100]
        })));
        let projected = project_annotation(&ann, &rect, 0.3).unwrap();
        assert!(projected.segmentation.is_none());
    }

    #[test]
    fn test_engine_plan_marks_positive_tiles() {
        let engine = TilingEngine::new(TilingConfig::new(100, 100, 0)).unwrap();
        let annotations = vec![Annotation::new(1, 1, 1, [120.0, 20.0, 30.0, 30.0])];
        let plan = engine.plan(200, 100, &annotations).unwrap();

        assert_eq!(plan.len(), 2);
        assert!(!plan[0].is_positive());
        assert!(plan[1].is_positive());
        assert_eq!(plan[1].annotations[0].bbox, [20.0, 20.0, 30.0, 30.0]);
    }

    #[test]
    fn test_engine_cuts_and_resizes_tiles() {
        let image = DynamicImage::new_rgb8(1100, 700);
        let config = TilingConfig::new(512, 512, 0).with_resize(256, 256);
        let engine = TilingEngine::new(config).unwrap();
        let annotations = vec![Annotation::new(1, 1, 1, [600.0, 300.0, 100.0, 100.0])];

        let tiles = engine.tiles(&image, &annotations).unwrap();
        assert_eq!(tiles.len(), 6);

        let tiles: Vec<_> = tiles.collect();
        let offsets: Vec<(u32, u32)> = tiles.iter().map(|t| t.offset()).collect();
        assert_eq!(
            offsets,
            vec![(0, 0), (512, 0), (588, 0), (0, 188), (512, 188), (588, 188)]
        );
        for tile in &tiles {
            assert_eq!(tile.size(), (256, 256));
            assert_eq!(tile.image.dimensions(), (256, 256));
        }

        // Tile (588, 188) sees the whole box, at half scale.
        let last = &tiles[5];
        assert!(last.is_positive());
        assert_eq!(last.annotations[0].bbox, [6.0, 56.0, 50.0, 50.0]);
    }

    #[test]
    fn test_coco_parses_roboflow_export() {
        let json = r#"{
            "info": {"year": "2024", "version": "3", "description": "insects"},
            "licenses": [{"id": 1, "name": "CC BY 4.0", "url": ""}],
            "categories": [{"id": 0, "name": "insects", "supercategory": "none"}],
            "images": [{"id": 0, "license": 1, "file_name": "a.jpg", "height": 200, "width": 300}],
            "annotations": [
                {"id": 0, "image_id": 0, "category_id": 0, "bbox": [1, 2, 3, 4], "area": 12,
                 "segmentation": [[1, 2, 4, 2, 4, 6]], "iscrowd": 0},
                {"id": 1, "image_id": 0, "category_id": 0, "bbox": [5, 5, 5, 5], "area": 25,
                 "segmentation": {"counts": [1, 2], "size": [200, 300]}, "iscrowd": 1}
            ]
        }"#;
        let dataset: CocoDataset = serde_json::from_str(json).unwrap();

        assert_eq!(dataset.info.year, Some(serde_json::json!("2024")));
        assert_eq!(dataset.images[0].stem(), "a");
        assert!(matches!(
            dataset.annotations[0].segmentation,
            Some(Segmentation::Polygons(_))
        ));
        assert!(matches!(
            dataset.annotations[1].segmentation,
            Some(Segmentation::Other(_))
        ));
    }

    #[test]
    fn test_coco_sanitize_drops_invalid_annotations() {
        let mut dataset = CocoDataset::default();
        dataset.images.push(cocotile::Image::new(1, "a.jpg".to_string(), 100, 100));
        dataset.annotations = vec![
            Annotation::new(1, 1, 1, [10.0, 10.0, 20.0, 20.0]),
            Annotation::new(2, 1, 1, [10.0, 10.0, 0.0, 20.0]),
            Annotation::new(3, 1, 1, [90.0, 10.0, 20.0, 20.0]),
            Annotation::new(4, 9, 1, [10.0, 10.0, 20.0, 20.0]),
        ];

        let report = dataset.sanitize();
        assert_eq!(report.kept, 1);
        assert_eq!(report.degenerate, 1);
        assert_eq!(report.out_of_bounds, 1);
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.dropped(), 3);
        assert_eq!(dataset.annotations.len(), 1);
        assert_eq!(dataset.annotations[0].id, 1);
    }

    #[test]
    fn test_provenance_is_serialized_on_annotations() {
        let rect = unit_rect(0, 0, 100);
        let ann = Annotation::new(5, 1, 1, [10.0, 10.0, 10.0, 10.0]);
        let projected = project_annotation(&ann, &rect, 0.3).unwrap();
        let value = serde_json::to_value(&projected).unwrap();

        assert_eq!(value["provenance"]["source_annotation_id"], 5);
        assert_eq!(value["provenance"]["tile_offset"]["x"], 0);
        assert!(value.get("segmentation").is_none());
    }

    #[test]
    fn test_validate_size() {
        assert!(validate_size("0.5").is_ok());
        assert!(validate_size("1.0").is_ok());
        assert!(validate_size("0.0").is_ok());
        assert!(validate_size("-0.1").is_err());
        assert!(validate_size("1.1").is_err());
        assert!(validate_size("abc").is_err());
    }

    #[test]
    fn test_validate_keep() {
        assert!(validate_keep("0.25").is_ok());
        assert!(validate_keep("1.0").is_ok());
        assert!(validate_keep("0.0").is_err());
        assert!(validate_keep("1.5").is_err());
    }

    #[test]
    fn test_validate_fraction() {
        assert!(validate_fraction("0.0").is_ok());
        assert!(validate_fraction("0.2").is_ok());
        assert!(validate_fraction("1.0").is_err());
        assert!(validate_fraction("-0.1").is_err());
    }

    #[test]
    fn test_val_size_flag_and_aliases() {
        for flag in ["--val-size", "--val_size", "--valperc"] {
            let args = Args::try_parse_from(["cocotile", flag, "0.25"]).unwrap();
            assert_relative_eq!(args.fold_config().val_fraction, 0.25);
        }
        assert!(Args::try_parse_from(["cocotile", "--val-size", "1.0"]).is_err());
    }

    #[test]
    fn test_args_build_configs() {
        let args = Args::try_parse_from([
            "cocotile",
            "--input",
            "data",
            "--tile-width",
            "256",
            "--tile-height",
            "128",
            "--overlap",
            "16",
            "--min-ioa",
            "0.5",
            "--resize-width",
            "128",
            "--resize-height",
            "128",
            "--folds",
            "3",
            "--negative-keep",
            "0.25",
            "--seed",
            "9",
        ])
        .unwrap();

        let tiling = args.tiling_config();
        assert_eq!((tiling.tile_width, tiling.tile_height, tiling.overlap), (256, 128, 16));
        assert_eq!(tiling.resize, Some((128, 128)));
        assert_relative_eq!(tiling.min_coverage, 0.5);

        let folds = args.fold_config();
        assert_eq!(folds.folds, 3);
        assert_eq!(folds.seed, 9);
        assert_eq!(folds.negative_keep, Some(0.25));
        assert!(folds.validate_settings().is_ok());
    }

    #[test]
    fn test_args_reject_partial_resize() {
        assert!(Args::try_parse_from(["cocotile", "--resize-width", "128"]).is_err());
        assert!(Args::try_parse_from(["cocotile", "--quality", "0"]).is_err());
        assert!(Args::try_parse_from(["cocotile", "--negative-keep", "0"]).is_err());
    }
}
