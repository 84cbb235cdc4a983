mod support;

use iconsketch::config::AppSettings;
use iconsketch::index::IndexSource;
use iconsketch::model::{SharedSketchModel, SketchNetConfig, init_sketch_model, save_weights};
use iconsketch::preprocess::load_sketch;
use iconsketch::retrieval::{build_or_reload_index, embed_and_rank, serving, start_serving};
use iconsketch::IconRecord;
use support::env::IconsketchEnvGuard;
use support::write_icon;
use tempfile::tempdir;

#[test]
fn serving_ranks_an_indexed_icon_first_and_repeats_itself() {
    let home = tempdir().unwrap();
    let _env = IconsketchEnvGuard::set_config_home(home.path().to_path_buf());
    let icons = tempdir().unwrap();
    let first = IconRecord::new("arrows", "left.jpg");
    let second = IconRecord::new("arrows", "right.jpg");
    write_icon(icons.path(), &first, [20, 20, 20]);
    write_icon(icons.path(), &second, [240, 200, 10]);

    let mut settings = AppSettings::default();
    settings.model.class_num = 4;
    let config = SketchNetConfig::new(settings.model.class_num);
    let weights = settings.model.resolved_weights_path().unwrap();
    let model = config.init::<burn::backend::NdArray>(&Default::default());
    save_weights(&model, &config, &weights).unwrap();

    init_sketch_model(&settings.model).unwrap();
    build_or_reload_index(
        &IndexSource::IconTree {
            root: icons.path().to_path_buf(),
        },
        &SharedSketchModel::new(settings.model.clone()),
        &settings.index,
    )
    .unwrap();

    let retriever = start_serving(&settings).unwrap();
    assert_eq!(retriever.index().len(), 2);
    assert!(serving().is_some());

    let sketch = load_sketch(&icons.path().join("arrows").join("left.jpg")).unwrap();
    let ranked = embed_and_rank(&sketch, 5).unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0], first);
    assert_eq!(embed_and_rank(&sketch, 5).unwrap(), ranked);
    assert!(embed_and_rank(&sketch, 0).unwrap().is_empty());
}
