//! 学習 → 保存 → 読み込み → 推論 の一連の流れ

use std::path::Path;

use burn::backend::{Autodiff, NdArray};
use burn_ndarray::NdArrayDevice;
use image::{Rgb, RgbImage};

use flower_classifier_lib::commands::{predict_command, train_command, train_from_directory};
use flower_classifier_lib::dataset::DATASET_DIR_NAME;
use flower_classifier_lib::ml::InferenceEngine;
use flower_classifier_lib::model::{
    save_model_with_metadata, AppConfig, DeviceType, InferenceConfig, TrainingConfig,
};

type TrainBackend = Autodiff<NdArray>;

const SIZE: usize = 32;

const ROSES: Rgb<u8> = Rgb([200, 30, 40]);
const TULIPS: Rgb<u8> = Rgb([240, 200, 20]);

fn flower_image(color: Rgb<u8>, seed: u32) -> RgbImage {
    RgbImage::from_fn(40 + seed, 36, |x, y| {
        let noise = ((x * 7 + y * 13 + seed) % 16) as u8;
        Rgb([
            color[0].saturating_add(noise),
            color[1].saturating_add(noise),
            color[2].saturating_add(noise),
        ])
    })
}

fn write_dataset(root: &Path) {
    for (name, color) in [("roses", ROSES), ("tulips", TULIPS)] {
        let class_dir = root.join(name);
        std::fs::create_dir_all(&class_dir).unwrap();

        for i in 0..10u32 {
            flower_image(color, i)
                .save(class_dir.join(format!("{}_{:02}.jpg", name, i)))
                .unwrap();
        }
    }
}

fn training_config() -> TrainingConfig {
    TrainingConfig::new()
        .with_num_epochs(1)
        .with_batch_size(4)
        .with_image_height(SIZE)
        .with_image_width(SIZE)
}

/// "PREDICT: This image most likely belongs to <label> with a NN.NN percent confidence."
fn parse_prediction_line(line: &str) -> (String, f64) {
    let rest = line
        .strip_prefix("PREDICT: This image most likely belongs to ")
        .expect("prefix");
    let rest = rest.strip_suffix(" percent confidence.").expect("suffix");
    let (label, percent) = rest.rsplit_once(" with a ").expect("separator");

    let (integer, fraction) = percent.split_once('.').expect("decimal point");
    assert!(!integer.is_empty() && integer.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(fraction.len(), 2);
    assert!(fraction.chars().all(|c| c.is_ascii_digit()));

    (label.to_string(), percent.parse().unwrap())
}

#[test]
fn test_train_then_predict_roses() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppConfig::default()
        .with_device_type(DeviceType::Cpu)
        .with_cache_dir(dir.path().join("cache"))
        .with_model_path(dir.path().join("model_save").join("weights"));
    let data_dir = app.cache_dir.join(DATASET_DIR_NAME);
    write_dataset(&data_dir);

    // 学習にも検証にも含まれない画像
    let held_out = dir.path().join("held_out_rose.jpg");
    flower_image(ROSES, 11).save(&held_out).unwrap();

    let saved = train_command(&app, &training_config()).unwrap();
    assert!(saved.exists());

    let prediction = predict_command(&app, &held_out).unwrap();
    let (label, percent) = parse_prediction_line(&prediction.to_string());

    assert!(label == "roses" || label == "tulips");
    assert_eq!(label, prediction.label);
    assert!((0.0..=100.0).contains(&percent));
}

#[test]
fn test_reloaded_model_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join(DATASET_DIR_NAME);
    write_dataset(&data_dir);

    let trained =
        train_from_directory::<TrainBackend>(&data_dir, &training_config(), &NdArrayDevice::Cpu)
            .unwrap();
    assert_eq!(trained.metadata.class_names, vec!["roses", "tulips"]);

    let bundle = dir.path().join("model_save").join("weights");
    let model_binary = trained.model.clone().to_bytes().unwrap();
    save_model_with_metadata(&bundle, &trained.metadata, &model_binary).unwrap();

    let fresh = InferenceEngine::<NdArray>::from_model(
        trained.model,
        InferenceConfig::from_metadata(&trained.metadata),
        NdArrayDevice::Cpu,
    );
    let reloaded = InferenceEngine::<NdArray>::load(&bundle, NdArrayDevice::Cpu).unwrap();

    for image in ["roses/roses_03.jpg", "tulips/tulips_07.jpg"] {
        let a = fresh.classify_image(data_dir.join(image)).unwrap();
        let b = reloaded.classify_image(data_dir.join(image)).unwrap();

        assert_eq!(a.class_index, b.class_index);
        assert_eq!(a.label, b.label);
        for (p, q) in a.probabilities.iter().zip(&b.probabilities) {
            assert!((p - q).abs() < 1e-6);
        }
    }
}
