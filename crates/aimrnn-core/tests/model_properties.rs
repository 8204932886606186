//! `RnnModel` の公開 API を通した性質テスト

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};

use aimrnn_core::{
    FormatVersion, InputMode, LabeledSeries, ModelError, PoolingMode, RnnConfig, RnnModel,
    RotationSeries, Sample,
};

fn small_config(seed: u64) -> RnnConfig {
    RnnConfig {
        input_size: 8,
        hidden_size: 4,
        num_layers: 1,
        seed,
        ..RnnConfig::default()
    }
}

/// 振幅と位相の異なる回転系列
fn series(n: usize, amp: f64, phase: f64) -> RotationSeries {
    let yaw = (0..n)
        .map(|i| ((i as f64 * 0.31 + phase).sin() * amp))
        .collect();
    let pitch = (0..n)
        .map(|i| ((i as f64 * 0.17 + phase).cos() * amp * 0.4))
        .collect();
    RotationSeries::new(yaw, pitch)
}

fn labeled_dataset(n: usize) -> Vec<LabeledSeries> {
    (0..n)
        .map(|i| {
            let cheat = i % 2 == 0;
            let amp = if cheat { 40.0 } else { 3.0 };
            LabeledSeries::new(series(60, amp, i as f64), cheat)
        })
        .collect()
}

fn saved_bytes(model: &RnnModel) -> Vec<u8> {
    let mut buf = Vec::new();
    model.save(&mut buf).unwrap();
    buf
}

#[test]
fn test_check_data_is_a_probability() {
    let model = RnnModel::new(small_config(1));
    for (n, amp) in [(2, 1.0), (37, 15.0), (150, 80.0), (420, 0.5)] {
        let p = model.check_data(&series(n, amp, 0.3));
        assert!((0.0..=1.0).contains(&p), "n={n}, p={p}");
    }
    assert_eq!(model.check_data(&series(1, 5.0, 0.0)), 0.5);
}

#[test]
fn test_non_finite_steps_are_masked() {
    let model = RnnModel::new(small_config(2));
    let mut s = series(40, 10.0, 0.0);
    s.yaw[3] = f64::NAN;
    s.pitch[17] = f64::INFINITY;
    let p = model.check_data(&s);
    assert!(p.is_finite());
    assert!((0.0..=1.0).contains(&p));
}

#[test]
fn test_every_mode_combination_trains_and_predicts() {
    let s = series(80, 12.0, 0.5);
    for input in InputMode::ALL {
        for pooling in PoolingMode::ALL {
            let model = RnnModel::new(small_config(3));
            model.set_input_mode(input);
            model.set_pooling_mode(pooling);
            let out = model.learn_by_data(&s, true);
            assert_eq!(out.used, 1, "{input:?}/{pooling:?}");
            assert!(out.loss.is_finite());
            let p = model.check_data(&s);
            assert!((0.0..=1.0).contains(&p), "{input:?}/{pooling:?}: {p}");
        }
    }
}

#[test]
fn test_save_load_round_trip() {
    let source = RnnModel::new(small_config(4));
    source.set_batch_size(3);
    for (i, item) in labeled_dataset(4).iter().enumerate() {
        source.learn_by_data(&item.series, i % 2 == 0);
    }

    let file = tempfile::NamedTempFile::new().unwrap();
    source.save_to_file(file.path()).unwrap();

    let restored = RnnModel::new(small_config(99));
    restored.load_from_file(file.path()).unwrap();

    assert_eq!(restored.batch_size(), 3);
    assert_eq!(restored.training_step(), source.training_step());
    assert_eq!(restored.optimizer_step(), source.optimizer_step());
    assert_eq!(restored.parameters(), source.parameters());

    let query = series(200, 9.0, 1.1);
    assert_eq!(restored.check_data(&query), source.check_data(&query));
    assert_eq!(saved_bytes(&restored), saved_bytes(&source));
}

#[test]
fn test_legacy_file_loads_with_fresh_optimizer() {
    let source = RnnModel::new(small_config(5));
    source.learn_by_data(&series(150, 20.0, 0.0), true);
    assert_eq!(source.optimizer_step(), 1);

    let mut legacy = Vec::new();
    source.save_versioned(&mut legacy, FormatVersion::Legacy).unwrap();

    let restored = RnnModel::new(small_config(6));
    restored.load(&mut legacy.as_slice()).unwrap();
    assert_eq!(restored.optimizer_step(), 0);
    assert_eq!(restored.training_step(), source.training_step());

    let query = series(90, 4.0, 2.0);
    assert_eq!(restored.check_data(&query), source.check_data(&query));

    let out = restored.learn_by_data(&query, false);
    assert_eq!(out.used, 1);
    assert_eq!(restored.optimizer_step(), 1);
    assert!((0.0..=1.0).contains(&restored.check_data(&query)));
}

#[test]
fn test_architecture_mismatch_leaves_model_untouched() {
    let wide = RnnModel::new(RnnConfig {
        hidden_size: 8,
        ..small_config(7)
    });
    let bytes = saved_bytes(&wide);

    let target = RnnModel::new(small_config(8));
    let before = saved_bytes(&target);
    let query = series(100, 6.0, 0.2);
    let p_before = target.check_data(&query);

    let err = target.load(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, ModelError::ArchitectureMismatch { .. }), "{err}");
    assert_eq!(saved_bytes(&target), before);
    assert_eq!(target.check_data(&query), p_before);
}

#[test]
fn test_truncated_file_leaves_model_untouched() {
    let source = RnnModel::new(small_config(9));
    let mut bytes = saved_bytes(&source);
    bytes.truncate(bytes.len() / 2);

    let target = RnnModel::new(small_config(10));
    let before = saved_bytes(&target);
    assert!(target.load(&mut bytes.as_slice()).is_err());
    assert_eq!(saved_bytes(&target), before);
}

#[test]
fn test_gradient_norm_respects_clip() {
    let model = RnnModel::new(small_config(11));
    let clip = 1e-3;
    model.set_gradient_clip(clip);
    let batch: Vec<Sample> = (0..4)
        .map(|i| {
            let label = if i % 2 == 0 { 0.95 } else { 0.05 };
            Sample::new(series(50, 30.0, i as f64).pairs(), label)
        })
        .collect();
    for _ in 0..3 {
        let out = model.train_batch(&batch);
        assert_eq!(out.used, 4);
        assert!(out.grad_norm <= clip * (1.0 + 1e-9), "norm {}", out.grad_norm);
    }
}

#[test]
fn test_batch_of_invalid_samples_does_not_step() {
    let model = RnnModel::new(small_config(12));
    let batch = vec![
        Sample::new(vec![[1.0, 2.0]], 1.0),
        Sample::new(vec![[f64::NAN, 0.0], [0.0, f64::NAN], [1.0, 1.0]], 0.0),
    ];
    let out = model.train_batch(&batch);
    assert_eq!(out.used, 0);
    assert_eq!(out.skipped_invalid, 2);
    assert_eq!(model.training_step(), 0);
    assert_eq!(model.optimizer_step(), 0);
}

#[test]
fn test_train_epochs_split_and_metrics() {
    let model = RnnModel::new(small_config(13));
    model.set_batch_size(4);
    let dataset = labeled_dataset(10);

    let summary = model.train_epochs(&dataset, 2);
    assert_eq!(summary.train_size, 8);
    assert_eq!(summary.validation_size, 2);
    assert_eq!(summary.epochs.len(), 2);
    for report in &summary.epochs {
        assert_eq!(report.validation.used + report.validation.skipped, 2);
        assert_eq!(report.validation.confusion.total(), report.validation.used as u64);
        assert_eq!(report.train.used + report.train.skipped, 8);
        assert!(report.train.average_loss().is_finite());
        assert!((0.0..=1.0).contains(&report.roc_auc()));
    }
    assert_eq!(summary.last().map(|r| r.epoch), Some(2));
    // 各系列は 1 チャンク、8 件をバッチ 4 で 2 回 × 2 エポック
    assert_eq!(model.training_step(), 4);
}

#[test]
fn test_batch_size_is_fixed_for_the_whole_run() {
    let model = RnnModel::new(small_config(13));
    model.set_batch_size(4);
    let summary = model.train_epochs_with(&labeled_dataset(10), 2, |_| {
        model.set_batch_size(1);
        ControlFlow::Continue(())
    });
    assert_eq!(summary.epochs.len(), 2);
    // 途中の変更は次回の学習から効く
    assert_eq!(model.training_step(), 4);
    assert_eq!(model.batch_size(), 1);
}

#[test]
fn test_train_epochs_single_sample_has_no_validation() {
    let model = RnnModel::new(small_config(14));
    let summary = model.train_epochs(&labeled_dataset(1), 1);
    assert_eq!(summary.train_size, 1);
    assert_eq!(summary.validation_size, 0);
    assert_eq!(summary.epochs[0].validation.used, 0);

    let empty = model.train_epochs(&[], 3);
    assert!(empty.epochs.is_empty());
}

#[test]
fn test_observer_can_stop_training() {
    let model = RnnModel::new(small_config(15));
    let mut seen = Vec::new();
    let summary = model.train_epochs_with(&labeled_dataset(6), 5, |report| {
        seen.push(report.epoch);
        if report.epoch == 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(summary.epochs.len(), 2);
}

#[test]
fn test_concurrent_inference_sees_whole_updates() {
    let model = RnnModel::new(small_config(16));
    let query = series(150, 25.0, 0.7);
    let p0 = model.check_data(&query);
    let done = AtomicBool::new(false);

    let observed: Vec<f64> = std::thread::scope(|scope| {
        let readers: Vec<_> = (0..3)
            .map(|_| {
                scope.spawn(|| {
                    let mut seen = Vec::new();
                    while !done.load(Ordering::Acquire) {
                        seen.push(model.check_data(&query));
                    }
                    seen.push(model.check_data(&query));
                    seen
                })
            })
            .collect();

        let out = model.learn_by_data(&query, true);
        assert_eq!(out.used, 1);
        done.store(true, Ordering::Release);

        readers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let p1 = model.check_data(&query);
    assert!(!observed.is_empty());
    for p in observed {
        assert!(p == p0 || p == p1, "observed {p}, expected {p0} or {p1}");
    }
}
