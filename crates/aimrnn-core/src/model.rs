//! 公開 API: `RnnModel`
//!
//! モデル状態は 1 つの読み書きロックで保護する。
//!
//! - 読み取り: `check_data`、評価、`parameters`、`save`
//! - 書き込み: `learn_by_data`、`train_epochs` の各バッチ、setter、`load`
//!
//! `train_epochs` はエポック全体でロックを保持しない。バッチごとに
//! 書き込みロックを取り、評価時に読み取りロックを取る。

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{
    DEFAULT_BATCH_SIZE, InputMode, MAX_DROPOUT, MAX_GRAD_CLIP, MAX_LABEL_SMOOTHING,
    MAX_LEARNING_RATE, MAX_WEIGHT_DECAY, MIN_LEARNING_RATE, PoolingMode, RnnConfig, clamp_finite,
};
use crate::data::{self, LabeledSeries, MIN_STEPS, RotationSeries, Sample};
use crate::error::ModelResult;
use crate::head::HeadCache;
use crate::io::{FormatVersion, ModelView, read_model, write_model};
use crate::lstm::{EncoderCache, TrainingPass};
use crate::math::Matrix;
use crate::metrics::{DatasetMetrics, EpochReport, PROB_EPS, binary_cross_entropy};
use crate::optim::{AdamW, StepParams};
use crate::pooling::{self, PoolingCache};
use crate::sequence::{self, SequenceData};
use crate::tensors::{ActiveGroups, ModelTensors, apply_adamw};

/// 推論できなかったときの中立値
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

/// 学習データの検証用比率
const TRAIN_SPLIT: f64 = 0.8;

/// 1 ミニバッチの結果
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchOutcome {
    /// BCE 損失の合計
    pub loss: f64,
    /// 閾値 0.5 で正解した件数
    pub correct: usize,
    pub used: usize,
    /// 有効ステップ不足でスキップした件数
    pub skipped_invalid: usize,
    /// 確率が非有限でスキップした件数
    pub skipped_non_finite: usize,
    /// クリップ後の全体勾配ノルム（更新なしなら 0）
    pub grad_norm: f64,
}

impl BatchOutcome {
    /// 別のバッチ結果を合算（勾配ノルムは後者で上書き）
    pub fn absorb(&mut self, other: &BatchOutcome) {
        self.loss += other.loss;
        self.correct += other.correct;
        self.used += other.used;
        self.skipped_invalid += other.skipped_invalid;
        self.skipped_non_finite += other.skipped_non_finite;
        if other.used > 0 {
            self.grad_norm = other.grad_norm;
        }
    }
}

/// `train_epochs` の結果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingSummary {
    pub train_size: usize,
    pub validation_size: usize,
    pub epochs: Vec<EpochReport>,
}

impl TrainingSummary {
    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }
}

/// 1 サンプル分の順伝播キャッシュ
struct ForwardCache {
    hidden: Matrix,
    encoder: EncoderCache,
    pooling: PoolingCache,
    head: HeadCache,
    prob: f64,
    uses_embedding: bool,
}

/// ロック内の状態
struct ModelState {
    cfg: RnnConfig,
    batch_size: usize,
    training_step: u64,
    /// dropout 用
    rng: Xoshiro256PlusPlus,
    params: ModelTensors,
    grads: ModelTensors,
    m: ModelTensors,
    v: ModelTensors,
    opt: AdamW,
}

impl ModelState {
    fn new(cfg: RnnConfig) -> Self {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(cfg.seed);
        let params = ModelTensors::new(&mut rng, &cfg);
        let grads = params.zeros_like();
        let m = params.zeros_like();
        let v = params.zeros_like();
        Self {
            cfg,
            batch_size: DEFAULT_BATCH_SIZE,
            training_step: 0,
            rng,
            params,
            grads,
            m,
            v,
            opt: AdamW::new(),
        }
    }

    fn prepare(&self, steps: &[[f64; 2]]) -> SequenceData {
        sequence::prepare(
            self.cfg.input_mode,
            &self.params.embedding,
            steps,
            self.cfg.input_size,
        )
    }

    /// 1 チャンクの推論（dropout なし）
    fn forward_chunk(&self, steps: &[[f64; 2]]) -> Option<f64> {
        let seq = self.prepare(steps);
        if !seq.has_enough_valid_steps(MIN_STEPS) {
            return None;
        }
        let hidden = self.params.encoder.forward(&seq.x, None, None);
        let (pooled, _) = pooling::forward(
            self.cfg.pooling_mode,
            &self.params.attention,
            &hidden,
            &seq.mask,
        );
        let p = self.params.head.forward(&pooled, None);
        p.is_finite().then(|| p.clamp(0.0, 1.0))
    }

    /// 系列全体の確率（チャンク確率の平均）
    ///
    /// 有限な確率を返したチャンクが無ければ None。
    fn forward_probability(&self, pairs: &[[f64; 2]]) -> Option<f64> {
        if pairs.len() < MIN_STEPS {
            return None;
        }
        let mut sum = 0.0;
        let mut used = 0usize;
        for chunk in data::chunk(pairs) {
            if let Some(p) = self.forward_chunk(chunk) {
                sum += p;
                used += 1;
            }
        }
        if used == 0 {
            return None;
        }
        let p = sum / used as f64;
        p.is_finite().then(|| p.clamp(0.0, 1.0))
    }

    /// 学習用の順伝播（dropout あり、キャッシュ付き）
    fn forward_cached(&mut self, steps: &[[f64; 2]]) -> Option<ForwardCache> {
        let seq = self.prepare(steps);
        if !seq.has_enough_valid_steps(MIN_STEPS) {
            return None;
        }
        let pass = TrainingPass {
            dropout: self.cfg.dropout_rate,
            recurrent_dropout: self.cfg.recurrent_dropout_rate,
            rng: &mut self.rng,
        };
        let mut encoder = EncoderCache::default();
        let hidden = self.params.encoder.forward(&seq.x, Some(pass), Some(&mut encoder));
        let (pooled, pooling) = pooling::forward(
            self.cfg.pooling_mode,
            &self.params.attention,
            &hidden,
            &seq.mask,
        );
        let mut head = HeadCache::default();
        let prob = self.params.head.forward(&pooled, Some(&mut head));
        Some(ForwardCache {
            hidden,
            encoder,
            pooling,
            head,
            prob,
            uses_embedding: self.cfg.input_mode == InputMode::RawSequence,
        })
    }

    /// ミニバッチ 1 回分の学習
    fn train_batch(&mut self, batch: &[Sample]) -> BatchOutcome {
        let mut out = BatchOutcome::default();
        self.grads.zero();

        let attention = self.cfg.pooling_mode == PoolingMode::Attention;
        let mut embedding_used = 0usize;

        for sample in batch {
            let Some(fc) = self.forward_cached(&sample.steps) else {
                out.skipped_invalid += 1;
                continue;
            };
            if !fc.prob.is_finite() {
                out.skipped_non_finite += 1;
                continue;
            }

            if (fc.prob >= 0.5) == sample.is_positive() {
                out.correct += 1;
            }
            let p = fc.prob.clamp(PROB_EPS, 1.0 - PROB_EPS);
            out.loss += binary_cross_entropy(p, sample.label);
            let d_logit = p - sample.label;

            let d_pooled = self.params.head.backward(&fc.head, d_logit, &mut self.grads.head);
            let attention_grad = attention.then_some(&mut self.grads.attention);
            let d_hidden = pooling::backward(
                &fc.pooling,
                &self.params.attention,
                &fc.hidden,
                &d_pooled,
                attention_grad,
            );
            let d_x = self.params.encoder.backward(&fc.encoder, &d_hidden, &mut self.grads.encoder);

            if fc.uses_embedding {
                self.params
                    .embedding
                    .accumulate_grad(&sample.steps, &d_x, &mut self.grads.embedding);
                embedding_used += 1;
            }
            out.used += 1;
        }

        if out.used > 0 {
            self.opt.increment_step();
            out.grad_norm = self.apply_update(out.used, embedding_used, attention);
            self.training_step += 1;
            log::debug!(
                "Step {}: loss {:.4}, used {}, grad norm {:.4}",
                self.training_step,
                out.loss / out.used as f64,
                out.used,
                out.grad_norm
            );
        }
        out
    }

    /// 勾配を平均・クリップして AdamW を適用。クリップ後のノルムを返す
    fn apply_update(&mut self, used: usize, embedding_used: usize, attention: bool) -> f64 {
        let core = ActiveGroups {
            attention,
            embedding: false,
        };
        self.grads.scale(1.0 / used as f64, core);
        if embedding_used > 0 {
            self.grads.embedding.scale(1.0 / embedding_used as f64);
        }
        let groups = ActiveGroups {
            attention,
            embedding: embedding_used > 0,
        };

        let clip = self.cfg.gradient_clip;
        let mut norm = self.grads.square_norm(groups).sqrt();
        if clip > 0.0 && clip.is_finite() && norm > clip {
            let s = clip / (norm + 1e-12);
            self.grads.scale(s, groups);
            norm = self.grads.square_norm(groups).sqrt();
        }

        let step = StepParams {
            lr: self.cfg.learning_rate,
            weight_decay: self.cfg.weight_decay,
            clip: 0.0,
        };
        apply_adamw(
            &self.opt,
            &mut self.params,
            &self.grads,
            &mut self.m,
            &mut self.v,
            step,
            groups,
        );
        norm
    }

    /// サンプル列を batch_size ごとに学習
    fn train_samples(&mut self, samples: &[Sample]) -> BatchOutcome {
        let mut total = BatchOutcome::default();
        for batch in samples.chunks(self.batch_size.max(1)) {
            total.absorb(&self.train_batch(batch));
        }
        total
    }

    /// データセットを評価（ラベルは平滑化しない）
    fn evaluate(&self, dataset: &[&LabeledSeries]) -> DatasetMetrics {
        let mut metrics = DatasetMetrics::default();
        for item in dataset {
            let pairs = item.series.pairs();
            let Some(p) = self.forward_probability(&pairs) else {
                metrics.skipped += 1;
                continue;
            };
            metrics.record(p, if item.cheat { 1.0 } else { 0.0 });
        }
        metrics
    }

    fn view(&self) -> ModelView<'_> {
        ModelView {
            cfg: &self.cfg,
            batch_size: self.batch_size,
            training_step: self.training_step,
            optimizer_step: self.opt.step_count(),
            params: &self.params,
            m: &self.m,
            v: &self.v,
        }
    }
}

/// 双方向 LSTM による回転系列の二値分類器
pub struct RnnModel {
    state: RwLock<ModelState>,
    /// データセットのシャッフル用（モデル状態のロックとは独立）
    shuffle_rng: Mutex<ChaCha8Rng>,
}

impl Default for RnnModel {
    fn default() -> Self {
        Self::new(RnnConfig::default())
    }
}

impl RnnModel {
    /// 設定からモデルを作成（設定は sanitize される）
    pub fn new(cfg: RnnConfig) -> Self {
        let cfg = cfg.sanitized();
        let shuffle_rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        Self {
            state: RwLock::new(ModelState::new(cfg)),
            shuffle_rng: Mutex::new(shuffle_rng),
        }
    }

    /// 不正らしさの確率 [0, 1]
    ///
    /// 長さ 2 未満、または推論不能な系列は 0.5 を返す。
    pub fn check_data(&self, series: &RotationSeries) -> f64 {
        let state = self.state.read();
        let pairs = series.pairs();
        if pairs.is_empty() {
            log::warn!("check_data received empty input; returning neutral probability 0.5");
            return NEUTRAL_PROBABILITY;
        }
        if pairs.len() < MIN_STEPS {
            log::warn!(
                "check_data received sequence with less than {MIN_STEPS} points; \
                 returning neutral probability 0.5"
            );
            return NEUTRAL_PROBABILITY;
        }
        match state.forward_probability(&pairs) {
            Some(p) => p,
            None => {
                log::warn!(
                    "check_data produced non-finite probability; returning neutral probability 0.5"
                );
                NEUTRAL_PROBABILITY
            }
        }
    }

    /// 1 系列で学習する
    pub fn learn_by_data(&self, series: &RotationSeries, cheat: bool) -> BatchOutcome {
        let mut state = self.state.write();
        let label = state.cfg.smooth_label(cheat);
        let samples = data::to_samples(series, label);
        if samples.is_empty() {
            return BatchOutcome::default();
        }
        let total = state.train_samples(&samples);
        if total.skipped_invalid > 0 || total.skipped_non_finite > 0 {
            log::warn!(
                "learn_by_data skipped samples -> invalid sequence: {}, non-finite probability: {}",
                total.skipped_invalid,
                total.skipped_non_finite
            );
        }
        total
    }

    /// 準備済みのミニバッチを 1 回学習する
    pub fn train_batch(&self, batch: &[Sample]) -> BatchOutcome {
        self.state.write().train_batch(batch)
    }

    /// 複数エポック学習する
    pub fn train_epochs(&self, dataset: &[LabeledSeries], epochs: usize) -> TrainingSummary {
        self.train_epochs_with(dataset, epochs, |_| ControlFlow::Continue(()))
    }

    /// 複数エポック学習する（エポックごとにコールバック）
    ///
    /// コールバックが `Break` を返すと次のエポックに進まずに終了する。
    pub fn train_epochs_with<F>(
        &self,
        dataset: &[LabeledSeries],
        epochs: usize,
        mut on_epoch: F,
    ) -> TrainingSummary
    where
        F: FnMut(&EpochReport) -> ControlFlow<()>,
    {
        let mut summary = TrainingSummary::default();
        if dataset.is_empty() || epochs == 0 {
            return summary;
        }

        let (cfg, batch_size) = {
            let state = self.state.read();
            (state.cfg.clone(), state.batch_size.max(1))
        };

        let mut shuffled: Vec<&LabeledSeries> = dataset.iter().collect();
        shuffled.shuffle(&mut *self.shuffle_rng.lock());

        let total = shuffled.len();
        let split = if total == 1 {
            1
        } else {
            ((total as f64 * TRAIN_SPLIT).floor() as usize).clamp(1, total - 1)
        };
        let validation: Vec<&LabeledSeries> = shuffled.split_off(split);
        let mut train = shuffled;
        summary.train_size = train.len();
        summary.validation_size = validation.len();

        log::info!(
            "Dataset split: {} training samples, {} validation samples.",
            train.len(),
            validation.len()
        );

        for e in 0..epochs {
            train.shuffle(&mut *self.shuffle_rng.lock());

            let mut batch: Vec<Sample> = Vec::with_capacity(batch_size);
            let mut trained = BatchOutcome::default();
            for item in &train {
                let label = cfg.smooth_label(item.cheat);
                for sample in data::to_samples(&item.series, label) {
                    batch.push(sample);
                    if batch.len() >= batch_size {
                        trained.absorb(&self.state.write().train_batch(&batch));
                        batch.clear();
                    }
                }
            }
            if !batch.is_empty() {
                trained.absorb(&self.state.write().train_batch(&batch));
            }

            let (train_metrics, validation_metrics) = {
                let state = self.state.read();
                (state.evaluate(&train), state.evaluate(&validation))
            };

            let report = EpochReport {
                epoch: e + 1,
                epochs,
                train: train_metrics,
                validation: validation_metrics,
                skipped_invalid_chunks: trained.skipped_invalid,
                skipped_non_finite_chunks: trained.skipped_non_finite,
            };
            report.log();

            let flow = on_epoch(&report);
            summary.epochs.push(report);
            if flow.is_break() {
                log::info!("Training stopped after epoch {}/{}", e + 1, epochs);
                break;
            }
        }
        summary
    }

    /// 任意のデータセットを評価する
    pub fn evaluate(&self, dataset: &[LabeledSeries]) -> DatasetMetrics {
        let refs: Vec<&LabeledSeries> = dataset.iter().collect();
        self.state.read().evaluate(&refs)
    }

    pub fn set_learning_rate(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.learning_rate =
            clamp_finite(v, MIN_LEARNING_RATE, MAX_LEARNING_RATE, s.cfg.learning_rate);
    }

    pub fn set_dropout_rate(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.dropout_rate = clamp_finite(v, 0.0, MAX_DROPOUT, s.cfg.dropout_rate);
    }

    pub fn set_recurrent_dropout_rate(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.recurrent_dropout_rate =
            clamp_finite(v, 0.0, MAX_DROPOUT, s.cfg.recurrent_dropout_rate);
    }

    pub fn set_weight_decay(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.weight_decay = clamp_finite(v, 0.0, MAX_WEIGHT_DECAY, s.cfg.weight_decay);
    }

    pub fn set_gradient_clip(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.gradient_clip = clamp_finite(v, 0.0, MAX_GRAD_CLIP, s.cfg.gradient_clip);
    }

    pub fn set_label_smoothing(&self, v: f64) {
        let mut s = self.state.write();
        s.cfg.label_smoothing = clamp_finite(v, 0.0, MAX_LABEL_SMOOTHING, s.cfg.label_smoothing);
    }

    pub fn set_batch_size(&self, v: usize) {
        self.state.write().batch_size = v.max(1);
    }

    pub fn set_input_mode(&self, mode: InputMode) {
        self.state.write().cfg.input_mode = mode;
    }

    pub fn set_pooling_mode(&self, mode: PoolingMode) {
        self.state.write().cfg.pooling_mode = mode;
    }

    /// 現在の設定（sanitize 済み）のコピー
    pub fn config(&self) -> RnnConfig {
        self.state.read().cfg.clone()
    }

    pub fn batch_size(&self) -> usize {
        self.state.read().batch_size
    }

    /// 学習したミニバッチ数
    pub fn training_step(&self) -> u64 {
        self.state.read().training_step
    }

    /// AdamW のステップ数
    pub fn optimizer_step(&self) -> u64 {
        self.state.read().opt.step_count()
    }

    /// 総パラメータ数（i32::MAX で飽和）
    pub fn parameters(&self) -> u32 {
        let count = self.state.read().params.param_count();
        count.min(i32::MAX as usize) as u32
    }

    /// 現行形式で書き出す
    pub fn save<W: Write>(&self, writer: &mut W) -> ModelResult<()> {
        self.save_versioned(writer, FormatVersion::Current)
    }

    /// 形式を指定して書き出す
    pub fn save_versioned<W: Write>(
        &self,
        writer: &mut W,
        version: FormatVersion,
    ) -> ModelResult<()> {
        let state = self.state.read();
        write_model(writer, &state.view(), version)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer).inspect_err(|e| {
            log::error!("Failed to save RNN model to {}: {e}", path.display());
        })
    }

    /// 読み込む
    ///
    /// アーキテクチャが一致しない・壊れたファイルでは失敗し、モデルは変更されない。
    pub fn load<R: Read>(&self, reader: &mut R) -> ModelResult<()> {
        let mut state = self.state.write();
        let loaded = match read_model(reader, &state.cfg, &state.params) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("Failed to load RNN model: {e}");
                return Err(e);
            }
        };

        if loaded.version == FormatVersion::Legacy {
            log::info!("Loaded legacy model format; optimizer state reset");
        }
        state.cfg = loaded.cfg;
        state.batch_size = loaded.batch_size;
        state.training_step = loaded.training_step;
        state.opt.set_step_count(loaded.optimizer_step);
        state.params = loaded.params;
        state.m = loaded.m;
        state.v = loaded.v;
        state.grads.zero();
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> RnnConfig {
        RnnConfig {
            input_size: 4,
            hidden_size: 4,
            num_layers: 1,
            ..RnnConfig::default()
        }
    }

    fn wave(n: usize, amp: f64) -> RotationSeries {
        let yaw = (0..n).map(|i| (i as f64 * 0.3).sin() * amp).collect();
        let pitch = (0..n).map(|i| (i as f64 * 0.7).cos() * amp * 0.5).collect();
        RotationSeries::new(yaw, pitch)
    }

    #[test]
    fn test_check_data_neutral_for_short_input() {
        let model = RnnModel::new(tiny_config());
        assert_eq!(model.check_data(&RotationSeries::default()), 0.5);
        assert_eq!(model.check_data(&wave(1, 10.0)), 0.5);
    }

    #[test]
    fn test_check_data_all_invalid_is_neutral() {
        let model = RnnModel::new(tiny_config());
        let series = RotationSeries::new(vec![f64::NAN; 5], vec![1.0; 5]);
        assert_eq!(model.check_data(&series), 0.5);
    }

    #[test]
    fn test_learn_by_data_updates_step() {
        let model = RnnModel::new(tiny_config());
        model.set_batch_size(2);
        // 3 チャンク → 2 バッチ
        let out = model.learn_by_data(&wave(450, 20.0), true);
        assert_eq!(out.used, 3);
        assert_eq!(model.training_step(), 2);
        assert_eq!(model.optimizer_step(), 2);
    }

    #[test]
    fn test_setters_clamp_and_keep_previous_on_nan() {
        let model = RnnModel::new(tiny_config());
        model.set_learning_rate(5.0);
        assert_eq!(model.config().learning_rate, MAX_LEARNING_RATE);
        model.set_learning_rate(f64::NAN);
        assert_eq!(model.config().learning_rate, MAX_LEARNING_RATE);
        model.set_dropout_rate(-1.0);
        assert_eq!(model.config().dropout_rate, 0.0);
        model.set_batch_size(0);
        assert_eq!(model.batch_size(), 1);
        model.set_pooling_mode(PoolingMode::MaxPooling);
        assert_eq!(model.config().pooling_mode, PoolingMode::MaxPooling);
    }

    #[test]
    fn test_parameters_matches_tensor_count() {
        let model = RnnModel::new(tiny_config());
        let expected = model.state.read().params.param_count() as u32;
        assert_eq!(model.parameters(), expected);
    }
}
