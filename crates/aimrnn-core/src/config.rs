//! モデル設定
//!
//! すべての数値フィールドは `sanitize` で有効範囲に収める。
//! 非有限値はデフォルト値に置き換え、範囲外は最寄りの境界にクランプする。
//! 設定値の異常がエラーになることはない。

use serde::{Deserialize, Serialize};

pub const MIN_INPUT_SIZE: usize = 2;
pub const MAX_INPUT_SIZE: usize = 1024;
pub const MIN_HIDDEN_SIZE: usize = 4;
pub const MAX_HIDDEN_SIZE: usize = 1024;
pub const MIN_NUM_LAYERS: usize = 1;
pub const MAX_NUM_LAYERS: usize = 8;

pub const MIN_LEARNING_RATE: f64 = 1e-8;
pub const MAX_LEARNING_RATE: f64 = 1.0;
pub const MAX_DROPOUT: f64 = 0.95;
pub const MAX_WEIGHT_DECAY: f64 = 1.0;
pub const MAX_GRAD_CLIP: f64 = 1_000_000.0;
pub const MAX_LABEL_SMOOTHING: f64 = 0.5;

pub const DEFAULT_INPUT_SIZE: usize = 16;
pub const DEFAULT_HIDDEN_SIZE: usize = 64;
pub const DEFAULT_NUM_LAYERS: usize = 2;
pub const DEFAULT_LEARNING_RATE: f64 = 0.0003;
pub const DEFAULT_DROPOUT: f64 = 0.1;
pub const DEFAULT_RECURRENT_DROPOUT: f64 = 0.2;
pub const DEFAULT_WEIGHT_DECAY: f64 = 1e-3;
pub const DEFAULT_GRAD_CLIP: f64 = 5.0;
pub const DEFAULT_LABEL_SMOOTHING: f64 = 0.1;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// 入力前処理の種類
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// 学習可能な埋め込み
    RawSequence,
    /// 固定式の統計特徴量
    StatisticalFeatures,
    /// 統計特徴量 + 多スケール生値
    #[default]
    Hybrid,
}

impl InputMode {
    pub const ALL: [InputMode; 3] = [
        InputMode::RawSequence,
        InputMode::StatisticalFeatures,
        InputMode::Hybrid,
    ];

    /// ファイル上の序数
    pub fn ordinal(self) -> i32 {
        match self {
            InputMode::RawSequence => 0,
            InputMode::StatisticalFeatures => 1,
            InputMode::Hybrid => 2,
        }
    }

    /// 序数から復元（範囲外は最寄りの値にクランプ）
    pub fn from_ordinal(v: i32) -> Self {
        Self::ALL[clamp_ordinal(v, Self::ALL.len())]
    }
}

/// プーリングの種類
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMode {
    LastHidden,
    MeanPooling,
    MaxPooling,
    #[default]
    Attention,
}

impl PoolingMode {
    pub const ALL: [PoolingMode; 4] = [
        PoolingMode::LastHidden,
        PoolingMode::MeanPooling,
        PoolingMode::MaxPooling,
        PoolingMode::Attention,
    ];

    pub fn ordinal(self) -> i32 {
        match self {
            PoolingMode::LastHidden => 0,
            PoolingMode::MeanPooling => 1,
            PoolingMode::MaxPooling => 2,
            PoolingMode::Attention => 3,
        }
    }

    pub fn from_ordinal(v: i32) -> Self {
        Self::ALL[clamp_ordinal(v, Self::ALL.len())]
    }
}

fn clamp_ordinal(v: i32, n: usize) -> usize {
    if v < 0 { 0 } else { (v as usize).min(n - 1) }
}

/// RNN の構成とハイパーパラメータ
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RnnConfig {
    /// 1 タイムステップあたりの埋め込み次元
    pub input_size: usize,
    /// LSTM 隠れ次元（片方向）
    pub hidden_size: usize,
    /// LSTM 層数
    pub num_layers: usize,
    /// 双方向か
    pub bidirectional: bool,
    pub input_mode: InputMode,
    pub pooling_mode: PoolingMode,
    pub learning_rate: f64,
    /// 層間 dropout 率
    pub dropout_rate: f64,
    /// 再帰 dropout 率（h_prev に適用）
    pub recurrent_dropout_rate: f64,
    /// AdamW の分離型重み減衰
    pub weight_decay: f64,
    /// 勾配クリップ閾値（0 で無効）
    pub gradient_clip: f64,
    /// ラベル平滑化率
    pub label_smoothing: f64,
    pub seed: u64,
}

impl Default for RnnConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            num_layers: DEFAULT_NUM_LAYERS,
            bidirectional: true,
            input_mode: InputMode::default(),
            pooling_mode: PoolingMode::default(),
            learning_rate: DEFAULT_LEARNING_RATE,
            dropout_rate: DEFAULT_DROPOUT,
            recurrent_dropout_rate: DEFAULT_RECURRENT_DROPOUT,
            weight_decay: DEFAULT_WEIGHT_DECAY,
            gradient_clip: DEFAULT_GRAD_CLIP,
            label_smoothing: DEFAULT_LABEL_SMOOTHING,
            seed: DEFAULT_SEED,
        }
    }
}

impl RnnConfig {
    /// 範囲外の値を補正したコピーを返す
    pub fn sanitized(mut self) -> Self {
        self.sanitize();
        self
    }

    /// 全フィールドを有効範囲に収める
    pub fn sanitize(&mut self) {
        self.input_size = self.input_size.clamp(MIN_INPUT_SIZE, MAX_INPUT_SIZE);
        self.hidden_size = self.hidden_size.clamp(MIN_HIDDEN_SIZE, MAX_HIDDEN_SIZE);
        self.num_layers = self.num_layers.clamp(MIN_NUM_LAYERS, MAX_NUM_LAYERS);

        self.learning_rate = clamp_finite(
            self.learning_rate,
            MIN_LEARNING_RATE,
            MAX_LEARNING_RATE,
            DEFAULT_LEARNING_RATE,
        );
        self.dropout_rate = clamp_finite(self.dropout_rate, 0.0, MAX_DROPOUT, DEFAULT_DROPOUT);
        self.recurrent_dropout_rate = clamp_finite(
            self.recurrent_dropout_rate,
            0.0,
            MAX_DROPOUT,
            DEFAULT_RECURRENT_DROPOUT,
        );
        self.weight_decay =
            clamp_finite(self.weight_decay, 0.0, MAX_WEIGHT_DECAY, DEFAULT_WEIGHT_DECAY);
        self.gradient_clip =
            clamp_finite(self.gradient_clip, 0.0, MAX_GRAD_CLIP, DEFAULT_GRAD_CLIP);
        self.label_smoothing = clamp_finite(
            self.label_smoothing,
            0.0,
            MAX_LABEL_SMOOTHING,
            DEFAULT_LABEL_SMOOTHING,
        );
    }

    /// エンコーダ出力次元
    pub fn encoder_output_size(&self) -> usize {
        if self.bidirectional { self.hidden_size * 2 } else { self.hidden_size }
    }

    /// ラベル平滑化を適用した教師値
    pub fn smooth_label(&self, cheat: bool) -> f64 {
        let y = if cheat { 1.0 } else { 0.0 };
        if self.label_smoothing > 0.0 {
            y * (1.0 - self.label_smoothing) + 0.5 * self.label_smoothing
        } else {
            y
        }
    }
}

/// 非有限なら `fallback`、そうでなければ [min, max] にクランプ
pub fn clamp_finite(v: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if !v.is_finite() { fallback } else { v.clamp(min, max) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_and_replaces() {
        let cfg = RnnConfig {
            input_size: 0,
            hidden_size: 5000,
            num_layers: 99,
            learning_rate: f64::NAN,
            dropout_rate: 3.0,
            recurrent_dropout_rate: -1.0,
            weight_decay: f64::INFINITY,
            gradient_clip: -5.0,
            label_smoothing: 0.9,
            ..RnnConfig::default()
        }
        .sanitized();

        assert_eq!(cfg.input_size, MIN_INPUT_SIZE);
        assert_eq!(cfg.hidden_size, MAX_HIDDEN_SIZE);
        assert_eq!(cfg.num_layers, MAX_NUM_LAYERS);
        assert_eq!(cfg.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(cfg.dropout_rate, MAX_DROPOUT);
        assert_eq!(cfg.recurrent_dropout_rate, 0.0);
        assert_eq!(cfg.weight_decay, DEFAULT_WEIGHT_DECAY);
        assert_eq!(cfg.gradient_clip, 0.0);
        assert_eq!(cfg.label_smoothing, MAX_LABEL_SMOOTHING);
    }

    #[test]
    fn test_ordinal_roundtrip_and_clamp() {
        for mode in InputMode::ALL {
            assert_eq!(InputMode::from_ordinal(mode.ordinal()), mode);
        }
        for mode in PoolingMode::ALL {
            assert_eq!(PoolingMode::from_ordinal(mode.ordinal()), mode);
        }
        assert_eq!(InputMode::from_ordinal(-3), InputMode::RawSequence);
        assert_eq!(PoolingMode::from_ordinal(42), PoolingMode::Attention);
    }

    #[test]
    fn test_smooth_label() {
        let cfg = RnnConfig {
            label_smoothing: 0.1,
            ..RnnConfig::default()
        };
        assert!((cfg.smooth_label(true) - 0.95).abs() < 1e-12);
        assert!((cfg.smooth_label(false) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_encoder_output_size() {
        let mut cfg = RnnConfig {
            input_size: 8,
            hidden_size: 12,
            ..RnnConfig::default()
        };
        assert_eq!(cfg.encoder_output_size(), 24);
        cfg.bidirectional = false;
        assert_eq!(cfg.encoder_output_size(), 12);
    }
}
