//! 視点回転シーケンス判定用 RNN エンジン
//!
//! 2 チャンネル（yaw / pitch の差分）の時系列を受け取り、
//! 双方向 LSTM → プーリング → 二値ヘッドで「不正らしさ」の確率を返す。
//!
//! # 構成
//!
//! ```text
//! RotationSeries ─ chunk(150) ─→ sequence::prepare   [T × input]
//!                                     ↓
//!                              StackedLstm (bi)    [T × 2H]
//!                                     ↓
//!                              pooling (mode)      [2H]
//!                                     ↓
//!                              BinaryHead          p ∈ [0,1]
//! ```
//!
//! - `model`: 公開 API（`RnnModel`）。読み書きロックで推論と学習を並行させる
//! - `io`: バイナリ永続化（現行版 + レガシー版の読み込み）
//! - `optim`: AdamW
//! - `metrics`: 検証指標（ROC-AUC / PR-AUC / 混同行列）

pub mod config;
pub mod data;
pub mod error;
pub mod head;
pub mod io;
pub mod lstm;
pub mod math;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod pooling;
pub mod sequence;
pub mod tensors;
pub mod verdict;

pub use config::{InputMode, PoolingMode, RnnConfig};
pub use data::{CHUNK_SIZE, LabeledSeries, RotationSeries, Sample};
pub use error::{ModelError, ModelResult};
pub use io::FormatVersion;
pub use metrics::{ConfusionMatrix, DatasetMetrics, EpochReport};
pub use model::{BatchOutcome, RnnModel, TrainingSummary};
pub use verdict::{FlagType, Verdict};
