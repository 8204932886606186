//! aimrnn 用の学習・判定ツール群
//!
//! - `common::io`: gzip 対応の入出力
//! - `dataset`: JSONL データセットの読み込み
//! - `scoring`: 判定結果の出力行と集計
//! - `settings`: TOML 設定ファイル

pub mod common;
pub mod dataset;
pub mod scoring;
pub mod settings;
