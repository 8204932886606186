//! エラー型

use thiserror::Error;

/// モデル読み込み・保存時のエラー
///
/// 入力系列の異常や数値不安定は局所的に回復するため、ここには現れない。
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid model magic: 0x{found:08X} (expected 0x{expected:08X})")]
    BadMagic { found: u32, expected: u32 },

    #[error("Unsupported model version: {0}")]
    UnsupportedVersion(i32),

    #[error(
        "Architecture mismatch: file has input={file_input} hidden={file_hidden} \
         layers={file_layers} bi={file_bi}, \
         model has input={input} hidden={hidden} layers={layers} bi={bi}"
    )]
    ArchitectureMismatch {
        file_input: i32,
        file_hidden: i32,
        file_layers: i32,
        file_bi: bool,
        input: usize,
        hidden: usize,
        layers: usize,
        bi: bool,
    },

    #[error("Encoder block mismatch: file has layers={file_layers} bi={file_bi}")]
    EncoderMismatch { file_layers: i32, file_bi: bool },

    #[error("Array length mismatch for {name}: expected {expected}, found {found}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Missing array: {0}")]
    MissingArray(&'static str),

    #[error("Non-finite value in {0}")]
    NonFiniteValue(&'static str),
}

pub type ModelResult<T> = Result<T, ModelError>;
