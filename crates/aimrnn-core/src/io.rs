//! モデルファイル I/O
//!
//! ビッグエンディアンの独自形式。配列は「i32 長さ（負なら欠落）+ f64 × 長さ」。
//!
//! ```text
//! magic i32 | version i32
//! input_size i32 | hidden_size i32 | num_layers i32 | bidirectional u8
//! input_mode i32 | pooling_mode i32
//! learning_rate f64 | dropout f64 | recurrent_dropout f64
//! weight_decay f64 | gradient_clip f64 | label_smoothing f64
//! batch_size i32 | training_step i64 | optimizer_step i64
//! embedding wy, wp, b
//! encoder: num_layers i32 | bidirectional u8 | 層ごとに fwd (, bwd)
//!          各層 Wf Wi Wc Wo Uf Ui Uc Uo bf bi bc bo γ β
//! attention w | b f64
//! head v | bias f64
//! [version 7 のみ] AdamW のモーメント（同じ順序で m, v の組）
//! ```
//!
//! 読み込みは一時領域に展開して全体を検証してから返す。
//! 途中で失敗しても呼び出し側のモデルは変更されない。

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::config::{InputMode, PoolingMode, RnnConfig};
use crate::error::{ModelError, ModelResult};
use crate::lstm::{LAYER_ARRAY_NAMES, LstmLayer};
use crate::tensors::ModelTensors;

/// ファイルマジックナンバー（"RNN6"）
pub const MODEL_MAGIC: u32 = 0x524E_4E36;

/// ファイル形式のバージョン
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FormatVersion {
    /// オプティマイザ状態なし
    Legacy,
    /// オプティマイザ状態あり
    #[default]
    Current,
}

impl FormatVersion {
    pub fn as_i32(self) -> i32 {
        match self {
            FormatVersion::Legacy => 6,
            FormatVersion::Current => 7,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            6 => Some(FormatVersion::Legacy),
            7 => Some(FormatVersion::Current),
            _ => None,
        }
    }

    pub fn has_optimizer_state(self) -> bool {
        self == FormatVersion::Current
    }
}

/// 保存対象の参照
pub struct ModelView<'a> {
    pub cfg: &'a RnnConfig,
    pub batch_size: usize,
    pub training_step: u64,
    pub optimizer_step: u64,
    pub params: &'a ModelTensors,
    pub m: &'a ModelTensors,
    pub v: &'a ModelTensors,
}

/// 読み込み結果（未適用）
#[derive(Clone, Debug)]
pub struct LoadedModel {
    pub version: FormatVersion,
    /// ファイル内のモード・ハイパーパラメータを反映済み（sanitize 済み）
    pub cfg: RnnConfig,
    pub batch_size: usize,
    pub training_step: u64,
    pub optimizer_step: u64,
    pub params: ModelTensors,
    /// レガシー版ではゼロ
    pub m: ModelTensors,
    pub v: ModelTensors,
}

fn to_i32(v: usize) -> io::Result<i32> {
    i32::try_from(v).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("Value {v} does not fit in i32"))
    })
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn write_array<W: Write>(w: &mut W, a: &[f64]) -> io::Result<()> {
    w.write_i32::<BigEndian>(to_i32(a.len())?)?;
    for &x in a {
        w.write_f64::<BigEndian>(x)?;
    }
    Ok(())
}

fn write_layer<W: Write>(w: &mut W, layer: &LstmLayer) -> io::Result<()> {
    for a in layer.arrays() {
        write_array(w, a)?;
    }
    Ok(())
}

/// モデルを書き出す
pub fn write_model<W: Write>(
    w: &mut W,
    view: &ModelView<'_>,
    version: FormatVersion,
) -> ModelResult<()> {
    let cfg = view.cfg;
    w.write_u32::<BigEndian>(MODEL_MAGIC)?;
    w.write_i32::<BigEndian>(version.as_i32())?;

    w.write_i32::<BigEndian>(to_i32(cfg.input_size)?)?;
    w.write_i32::<BigEndian>(to_i32(cfg.hidden_size)?)?;
    w.write_i32::<BigEndian>(to_i32(cfg.num_layers)?)?;
    w.write_u8(u8::from(cfg.bidirectional))?;
    w.write_i32::<BigEndian>(cfg.input_mode.ordinal())?;
    w.write_i32::<BigEndian>(cfg.pooling_mode.ordinal())?;

    for x in [
        cfg.learning_rate,
        cfg.dropout_rate,
        cfg.recurrent_dropout_rate,
        cfg.weight_decay,
        cfg.gradient_clip,
        cfg.label_smoothing,
    ] {
        w.write_f64::<BigEndian>(x)?;
    }

    w.write_i32::<BigEndian>(to_i32(view.batch_size).unwrap_or(i32::MAX))?;
    w.write_i64::<BigEndian>(to_i64(view.training_step))?;
    w.write_i64::<BigEndian>(to_i64(view.optimizer_step))?;

    let p = view.params;
    write_array(w, &p.embedding.wy)?;
    write_array(w, &p.embedding.wp)?;
    write_array(w, &p.embedding.b)?;

    w.write_i32::<BigEndian>(to_i32(p.encoder.num_layers)?)?;
    w.write_u8(u8::from(p.encoder.bidirectional))?;
    for layer in p.encoder.layers() {
        write_layer(w, layer)?;
    }

    write_array(w, &p.attention.w)?;
    w.write_f64::<BigEndian>(p.attention.b)?;
    write_array(w, &p.head.v)?;
    w.write_f64::<BigEndian>(p.head.bias)?;

    if version.has_optimizer_state() {
        let (m, v) = (view.m, view.v);
        write_array(w, &m.head.v)?;
        write_array(w, &v.head.v)?;
        w.write_f64::<BigEndian>(m.head.bias)?;
        w.write_f64::<BigEndian>(v.head.bias)?;

        write_array(w, &m.attention.w)?;
        write_array(w, &v.attention.w)?;
        w.write_f64::<BigEndian>(m.attention.b)?;
        w.write_f64::<BigEndian>(v.attention.b)?;

        for (ma, va) in [
            (&m.embedding.wy, &v.embedding.wy),
            (&m.embedding.wp, &v.embedding.wp),
            (&m.embedding.b, &v.embedding.b),
        ] {
            write_array(w, ma)?;
            write_array(w, va)?;
        }

        for (lm, lv) in m.encoder.layers().zip(v.encoder.layers()) {
            for (ma, va) in lm.arrays().into_iter().zip(lv.arrays()) {
                write_array(w, ma)?;
                write_array(w, va)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

/// 配列を読み、長さと有限性を検証して `dst` に書き込む
fn read_into<R: Read>(r: &mut R, dst: &mut [f64], name: &'static str) -> ModelResult<()> {
    let len = r.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(ModelError::MissingArray(name));
    }
    let len = len as usize;
    if len != dst.len() {
        return Err(ModelError::LengthMismatch {
            name,
            expected: dst.len(),
            found: len,
        });
    }
    for slot in dst.iter_mut() {
        *slot = r.read_f64::<BigEndian>()?;
    }
    if dst.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteValue(name));
    }
    Ok(())
}

fn read_scalar<R: Read>(r: &mut R, name: &'static str) -> ModelResult<f64> {
    let v = r.read_f64::<BigEndian>()?;
    if !v.is_finite() {
        return Err(ModelError::NonFiniteValue(name));
    }
    Ok(v)
}

fn read_layer<R: Read>(r: &mut R, layer: &mut LstmLayer) -> ModelResult<()> {
    for (a, name) in layer.arrays_mut().into_iter().zip(LAYER_ARRAY_NAMES) {
        read_into(r, a, name)?;
    }
    Ok(())
}

/// モデルを読み込む
///
/// `cfg` は現在のモデル設定。アーキテクチャ（入力・隠れ次元、層数、方向）が
/// 完全一致しない場合は失敗する。`template` は読み込み先の形を決める。
pub fn read_model<R: Read>(
    r: &mut R,
    cfg: &RnnConfig,
    template: &ModelTensors,
) -> ModelResult<LoadedModel> {
    let magic = r.read_u32::<BigEndian>()?;
    if magic != MODEL_MAGIC {
        return Err(ModelError::BadMagic {
            found: magic,
            expected: MODEL_MAGIC,
        });
    }
    let raw_version = r.read_i32::<BigEndian>()?;
    let version = FormatVersion::from_i32(raw_version)
        .ok_or(ModelError::UnsupportedVersion(raw_version))?;

    let input = r.read_i32::<BigEndian>()?;
    let hidden = r.read_i32::<BigEndian>()?;
    let layers = r.read_i32::<BigEndian>()?;
    let bi = r.read_u8()? != 0;
    let matches = |file: i32, live: usize| usize::try_from(file).is_ok_and(|f| f == live);
    if !matches(input, cfg.input_size)
        || !matches(hidden, cfg.hidden_size)
        || !matches(layers, cfg.num_layers)
        || bi != cfg.bidirectional
    {
        return Err(ModelError::ArchitectureMismatch {
            file_input: input,
            file_hidden: hidden,
            file_layers: layers,
            file_bi: bi,
            input: cfg.input_size,
            hidden: cfg.hidden_size,
            layers: cfg.num_layers,
            bi: cfg.bidirectional,
        });
    }

    let mut loaded_cfg = cfg.clone();
    loaded_cfg.input_mode = InputMode::from_ordinal(r.read_i32::<BigEndian>()?);
    loaded_cfg.pooling_mode = PoolingMode::from_ordinal(r.read_i32::<BigEndian>()?);
    loaded_cfg.learning_rate = r.read_f64::<BigEndian>()?;
    loaded_cfg.dropout_rate = r.read_f64::<BigEndian>()?;
    loaded_cfg.recurrent_dropout_rate = r.read_f64::<BigEndian>()?;
    loaded_cfg.weight_decay = r.read_f64::<BigEndian>()?;
    loaded_cfg.gradient_clip = r.read_f64::<BigEndian>()?;
    loaded_cfg.label_smoothing = r.read_f64::<BigEndian>()?;
    loaded_cfg.sanitize();

    let batch_size = r.read_i32::<BigEndian>()?.max(1) as usize;
    let training_step = r.read_i64::<BigEndian>()?.max(0) as u64;
    let optimizer_step = r.read_i64::<BigEndian>()?.max(0) as u64;

    let mut params = template.zeros_like();
    read_into(r, &mut params.embedding.wy, "embedding.wy")?;
    read_into(r, &mut params.embedding.wp, "embedding.wp")?;
    read_into(r, &mut params.embedding.b, "embedding.b")?;

    let enc_layers = r.read_i32::<BigEndian>()?;
    let enc_bi = r.read_u8()? != 0;
    if !matches(enc_layers, cfg.num_layers) || enc_bi != cfg.bidirectional {
        return Err(ModelError::EncoderMismatch {
            file_layers: enc_layers,
            file_bi: enc_bi,
        });
    }
    for layer in params.encoder.layers_mut() {
        read_layer(r, layer)?;
    }

    read_into(r, &mut params.attention.w, "attention.w")?;
    params.attention.b = read_scalar(r, "attention.b")?;
    read_into(r, &mut params.head.v, "head.v")?;
    params.head.bias = read_scalar(r, "head.bias")?;

    let mut m = template.zeros_like();
    let mut v = template.zeros_like();
    let optimizer_step = if version.has_optimizer_state() {
        read_into(r, &mut m.head.v, "m.head.v")?;
        read_into(r, &mut v.head.v, "v.head.v")?;
        m.head.bias = read_scalar(r, "m.head.bias")?;
        v.head.bias = read_scalar(r, "v.head.bias")?;

        read_into(r, &mut m.attention.w, "m.attention.w")?;
        read_into(r, &mut v.attention.w, "v.attention.w")?;
        m.attention.b = read_scalar(r, "m.attention.b")?;
        v.attention.b = read_scalar(r, "v.attention.b")?;

        read_into(r, &mut m.embedding.wy, "m.embedding.wy")?;
        read_into(r, &mut v.embedding.wy, "v.embedding.wy")?;
        read_into(r, &mut m.embedding.wp, "m.embedding.wp")?;
        read_into(r, &mut v.embedding.wp, "v.embedding.wp")?;
        read_into(r, &mut m.embedding.b, "m.embedding.b")?;
        read_into(r, &mut v.embedding.b, "v.embedding.b")?;

        for (lm, lv) in m.encoder.layers_mut().zip(v.encoder.layers_mut()) {
            let arrays = lm.arrays_mut().into_iter().zip(lv.arrays_mut());
            for ((ma, va), name) in arrays.zip(LAYER_ARRAY_NAMES) {
                read_into(r, ma, name)?;
                read_into(r, va, name)?;
            }
        }
        optimizer_step
    } else {
        0
    };

    Ok(LoadedModel {
        version,
        cfg: loaded_cfg,
        batch_size,
        training_step,
        optimizer_step,
        params,
        m,
        v,
    })
}
