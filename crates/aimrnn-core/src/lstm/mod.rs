//! LSTM エンコーダ

mod layer;
mod stacked;

pub use layer::{
    GATE_F, GATE_G, GATE_I, GATE_O, LAYER_ARRAY_NAMES, LAYER_ARRAYS, LstmCache, LstmLayer,
    NUM_GATES,
};
pub use stacked::{EncoderCache, StackedLstm, TrainingPass};
