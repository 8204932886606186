//! 回転系列 RNN の学習
//!
//! 使用例:
//! ```text
//! train_rnn --data sessions.jsonl.gz --output model.bin --epochs 20
//! train_rnn --data more.jsonl --resume model.bin --output model.bin --config rnn.toml
//! ```

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aimrnn_core::{InputMode, PoolingMode, RnnModel};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tools::dataset::load_dataset;
use tools::settings::Settings;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputModeArg {
    Raw,
    Statistical,
    Hybrid,
}

impl From<InputModeArg> for InputMode {
    fn from(v: InputModeArg) -> Self {
        match v {
            InputModeArg::Raw => InputMode::RawSequence,
            InputModeArg::Statistical => InputMode::StatisticalFeatures,
            InputModeArg::Hybrid => InputMode::Hybrid,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PoolingModeArg {
    Last,
    Mean,
    Max,
    Attention,
}

impl From<PoolingModeArg> for PoolingMode {
    fn from(v: PoolingModeArg) -> Self {
        match v {
            PoolingModeArg::Last => PoolingMode::LastHidden,
            PoolingModeArg::Mean => PoolingMode::MeanPooling,
            PoolingModeArg::Max => PoolingMode::MaxPooling,
            PoolingModeArg::Attention => PoolingMode::Attention,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Train the rotation-sequence RNN classifier")]
struct Cli {
    /// 学習データ（JSONL、.gz 可）
    #[arg(long)]
    data: PathBuf,

    /// 出力モデルファイル
    #[arg(long, short)]
    output: PathBuf,

    /// TOML 設定ファイル
    #[arg(long)]
    config: Option<PathBuf>,

    /// 既存モデルから再開
    #[arg(long)]
    resume: Option<PathBuf>,

    /// エポック数（設定ファイルより優先）
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    dropout: Option<f64>,

    #[arg(long)]
    recurrent_dropout: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    /// 勾配クリップ閾値（0 で無効）
    #[arg(long)]
    gradient_clip: Option<f64>,

    #[arg(long)]
    label_smoothing: Option<f64>,

    #[arg(long, value_enum)]
    input_mode: Option<InputModeArg>,

    #[arg(long, value_enum)]
    pooling_mode: Option<PoolingModeArg>,

    /// 初期化・シャッフル用シード
    #[arg(long)]
    seed: Option<u64>,

    /// 読み込む系列数の上限
    #[arg(long)]
    limit: Option<usize>,

    /// N エポックごとに出力ファイルへ保存（0 で最後のみ）
    #[arg(long, default_value_t = 0)]
    checkpoint_interval: usize,
}

fn apply_overrides(model: &RnnModel, cli: &Cli) {
    if let Some(v) = cli.learning_rate {
        model.set_learning_rate(v);
    }
    if let Some(v) = cli.dropout {
        model.set_dropout_rate(v);
    }
    if let Some(v) = cli.recurrent_dropout {
        model.set_recurrent_dropout_rate(v);
    }
    if let Some(v) = cli.weight_decay {
        model.set_weight_decay(v);
    }
    if let Some(v) = cli.gradient_clip {
        model.set_gradient_clip(v);
    }
    if let Some(v) = cli.label_smoothing {
        model.set_label_smoothing(v);
    }
    if let Some(v) = cli.input_mode {
        model.set_input_mode(v.into());
    }
    if let Some(v) = cli.pooling_mode {
        model.set_pooling_mode(v.into());
    }
    if let Some(v) = cli.batch_size {
        model.set_batch_size(v);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let epochs = cli.epochs.unwrap_or(settings.training.epochs);
    if epochs == 0 {
        bail!("--epochs must be >= 1");
    }

    let mut cfg = settings.model.clone();
    if let Some(seed) = cli.seed {
        cfg.seed = seed;
    }
    let model = RnnModel::new(cfg);
    model.set_batch_size(settings.training.batch_size);

    if let Some(path) = &cli.resume {
        model
            .load_from_file(path)
            .with_context(|| format!("Failed to resume from {}", path.display()))?;
        log::info!(
            "Resumed from {} (step {}, optimizer step {})",
            path.display(),
            model.training_step(),
            model.optimizer_step()
        );
    }
    apply_overrides(&model, &cli);

    let dataset = load_dataset(&cli.data, cli.limit)?;
    if dataset.is_empty() {
        bail!("No labeled series in {}", cli.data.display());
    }

    let cfg = model.config();
    log::info!(
        "Model: {} parameters, input {:?}, pooling {:?}, hidden {}x{}{}, batch {}",
        model.parameters(),
        cfg.input_mode,
        cfg.pooling_mode,
        cfg.hidden_size,
        cfg.num_layers,
        if cfg.bidirectional { " (bi)" } else { "" },
        model.batch_size()
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted; finishing the current epoch...");
            flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let progress = ProgressBar::new(epochs as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} epochs {msg}")
            .context("Invalid progress template")?,
    );

    let mut checkpoint_error = None;
    let summary = model.train_epochs_with(&dataset, epochs, |report| {
        progress.inc(1);
        progress.set_message(format!(
            "val loss {:.4} | f1 {:.3} | auc {:.3}",
            report.validation.average_loss(),
            report.f1(),
            report.roc_auc()
        ));

        if cli.checkpoint_interval > 0 && report.epoch % cli.checkpoint_interval == 0 {
            match model.save_to_file(&cli.output) {
                Ok(()) => log::info!(
                    "Checkpoint saved to {} (epoch {})",
                    cli.output.display(),
                    report.epoch
                ),
                Err(e) => {
                    checkpoint_error = Some(e);
                    return ControlFlow::Break(());
                }
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    progress.finish();

    if let Some(e) = checkpoint_error {
        return Err(e)
            .with_context(|| format!("Failed to write checkpoint {}", cli.output.display()));
    }

    model
        .save_to_file(&cli.output)
        .with_context(|| format!("Failed to save {}", cli.output.display()))?;

    match summary.last() {
        Some(last) => log::info!(
            "Saved {} after {}/{} epochs (train {}, validation {}, val accuracy {:.1}%)",
            cli.output.display(),
            last.epoch,
            epochs,
            summary.train_size,
            summary.validation_size,
            last.validation.accuracy()
        ),
        None => log::info!("Saved {}", cli.output.display()),
    }
    Ok(())
}
