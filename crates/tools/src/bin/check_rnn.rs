//! 学習済みモデルで回転系列を判定し、JSON Lines で出力する
//!
//! 出力 1 行:
//! `{"index":0,"probability":0.93,"flag":"suspected","priority":20,
//!   "description":"Insane Probability 93.0%"}`
//!
//! 終了時に最も深刻な判定をログに出す。入力にラベル（`cheat`）があれば正解率なども出す。

use std::path::PathBuf;

use aimrnn_core::{DatasetMetrics, RnnModel};
use anyhow::{Context, Result};
use clap::Parser;
use tools::common::io::open_writer;
use tools::dataset::load_records;
use tools::scoring::ScoreSummary;
use tools::settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about = "Score rotation sequences with a trained RNN model")]
struct Cli {
    /// モデルファイル
    #[arg(long)]
    model: PathBuf,

    /// 判定対象（JSONL、.gz 可、- で標準入力）
    #[arg(long)]
    input: PathBuf,

    /// 出力先（.gz 可、- で標準出力）
    #[arg(long, default_value = "-")]
    output: PathBuf,

    /// 学習時と同じ TOML 設定（アーキテクチャの照合に使う）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 判定する系列数の上限
    #[arg(long)]
    limit: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let model = RnnModel::new(settings.model);
    model
        .load_from_file(&cli.model)
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;

    let records = load_records(&cli.input, cli.limit)?;
    let mut out = open_writer(&cli.output)
        .with_context(|| format!("Failed to open {}", cli.output.display()))?;

    let mut metrics = DatasetMetrics::default();
    let mut summary = ScoreSummary::default();
    for (index, rec) in &records {
        let p = model.check_data(&rec.series());
        if let Some(cheat) = rec.cheat {
            metrics.record(p, if cheat { 1.0 } else { 0.0 });
        }
        let line = summary.score(*index, p);
        log::debug!("line {}: {}", index + 1, line.description);
        out.write_json_line(&line)
            .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    }
    out.close()
        .with_context(|| format!("Failed to finish {}", cli.output.display()))?;

    summary.log();
    if metrics.used > 0 {
        let c = &metrics.confusion;
        log::info!(
            "Labeled {}: loss {:.4} | acc {:.1}% | precision {:.4} | recall {:.4} | ROC-AUC {:.4}",
            metrics.used,
            metrics.average_loss(),
            metrics.accuracy(),
            c.precision(),
            c.recall(),
            metrics.roc_auc()
        );
    }
    Ok(())
}
