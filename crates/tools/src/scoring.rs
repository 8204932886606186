//! 判定結果の出力行と集計

use aimrnn_core::verdict::classify;
use aimrnn_core::{FlagType, Verdict};
use serde::Serialize;

/// JSON Lines 出力の 1 行
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreLine {
    pub index: usize,
    pub probability: f64,
    pub flag: FlagType,
    pub priority: u32,
    /// "Insane Probability 93.0%" 形式
    pub description: String,
}

impl ScoreLine {
    pub fn new(index: usize, verdict: &Verdict) -> Self {
        Self {
            index,
            probability: verdict.probability,
            flag: verdict.flag,
            priority: verdict.priority,
            description: verdict.describe(),
        }
    }
}

/// 判定全体の集計
#[derive(Clone, Debug, Default)]
pub struct ScoreSummary {
    pub scored: usize,
    /// Normal 以外の件数
    pub flagged: usize,
    /// レベル別件数（Normal, Unusual, Strange, Suspected）
    pub by_level: [usize; 4],
    /// 最も深刻な判定と行番号
    pub worst: Option<(usize, Verdict)>,
}

impl ScoreSummary {
    /// 確率を判定して記録し、出力行を返す
    pub fn score(&mut self, index: usize, probability: f64) -> ScoreLine {
        let verdict = classify(probability);
        self.record(index, verdict);
        ScoreLine::new(index, &verdict)
    }

    pub fn record(&mut self, index: usize, verdict: Verdict) {
        self.scored += 1;
        let level = verdict.flag.level();
        self.by_level[usize::from(level)] += 1;
        if level > 0 {
            self.flagged += 1;
        }
        self.worst = Some(match self.worst {
            // 同順位なら先に出た方を残す
            Some((i, w)) if w.max_by_severity(verdict) == w => (i, w),
            _ => (index, verdict),
        });
    }

    pub fn log(&self) {
        let [normal, unusual, strange, suspected] = self.by_level;
        log::info!(
            "Scored {} series, {} flagged (normal {}, unusual {}, strange {}, suspected {})",
            self.scored,
            self.flagged,
            normal,
            unusual,
            strange,
            suspected
        );
        if let Some((index, verdict)) = &self.worst {
            log::info!(
                "Most severe: line {} -> {} [{}, priority {}]",
                index + 1,
                verdict.describe(),
                verdict.flag,
                verdict.priority
            );
        }
    }
}
