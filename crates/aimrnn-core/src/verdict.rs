//! 確率から判定結果への変換

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 判定の深刻度（Normal < Unusual < Strange < Suspected）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Normal,
    Unusual,
    Strange,
    Suspected,
}

impl FlagType {
    pub fn level(self) -> u8 {
        match self {
            FlagType::Normal => 0,
            FlagType::Unusual => 1,
            FlagType::Strange => 2,
            FlagType::Suspected => 3,
        }
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlagType::Normal => "normal",
            FlagType::Unusual => "unusual",
            FlagType::Strange => "strange",
            FlagType::Suspected => "suspected",
        };
        f.write_str(s)
    }
}

/// 1 回の判定
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub flag: FlagType,
    pub priority: u32,
    pub probability: f64,
}

impl Verdict {
    /// 閾値で分類
    pub fn classify(p: f64) -> Self {
        let (flag, priority) = if p > 0.90 {
            (FlagType::Suspected, 20)
        } else if p > 0.80 {
            (FlagType::Suspected, 12)
        } else if p > 0.70 {
            (FlagType::Strange, 8)
        } else if p > 0.60 {
            (FlagType::Unusual, 4)
        } else {
            (FlagType::Normal, 0)
        };
        Self {
            flag,
            priority,
            probability: p,
        }
    }

    /// "Insane Probability 93.0%" 形式の説明文
    pub fn describe(&self) -> String {
        let pct = format!("{:.1}%", self.probability * 100.0);
        let label = match (self.flag, self.priority) {
            (FlagType::Suspected, 20) => "Insane Probability",
            (FlagType::Suspected, _) => "Suspicious Probability",
            (FlagType::Strange, _) => "Strange Behavior",
            (FlagType::Unusual, _) => "Unusual patterns",
            (FlagType::Normal, _) => return pct,
        };
        format!("{label} {pct}")
    }

    /// 深刻度の順序（レベル → 優先度）
    pub fn severity_cmp(&self, other: &Self) -> Ordering {
        self.flag
            .cmp(&other.flag)
            .then(self.priority.cmp(&other.priority))
    }

    /// より深刻な方を返す（同順位なら self）
    pub fn max_by_severity(self, other: Self) -> Self {
        if other.severity_cmp(&self) == Ordering::Greater { other } else { self }
    }
}

/// `Verdict::classify` の関数版
pub fn classify(p: f64) -> Verdict {
    Verdict::classify(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let cases = [
            (0.95, FlagType::Suspected, 20),
            (0.85, FlagType::Suspected, 12),
            (0.75, FlagType::Strange, 8),
            (0.65, FlagType::Unusual, 4),
            (0.60, FlagType::Normal, 0),
            (0.10, FlagType::Normal, 0),
        ];
        for (p, flag, priority) in cases {
            let v = classify(p);
            assert_eq!((v.flag, v.priority), (flag, priority), "p = {p}");
        }
        // 境界は含まない
        assert_eq!(classify(0.90).priority, 12);
    }

    #[test]
    fn test_describe() {
        assert_eq!(classify(0.93).describe(), "Insane Probability 93.0%");
        assert_eq!(classify(0.81).describe(), "Suspicious Probability 81.0%");
        assert_eq!(classify(0.72).describe(), "Strange Behavior 72.0%");
        assert_eq!(classify(0.64).describe(), "Unusual patterns 64.0%");
        assert_eq!(classify(0.25).describe(), "25.0%");
    }

    #[test]
    fn test_max_by_severity() {
        let a = classify(0.85);
        let b = classify(0.95);
        let c = classify(0.65);
        assert_eq!(a.max_by_severity(b), b);
        assert_eq!(b.max_by_severity(c), b);
        assert_eq!(c.max_by_severity(a), a);
        assert!(FlagType::Normal < FlagType::Unusual);
        assert_eq!(FlagType::Suspected.level(), 3);
    }
}
