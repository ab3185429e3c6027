//! 化验模拟（LIS）
//!
//! 肌酐值按患者ID确定性生成，同一患者重复查询得到相同结果。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CREATININE_CODE: &str = "KREA";
pub const CREATININE_NAME: &str = "Creatinine";
pub const CREATININE_UNIT: &str = "mg/dL";
pub const CREATININE_REFERENCE_RANGE: &str = "0.6-1.2";

/// 超过该值视为危急（造影剂风险）
pub const CRITICAL_THRESHOLD: f64 = 1.3;

/// 化验结果标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabFlag {
    Normal,
    Critical,
}

impl LabFlag {
    pub fn classify(value: f64) -> Self {
        if value > CRITICAL_THRESHOLD {
            LabFlag::Critical
        } else {
            LabFlag::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LabFlag::Normal => "NORMAL",
            LabFlag::Critical => "CRITICAL",
        }
    }
}

/// 一次肌酐查询的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub pid: String,
    pub value: f64,
    pub unit: String,
    pub reference_range: String,
    pub status: LabFlag,
    pub request_hl7: String,  // QRY^Q02
    pub response_hl7: String, // ORU^R01
}

/// 患者的模拟肌酐值（mg/dL，两位小数）
///
/// 基础值均匀分布在 [0.5, 1.4)；约20%的患者再加上 [0.5, 2.0) 的升高值。
pub fn simulate_creatinine(pid: &str) -> f64 {
    let seed: [u8; 32] = Sha256::digest(pid.as_bytes()).into();
    let mut rng = StdRng::from_seed(seed);

    let mut value: f64 = rng.gen_range(0.5..1.4);
    if rng.gen::<f64>() > 0.8 {
        value += rng.gen_range(0.5..2.0);
    }
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_per_pid() {
        assert_eq!(simulate_creatinine("SUS-AAAA-1"), simulate_creatinine("SUS-AAAA-1"));
    }

    #[test]
    fn test_value_range_and_rounding() {
        for i in 0..500 {
            let value = simulate_creatinine(&format!("SUS-AAAA-{}", i));
            assert!((0.5..=3.4).contains(&value), "value {} out of range", value);
            assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_some_patients_are_critical() {
        let critical = (0..500)
            .filter(|i| LabFlag::classify(simulate_creatinine(&format!("SUS-BBBB-{}", i))) == LabFlag::Critical)
            .count();
        assert!(critical > 0 && critical < 500);
    }

    #[test]
    fn test_classify_threshold() {
        assert_eq!(LabFlag::classify(1.3), LabFlag::Normal);
        assert_eq!(LabFlag::classify(1.31), LabFlag::Critical);
        assert_eq!(serde_json::to_string(&LabFlag::Critical).unwrap(), "\"CRITICAL\"");
    }
}
