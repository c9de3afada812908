//! # 效率校准常数数据模型
//!
//! 校准常数表：探测单元下标 → (常数, 不确定度, 是否有效)。
//! 默认值为 1.0。由 `calibration/assembler.rs` 最终生成，之后只读。
//!
//! ## 依赖关系
//! - 被 `calibration/` 和 `parsers/calibration_csv.rs` 使用
//! - 被 `calibration/export.rs` 写出

use serde::{Deserialize, Serialize};

/// 单个因子估计（值与不确定度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorEstimate {
    pub value: f64,
    pub error: f64,
}

impl FactorEstimate {
    /// 中性因子 1.0
    pub const NEUTRAL: FactorEstimate = FactorEstimate {
        value: 1.0,
        error: 0.0,
    };

    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// 值是否为正的有限数
    pub fn is_usable(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}

impl Default for FactorEstimate {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// 校准常数表的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    /// 平铺后的探测单元下标
    pub index: usize,
    /// 探测管下标
    pub tube: usize,
    /// 管内像素下标
    pub pixel: usize,
    /// 校准常数
    pub constant: f64,
    /// 不确定度
    pub error: f64,
    /// 是否通过掩码判据
    pub valid: bool,
}

/// 校准常数表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub entries: Vec<CalibrationEntry>,
}

impl CalibrationTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 常数向量（长度为 `n`，缺失项为 1.0）
    pub fn constants(&self, n: usize) -> Vec<f64> {
        let mut out = vec![1.0; n];
        for entry in &self.entries {
            if entry.index < n {
                out[entry.index] = entry.constant;
            }
        }
        out
    }

    /// 无效（被掩码）的记录数
    pub fn masked_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.valid).count()
    }
}
