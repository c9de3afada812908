//! # 比值统计
//!
//! 把像素/参考比值数组归约为单个因子（一维），或把比值矩阵按扫描点轴
//! 归约为每行一个因子（二维）。
//!
//! 规则：
//! - 零值和非有限值视为缺失；
//! - 落在排除区间（已转换为下标区间）内的值先被移除；
//! - 没有剩余样本时返回中性因子 1.0；
//! - 不产生副作用，也从不报错。
//!
//! ## 依赖关系
//! - 被 `calibration/sequential.rs` 和 `calibration/global.rs` 使用
//! - 使用 `calibration/masked.rs` 与 `calibration/strategies.rs`

use crate::calibration::config::{CalibrationMethod, RowMethod};
use crate::calibration::masked::MaskedArray;
use crate::calibration::strategies::RobustCenter;
use crate::models::FactorEstimate;

use std::ops::Range;

/// 中位数（偶数个样本取中间两个的平均）
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// 算术平均
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// 平均值的标准误差
fn standard_error(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1) as f64;
    (var / n as f64).sqrt()
}

/// 比值统计
pub struct RatioStatistics<'a> {
    method: CalibrationMethod,
    robust: &'a dyn RobustCenter,
}

impl<'a> RatioStatistics<'a> {
    pub fn new(method: CalibrationMethod, robust: &'a dyn RobustCenter) -> Self {
        Self { method, robust }
    }

    /// 归约一维比值数组
    pub fn reduce(&self, ratios: &MaskedArray, excluded: &[Range<usize>]) -> FactorEstimate {
        let mut ratios = ratios.clone();
        ratios.mask_ranges(excluded);
        let samples = ratios.compressed();

        let center = match self.method {
            CalibrationMethod::Median => median(&samples),
            CalibrationMethod::Mean => mean(&samples),
            CalibrationMethod::MostLikelyMean => self.robust.center(&samples),
        };

        match center {
            Some(value) => FactorEstimate::new(value, standard_error(&samples)),
            None => FactorEstimate::NEUTRAL,
        }
    }

    /// 逐行归约比值矩阵，每行的排除区间可以不同
    pub fn reduce_rows(
        method: RowMethod,
        rows: &[MaskedArray],
        excluded: &[Range<usize>],
    ) -> Vec<FactorEstimate> {
        rows.iter()
            .map(|row| {
                let mut row = row.clone();
                row.mask_ranges(excluded);
                let samples = row.compressed();
                let center = match method {
                    RowMethod::Median => median(&samples),
                    RowMethod::Mean => mean(&samples),
                };
                center
                    .map(|value| FactorEstimate::new(value, standard_error(&samples)))
                    .unwrap_or(FactorEstimate::NEUTRAL)
            })
            .collect()
    }
}
