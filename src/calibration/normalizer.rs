//! # 绝对归一化
//!
//! 用活像素常数的中位数重新标定相对常数；非活像素（以及任何非正、
//! 非有限的常数）强制为 1.0、不确定度为 0。
//!
//! ## 依赖关系
//! - 被 `calibration/pipeline.rs` 调用
//! - 使用 `calibration/statistics.rs` 的中位数

use crate::calibration::context::{Diagnostics, WarningSubject};
use crate::calibration::statistics::median;
use crate::models::FactorEstimate;

/// 归一化结果
#[derive(Debug, Clone)]
pub struct Normalisation {
    pub constants: Vec<FactorEstimate>,
    /// 用作标尺的中位数
    pub scale: f64,
    /// 参与中位数的活像素数
    pub live_count: usize,
}

/// 以活像素中位数归一化
pub fn normalise(
    constants: &[FactorEstimate],
    live: &[bool],
    diagnostics: &mut Diagnostics,
) -> Normalisation {
    let usable = |i: usize| live.get(i).copied().unwrap_or(false) && constants[i].is_usable();

    let live_values: Vec<f64> = (0..constants.len())
        .filter(|&i| usable(i))
        .map(|i| constants[i].value)
        .collect();

    for (i, c) in constants.iter().enumerate() {
        if live.get(i).copied().unwrap_or(false) && !c.is_usable() {
            diagnostics.warn(
                WarningSubject::Pixel(i),
                format!("Constant {} is not usable; pixel excluded and set to 1", c.value),
            );
        }
    }

    let scale = match median(&live_values) {
        Some(m) => m,
        None => {
            diagnostics.warn(
                WarningSubject::Run,
                "No live pixel with a usable constant; all constants set to 1",
            );
            1.0
        }
    };

    let normalised = (0..constants.len())
        .map(|i| {
            if usable(i) {
                FactorEstimate::new(constants[i].value / scale, constants[i].error / scale)
            } else {
                FactorEstimate::NEUTRAL
            }
        })
        .collect();

    Normalisation {
        constants: normalised,
        scale,
        live_count: live_values.len(),
    }
}
