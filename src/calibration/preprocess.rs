//! # 预处理
//!
//! 在推导因子之前对原始扫描做的可选处理：
//! - 监视器归一化
//! - ROI 归一化（每个扫描点除以 ROI 区间内所有像素计数之和）
//! - 施加已有的校准常数文件
//!
//! ## 依赖关系
//! - 被 `calibration/pipeline.rs` 调用
//! - 使用 `models/scan.rs`

use crate::calibration::config::{AngularRange, NormaliseTo};
use crate::calibration::context::{Diagnostics, WarningSubject};
use crate::error::{DetcalError, Result};
use crate::models::{CalibrationTable, DetectorScan};

/// 检查扫描是否可用于推导
pub fn check_scan(scan: &DetectorScan) -> Result<()> {
    if scan.n_detectors() == 0 || scan.n_scan_points < 2 {
        return Err(DetcalError::MissingInput(format!(
            "'{}' is not a valid detector scan ({} detectors, {} scan points)",
            scan.name,
            scan.n_detectors(),
            scan.n_scan_points
        )));
    }
    if !(scan.scan_step.abs() > 0.0) || !(scan.geometry.pixel_size.abs() > 0.0) {
        return Err(DetcalError::MissingInput(format!(
            "'{}' has no usable scan step ({}) or pixel size ({})",
            scan.name, scan.scan_step, scan.geometry.pixel_size
        )));
    }
    Ok(())
}

/// ROI 归一化
pub fn normalise_to_roi(
    scan: &mut DetectorScan,
    regions: &[AngularRange],
    diagnostics: &mut Diagnostics,
) {
    let n_points = scan.n_scan_points;
    let factors: Vec<f64> = (0..n_points)
        .map(|point| {
            let total: f64 = (0..scan.n_detectors())
                .map(|d| d * n_points + point)
                .filter(|&i| regions.iter().any(|r| r.contains(scan.angles[i])))
                .map(|i| scan.counts[i])
                .sum();
            if total > 0.0 && total.is_finite() {
                1.0 / total
            } else {
                diagnostics.warn(
                    WarningSubject::ScanPoint(point),
                    "No counts inside the regions of interest; scan point discarded",
                );
                0.0
            }
        })
        .collect();
    scan.scale_scan_points(&factors);
}

/// 施加已有的校准常数
pub fn apply_prior(scan: &mut DetectorScan, prior: &CalibrationTable) {
    let constants = prior.constants(scan.n_detectors());
    scan.apply_constants(&constants);
}

/// 按配置预处理一条扫描
pub fn prepare(
    scan: &mut DetectorScan,
    normalise_to: NormaliseTo,
    regions: &[AngularRange],
    prior: Option<&CalibrationTable>,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    check_scan(scan)?;
    match normalise_to {
        NormaliseTo::None => {}
        NormaliseTo::Monitor => scan.normalise_to_monitor(),
        NormaliseTo::Roi => normalise_to_roi(scan, regions, diagnostics),
    }
    if let Some(table) = prior {
        apply_prior(scan, table);
    }
    Ok(())
}
