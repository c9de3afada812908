//! # 校准流程编排
//!
//! `Calibrator` 把配置与三个注入策略组合起来，完成一次完整运行：
//! 校验配置 → 预处理 → 顺序或全局推导 → 绝对归一化 → 组装常数表。
//!
//! ## 依赖关系
//! - 被 `commands/calibrate.rs` 调用
//! - 使用 `calibration/` 下的各阶段模块

use crate::calibration::assembler::assemble;
use crate::calibration::config::{CalibrationConfig, DerivationMethod, RowMethod};
use crate::calibration::context::{CalibrationWarning, Diagnostics, WarningSubject};
use crate::calibration::global::{GlobalReferenceSolver, GlobalSettings, IterationReport};
use crate::calibration::normalizer::normalise;
use crate::calibration::preprocess;
use crate::calibration::sequential::{SequentialReferenceBuilder, SequentialSettings};
use crate::calibration::statistics::RatioStatistics;
use crate::calibration::strategies::{
    BinnedOverlapSum, CubicSplineResampler, OverlapSummation, Resampler, RobustCenter,
    SqrtDistanceCenter,
};
use crate::error::{DetcalError, Result};
use crate::models::{CalibrationTable, DetectorGeometry, DetectorScan, FactorEstimate, ResponseCurve};

/// 一次校准运行的结果
#[derive(Debug, Clone)]
pub struct CalibrationOutput {
    pub table: CalibrationTable,
    /// 组合响应曲线（仅顺序模式且开启输出时）
    pub response: Option<ResponseCurve>,
    /// 全局模式每次迭代的 chi2/ndof
    pub iterations: Vec<IterationReport>,
    pub warnings: Vec<CalibrationWarning>,
    /// 参与归一化的活像素数
    pub live_count: usize,
    /// 归一化使用的中位数
    pub scale: f64,
}

/// 推导阶段的中间结果
struct Derived {
    constants: Vec<FactorEstimate>,
    live: Vec<bool>,
    geometry: DetectorGeometry,
    response: Option<ResponseCurve>,
    iterations: Vec<IterationReport>,
}

/// 校准器
pub struct Calibrator {
    config: CalibrationConfig,
    robust: Box<dyn RobustCenter>,
    resampler: Box<dyn Resampler>,
    summation: Box<dyn OverlapSummation>,
}

impl Calibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            robust: Box::new(SqrtDistanceCenter),
            resampler: Box::new(CubicSplineResampler),
            summation: Box::new(BinnedOverlapSum::default()),
        }
    }

    pub fn with_robust_center(mut self, robust: Box<dyn RobustCenter>) -> Self {
        self.robust = robust;
        self
    }

    pub fn with_resampler(mut self, resampler: Box<dyn Resampler>) -> Self {
        self.resampler = resampler;
        self
    }

    pub fn with_overlap_summation(mut self, summation: Box<dyn OverlapSummation>) -> Self {
        self.summation = summation;
        self
    }

    /// 执行一次完整校准
    pub fn run(
        &self,
        scans: Vec<DetectorScan>,
        prior: Option<&CalibrationTable>,
    ) -> Result<CalibrationOutput> {
        self.config.validate(scans.len())?;

        let mut diagnostics = Diagnostics::default();
        let derived = match self.config.derivation {
            DerivationMethod::Sequential1D => self.run_sequential(scans, prior, &mut diagnostics)?,
            DerivationMethod::Global2D => self.run_global(scans, prior, &mut diagnostics)?,
        };

        let normalised = normalise(&derived.constants, &derived.live, &mut diagnostics);
        let table = assemble(
            &normalised.constants,
            &derived.geometry,
            self.config.mask_criterion,
        );

        Ok(CalibrationOutput {
            table,
            response: derived.response,
            iterations: derived.iterations,
            warnings: diagnostics.into_warnings(),
            live_count: normalised.live_count,
            scale: normalised.scale,
        })
    }

    fn run_sequential(
        &self,
        scans: Vec<DetectorScan>,
        prior: Option<&CalibrationTable>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Derived> {
        let mut scans = scans.into_iter();
        let mut scan = scans
            .next()
            .ok_or_else(|| DetcalError::MissingInput("no detector scan given".to_string()))?;
        preprocess::check_scan(&scan)?;
        for other in scans {
            scan.accumulate(&other)?;
        }

        preprocess::prepare(
            &mut scan,
            self.config.normalise_to,
            &self.config.regions_of_interest,
            prior,
            diagnostics,
        )?;

        let n_detectors = scan.n_detectors();
        let (first, last) = self
            .config
            .pixel_range
            .unwrap_or((0, n_detectors.saturating_sub(1)));

        let settings = SequentialSettings {
            bin_offset: scan.bin_offset(),
            scan_step: scan.scan_step.abs(),
            pixel_size: scan.geometry.pixel_size.abs(),
            interpolate: self.config.interpolate,
            excluded: self.config.excluded_tuples(),
            record_response: self.config.output_response,
        };
        let statistics = RatioStatistics::new(self.config.method, self.robust.as_ref());
        let builder = SequentialReferenceBuilder::new(statistics, self.resampler.as_ref(), settings);

        let outcome = builder.build(&scan.pixel_curves(), scan.n_scan_points, first, last)?;
        diagnostics.extend(outcome.diagnostics);

        Ok(Derived {
            constants: outcome.constants,
            live: outcome.live,
            geometry: scan.geometry,
            response: outcome.response,
            iterations: Vec::new(),
        })
    }

    fn run_global(
        &self,
        mut scans: Vec<DetectorScan>,
        prior: Option<&CalibrationTable>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Derived> {
        for scan in scans.iter_mut() {
            preprocess::prepare(
                scan,
                self.config.normalise_to,
                &self.config.regions_of_interest,
                prior,
                diagnostics,
            )?;
        }

        if self.config.output_response {
            diagnostics.warn(
                WarningSubject::Run,
                "The combined response curve is only produced by the sequential derivation",
            );
        }

        let settings = GlobalSettings {
            method: RowMethod::try_from(self.config.method)?,
            n_iterations: self.config.n_iterations,
            chi2_threshold: self.config.chi2_threshold,
            max_auto_iterations: self.config.max_auto_iterations,
            trim_pixels: self.config.trim_pixels,
            excluded: self.config.excluded_tuples(),
            jobs: self.config.jobs,
        };
        let solver = GlobalReferenceSolver::new(self.summation.as_ref(), settings);
        let mut outcome = solver.solve(&scans)?;
        diagnostics.extend(std::mem::take(&mut outcome.diagnostics));

        let geometry = scans[0].geometry;
        let n_detectors = geometry.n_detectors();
        if let Some((first, last)) = self.config.pixel_range {
            // 范围外的像素不参与归一化，常数保持 1.0
            for i in (0..n_detectors).filter(|&i| i < first || i > last) {
                outcome.constants[i] = FactorEstimate::NEUTRAL;
                outcome.live[i] = false;
            }
        }

        Ok(Derived {
            constants: outcome.constants,
            live: outcome.live,
            geometry,
            response: None,
            iterations: outcome.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::config::{CalibrationMethod, NormaliseTo};
    use crate::models::scan::tests::synthetic_scan;

    /// 单管 4 像素，像素 p 在扫描点 s 的角度 = p * 0.5 + s * 0.1，
    /// 强度 = 效率 × 平滑的角度响应
    fn sequential_scan(efficiency: [f64; 4]) -> DetectorScan {
        let mut scan = synthetic_scan(
            "seq",
            1,
            4,
            101,
            |_, p, s| p as f64 * 0.5 + s as f64 * 0.1,
            move |_, p, angle| efficiency[p] * (100.0 + 20.0 * (angle * 0.7).sin()),
        );
        scan.geometry.pixel_size = 0.5;
        scan
    }

    #[test]
    fn test_sequential_recovers_relative_efficiency() {
        let scan = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let output = Calibrator::new(CalibrationConfig::default())
            .run(vec![scan], None)
            .unwrap();

        let c: Vec<f64> = output.table.entries.iter().map(|e| e.constant).collect();
        // 相对常数 1, 1/2, 2, 1 的中位数为 1
        assert!((output.scale - 1.0).abs() < 1e-9);
        assert!((c[0] - 1.0).abs() < 1e-9);
        assert!((c[1] - 0.5).abs() < 1e-9);
        assert!((c[2] - 2.0).abs() < 1e-9);
        assert!((c[3] - 1.0).abs() < 1e-9);
        assert!(output.warnings.is_empty());
        assert_eq!(output.live_count, 4);
    }

    #[test]
    fn test_uniform_detector_is_all_ones() {
        let scan = sequential_scan([3.0; 4]);
        let output = Calibrator::new(CalibrationConfig::default())
            .run(vec![scan], None)
            .unwrap();
        for entry in &output.table.entries {
            assert!((entry.constant - 1.0).abs() < 1e-9);
            assert!(entry.valid);
        }
    }

    #[test]
    fn test_pixel_range_leaves_outside_pixels_neutral() {
        let scan = sequential_scan([1.0, 2.0, 0.5, 4.0]);
        let config = CalibrationConfig {
            pixel_range: Some((0, 2)),
            ..Default::default()
        };
        let output = Calibrator::new(config).run(vec![scan], None).unwrap();
        assert_eq!(output.table.entries[3].constant, 1.0);
        assert_eq!(output.table.entries[3].error, 0.0);
        assert_eq!(output.live_count, 3);
    }

    #[test]
    fn test_mask_criterion_marks_entries() {
        let scan = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let config = CalibrationConfig {
            mask_criterion: Some((0.8, 1.2)),
            ..Default::default()
        };
        let output = Calibrator::new(config).run(vec![scan], None).unwrap();
        let valid: Vec<bool> = output.table.entries.iter().map(|e| e.valid).collect();
        assert_eq!(valid, vec![true, false, false, true]);
        assert_eq!(output.table.masked_count(), 2);
    }

    #[test]
    fn test_summed_scans_give_same_constants() {
        let a = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let b = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let output = Calibrator::new(CalibrationConfig::default())
            .run(vec![a, b], None)
            .unwrap();
        assert!((output.table.entries[1].constant - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_prior_calibration_is_applied_first() {
        let scan = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let prior = CalibrationTable {
            entries: (0..4)
                .map(|i| crate::models::CalibrationEntry {
                    index: i,
                    tube: 0,
                    pixel: i,
                    constant: [1.0, 0.5, 2.0, 1.0][i],
                    error: 0.0,
                    valid: true,
                })
                .collect(),
        };
        let output = Calibrator::new(CalibrationConfig::default())
            .run(vec![scan], Some(&prior))
            .unwrap();
        for entry in &output.table.entries {
            assert!((entry.constant - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_monitor_normalisation_cancels_out() {
        let mut scan = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        scan.monitor = (0..scan.n_scan_points).map(|s| 1.0 + s as f64 * 0.01).collect();
        let config = CalibrationConfig {
            normalise_to: NormaliseTo::Monitor,
            ..Default::default()
        };
        let output = Calibrator::new(config).run(vec![scan], None).unwrap();
        assert!(output.table.entries.iter().all(|e| e.constant.is_finite() && e.constant > 0.0));
    }

    #[test]
    fn test_response_curve_recorded_on_request() {
        let scan = sequential_scan([1.0, 2.0, 0.5, 1.0]);
        let config = CalibrationConfig {
            output_response: true,
            ..Default::default()
        };
        let output = Calibrator::new(config).run(vec![scan], None).unwrap();
        let response = output.response.unwrap();
        assert!(!response.is_empty());
        assert!(response.angles.windows(2).all(|w| w[0] <= w[1]));
    }

    struct FixedCenter(f64);

    impl RobustCenter for FixedCenter {
        fn center(&self, values: &[f64]) -> Option<f64> {
            (!values.is_empty()).then_some(self.0)
        }
    }

    #[test]
    fn test_injected_robust_center_is_used() {
        let scan = sequential_scan([1.0; 4]);
        let config = CalibrationConfig {
            method: CalibrationMethod::MostLikelyMean,
            ..Default::default()
        };
        let output = Calibrator::new(config)
            .with_robust_center(Box::new(FixedCenter(42.0)))
            .with_resampler(Box::new(CubicSplineResampler))
            .with_overlap_summation(Box::new(BinnedOverlapSum::default()))
            .run(vec![scan], None)
            .unwrap();

        // 相对常数 1, 42, 42, 42，中位数 42
        assert!((output.scale - 42.0).abs() < 1e-12);
        assert!((output.table.entries[0].constant - 1.0 / 42.0).abs() < 1e-12);
        assert!((output.table.entries[3].constant - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_global_with_single_scan_fails_before_reading() {
        let scan = sequential_scan([1.0; 4]);
        let config = CalibrationConfig {
            derivation: DerivationMethod::Global2D,
            ..Default::default()
        };
        let err = Calibrator::new(config).run(vec![scan], None).unwrap_err();
        assert!(matches!(err, DetcalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_global_rejects_most_likely_mean() {
        let config = CalibrationConfig {
            derivation: DerivationMethod::Global2D,
            method: CalibrationMethod::MostLikelyMean,
            ..Default::default()
        };
        let scans = vec![sequential_scan([1.0; 4]), sequential_scan([1.0; 4])];
        let err = Calibrator::new(config).run(scans, None).unwrap_err();
        assert!(matches!(err, DetcalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_global_rejects_single_tube_instrument() {
        let config = CalibrationConfig {
            derivation: DerivationMethod::Global2D,
            ..Default::default()
        };
        let scans = vec![sequential_scan([1.0; 4]), sequential_scan([1.0; 4])];
        let err = Calibrator::new(config).run(scans, None).unwrap_err();
        assert!(matches!(err, DetcalError::InstrumentMismatch { .. }));
    }

    #[test]
    fn test_no_scans_is_missing_input() {
        let err = Calibrator::new(CalibrationConfig::default())
            .run(Vec::new(), None)
            .unwrap_err();
        assert!(matches!(err, DetcalError::MissingInput(_)));
    }

    /// 4 根管、每管 3 像素，两个文件，管间距 1.25°，扫描步长 0.25°
    fn global_scans(efficiency: impl Fn(usize, usize) -> f64 + Copy) -> Vec<DetectorScan> {
        (0..2)
            .map(|f| {
                synthetic_scan(
                    &format!("file{}", f),
                    4,
                    3,
                    5,
                    move |t, _, s| (3 - t) as f64 * 1.25 + (f * 5 + s) as f64 * 0.25,
                    move |t, p, angle| efficiency(t, p) * (50.0 + 10.0 * (angle * 0.9).cos()),
                )
            })
            .collect()
    }

    #[test]
    fn test_global_uniform_detector_stays_flat() {
        let config = CalibrationConfig {
            derivation: DerivationMethod::Global2D,
            n_iterations: 3,
            ..Default::default()
        };
        let output = Calibrator::new(config)
            .run(global_scans(|_, _| 2.0), None)
            .unwrap();
        assert_eq!(output.iterations.len(), 3);
        for entry in &output.table.entries {
            assert!((entry.constant - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_global_outputs_positive_finite_constants() {
        let config = CalibrationConfig {
            derivation: DerivationMethod::Global2D,
            n_iterations: 2,
            jobs: 2,
            ..Default::default()
        };
        let output = Calibrator::new(config)
            .run(global_scans(|t, p| 1.0 + 0.1 * ((t * 3 + p) % 4) as f64), None)
            .unwrap();
        assert_eq!(output.table.len(), 12);
        assert!(output
            .table
            .entries
            .iter()
            .all(|e| e.constant.is_finite() && e.constant > 0.0));
        assert!(output.iterations.iter().all(|r| r.chi2_ndof.is_finite()));
    }
}
