//! # 全局参考迭代求解（二维模式）
//!
//! 每次迭代：
//! 1. 把当前常数表施加到每个扫描文件的原始数据上
//! 2. 通过 `OverlapSummation` 把所有校正后的扫描合并为全局参考面
//! 3. 按探测管下标降序，为每根管从参考中截取对应窗口并除以该管自身的数据，
//!    得到比值图；首尾两根边缘管不对称地去掉一个扫描文件的列
//! 4. 对每根管的比值图按行归约（Median 或 Mean），得到每个像素的因子
//! 5. 常数表乘以本次因子；非有限值或低于下限的值替换为 1.0
//! 6. 迭代次数为 0 时按 chi2/ndof 自动停止
//!
//! 第 3-4 步在各探测管之间互不依赖，可以并行。
//!
//! ## 依赖关系
//! - 被 `calibration/pipeline.rs` 调用
//! - 使用 `calibration/statistics.rs`、`strategies.rs`、`masked.rs`
//! - 使用 `batch/runner.rs` 进行逐管并行

use crate::batch::BatchRunner;
use crate::calibration::config::RowMethod;
use crate::calibration::context::{Diagnostics, WarningSubject};
use crate::calibration::masked::{angular_to_index_ranges, MaskedArray};
use crate::calibration::statistics::RatioStatistics;
use crate::calibration::strategies::{OverlapSummation, ReferenceSurface};
use crate::error::{DetcalError, Result};
use crate::models::scan::is_live;
use crate::models::{DetectorScan, FactorEstimate};

use serde::{Deserialize, Serialize};

/// 常数下限：低于此值视为本次迭代无信息
pub const CONSTANT_FLOOR: f64 = 1e-6;

/// 全局模式参数
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub method: RowMethod,
    /// 固定迭代次数，0 表示自动
    pub n_iterations: usize,
    pub chi2_threshold: f64,
    pub max_auto_iterations: usize,
    /// chi2 统计时每根管两端排除的像素数
    pub trim_pixels: usize,
    /// 排除的角度区间
    pub excluded: Vec<(f64, f64)>,
    /// 逐管并行的作业数
    pub jobs: usize,
}

/// 单次迭代报告
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    /// 从 1 开始
    pub iteration: usize,
    pub chi2_ndof: f64,
}

/// 全局模式结果
#[derive(Debug, Clone)]
pub struct GlobalOutcome {
    /// 平铺后 (tube, pixel) 的相对常数
    pub constants: Vec<FactorEstimate>,
    pub live: Vec<bool>,
    pub iterations: Vec<IterationReport>,
    pub diagnostics: Diagnostics,
}

/// 一根探测管在所有扫描文件上的列，按角度升序
struct TubeStack {
    tube: usize,
    /// (文件, 扫描点)
    columns: Vec<(usize, usize)>,
    angles: Vec<f64>,
}

impl TubeStack {
    fn build(frames: &[DetectorScan], tube: usize) -> Self {
        let mut columns: Vec<(f64, usize, usize)> = frames
            .iter()
            .enumerate()
            .flat_map(|(f, frame)| {
                (0..frame.n_scan_points).map(move |s| (frame.tube_angle(tube, s), f, s))
            })
            .collect();
        columns.sort_by(|a, b| a.0.total_cmp(&b.0));

        Self {
            tube,
            angles: columns.iter().map(|c| c.0).collect(),
            columns: columns.iter().map(|c| (c.1, c.2)).collect(),
        }
    }

    fn len(&self) -> usize {
        self.columns.len()
    }

    /// 某像素行在所有列上的数据
    fn row(&self, frames: &[DetectorScan], pixel: usize) -> Vec<f64> {
        self.columns
            .iter()
            .map(|&(f, s)| frames[f].counts[frames[f].index(self.tube, pixel, s)])
            .collect()
    }
}

/// 全局参考求解器
pub struct GlobalReferenceSolver<'a> {
    summation: &'a dyn OverlapSummation,
    settings: GlobalSettings,
}

impl<'a> GlobalReferenceSolver<'a> {
    pub fn new(summation: &'a dyn OverlapSummation, settings: GlobalSettings) -> Self {
        Self {
            summation,
            settings,
        }
    }

    /// 校验输入并返回 (探测管数, 每管像素数, 每文件扫描点数)
    fn check_inputs(&self, scans: &[DetectorScan]) -> Result<(usize, usize, usize)> {
        if scans.len() < 2 {
            return Err(DetcalError::InvalidConfiguration(format!(
                "the global reference derivation needs at least two overlapping scan files, got {}",
                scans.len()
            )));
        }
        let head = &scans[0];
        if let Some(other) = scans.iter().find(|s| !s.same_layout(head)) {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "scan '{}' does not share the detector layout of '{}'",
                    other.name, head.name
                ),
            });
        }
        if let Some(other) = scans.iter().find(|s| !s.same_instrument(head)) {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "scan '{}' was recorded on '{}' but '{}' on '{}'",
                    other.name,
                    other.instrument.as_deref().unwrap_or_default(),
                    head.name,
                    head.instrument.as_deref().unwrap_or_default()
                ),
            });
        }
        let n_tubes = head.geometry.n_tubes;
        let n_pixels = head.geometry.n_pixels_per_tube;
        if n_tubes < 2 {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "the global reference derivation needs a multi-tube detector, '{}' has {} tube(s)",
                    head.name, n_tubes
                ),
            });
        }
        if 2 * self.settings.trim_pixels >= n_pixels {
            return Err(DetcalError::InvalidConfiguration(format!(
                "cannot trim {} pixels at each end of tubes with {} pixels",
                self.settings.trim_pixels, n_pixels
            )));
        }
        Ok((n_tubes, n_pixels, head.n_scan_points))
    }

    /// 迭代求解
    pub fn solve(&self, scans: &[DetectorScan]) -> Result<GlobalOutcome> {
        let (n_tubes, n_pixels, n_scans_per_file) = self.check_inputs(scans)?;
        let n_detectors = n_tubes * n_pixels;

        let stacks: Vec<TubeStack> = (0..n_tubes).map(|t| TubeStack::build(scans, t)).collect();

        let mut live = vec![false; n_detectors];
        for stack in &stacks {
            for pixel in 0..n_pixels {
                let nonzero = stack.row(scans, pixel).iter().filter(|&&v| v != 0.0).count();
                live[stack.tube * n_pixels + pixel] = is_live(nonzero, stack.len());
            }
        }

        let auto = self.settings.n_iterations == 0;
        let limit = if auto {
            self.settings.max_auto_iterations
        } else {
            self.settings.n_iterations
        };

        let runner = BatchRunner::new(self.settings.jobs);
        let mut constants = vec![1.0; n_detectors];
        let mut errors = vec![0.0; n_detectors];
        let mut reports = Vec::new();
        let mut diagnostics = Diagnostics::default();
        let mut converged = false;
        let mut isolated = false;

        for iteration in 1..=limit {
            let corrected: Vec<DetectorScan> = scans.iter().map(|s| s.corrected(&constants)).collect();
            let reference = self.summation.sum(&corrected);

            // 没有任何两根管覆盖同一角度时参考面只是各管自身数据
            if reference.shared_bins == 0 {
                diagnostics.warn(
                    WarningSubject::Run,
                    format!(
                        "Iteration {}: no angular bin is covered by more than one tube, constants left unchanged",
                        iteration
                    ),
                );
                isolated = true;
                break;
            }

            // 降序遍历探测管
            let order: Vec<&TubeStack> = stacks.iter().rev().collect();
            let per_tube = runner.map(&order, |stack| {
                (
                    stack.tube,
                    self.tube_factors(stack, &reference, &corrected, n_tubes, n_scans_per_file),
                )
            });

            let mut factors = vec![FactorEstimate::NEUTRAL; n_detectors];
            for (tube, tube_factors) in per_tube {
                for (pixel, factor) in tube_factors.into_iter().enumerate() {
                    factors[tube * n_pixels + pixel] = factor;
                }
            }

            for (index, factor) in factors.iter().enumerate() {
                let updated = constants[index] * factor.value;
                if !updated.is_finite() || updated < CONSTANT_FLOOR {
                    let (tube, pixel) = (index / n_pixels, index % n_pixels);
                    diagnostics.warn(
                        WarningSubject::TubePixel(tube, pixel),
                        format!(
                            "Iteration {}: constant {} is not usable, reset to 1",
                            iteration, updated
                        ),
                    );
                    constants[index] = 1.0;
                    errors[index] = 0.0;
                } else {
                    errors[index] = if factor.value != 0.0 {
                        (updated * factor.error / factor.value).abs()
                    } else {
                        0.0
                    };
                    constants[index] = updated;
                }
            }

            let chi2_ndof = self.chi2_ndof(&factors, n_tubes, n_pixels);
            reports.push(IterationReport {
                iteration,
                chi2_ndof,
            });

            if auto && chi2_ndof < self.settings.chi2_threshold {
                converged = true;
                break;
            }
        }

        if auto && !converged && !isolated {
            diagnostics.warn(
                WarningSubject::Run,
                format!(
                    "chi2/ndof did not drop below {} within {} iterations",
                    self.settings.chi2_threshold, limit
                ),
            );
        }

        Ok(GlobalOutcome {
            constants: constants
                .into_iter()
                .zip(errors)
                .map(|(v, e)| FactorEstimate::new(v, e))
                .collect(),
            live,
            iterations: reports,
            diagnostics,
        })
    }

    /// 单根探测管的比值图与逐像素因子
    fn tube_factors(
        &self,
        stack: &TubeStack,
        reference: &ReferenceSurface,
        frames: &[DetectorScan],
        n_tubes: usize,
        n_scans_per_file: usize,
    ) -> Vec<FactorEstimate> {
        let n_cols = stack.len();
        let window: Vec<Option<usize>> = stack.angles.iter().map(|&a| reference.bin_of(a)).collect();
        let n_pixels = reference.n_rows;

        let rows: Vec<MaskedArray> = (0..n_pixels)
            .map(|pixel| {
                let ref_row = reference.row(pixel);
                let numerator: Vec<f64> = window
                    .iter()
                    .map(|bin| bin.map(|k| ref_row[k]).unwrap_or(0.0))
                    .collect();
                let mut ratios = MaskedArray::ratio(&numerator, &stack.row(frames, pixel));

                // 边缘管只与一侧相邻管重叠
                if stack.tube == 0 {
                    ratios.keep_only(0..n_cols.saturating_sub(n_scans_per_file));
                } else if stack.tube == n_tubes - 1 {
                    ratios.keep_only(n_scans_per_file.min(n_cols)..n_cols);
                }
                ratios
            })
            .collect();

        let excluded = angular_to_index_ranges(&stack.angles, &self.settings.excluded);
        RatioStatistics::reduce_rows(self.settings.method, &rows, &excluded)
    }

    /// Σ (因子 − 1)² / ndof，只统计每根管中间的像素
    fn chi2_ndof(&self, factors: &[FactorEstimate], n_tubes: usize, n_pixels: usize) -> f64 {
        let band = self.settings.trim_pixels..n_pixels - self.settings.trim_pixels;
        let deviations: Vec<f64> = (0..n_tubes)
            .flat_map(|t| band.clone().map(move |p| t * n_pixels + p))
            .map(|i| factors[i].value)
            .filter(|v| v.is_finite())
            .map(|v| (v - 1.0) * (v - 1.0))
            .collect();
        let ndof = deviations.len().saturating_sub(1).max(1);
        deviations.iter().sum::<f64>() / ndof as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::strategies::BinnedOverlapSum;
    use crate::models::scan::tests::synthetic_scan;

    const TUBES: usize = 4;
    const PIXELS: usize = 3;
    const POINTS: usize = 5;
    const STEP: f64 = 0.25;
    const SPACING: f64 = 1.25;

    fn pattern(angle: f64) -> f64 {
        100.0 + 50.0 * angle.sin()
    }

    /// 两个扫描文件，第二个偏移一个管间距；0 号管位于最高角度
    fn scans(efficiency: impl Fn(usize, usize) -> f64 + Copy) -> Vec<DetectorScan> {
        (0..2)
            .map(|f| {
                synthetic_scan(
                    &format!("file{}", f),
                    TUBES,
                    PIXELS,
                    POINTS,
                    move |t, _, s| {
                        10.0 + (TUBES - 1 - t) as f64 * SPACING + f as f64 * SPACING + s as f64 * STEP
                    },
                    move |t, p, a| pattern(a) * efficiency(t, p),
                )
            })
            .collect()
    }

    fn settings(n_iterations: usize) -> GlobalSettings {
        GlobalSettings {
            method: RowMethod::Median,
            n_iterations,
            chi2_threshold: 1.0,
            max_auto_iterations: 10,
            trim_pixels: 0,
            excluded: Vec::new(),
            jobs: 1,
        }
    }

    fn solve(scans: &[DetectorScan], settings: GlobalSettings) -> GlobalOutcome {
        let summation = BinnedOverlapSum::default();
        GlobalReferenceSolver::new(&summation, settings).solve(scans).unwrap()
    }

    #[test]
    fn test_uniform_detector_converges_immediately() {
        let out = solve(&scans(|_, _| 1.0), settings(0));
        assert_eq!(out.iterations.len(), 1);
        assert!(out.iterations[0].chi2_ndof < 1e-20);
        assert!(out.constants.iter().all(|c| (c.value - 1.0).abs() < 1e-12));
        assert!(out.live.iter().all(|&l| l));
    }

    #[test]
    fn test_fixed_iterations_ignore_chi2() {
        let out = solve(&scans(|_, _| 1.0), settings(3));
        assert_eq!(out.iterations.len(), 3);
        assert_eq!(out.iterations.iter().map(|r| r.iteration).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_single_hot_pixel_first_iteration() {
        let out = solve(&scans(|t, p| if (t, p) == (1, 1) { 2.0 } else { 1.0 }), settings(1));
        let value = |t: usize, p: usize| out.constants[t * PIXELS + p].value;

        assert!((value(1, 1) - 0.75).abs() < 1e-9);
        assert!((value(0, 1) - 1.5).abs() < 1e-9);
        assert!((value(2, 1) - 1.25).abs() < 1e-9);
        assert!((value(3, 1) - 1.0).abs() < 1e-9);
        assert!((value(2, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iterations_flatten_tube_response() {
        let efficiency = |t: usize, p: usize| 1.0 + 0.2 * ((3 * t + 5 * p + 1) as f64).sin();
        let out = solve(&scans(efficiency), settings(10));

        for p in 0..PIXELS {
            let corrected: Vec<f64> = (0..TUBES)
                .map(|t| out.constants[t * PIXELS + p].value * efficiency(t, p))
                .collect();
            let max = corrected.iter().cloned().fold(f64::MIN, f64::max);
            let min = corrected.iter().cloned().fold(f64::MAX, f64::min);
            assert!(max / min < 1.005, "pixel row {} spread {}", p, max / min);
        }

        let chi2: Vec<f64> = out.iterations.iter().map(|r| r.chi2_ndof).collect();
        assert!(chi2.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_auto_stop_threshold() {
        let efficiency = |t: usize, p: usize| 1.0 + 0.2 * ((3 * t + 5 * p + 1) as f64).sin();
        let mut s = settings(0);
        s.chi2_threshold = 1e-4;
        let out = solve(&scans(efficiency), s);
        assert_eq!(out.iterations.len(), 2);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_auto_cap_warns() {
        let efficiency = |t: usize, p: usize| 1.0 + 0.2 * ((3 * t + 5 * p + 1) as f64).sin();
        let mut s = settings(0);
        s.chi2_threshold = 1e-30;
        s.max_auto_iterations = 3;
        let out = solve(&scans(efficiency), s);
        assert_eq!(out.iterations.len(), 3);
        assert_eq!(out.diagnostics.warnings()[0].subject, WarningSubject::Run);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let efficiency = |t: usize, p: usize| 1.0 + 0.1 * (t as f64) - 0.05 * (p as f64);
        let serial = solve(&scans(efficiency), settings(2));
        let mut s = settings(2);
        s.jobs = 4;
        let parallel = solve(&scans(efficiency), s);
        assert_eq!(serial.constants, parallel.constants);
    }

    #[test]
    fn test_dead_pixel_is_not_live() {
        let out = solve(&scans(|t, p| if (t, p) == (2, 0) { 0.0 } else { 1.0 }), settings(1));
        assert!(!out.live[2 * PIXELS]);
        assert_eq!(out.constants[2 * PIXELS].value, 1.0);
    }

    #[test]
    fn test_angle_jitter_between_files_still_corrects() {
        let efficiency = |t: usize, p: usize| 1.0 + 0.2 * ((3 * t + 5 * p + 1) as f64).sin();
        let mut jittered = scans(efficiency);
        for angle in jittered[1].angles.iter_mut() {
            *angle += 1e-4;
        }
        let out = solve(&jittered, settings(5));

        for p in 0..PIXELS {
            let corrected: Vec<f64> = (0..TUBES)
                .map(|t| out.constants[t * PIXELS + p].value * efficiency(t, p))
                .collect();
            let max = corrected.iter().cloned().fold(f64::MIN, f64::max);
            let min = corrected.iter().cloned().fold(f64::MAX, f64::min);
            assert!(max / min < 1.01, "pixel row {} spread {}", p, max / min);
        }
        assert!(out.iterations[0].chi2_ndof > 1e-3);
    }

    #[test]
    fn test_tubes_without_overlap_warn_instead_of_converging() {
        let scans: Vec<DetectorScan> = (0..2)
            .map(|f| {
                synthetic_scan(
                    &format!("file{}", f),
                    TUBES,
                    PIXELS,
                    POINTS,
                    move |t, _, s| 10.0 + t as f64 * 100.0 + (f * POINTS + s) as f64 * STEP,
                    |t, _, a| pattern(a) * (1.0 + 0.1 * t as f64),
                )
            })
            .collect();
        let out = solve(&scans, settings(0));

        assert!(out.iterations.is_empty());
        assert_eq!(out.diagnostics.warnings().len(), 1);
        assert_eq!(out.diagnostics.warnings()[0].subject, WarningSubject::Run);
        assert!(out.constants.iter().all(|c| c.value == 1.0));
    }

    #[test]
    fn test_instrument_mismatch_rejected() {
        let summation = BinnedOverlapSum::default();
        let mut mixed = scans(|_, _| 1.0);
        mixed[0].instrument = Some("D2B".to_string());
        mixed[1].instrument = Some("D20".to_string());
        let err = GlobalReferenceSolver::new(&summation, settings(1)).solve(&mixed).unwrap_err();
        assert!(matches!(err, DetcalError::InstrumentMismatch { .. }));
    }

    #[test]
    fn test_single_scan_rejected() {
        let summation = BinnedOverlapSum::default();
        let one = scans(|_, _| 1.0).into_iter().take(1).collect::<Vec<_>>();
        let err = GlobalReferenceSolver::new(&summation, settings(1)).solve(&one).unwrap_err();
        assert!(matches!(err, DetcalError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_trim_larger_than_tube_rejected() {
        let summation = BinnedOverlapSum::default();
        let mut s = settings(1);
        s.trim_pixels = 2;
        let err = GlobalReferenceSolver::new(&summation, s).solve(&scans(|_, _| 1.0)).unwrap_err();
        assert!(matches!(err, DetcalError::InvalidConfiguration(_)));
    }
}
