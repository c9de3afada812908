//! # 顺序参考曲线构建（一维模式）
//!
//! 在像素下标区间 [first, last] 上逐像素生长一条参考曲线，
//! 每吸收一个像素就得到它的相对效率因子。
//!
//! ## 算法概述
//! 1. 首像素：两端各裁掉 `bin_offset` 个样本，余下部分作为初始参考；常数记为 1.0
//! 2. 后续像素：把像素曲线尾部裁到与参考等长（可选样条插值到参考网格）
//! 3. 因子 = 参考 ÷ 裁剪曲线 的比值统计
//! 4. 合并：缩放后在重叠区取加权平均，拼接缩放后的尾部
//! 5. 参考前端裁掉 `bin_offset` 个样本，保持滑动窗口
//!
//! 零因子使参考从当前像素（未缩放）重新开始；NaN/Inf 因子跳过缩放，
//! 两者都会产生带像素下标的警告。
//!
//! ## 依赖关系
//! - 被 `calibration/pipeline.rs` 调用
//! - 使用 `calibration/statistics.rs`、`masked.rs`、`strategies.rs`
//! - 使用 `models/curve.rs`

use crate::calibration::context::{Diagnostics, WarningSubject};
use crate::calibration::masked::{angular_to_index_ranges, is_informative, MaskedArray};
use crate::calibration::statistics::RatioStatistics;
use crate::calibration::strategies::Resampler;
use crate::error::{DetcalError, Result};
use crate::models::scan::is_live;
use crate::models::{FactorEstimate, ResponseCurve};

/// 顺序模式参数
#[derive(Debug, Clone)]
pub struct SequentialSettings {
    /// 一个像素偏移对应的扫描样本数
    pub bin_offset: usize,
    /// 扫描步长（度）
    pub scan_step: f64,
    /// 像素角宽度（度）
    pub pixel_size: f64,
    /// 重叠区样条插值
    pub interpolate: bool,
    /// 排除的角度区间
    pub excluded: Vec<(f64, f64)>,
    /// 是否记录组合响应曲线
    pub record_response: bool,
}

/// 顺序模式结果
#[derive(Debug, Clone)]
pub struct SequentialOutcome {
    /// 每个像素的相对因子（未访问的像素为 1.0）
    pub constants: Vec<FactorEstimate>,
    /// 活像素掩码
    pub live: Vec<bool>,
    /// 组合响应曲线
    pub response: Option<ResponseCurve>,
    pub diagnostics: Diagnostics,
}

/// 单次运行持有的缓冲区
struct SequentialRun {
    reference: ResponseCurve,
    response: Option<ResponseCurve>,
    constants: Vec<FactorEstimate>,
    live: Vec<bool>,
    diagnostics: Diagnostics,
}

impl SequentialRun {
    fn write_response(&mut self, offset: usize, segment: &ResponseCurve) {
        let Some(buffer) = self.response.as_mut() else {
            return;
        };
        for k in 0..segment.len() {
            let Some(slot) = offset.checked_add(k).filter(|&i| i < buffer.len()) else {
                break;
            };
            buffer.angles[slot] = segment.angles[k];
            buffer.intensities[slot] = segment.intensities[k];
            buffer.variances[slot] = segment.variances[k];
        }
    }
}

/// 逐点加权平均：两侧均有信息时按方差倒数加权（无方差时取算术平均），
/// 只有一侧有信息时取该侧
pub fn weighted_mean(a: &ResponseCurve, b: &ResponseCurve) -> ResponseCurve {
    let n = a.len().min(b.len());
    let mut out = ResponseCurve::zeros(a.angles[..n].to_vec());

    for i in 0..n {
        let (ya, va) = (a.intensities[i], a.variances[i]);
        let (yb, vb) = (b.intensities[i], b.variances[i]);
        let (y, v) = match (is_informative(ya), is_informative(yb)) {
            (true, true) => {
                if va > 0.0 && vb > 0.0 {
                    let (wa, wb) = (1.0 / va, 1.0 / vb);
                    ((ya * wa + yb * wb) / (wa + wb), 1.0 / (wa + wb))
                } else {
                    ((ya + yb) / 2.0, (va + vb) / 4.0)
                }
            }
            (true, false) => (ya, va),
            (false, true) => (yb, vb),
            (false, false) => (0.0, 0.0),
        };
        out.intensities[i] = y;
        out.variances[i] = v;
    }
    out
}

/// 顺序参考曲线构建器
pub struct SequentialReferenceBuilder<'a> {
    statistics: RatioStatistics<'a>,
    resampler: &'a dyn Resampler,
    settings: SequentialSettings,
}

impl<'a> SequentialReferenceBuilder<'a> {
    pub fn new(
        statistics: RatioStatistics<'a>,
        resampler: &'a dyn Resampler,
        settings: SequentialSettings,
    ) -> Self {
        Self {
            statistics,
            resampler,
            settings,
        }
    }

    /// 在 [first, last] 上构建参考并推导每个像素的因子
    pub fn build(
        &self,
        curves: &[ResponseCurve],
        n_scan_points: usize,
        first: usize,
        last: usize,
    ) -> Result<SequentialOutcome> {
        if first > last || last >= curves.len() {
            return Err(DetcalError::MissingInput(format!(
                "pixel range {}-{} is outside the {} available pixels",
                first,
                last,
                curves.len()
            )));
        }

        let b = self.settings.bin_offset;
        let mut run = SequentialRun {
            reference: ResponseCurve::default(),
            response: None,
            constants: vec![FactorEstimate::NEUTRAL; curves.len()],
            live: vec![false; curves.len()],
            diagnostics: Diagnostics::default(),
        };

        let ratio = self.settings.pixel_size / self.settings.scan_step;
        if !self.settings.interpolate && (b as f64 - ratio).abs() > 0.1 {
            run.diagnostics.warn(
                WarningSubject::Run,
                format!(
                    "Scan step is not a whole fraction of the pixel size (ratio {:.3}, bin offset {}); \
                     results may be inaccurate, consider enabling interpolation",
                    ratio, b
                ),
            );
        }

        // 初始化
        let head = &curves[first];
        run.live[first] = is_live(head.nonzero_count(), n_scan_points);
        run.reference = head.crop_margins(b);
        run.constants[first] = FactorEstimate::NEUTRAL;

        if self.settings.record_response {
            let start = head.min_angle().unwrap_or(0.0);
            let len = (last - first) * b + head.len();
            let grid = (0..len)
                .map(|k| start + k as f64 * self.settings.scan_step)
                .collect();
            run.response = Some(ResponseCurve::zeros(grid));
            run.write_response(0, &head.slice(0, b));
            if first == last {
                let reference = run.reference.clone();
                run.write_response(b, &reference);
            }
        }

        for pixel in first + 1..=last {
            self.absorb(&mut run, pixel, &curves[pixel], n_scan_points, pixel == last, (pixel - first) * b)?;
        }

        Ok(SequentialOutcome {
            constants: run.constants,
            live: run.live,
            response: run.response,
            diagnostics: run.diagnostics,
        })
    }

    /// 把一个像素并入参考
    fn absorb(
        &self,
        run: &mut SequentialRun,
        pixel: usize,
        curve: &ResponseCurve,
        n_scan_points: usize,
        is_last: bool,
        offset: usize,
    ) -> Result<()> {
        let b = self.settings.bin_offset;
        let step = self.settings.scan_step.abs();
        let tolerance = 0.5 * step;

        let live = is_live(curve.nonzero_count(), n_scan_points);
        run.live[pixel] = live;

        let reference = &run.reference;
        let (ref_min, ref_max) = match (reference.min_angle(), reference.max_angle()) {
            (Some(lo), Some(hi)) => (lo, hi),
            _ => {
                return Err(DetcalError::BinCountMismatch {
                    pixel,
                    expected: 0,
                    found: curve.len(),
                })
            }
        };

        let (cropped, tail) = if self.settings.interpolate && live {
            let support = curve.window(ref_min - step, ref_max + step, tolerance);
            let intensities = self.resampler.resample(&support, &reference.angles);
            // 插值后的方差无意义，沿用插值前最近样本的方差
            let variances = reference
                .angles
                .iter()
                .map(|&a| support.nearest_variance(a))
                .collect();
            let cropped = ResponseCurve {
                angles: reference.angles.clone(),
                intensities,
                variances,
            };
            let tail_start = curve.count_up_to(ref_max, 0.0);
            (cropped, curve.slice(tail_start, curve.len()))
        } else {
            let n = curve.count_up_to(ref_max, tolerance);
            if n != reference.len() {
                return Err(DetcalError::BinCountMismatch {
                    pixel,
                    expected: reference.len(),
                    found: n,
                });
            }
            let mut cropped = curve.slice(0, n);
            cropped.angles = reference.angles.clone();
            (cropped, curve.slice(n, curve.len()))
        };

        let ratios = MaskedArray::ratio(&reference.intensities, &cropped.intensities);
        let excluded = angular_to_index_ranges(&reference.angles, &self.settings.excluded);
        let factor = self.statistics.reduce(&ratios, &excluded);
        run.constants[pixel] = factor;

        let mut merged = if factor.value == 0.0 {
            run.diagnostics.warn(
                WarningSubject::Pixel(pixel),
                "Relative factor is zero; restarting the reference from this pixel",
            );
            let mut restart = cropped;
            restart.append(&tail);
            restart
        } else if !factor.value.is_finite() {
            run.diagnostics.warn(
                WarningSubject::Pixel(pixel),
                format!(
                    "Relative factor is {}; pixel appended to the reference without scaling",
                    factor.value
                ),
            );
            let mut extended = run.reference.clone();
            extended.append(&tail);
            extended
        } else {
            let scaled = cropped.scaled(factor.value);
            let mut extended = weighted_mean(&run.reference, &scaled);
            extended.append(&tail.scaled(factor.value));
            extended
        };

        if is_last {
            run.write_response(offset, &merged);
        } else {
            run.write_response(offset, &merged.slice(0, b));
        }

        merged.drop_front(b);
        run.reference = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::config::CalibrationMethod;
    use crate::calibration::strategies::{CubicSplineResampler, RobustCenter, SqrtDistanceCenter};

    const STEP: f64 = 0.1;
    const POINTS: usize = 101;

    fn shape(angle: f64) -> f64 {
        1.5 + angle.sin()
    }

    /// 像素 i 从 `start` 开始，每步 STEP，强度为 scale * shape(angle)
    fn pixel(start: f64, scale: f64) -> ResponseCurve {
        let angles: Vec<f64> = (0..POINTS).map(|s| start + s as f64 * STEP).collect();
        let intensities: Vec<f64> = angles.iter().map(|&a| scale * shape(a)).collect();
        ResponseCurve::new(angles, intensities.clone(), intensities)
    }

    fn settings(interpolate: bool, record_response: bool) -> SequentialSettings {
        SequentialSettings {
            bin_offset: 5,
            scan_step: STEP,
            pixel_size: 0.5,
            interpolate,
            excluded: Vec::new(),
            record_response,
        }
    }

    fn three_pixels() -> Vec<ResponseCurve> {
        vec![pixel(0.0, 1.0), pixel(0.5, 2.0), pixel(1.0, 0.5)]
    }

    fn run(
        curves: &[ResponseCurve],
        method: CalibrationMethod,
        robust: &dyn RobustCenter,
        settings: SequentialSettings,
    ) -> Result<SequentialOutcome> {
        let builder = SequentialReferenceBuilder::new(
            RatioStatistics::new(method, robust),
            &CubicSplineResampler,
            settings,
        );
        builder.build(curves, POINTS, 0, curves.len() - 1)
    }

    #[test]
    fn test_three_pixel_scenario() {
        let out = run(&three_pixels(), CalibrationMethod::Median, &SqrtDistanceCenter, settings(false, false)).unwrap();
        assert_eq!(out.constants[0].value, 1.0);
        assert!((out.constants[1].value - 0.5).abs() < 0.01);
        assert!((out.constants[2].value - 2.0).abs() < 0.02);
        assert!(out.live.iter().all(|&l| l));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_first_constant_is_exactly_one() {
        let curves = vec![pixel(0.0, 7.0), pixel(0.5, 3.0)];
        for method in [CalibrationMethod::Median, CalibrationMethod::Mean, CalibrationMethod::MostLikelyMean] {
            let out = run(&curves, method, &SqrtDistanceCenter, settings(false, false)).unwrap();
            assert_eq!(out.constants[0], FactorEstimate::NEUTRAL);
        }
    }

    #[test]
    fn test_deterministic() {
        let a = run(&three_pixels(), CalibrationMethod::Mean, &SqrtDistanceCenter, settings(false, true)).unwrap();
        let b = run(&three_pixels(), CalibrationMethod::Mean, &SqrtDistanceCenter, settings(false, true)).unwrap();
        assert_eq!(a.constants, b.constants);
        assert_eq!(a.response, b.response);
    }

    #[test]
    fn test_combined_response_follows_first_pixel_scale() {
        let out = run(&three_pixels(), CalibrationMethod::Median, &SqrtDistanceCenter, settings(false, true)).unwrap();
        let response = out.response.unwrap();
        assert_eq!(response.len(), 2 * 5 + POINTS);
        for (a, y) in response.angles.iter().zip(&response.intensities) {
            assert!((y - shape(*a)).abs() < 1e-6, "angle {}: {} vs {}", a, y, shape(*a));
        }
        assert!((response.angles[response.len() - 1] - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_bin_count_mismatch_is_fatal() {
        // 偏移 3 个样本而不是 5 个
        let curves = vec![pixel(0.0, 1.0), pixel(0.3, 1.0)];
        let err = run(&curves, CalibrationMethod::Median, &SqrtDistanceCenter, settings(false, false)).unwrap_err();
        assert!(matches!(err, DetcalError::BinCountMismatch { pixel: 1, expected: 91, found: 93 }));
    }

    #[test]
    fn test_interpolated_overlap() {
        let curves = vec![pixel(0.0, 1.0), pixel(0.53, 2.0), pixel(1.06, 0.5)];
        let out = run(&curves, CalibrationMethod::Median, &SqrtDistanceCenter, settings(true, false)).unwrap();
        assert!((out.constants[1].value - 0.5).abs() < 0.005);
        assert!((out.constants[2].value - 2.0).abs() < 0.02);
    }

    #[test]
    fn test_excluded_range_is_ignored() {
        // 在 [3, 4] 度内像素 1 有一个异常尖峰
        let mut spiky = pixel(0.5, 2.0);
        for (a, y) in spiky.angles.iter().zip(spiky.intensities.iter_mut()) {
            if (3.0..=4.0).contains(a) {
                *y *= 10.0;
            }
        }
        let curves = vec![pixel(0.0, 1.0), spiky];
        let mut s = settings(false, false);
        s.excluded = vec![(2.95, 4.05)];
        let out = run(&curves, CalibrationMethod::Mean, &SqrtDistanceCenter, s).unwrap();
        assert!((out.constants[1].value - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_dead_pixel_keeps_reference() {
        let mut dead = pixel(0.5, 1.0);
        dead.intensities.iter_mut().for_each(|y| *y = 0.0);
        let curves = vec![pixel(0.0, 1.0), dead, pixel(1.0, 0.5)];
        let out = run(&curves, CalibrationMethod::Median, &SqrtDistanceCenter, settings(false, false)).unwrap();
        assert!(!out.live[1]);
        assert_eq!(out.constants[1].value, 1.0);
        // 重叠区仍由像素 0 提供信息
        assert!((out.constants[2].value - 2.0).abs() < 0.02);
    }

    struct Fixed(f64);

    impl RobustCenter for Fixed {
        fn center(&self, _samples: &[f64]) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn test_zero_factor_restarts_with_warning() {
        let out = run(&three_pixels(), CalibrationMethod::MostLikelyMean, &Fixed(0.0), settings(false, false)).unwrap();
        assert_eq!(out.constants[1].value, 0.0);
        let subjects: Vec<_> = out.diagnostics.warnings().iter().map(|w| w.subject).collect();
        assert_eq!(subjects, vec![WarningSubject::Pixel(1), WarningSubject::Pixel(2)]);
    }

    #[test]
    fn test_non_finite_factor_is_recovered() {
        let out = run(&three_pixels(), CalibrationMethod::MostLikelyMean, &Fixed(f64::NAN), settings(false, false)).unwrap();
        assert!(out.constants[1].value.is_nan());
        assert_eq!(out.diagnostics.warnings().len(), 2);

        let out = run(&three_pixels(), CalibrationMethod::MostLikelyMean, &Fixed(f64::INFINITY), settings(false, false)).unwrap();
        assert!(out.constants[2].value.is_infinite());
    }

    #[test]
    fn test_bin_offset_mismatch_warns() {
        let mut s = settings(false, false);
        s.pixel_size = 0.47;
        let out = run(&three_pixels(), CalibrationMethod::Median, &SqrtDistanceCenter, s).unwrap();
        assert_eq!(out.diagnostics.warnings()[0].subject, WarningSubject::Run);
    }
}
