//! # 可注入的数值策略
//!
//! 三个重量级原语以窄接口的 trait 表示，引擎只依赖其输入输出：
//! - `RobustCenter`: 稳健中心估计（MostLikelyMean 策略）
//! - `Resampler`: 把曲线重采样到给定角度网格（样条插值）
//! - `OverlapSummation`: 把所有已校正的扫描合并成一张全局参考面
//!
//! 每个 trait 都带有一个默认实现。
//!
//! ## 依赖关系
//! - 被 `calibration/statistics.rs`、`sequential.rs`、`global.rs` 使用
//! - 使用 `models/`

use crate::calibration::masked::is_informative;
use crate::models::{DetectorScan, ResponseCurve};

// ─────────────────────────────────────────────────────────────
// 稳健中心估计
// ─────────────────────────────────────────────────────────────

/// 稳健中心估计
pub trait RobustCenter: Send + Sync {
    /// 返回样本的中心；空样本返回 None
    fn center(&self, samples: &[f64]) -> Option<f64>;
}

/// 取使 Σ sqrt(|x_i - x_j|) 最小的样本作为中心
#[derive(Debug, Clone, Copy, Default)]
pub struct SqrtDistanceCenter;

impl RobustCenter for SqrtDistanceCenter {
    fn center(&self, samples: &[f64]) -> Option<f64> {
        samples
            .iter()
            .map(|&x| {
                let cost: f64 = samples.iter().map(|&y| (x - y).abs().sqrt()).sum();
                (x, cost)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(x, _)| x)
    }
}

// ─────────────────────────────────────────────────────────────
// 重采样
// ─────────────────────────────────────────────────────────────

/// 曲线重采样
pub trait Resampler: Send + Sync {
    /// 返回曲线在 `targets` 处的强度
    fn resample(&self, curve: &ResponseCurve, targets: &[f64]) -> Vec<f64>;
}

/// 自然三次样条；两点时退化为线性，域外取端点值
#[derive(Debug, Clone, Copy, Default)]
pub struct CubicSplineResampler;

impl CubicSplineResampler {
    /// 自然样条的二阶导数（三对角追赶法）
    fn second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
        let n = x.len();
        let mut m = vec![0.0; n];
        if n < 3 {
            return m;
        }

        let mut c_prime = vec![0.0; n];
        let mut d_prime = vec![0.0; n];
        for i in 1..n - 1 {
            let h0 = x[i] - x[i - 1];
            let h1 = x[i + 1] - x[i];
            let a = h0;
            let b = 2.0 * (h0 + h1);
            let c = h1;
            let d = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
            let denom = b - a * c_prime[i - 1];
            c_prime[i] = c / denom;
            d_prime[i] = (d - a * d_prime[i - 1]) / denom;
        }
        for i in (1..n - 1).rev() {
            m[i] = d_prime[i] - c_prime[i] * m[i + 1];
        }
        m
    }
}

impl Resampler for CubicSplineResampler {
    fn resample(&self, curve: &ResponseCurve, targets: &[f64]) -> Vec<f64> {
        let x = &curve.angles;
        let y = &curve.intensities;
        let n = x.len();

        match n {
            0 => return vec![0.0; targets.len()],
            1 => return vec![y[0]; targets.len()],
            _ => {}
        }

        let m = Self::second_derivatives(x, y);

        targets
            .iter()
            .map(|&t| {
                if t <= x[0] {
                    return y[0];
                }
                if t >= x[n - 1] {
                    return y[n - 1];
                }
                let k = x.partition_point(|&a| a <= t).clamp(1, n - 1);
                let (x0, x1) = (x[k - 1], x[k]);
                let h = x1 - x0;
                let a = (x1 - t) / h;
                let b = (t - x0) / h;
                a * y[k - 1]
                    + b * y[k]
                    + ((a * a * a - a) * m[k - 1] + (b * b * b - b) * m[k]) * h * h / 6.0
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────
// 全局参考面
// ─────────────────────────────────────────────────────────────

/// 全局参考面：像素行 × 角度箱
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSurface {
    /// 角度箱中心
    pub angles: Vec<f64>,
    /// 箱宽
    pub bin_width: f64,
    /// 像素行数
    pub n_rows: usize,
    /// `[row][bin]` 平铺
    pub values: Vec<f64>,
    /// 至少两根不同探测管落入的箱数
    pub shared_bins: usize,
}

impl ReferenceSurface {
    pub fn n_bins(&self) -> usize {
        self.angles.len()
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let n = self.n_bins();
        &self.values[row * n..(row + 1) * n]
    }

    /// 角度所在的箱
    pub fn bin_of(&self, angle: f64) -> Option<usize> {
        let first = *self.angles.first()?;
        if self.bin_width <= 0.0 {
            return (self.angles.len() == 1).then_some(0);
        }
        let k = ((angle - first) / self.bin_width).round();
        if k < 0.0 {
            return None;
        }
        let k = k as usize;
        (k < self.n_bins()).then_some(k)
    }
}

/// 合并重叠扫描
pub trait OverlapSummation: Send + Sync {
    /// 把所有已校正的扫描合并为一张参考面
    fn sum(&self, frames: &[DetectorScan]) -> ReferenceSurface;
}

/// 默认实现：以扫描步长（按文件交错细分）为箱宽建立公共网格，
/// 每个像素行在每个箱中对所有有信息的贡献取平均
#[derive(Debug, Clone, Copy)]
pub struct BinnedOverlapSum {
    /// 判定两个角度相同的容差（度）
    pub tolerance: f64,
    /// 相对扫描步长的合并比例：间隔小于 `merge_fraction * scan_step` 的角度视为同一位置
    pub merge_fraction: f64,
}

impl Default for BinnedOverlapSum {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            merge_fraction: 0.1,
        }
    }
}

impl BinnedOverlapSum {
    /// 公共网格 (起点, 箱宽, 箱数)
    ///
    /// 箱宽取 `scan_step / k`，k 为文件交错数（由最小的非抖动间隔推出）；
    /// 扫描步长不可用时退回到相邻不同角度的最小间隔。
    fn grid(&self, frames: &[DetectorScan]) -> Option<(f64, f64, usize)> {
        let mut angles: Vec<f64> = frames
            .iter()
            .flat_map(|f| {
                (0..f.geometry.n_tubes)
                    .flat_map(move |t| (0..f.n_scan_points).map(move |s| f.tube_angle(t, s)))
            })
            .filter(|a| a.is_finite())
            .collect();
        if angles.is_empty() {
            return None;
        }
        angles.sort_by(|a, b| a.total_cmp(b));

        let min = angles[0];
        let max = angles[angles.len() - 1];

        let step = frames
            .iter()
            .map(|f| f.scan_step.abs())
            .filter(|s| s.is_finite() && *s > 0.0)
            .fold(f64::INFINITY, f64::min);
        let tolerance = if step.is_finite() {
            self.tolerance.max(self.merge_fraction * step)
        } else {
            self.tolerance
        };

        let gap = angles
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|&d| d > tolerance)
            .fold(f64::INFINITY, f64::min);

        let width = match (step.is_finite(), gap.is_finite()) {
            (true, true) => step / (step / gap).round().max(1.0),
            (true, false) => step,
            (false, true) => gap,
            (false, false) => return Some((min, 0.0, 1)),
        };
        let n_bins = ((max - min) / width).round() as usize + 1;
        Some((min, width, n_bins))
    }
}

impl OverlapSummation for BinnedOverlapSum {
    fn sum(&self, frames: &[DetectorScan]) -> ReferenceSurface {
        let n_rows = frames
            .first()
            .map(|f| f.geometry.n_pixels_per_tube)
            .unwrap_or(0);
        let Some((min, width, n_bins)) = self.grid(frames) else {
            return ReferenceSurface {
                angles: Vec::new(),
                bin_width: 0.0,
                n_rows,
                values: Vec::new(),
                shared_bins: 0,
            };
        };

        let mut sums = vec![0.0; n_rows * n_bins];
        let mut hits = vec![0usize; n_rows * n_bins];
        // 每个箱的首个贡献管，以及是否有第二根管落入
        let mut owner: Vec<Option<usize>> = vec![None; n_bins];
        let mut shared = vec![false; n_bins];

        for frame in frames {
            for tube in 0..frame.geometry.n_tubes {
                for point in 0..frame.n_scan_points {
                    let angle = frame.tube_angle(tube, point);
                    let bin = if width > 0.0 {
                        ((angle - min) / width).round() as usize
                    } else {
                        0
                    };
                    if bin >= n_bins {
                        continue;
                    }
                    match owner[bin] {
                        None => owner[bin] = Some(tube),
                        Some(first) if first != tube => shared[bin] = true,
                        Some(_) => {}
                    }
                    for row in 0..n_rows.min(frame.geometry.n_pixels_per_tube) {
                        let value = frame.counts[frame.index(tube, row, point)];
                        if is_informative(value) {
                            sums[row * n_bins + bin] += value;
                            hits[row * n_bins + bin] += 1;
                        }
                    }
                }
            }
        }

        let values = sums
            .iter()
            .zip(&hits)
            .map(|(&s, &h)| if h > 0 { s / h as f64 } else { 0.0 })
            .collect();

        ReferenceSurface {
            angles: (0..n_bins).map(|k| min + k as f64 * width).collect(),
            bin_width: width,
            n_rows,
            values,
            shared_bins: shared.iter().filter(|&&s| s).count(),
        }
    }
}
