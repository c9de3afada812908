//! # 探测器扫描数据模型
//!
//! 一次探测器扫描（一个扫描文件）记录了所有探测管、所有像素在每个扫描点
//! 上的计数。数据按 `[tube][pixel][scan_point]` 的顺序平铺存放。
//!
//! ## 依赖关系
//! - 被 `parsers/scan_csv.rs` 构造
//! - 被 `calibration/` 使用
//! - 使用 `models/curve.rs`

use crate::error::{DetcalError, Result};
use crate::models::ResponseCurve;

use serde::{Deserialize, Serialize};

/// 探测器几何
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    /// 探测管数量
    pub n_tubes: usize,
    /// 每根探测管的像素数
    pub n_pixels_per_tube: usize,
    /// 单个像素的角宽度（度）
    pub pixel_size: f64,
}

impl DetectorGeometry {
    /// 探测单元总数
    pub fn n_detectors(&self) -> usize {
        self.n_tubes * self.n_pixels_per_tube
    }

    /// 由平铺下标还原 (tube, pixel)
    pub fn tube_pixel(&self, index: usize) -> (usize, usize) {
        (
            index / self.n_pixels_per_tube,
            index % self.n_pixels_per_tube,
        )
    }
}

/// 一次探测器扫描
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorScan {
    /// 扫描名称（通常为文件名）
    pub name: String,
    /// 仪器名称
    pub instrument: Option<String>,
    /// 探测器几何
    pub geometry: DetectorGeometry,
    /// 每个文件的扫描点数
    pub n_scan_points: usize,
    /// 相邻扫描点之间的角步长（度）
    pub scan_step: f64,
    /// 每个 (tube, pixel, scan_point) 的 2θ
    pub angles: Vec<f64>,
    /// 计数
    pub counts: Vec<f64>,
    /// 计数方差
    pub variances: Vec<f64>,
    /// 每个扫描点的监视器计数
    pub monitor: Vec<f64>,
}

impl DetectorScan {
    /// 数据下标
    #[inline]
    pub fn index(&self, tube: usize, pixel: usize, point: usize) -> usize {
        (tube * self.geometry.n_pixels_per_tube + pixel) * self.n_scan_points + point
    }

    /// 探测单元总数
    pub fn n_detectors(&self) -> usize {
        self.geometry.n_detectors()
    }

    /// 单个探测单元在所有扫描点上的数据范围
    fn detector_span(&self, detector: usize) -> std::ops::Range<usize> {
        let start = detector * self.n_scan_points;
        start..start + self.n_scan_points
    }

    /// 单个探测单元的响应曲线（按角度排序）
    pub fn pixel_curve(&self, detector: usize) -> ResponseCurve {
        let span = self.detector_span(detector);
        ResponseCurve::new(
            self.angles[span.clone()].to_vec(),
            self.counts[span.clone()].to_vec(),
            self.variances[span].to_vec(),
        )
    }

    /// 全部探测单元的响应曲线
    pub fn pixel_curves(&self) -> Vec<ResponseCurve> {
        (0..self.n_detectors())
            .map(|d| self.pixel_curve(d))
            .collect()
    }

    /// 探测管在某扫描点的角度（取管内第一个像素）
    pub fn tube_angle(&self, tube: usize, point: usize) -> f64 {
        self.angles[self.index(tube, 0, point)]
    }

    /// 所有角度的范围
    pub fn angle_range(&self) -> (f64, f64) {
        self.angles
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &a| {
                (lo.min(a), hi.max(a))
            })
    }

    /// 每个探测单元是否为“活”像素：非零样本数超过扫描点数的五分之一
    pub fn live_mask(&self) -> Vec<bool> {
        (0..self.n_detectors())
            .map(|d| {
                let span = self.detector_span(d);
                let nonzero = self.counts[span].iter().filter(|&&v| v != 0.0).count();
                is_live(nonzero, self.n_scan_points)
            })
            .collect()
    }

    /// 按监视器计数归一化
    pub fn normalise_to_monitor(&mut self) {
        for detector in 0..self.n_detectors() {
            for point in 0..self.n_scan_points {
                let idx = detector * self.n_scan_points + point;
                let m = self.monitor[point];
                if m != 0.0 && m.is_finite() {
                    self.counts[idx] /= m;
                    self.variances[idx] /= m * m;
                } else {
                    self.counts[idx] = 0.0;
                    self.variances[idx] = 0.0;
                }
            }
        }
    }

    /// 每个扫描点乘以给定因子（因子为零表示该点无信息）
    pub fn scale_scan_points(&mut self, factors: &[f64]) {
        for detector in 0..self.n_detectors() {
            for (point, &f) in factors.iter().enumerate().take(self.n_scan_points) {
                let idx = detector * self.n_scan_points + point;
                self.counts[idx] *= f;
                self.variances[idx] *= f * f;
            }
        }
    }

    /// 每个探测单元乘以对应的效率常数
    pub fn apply_constants(&mut self, constants: &[f64]) {
        for (detector, &c) in constants.iter().enumerate().take(self.n_detectors()) {
            for idx in self.detector_span(detector) {
                self.counts[idx] *= c;
                self.variances[idx] *= c * c;
            }
        }
    }

    /// 返回施加了效率常数的副本
    pub fn corrected(&self, constants: &[f64]) -> Self {
        let mut scan = self.clone();
        scan.apply_constants(constants);
        scan
    }

    /// 是否与另一扫描几何一致
    pub fn same_layout(&self, other: &DetectorScan) -> bool {
        self.geometry.n_tubes == other.geometry.n_tubes
            && self.geometry.n_pixels_per_tube == other.geometry.n_pixels_per_tube
            && self.n_scan_points == other.n_scan_points
    }

    /// 仪器名称是否兼容（任一方未记录时视为兼容）
    pub fn same_instrument(&self, other: &DetectorScan) -> bool {
        match (&self.instrument, &other.instrument) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }

    /// 累加另一扫描（要求仪器、几何与角度一致）
    pub fn accumulate(&mut self, other: &DetectorScan) -> Result<()> {
        if !self.same_instrument(other) {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "scan '{}' was recorded on '{}' but '{}' on '{}'",
                    self.name,
                    self.instrument.as_deref().unwrap_or_default(),
                    other.name,
                    other.instrument.as_deref().unwrap_or_default()
                ),
            });
        }
        if !self.same_layout(other) {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "cannot sum scans '{}' and '{}' with different layouts",
                    self.name, other.name
                ),
            });
        }
        let tolerance = 0.01 * self.scan_step.abs().max(f64::EPSILON);
        let aligned = self
            .angles
            .iter()
            .zip(&other.angles)
            .all(|(a, b)| (a - b).abs() <= tolerance);
        if !aligned {
            return Err(DetcalError::InstrumentMismatch {
                reason: format!(
                    "cannot sum scans '{}' and '{}' recorded at different angles",
                    self.name, other.name
                ),
            });
        }

        for (c, o) in self.counts.iter_mut().zip(&other.counts) {
            *c += o;
        }
        for (v, o) in self.variances.iter_mut().zip(&other.variances) {
            *v += o;
        }
        for (m, o) in self.monitor.iter_mut().zip(&other.monitor) {
            *m += o;
        }
        self.name = format!("{}+{}", self.name, other.name);
        Ok(())
    }

    /// 每个像素偏移对应的扫描样本数：ceil(pixel_size / scan_step)
    pub fn bin_offset(&self) -> usize {
        bin_offset(self.geometry.pixel_size, self.scan_step)
    }
}

/// 活像素判据
pub fn is_live(nonzero: usize, n_scan_points: usize) -> bool {
    nonzero as f64 > n_scan_points as f64 / 5.0
}

/// 一个像素角宽度对应的扫描样本数
pub fn bin_offset(pixel_size: f64, scan_step: f64) -> usize {
    if scan_step <= 0.0 || !scan_step.is_finite() {
        return 1;
    }
    // 浮点误差不应让恰好整除的比值进位
    let ratio = pixel_size.abs() / scan_step.abs();
    let rounded = ratio.round();
    let value = if (ratio - rounded).abs() < 1e-9 {
        rounded
    } else {
        ratio.ceil()
    };
    (value as usize).max(1)
}
