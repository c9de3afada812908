//! # 角度响应曲线数据模型
//!
//! 一条曲线是按角度升序排列的 (2θ, 强度, 方差) 样本序列。
//! 既用于单个像素在所有扫描点上的响应，也用于顺序模式中的参考曲线
//! 和诊断用的组合响应曲线。
//!
//! ## 依赖关系
//! - 被 `models/scan.rs` 构造
//! - 被 `calibration/sequential.rs` 和 `calibration/export.rs` 使用

use serde::{Deserialize, Serialize};

/// 角度响应曲线
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseCurve {
    /// 散射角 2θ（度），严格递增
    pub angles: Vec<f64>,
    /// 强度
    pub intensities: Vec<f64>,
    /// 方差
    pub variances: Vec<f64>,
}

impl ResponseCurve {
    /// 从三列数据创建曲线，并按角度排序
    pub fn new(angles: Vec<f64>, intensities: Vec<f64>, variances: Vec<f64>) -> Self {
        debug_assert_eq!(angles.len(), intensities.len());
        debug_assert_eq!(angles.len(), variances.len());

        let sorted = angles.windows(2).all(|w| w[0] < w[1]);
        if sorted {
            return Self {
                angles,
                intensities,
                variances,
            };
        }

        let mut order: Vec<usize> = (0..angles.len()).collect();
        order.sort_by(|&a, &b| angles[a].total_cmp(&angles[b]));

        Self {
            angles: order.iter().map(|&i| angles[i]).collect(),
            intensities: order.iter().map(|&i| intensities[i]).collect(),
            variances: order.iter().map(|&i| variances[i]).collect(),
        }
    }

    /// 创建指定长度、全零的曲线
    pub fn zeros(angles: Vec<f64>) -> Self {
        let n = angles.len();
        Self {
            angles,
            intensities: vec![0.0; n],
            variances: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }

    /// 最小角度
    pub fn min_angle(&self) -> Option<f64> {
        self.angles.first().copied()
    }

    /// 最大角度
    pub fn max_angle(&self) -> Option<f64> {
        self.angles.last().copied()
    }

    /// 非零强度样本数
    pub fn nonzero_count(&self) -> usize {
        self.intensities.iter().filter(|&&v| v != 0.0).count()
    }

    /// 按下标截取 [start, end)
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            angles: self.angles[start..end].to_vec(),
            intensities: self.intensities[start..end].to_vec(),
            variances: self.variances[start..end].to_vec(),
        }
    }

    /// 去掉两端各 `margin` 个样本
    pub fn crop_margins(&self, margin: usize) -> Self {
        let end = self.len().saturating_sub(margin);
        self.slice(margin, end)
    }

    /// 去掉前端 `count` 个样本（原地）
    pub fn drop_front(&mut self, count: usize) {
        let count = count.min(self.len());
        self.angles.drain(..count);
        self.intensities.drain(..count);
        self.variances.drain(..count);
    }

    /// 角度不超过 `max_angle`（含容差）的样本数
    pub fn count_up_to(&self, max_angle: f64, tolerance: f64) -> usize {
        self.angles.partition_point(|&a| a <= max_angle + tolerance)
    }

    /// 角度落在 [lower, upper]（含容差）内的样本
    pub fn window(&self, lower: f64, upper: f64, tolerance: f64) -> Self {
        let start = self.angles.partition_point(|&a| a < lower - tolerance);
        let end = self.angles.partition_point(|&a| a <= upper + tolerance);
        self.slice(start, end)
    }

    /// 按因子缩放强度，方差按因子平方缩放
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            angles: self.angles.clone(),
            intensities: self.intensities.iter().map(|v| v * factor).collect(),
            variances: self
                .variances
                .iter()
                .map(|v| v * factor * factor)
                .collect(),
        }
    }

    /// 在尾部拼接另一条曲线
    pub fn append(&mut self, other: &ResponseCurve) {
        self.angles.extend_from_slice(&other.angles);
        self.intensities.extend_from_slice(&other.intensities);
        self.variances.extend_from_slice(&other.variances);
    }

    /// 最近邻样本的方差
    pub fn nearest_variance(&self, angle: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let idx = self.angles.partition_point(|&a| a < angle);
        let candidates = [idx.saturating_sub(1), idx.min(self.len() - 1)];
        let best = candidates
            .into_iter()
            .min_by(|&a, &b| {
                (self.angles[a] - angle)
                    .abs()
                    .total_cmp(&(self.angles[b] - angle).abs())
            })
            .unwrap_or(0);
        self.variances[best]
    }
}
