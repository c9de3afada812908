//! # 掩码数组
//!
//! 零值与非有限值（NaN、±Inf）都表示“无信息”。所有比值统计、
//! 参考曲线合并和常数替换都通过这里的语义判断样本是否可用，
//! 不在数学代码中零散地检查哨兵值。
//!
//! ## 依赖关系
//! - 被 `calibration/statistics.rs`、`sequential.rs`、`global.rs` 使用

use std::ops::Range;

/// 样本是否携带信息
#[inline]
pub fn is_informative(value: f64) -> bool {
    value != 0.0 && value.is_finite()
}

/// 带掩码的一维数组（`mask[i] == true` 表示第 i 个样本被屏蔽）
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedArray {
    values: Vec<f64>,
    mask: Vec<bool>,
}

impl MaskedArray {
    /// 由原始值创建，自动屏蔽零与非有限值
    pub fn from_values(values: Vec<f64>) -> Self {
        let mask = values.iter().map(|&v| !is_informative(v)).collect();
        Self { values, mask }
    }

    /// 逐元素相除，任一侧无信息则屏蔽
    pub fn ratio(numerator: &[f64], denominator: &[f64]) -> Self {
        let values: Vec<f64> = numerator
            .iter()
            .zip(denominator)
            .map(|(&n, &d)| {
                if is_informative(n) && is_informative(d) {
                    n / d
                } else {
                    0.0
                }
            })
            .collect();
        Self::from_values(values)
    }

    pub fn is_masked(&self, index: usize) -> bool {
        self.mask.get(index).copied().unwrap_or(true)
    }

    /// 屏蔽一个下标区间
    pub fn mask_range(&mut self, range: Range<usize>) {
        let end = range.end.min(self.mask.len());
        let start = range.start.min(end);
        for m in &mut self.mask[start..end] {
            *m = true;
        }
    }

    /// 屏蔽多个下标区间
    pub fn mask_ranges(&mut self, ranges: &[Range<usize>]) {
        for range in ranges {
            self.mask_range(range.clone());
        }
    }

    /// 只保留 [start, end)，其余屏蔽
    pub fn keep_only(&mut self, range: Range<usize>) {
        let len = self.mask.len();
        self.mask_range(0..range.start.min(len));
        self.mask_range(range.end.min(len)..len);
    }

    /// 未被屏蔽的样本
    pub fn compressed(&self) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.mask)
            .filter(|(_, &m)| !m)
            .map(|(&v, _)| v)
            .collect()
    }
}

/// 将已排序角度上的角度区间转换为下标区间
pub fn angular_to_index_ranges(angles: &[f64], ranges: &[(f64, f64)]) -> Vec<Range<usize>> {
    ranges
        .iter()
        .map(|&(lower, upper)| {
            let start = angles.partition_point(|&a| a < lower);
            let end = angles.partition_point(|&a| a <= upper);
            start..end.max(start)
        })
        .filter(|r| !r.is_empty())
        .collect()
}
