//! # 校准配置
//!
//! 汇总所有可识别的选项，并在读取任何数据之前完成校验。
//! 所有配置冲突都是致命错误。
//!
//! ## 依赖关系
//! - 由 `commands/calibrate.rs` 从命令行参数构造
//! - 被 `calibration/pipeline.rs` 使用

use crate::error::{DetcalError, Result};

use serde::{Deserialize, Serialize};

/// 比值归约策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationMethod {
    #[default]
    Median,
    Mean,
    MostLikelyMean,
}

impl std::fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalibrationMethod::Median => write!(f, "Median"),
            CalibrationMethod::Mean => write!(f, "Mean"),
            CalibrationMethod::MostLikelyMean => write!(f, "MostLikelyMean"),
        }
    }
}

/// 二维（逐行）归约只支持的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMethod {
    Median,
    Mean,
}

impl TryFrom<CalibrationMethod> for RowMethod {
    type Error = DetcalError;

    fn try_from(method: CalibrationMethod) -> Result<Self> {
        match method {
            CalibrationMethod::Median => Ok(RowMethod::Median),
            CalibrationMethod::Mean => Ok(RowMethod::Mean),
            CalibrationMethod::MostLikelyMean => Err(DetcalError::InvalidConfiguration(
                "MostLikelyMean is not supported with the global reference derivation; use Median or Mean"
                    .to_string(),
            )),
        }
    }
}

/// 因子推导方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DerivationMethod {
    /// 逐像素生长单条参考曲线
    #[default]
    Sequential1D,
    /// 迭代重建全局二维参考
    Global2D,
}

impl std::fmt::Display for DerivationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DerivationMethod::Sequential1D => write!(f, "SequentialReference1D"),
            DerivationMethod::Global2D => write!(f, "GlobalReference2D"),
        }
    }
}

/// 预归一化目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormaliseTo {
    #[default]
    None,
    Monitor,
    Roi,
}

impl std::fmt::Display for NormaliseTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormaliseTo::None => write!(f, "None"),
            NormaliseTo::Monitor => write!(f, "Monitor"),
            NormaliseTo::Roi => write!(f, "ROI"),
        }
    }
}

/// 角度区间 [lower, upper]，要求 lower < upper
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngularRange {
    pub lower: f64,
    pub upper: f64,
}

impl AngularRange {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower < upper) {
            return Err(DetcalError::InvalidRange(format!(
                "{}-{} (lower bound must be smaller than upper bound)",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.lower && angle <= self.upper
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

/// 迭代次数为 1 之外的值只对全局模式有意义
pub const DEFAULT_ITERATIONS: usize = 1;

/// 校准配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub method: CalibrationMethod,
    pub derivation: DerivationMethod,
    pub normalise_to: NormaliseTo,
    /// ROI 归一化使用的角度区间
    pub regions_of_interest: Vec<AngularRange>,
    /// 从比值统计中排除的角度区间
    pub excluded_ranges: Vec<AngularRange>,
    /// 处理的像素下标范围（0 起，闭区间），None 表示全部
    pub pixel_range: Option<(usize, usize)>,
    /// 顺序模式下对重叠区做样条插值
    pub interpolate: bool,
    /// 全局模式迭代次数，0 表示按 chi2/ndof 自动停止
    pub n_iterations: usize,
    /// 自动停止阈值
    pub chi2_threshold: f64,
    /// 自动模式的迭代上限
    pub max_auto_iterations: usize,
    /// chi2 统计时每根管两端排除的像素数
    pub trim_pixels: usize,
    /// 掩码判据 [low, high]
    pub mask_criterion: Option<(f64, f64)>,
    /// 是否输出组合响应曲线
    pub output_response: bool,
    /// 并行作业数（0 = 全部核心，1 = 串行）
    pub jobs: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: CalibrationMethod::Median,
            derivation: DerivationMethod::Sequential1D,
            normalise_to: NormaliseTo::None,
            regions_of_interest: Vec::new(),
            excluded_ranges: Vec::new(),
            pixel_range: None,
            interpolate: false,
            n_iterations: DEFAULT_ITERATIONS,
            chi2_threshold: 1.0,
            max_auto_iterations: 10,
            trim_pixels: 0,
            mask_criterion: None,
            output_response: false,
            jobs: 1,
        }
    }
}

impl CalibrationConfig {
    /// 校验配置，`n_inputs` 为输入扫描文件数
    pub fn validate(&self, n_inputs: usize) -> Result<()> {
        let invalid = |msg: &str| Err(DetcalError::InvalidConfiguration(msg.to_string()));

        if n_inputs == 0 {
            return Err(DetcalError::MissingInput(
                "no detector scan given".to_string(),
            ));
        }

        match self.derivation {
            DerivationMethod::Global2D => {
                if self.interpolate {
                    return invalid(
                        "interpolation of the overlap is only supported with the sequential reference derivation",
                    );
                }
                if self.normalise_to == NormaliseTo::Roi {
                    return invalid(
                        "ROI normalisation is not supported with the global reference derivation",
                    );
                }
                RowMethod::try_from(self.method)?;
                if n_inputs < 2 {
                    return Err(DetcalError::InvalidConfiguration(format!(
                        "the global reference derivation needs at least two overlapping scan files, got {}",
                        n_inputs
                    )));
                }
            }
            DerivationMethod::Sequential1D => {
                if self.n_iterations != DEFAULT_ITERATIONS {
                    return invalid(
                        "the number of iterations can only be set with the global reference derivation",
                    );
                }
            }
        }

        if self.normalise_to == NormaliseTo::Roi && self.regions_of_interest.is_empty() {
            return invalid("ROI normalisation requires at least one region of interest");
        }

        for range in self.regions_of_interest.iter().chain(&self.excluded_ranges) {
            if !(range.lower < range.upper) {
                return Err(DetcalError::InvalidRange(format!(
                    "{}-{} (lower bound must be smaller than upper bound)",
                    range.lower, range.upper
                )));
            }
        }

        if let Some((first, last)) = self.pixel_range {
            if first > last {
                return invalid("pixel range must satisfy first <= last");
            }
        }

        if let Some((low, high)) = self.mask_criterion {
            if !(low < high) {
                return invalid("mask criterion must satisfy low < high");
            }
        }

        if !(self.chi2_threshold > 0.0) {
            return invalid("chi2/ndof threshold must be positive");
        }

        if self.max_auto_iterations == 0 {
            return invalid("the automatic iteration cap must be at least 1");
        }

        Ok(())
    }

    /// 排除区间（元组形式）
    pub fn excluded_tuples(&self) -> Vec<(f64, f64)> {
        self.excluded_ranges.iter().map(|r| r.as_tuple()).collect()
    }
}
