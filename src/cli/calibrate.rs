//! # calibrate 子命令 CLI 定义
//!
//! 参数与 `CalibrationConfig` 一一对应；区间列表（如 `"10-20,35.5:40"`）
//! 用正则解析。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/calibrate.rs`
//! - 使用 `calibration/config.rs`

use crate::calibration::{AngularRange, CalibrationConfig, CalibrationMethod, DerivationMethod, NormaliseTo};
use crate::error::{DetcalError, Result};

use clap::{Args, ValueEnum};
use regex::Regex;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────
// 枚举参数
// ─────────────────────────────────────────────────────────────

/// 比值统计方法
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum MethodArg {
    /// Median of the ratios
    #[default]
    Median,
    /// Arithmetic mean of the ratios
    Mean,
    /// Robust most-likely mean (sequential derivation only)
    MostLikelyMean,
}

impl From<MethodArg> for CalibrationMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Median => CalibrationMethod::Median,
            MethodArg::Mean => CalibrationMethod::Mean,
            MethodArg::MostLikelyMean => CalibrationMethod::MostLikelyMean,
        }
    }
}

/// 参考推导方式
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum DerivationArg {
    /// Grow a reference curve pixel by pixel (1-D)
    #[default]
    Sequential,
    /// Iterate against a global reference built from all tubes (2-D)
    Global,
}

impl From<DerivationArg> for DerivationMethod {
    fn from(arg: DerivationArg) -> Self {
        match arg {
            DerivationArg::Sequential => DerivationMethod::Sequential1D,
            DerivationArg::Global => DerivationMethod::Global2D,
        }
    }
}

/// 归一化目标
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum NormaliseArg {
    /// No normalisation
    #[default]
    None,
    /// Divide each scan point by its monitor counts
    Monitor,
    /// Divide each scan point by the counts inside the regions of interest
    Roi,
}

impl From<NormaliseArg> for NormaliseTo {
    fn from(arg: NormaliseArg) -> Self {
        match arg {
            NormaliseArg::None => NormaliseTo::None,
            NormaliseArg::Monitor => NormaliseTo::Monitor,
            NormaliseArg::Roi => NormaliseTo::Roi,
        }
    }
}

// ─────────────────────────────────────────────────────────────
// calibrate 参数
// ─────────────────────────────────────────────────────────────

/// calibrate 子命令参数
#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Detector scan files or directories containing them
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Statistic used to reduce the pixel/reference ratios
    #[arg(short, long, value_enum, default_value = "median")]
    pub method: MethodArg,

    /// How the reference is derived
    #[arg(short, long, value_enum, default_value = "sequential")]
    pub derivation: DerivationArg,

    /// Normalisation applied to the raw counts
    #[arg(long, value_enum, default_value = "none")]
    pub normalise_to: NormaliseArg,

    /// Regions of interest in degrees 2θ for ROI normalisation (e.g., "10-20,35:40")
    #[arg(long)]
    pub roi: Option<String>,

    /// Angular ranges in degrees 2θ excluded from the ratio statistics (e.g., "12.5-13.1")
    #[arg(long)]
    pub exclude: Option<String>,

    /// Detector index range to process, 1-based and inclusive (e.g., "1-128")
    #[arg(long)]
    pub pixel_range: Option<String>,

    /// Interpolate the overlap onto the reference grid (sequential derivation only)
    #[arg(long, default_value_t = false)]
    pub interpolate: bool,

    /// Number of iterations (global derivation only, 0 = stop on chi2/ndof)
    #[arg(short = 'n', long, default_value_t = 1)]
    pub iterations: usize,

    /// chi2/ndof threshold for automatic iteration stop
    #[arg(long, default_value_t = 1.0)]
    pub chi2_threshold: f64,

    /// Maximum number of iterations in automatic mode
    #[arg(long, default_value_t = 10)]
    pub max_iterations: usize,

    /// Pixels excluded at each tube end from the chi2/ndof statistic
    #[arg(long, default_value_t = 0)]
    pub trim_pixels: usize,

    /// Valid range of the final constants, entries outside are masked (e.g., "0.5-1.5")
    #[arg(long)]
    pub mask_criterion: Option<String>,

    /// Existing calibration constants applied to the raw counts first
    #[arg(long)]
    pub calibration_file: Option<PathBuf>,

    /// Output CSV file for the constants
    #[arg(short, long, default_value = "calibration.csv")]
    pub output: PathBuf,

    /// Write the combined response curve to this XY file (sequential derivation only)
    #[arg(long)]
    pub response: Option<PathBuf>,

    /// Plot the constants (PNG, or SVG by extension)
    #[arg(long)]
    pub plot: Option<PathBuf>,

    /// Title for the plot (default: name of the first scan)
    #[arg(long)]
    pub title: Option<String>,

    /// Glob pattern for files inside input directories (comma separated)
    #[arg(long, default_value = "*.csv")]
    pub pattern: String,

    /// Recurse into subdirectories
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
}

impl CalibrateArgs {
    /// 转换为校准配置（只做语法检查，语义校验见 `CalibrationConfig::validate`）
    pub fn to_config(&self) -> Result<CalibrationConfig> {
        let optional_list = |text: &Option<String>| match text {
            Some(t) => parse_range_list(t),
            None => Ok(Vec::new()),
        };

        Ok(CalibrationConfig {
            method: self.method.into(),
            derivation: self.derivation.into(),
            normalise_to: self.normalise_to.into(),
            regions_of_interest: optional_list(&self.roi)?,
            excluded_ranges: optional_list(&self.exclude)?,
            pixel_range: self.pixel_range.as_deref().map(parse_pixel_range).transpose()?,
            interpolate: self.interpolate,
            n_iterations: self.iterations,
            chi2_threshold: self.chi2_threshold,
            max_auto_iterations: self.max_iterations,
            trim_pixels: self.trim_pixels,
            mask_criterion: self
                .mask_criterion
                .as_deref()
                .map(parse_interval)
                .transpose()?,
            output_response: self.response.is_some(),
            jobs: self.jobs,
        })
    }
}

// ─────────────────────────────────────────────────────────────
// 区间解析
// ─────────────────────────────────────────────────────────────

const NUMBER: &str = r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

/// 解析单个区间 `a-b` 或 `a:b`
pub fn parse_interval(text: &str) -> Result<(f64, f64)> {
    let pattern = format!(r"^\s*({n})\s*[-:]\s*({n})\s*$", n = NUMBER);
    let re = Regex::new(&pattern).map_err(|e| DetcalError::Other(e.to_string()))?;

    let caps = re
        .captures(text)
        .ok_or_else(|| DetcalError::InvalidRange(format!("'{}' (expected 'LOW-HIGH')", text)))?;
    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|_| DetcalError::InvalidRange(text.to_string()))
    };
    Ok((parse(&caps[1])?, parse(&caps[2])?))
}

/// 解析逗号分隔的角度区间列表，每个区间要求下界小于上界
pub fn parse_range_list(text: &str) -> Result<Vec<AngularRange>> {
    text.split(',')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let (lower, upper) = parse_interval(chunk)?;
            AngularRange::new(lower, upper)
        })
        .collect()
}

/// 解析 1 起的像素下标范围 `first-last`，返回 0 起的闭区间
pub fn parse_pixel_range(text: &str) -> Result<(usize, usize)> {
    let re = Regex::new(r"^\s*(\d+)\s*[-:]\s*(\d+)\s*$").map_err(|e| DetcalError::Other(e.to_string()))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| DetcalError::InvalidRange(format!("'{}' (expected 'FIRST-LAST')", text)))?;

    let first: usize = caps[1]
        .parse()
        .map_err(|_| DetcalError::InvalidRange(text.to_string()))?;
    let last: usize = caps[2]
        .parse()
        .map_err(|_| DetcalError::InvalidRange(text.to_string()))?;

    if first < 1 || last < first {
        return Err(DetcalError::InvalidRange(format!(
            "'{}' (must satisfy 1 <= first <= last)",
            text
        )));
    }
    Ok((first - 1, last - 1))
}
