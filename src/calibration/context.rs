//! # 运行期诊断
//!
//! 可恢复的数值异常以警告形式收集，每条警告带有出问题的像素或探测管下标。
//! 由调用方在运行结束后统一输出。
//!
//! ## 依赖关系
//! - 被 `calibration/` 各阶段使用
//! - 被 `commands/calibrate.rs` 输出

use serde::{Deserialize, Serialize};

/// 警告所指的对象
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningSubject {
    /// 整次运行
    Run,
    /// 平铺后的像素下标
    Pixel(usize),
    /// (探测管, 管内像素)
    TubePixel(usize, usize),
    /// 扫描点
    ScanPoint(usize),
}

impl std::fmt::Display for WarningSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningSubject::Run => write!(f, "run"),
            WarningSubject::Pixel(p) => write!(f, "pixel #{}", p),
            WarningSubject::TubePixel(t, p) => write!(f, "tube #{} pixel #{}", t, p),
            WarningSubject::ScanPoint(s) => write!(f, "scan point #{}", s),
        }
    }
}

/// 可恢复的数值异常
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationWarning {
    pub subject: WarningSubject,
    pub message: String,
}

impl std::fmt::Display for CalibrationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.subject, self.message)
    }
}

/// 警告收集器
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<CalibrationWarning>,
}

impl Diagnostics {
    pub fn warn(&mut self, subject: WarningSubject, message: impl Into<String>) {
        self.warnings.push(CalibrationWarning {
            subject,
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn warnings(&self) -> &[CalibrationWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<CalibrationWarning> {
        self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
