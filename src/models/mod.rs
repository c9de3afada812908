//! # 数据模型模块
//!
//! 定义探测器扫描、角度响应曲线和校准常数表。
//!
//! ## 依赖关系
//! - 被 `parsers/`、`calibration/` 和 `commands/` 使用
//! - 子模块: scan, curve, constants

pub mod constants;
pub mod curve;
pub mod scan;

pub use constants::{CalibrationEntry, CalibrationTable, FactorEstimate};
pub use curve::ResponseCurve;
pub use scan::{DetectorGeometry, DetectorScan};
