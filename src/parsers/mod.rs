//! # 解析器模块
//!
//! 提供探测器扫描文件和校准常数文件的读取。
//!
//! ## 依赖关系
//! - 被 `commands/` 模块使用
//! - 使用 `models/` 数据模型
//! - 子模块: scan_csv, calibration_csv

pub mod calibration_csv;
pub mod scan_csv;

pub use calibration_csv::parse_calibration_file;
pub use scan_csv::parse_scan_file;
