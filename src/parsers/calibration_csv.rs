//! # 校准常数 CSV 解析器
//!
//! 读取 `calibration/export.rs` 写出的常数表，作为下一次运行的先验校准。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/constants.rs`

use crate::error::{DetcalError, Result};
use crate::models::{CalibrationEntry, CalibrationTable};

use std::path::Path;

/// 读取常数表
pub fn parse_calibration_file(path: &Path) -> Result<CalibrationTable> {
    if !path.exists() {
        return Err(DetcalError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut entries: Vec<CalibrationEntry> = Vec::new();
    for record in reader.deserialize() {
        let entry: CalibrationEntry = record.map_err(|e| DetcalError::ParseError {
            format: "calibration CSV".to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !(entry.constant.is_finite() && entry.constant > 0.0) {
            return Err(DetcalError::ParseError {
                format: "calibration CSV".to_string(),
                path: path.display().to_string(),
                reason: format!(
                    "constant {} for detector {} is not a positive number",
                    entry.constant, entry.index
                ),
            });
        }
        entries.push(entry);
    }

    entries.sort_by_key(|e| e.index);
    let table = CalibrationTable { entries };
    if table.is_empty() {
        return Err(DetcalError::ParseError {
            format: "calibration CSV".to_string(),
            path: path.display().to_string(),
            reason: "no constants".to_string(),
        });
    }
    Ok(table)
}
