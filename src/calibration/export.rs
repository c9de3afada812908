//! # 校准结果导出
//!
//! ## 支持格式
//! - CSV: 常数表 `index,tube,pixel,constant,error,valid`
//! - XY: 组合响应曲线（`angle\tintensity\terror`，`#` 开头的注释头）
//!
//! ## 依赖关系
//! - 被 `commands/calibrate.rs` 调用
//! - 使用 `models/constants.rs` 与 `models/curve.rs`
//! - 使用 `csv` 库写入 CSV 文件

use crate::error::{DetcalError, Result};
use crate::models::{CalibrationTable, ResponseCurve};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> DetcalError + '_ {
    move |e| DetcalError::FileWriteError {
        path: path.display().to_string(),
        source: e,
    }
}

/// 导出常数表为 CSV
pub fn constants_to_csv(table: &CalibrationTable, output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    for entry in &table.entries {
        wtr.serialize(entry)?;
    }

    wtr.flush().map_err(write_error(output_path))?;
    Ok(())
}

/// 导出组合响应曲线为 XY 格式
pub fn response_to_xy(curve: &ResponseCurve, source: &str, output_path: &Path) -> Result<()> {
    let file = File::create(output_path).map_err(write_error(output_path))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "# Combined detector response: {}", source).map_err(write_error(output_path))?;
    writeln!(out, "# Points: {}", curve.len()).map_err(write_error(output_path))?;
    writeln!(out, "# Columns: 2theta (degrees), Intensity, Error").map_err(write_error(output_path))?;
    writeln!(out, "#").map_err(write_error(output_path))?;

    for i in 0..curve.len() {
        writeln!(
            out,
            "{:.6}\t{:.6}\t{:.6}",
            curve.angles[i],
            curve.intensities[i],
            curve.variances[i].max(0.0).sqrt()
        )
        .map_err(write_error(output_path))?;
    }

    out.flush().map_err(write_error(output_path))?;
    Ok(())
}
