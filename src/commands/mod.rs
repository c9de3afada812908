//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `parsers/`, `calibration/`, `batch/`, `utils/`
//! - 子模块: calibrate, inspect

pub mod calibrate;
pub mod inspect;

use crate::batch::{BatchResult, BatchRunner};
use crate::error::{DetcalError, Result};
use crate::models::DetectorScan;
use crate::parsers;
use crate::utils::output;

use crate::cli::Commands;
use std::path::PathBuf;

/// 执行命令
pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Calibrate(args) => calibrate::execute(args),
        Commands::Inspect(args) => inspect::execute(args),
    }
}

/// 并行读取扫描文件；任何文件失败都视为致命错误
fn load_scans(files: &[PathBuf], jobs: usize) -> Result<Vec<DetectorScan>> {
    let runner = BatchRunner::new(jobs);
    let (scans, result) = runner.load(files, |file| parsers::parse_scan_file(file));

    report_failures(&result);
    if result.failed > 0 {
        return Err(DetcalError::MissingInput(format!(
            "{} of {} scan files could not be read",
            result.failed,
            result.total()
        )));
    }

    output::print_success(&format!("Loaded {} scan files", result.success));
    Ok(scans)
}

fn report_failures(result: &BatchResult) {
    let lines: Vec<String> = result
        .failures
        .iter()
        .map(|(path, err)| format!("  {}: {}", path, err))
        .collect();
    output::print_list(&lines, 10, output::print_error);
}
