//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `calibrate`: 推导探测器相对效率常数
//! - `inspect`: 查看扫描文件的几何与元数据
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: calibrate, inspect

pub mod calibrate;
pub mod inspect;

use clap::{Parser, Subcommand};

/// detcal - 扫描式粉末衍射探测器效率校准
#[derive(Parser)]
#[command(name = "detcal")]
#[command(version)]
#[command(about = "Relative detector-efficiency calibration for scanning powder diffraction", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Derive per-pixel relative efficiency constants from detector scans
    Calibrate(calibrate::CalibrateArgs),

    /// Show geometry and metadata of detector scan files
    Inspect(inspect::InspectArgs),
}
