//! # detcal - 扫描式粉末衍射探测器效率校准
//!
//! 由重叠角覆盖的扫描数据推导每个探测像素的相对效率常数，
//! 不需要除数据本身之外的绝对标准。
//!
//! ## 子命令
//! - `calibrate` - 推导效率常数（一维顺序参考 / 二维全局参考）
//! - `inspect`   - 查看扫描文件的几何与元数据
//!
//! ## 依赖关系
//! ```text
//! main.rs
//!   ├── cli/        (命令行参数定义)
//!   ├── commands/   (命令执行逻辑)
//!   │     ├── parsers/     (扫描与常数文件读取)
//!   │     ├── batch/       (文件收集与并行读取)
//!   │     └── calibration/ (校准引擎)
//!   ├── models/     (数据模型)
//!   ├── utils/      (工具函数)
//!   └── error.rs    (错误处理)
//! ```

mod batch;
mod calibration;
mod cli;
mod commands;
mod error;
mod models;
mod parsers;
mod utils;

use clap::Parser;
use cli::Cli;

fn main() {
    // Initialize colored output for Windows compatibility
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let cli = Cli::parse();

    if let Err(e) = commands::run(cli.command) {
        utils::output::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
