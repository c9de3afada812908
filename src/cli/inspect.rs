//! # inspect 子命令 CLI 定义
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/inspect.rs`

use clap::Args;
use std::path::PathBuf;

/// inspect 子命令参数
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Detector scan files or directories containing them
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Glob pattern for files inside input directories (comma separated)
    #[arg(long, default_value = "*.csv")]
    pub pattern: String,

    /// Recurse into subdirectories
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Number of parallel jobs for loading (0 = auto)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
}
