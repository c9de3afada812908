//! # 统一错误处理模块
//!
//! 定义 detcal 的所有错误类型，使用 `thiserror` 派生。
//!
//! 致命错误（配置冲突、输入缺失、分箱不一致）通过 `DetcalError` 返回；
//! 运行期的数值异常（零、NaN、Inf 因子）不会成为错误，而是作为
//! `CalibrationWarning` 收集在结果中。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// detcal 统一错误类型
#[derive(Error, Debug)]
pub enum DetcalError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} file: {path}\nReason: {reason}")]
    ParseError {
        format: String,
        path: String,
        reason: String,
    },

    // ─────────────────────────────────────────────────────────────
    // 配置错误（在读取任何数据之前报告）
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid range format: {0}")]
    InvalidRange(String),

    // ─────────────────────────────────────────────────────────────
    // 输入数据错误
    // ─────────────────────────────────────────────────────────────
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Instrument mismatch: {reason}")]
    InstrumentMismatch { reason: String },

    // ─────────────────────────────────────────────────────────────
    // 数值一致性错误
    // ─────────────────────────────────────────────────────────────
    #[error(
        "Unexpected number of bins for pixel #{pixel}: reference has {expected}, cropped pixel has {found}"
    )]
    BinCountMismatch {
        pixel: usize,
        expected: usize,
        found: usize,
    },

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("No matching files found with pattern: {pattern}")]
    NoFilesFound { pattern: String },

    #[error("{0}")]
    Other(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, DetcalError>;
