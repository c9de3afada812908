//! # 相对效率校准引擎
//!
//! 由重叠角覆盖的扫描数据推导每个像素的相对效率常数。
//!
//! ## 流程
//! ```text
//! CalibrationConfig ─► preprocess ─┬─► sequential (一维：逐像素生长参考曲线)
//!                                  └─► global     (二维：全局参考迭代)
//!                                        │
//!                          normalizer ◄──┘   (活像素中位数归一化)
//!                               │
//!                          assembler         (掩码判据 → 常数表)
//! ```
//!
//! ## 依赖关系
//! - 被 `commands/calibrate.rs` 使用
//! - 使用 `models/`、`batch/runner.rs`
//! - 子模块: config, context, masked, statistics, strategies, preprocess,
//!   sequential, global, normalizer, assembler, pipeline, export, plot

pub mod assembler;
pub mod config;
pub mod context;
pub mod export;
pub mod global;
pub mod masked;
pub mod normalizer;
pub mod pipeline;
pub mod plot;
pub mod preprocess;
pub mod sequential;
pub mod statistics;
pub mod strategies;

pub use config::{AngularRange, CalibrationConfig, CalibrationMethod, DerivationMethod, NormaliseTo};
pub use global::IterationReport;
pub use pipeline::{CalibrationOutput, Calibrator};
