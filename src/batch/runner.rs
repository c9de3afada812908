//! # 批量执行器
//!
//! 并行执行批量任务：读取多个扫描文件，或在一次迭代内逐探测管计算比值统计。
//!
//! ## 功能
//! - 基于 rayon 的并行迭代（保持输入顺序）
//! - 进度条显示
//! - 错误收集与汇总报告
//!
//! ## 依赖关系
//! - 被 `commands/` 和 `calibration/global.rs` 调用
//! - 使用 `utils/progress.rs` 创建进度条
//! - 使用 `rayon` 进行并行计算

use crate::error::Result;
use crate::utils::progress;

use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 批量处理结果统计
#[derive(Debug, Default)]
pub struct BatchResult {
    /// 成功数量
    pub success: usize,
    /// 失败数量
    pub failed: usize,
    /// 失败详情 (文件路径, 错误信息)
    pub failures: Vec<(String, String)>,
}

impl BatchResult {
    /// 总处理数量
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// 批量执行器
pub struct BatchRunner {
    /// 并行作业数
    jobs: usize,
}

impl BatchRunner {
    /// 创建新的批量执行器（0 表示使用全部核心）
    pub fn new(jobs: usize) -> Self {
        let jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        Self { jobs }
    }

    /// 并行映射，结果顺序与输入一致；单作业时直接串行执行
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.jobs <= 1 || items.len() <= 1 {
            return items.iter().map(f).collect();
        }

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
        {
            Ok(pool) => pool.install(|| items.par_iter().map(&f).collect()),
            Err(_) => items.iter().map(f).collect(),
        }
    }

    /// 并行读取文件列表，带进度条；返回成功读取的结果（按输入顺序）和统计
    pub fn load<T, F>(&self, files: &[PathBuf], loader: F) -> (Vec<T>, BatchResult)
    where
        T: Send,
        F: Fn(&PathBuf) -> Result<T> + Sync + Send,
    {
        let pb = progress::create_progress_bar(files.len() as u64, "Loading scans");

        let success_count = AtomicUsize::new(0);
        let failed_count = AtomicUsize::new(0);

        let results: Vec<Result<T>> = self.map(files, |file| {
            let result = loader(file);
            match &result {
                Ok(_) => success_count.fetch_add(1, Ordering::Relaxed),
                Err(_) => failed_count.fetch_add(1, Ordering::Relaxed),
            };
            pb.inc(1);
            result
        });

        pb.finish_and_clear();

        // 汇总结果
        let mut batch_result = BatchResult {
            success: success_count.load(Ordering::Relaxed),
            failed: failed_count.load(Ordering::Relaxed),
            failures: Vec::new(),
        };
        let mut loaded = Vec::with_capacity(files.len());
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(value) => loaded.push(value),
                Err(e) => batch_result
                    .failures
                    .push((file.display().to_string(), e.to_string())),
            }
        }

        (loaded, batch_result)
    }
}
