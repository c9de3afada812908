//! # 美化输出工具
//!
//! 提供统一的终端输出样式：`[OK]`、`[ERR]`、`[WARN]`、`[*]`、`[DONE]` 前缀，
//! 以及标题栏和分隔线。
//!
//! ## 依赖关系
//! - 被所有 `commands/` 模块和 `main.rs` 使用
//! - 使用 `colored` crate

use colored::Colorize;

/// 打印成功消息
pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

/// 打印错误消息
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERR]".red().bold(), msg);
}

/// 打印警告消息
pub fn print_warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), msg);
}

/// 打印信息消息
pub fn print_info(msg: &str) {
    println!("{} {}", "[*]".blue().bold(), msg);
}

/// 打印完成消息
pub fn print_done(msg: &str) {
    println!("{} {}", "[DONE]".green().bold(), msg);
}

/// 打印标题栏
pub fn print_header(title: &str) {
    let line = "─".repeat(60);
    println!("\n{}", line.dimmed());
    println!("  {}", title.bold());
    println!("{}\n", line.dimmed());
}

/// 打印分隔线
pub fn print_separator() {
    println!("{}", "─".repeat(60).dimmed());
}

/// 逐条打印列表，超过 `limit` 条时省略其余并提示数量
pub fn print_list<T: std::fmt::Display>(items: &[T], limit: usize, printer: fn(&str)) {
    for item in items.iter().take(limit) {
        printer(&item.to_string());
    }
    if items.len() > limit {
        print_warning(&format!("... and {} more", items.len() - limit));
    }
}
