//! # calibrate 子命令实现
//!
//! 读取扫描文件，推导效率常数，输出常数表、组合响应曲线和图表。
//!
//! ## 功能
//! - 在读取任何数据之前校验配置
//! - 并行读取扫描文件（rayon + 进度条）
//! - 运行期警告逐条输出（带像素/探测管下标）
//! - 全局模式打印每次迭代的 chi2/ndof 表格
//! - 只有运行成功后才写出文件
//!
//! ## 依赖关系
//! - 使用 `cli/calibrate.rs` 定义的 CalibrateArgs
//! - 使用 `calibration/` 模块进行推导与导出
//! - 使用 `batch/` 模块收集与读取文件

use crate::batch::collect_inputs;
use crate::calibration::{export, plot, CalibrationOutput, Calibrator, IterationReport};
use crate::cli::calibrate::CalibrateArgs;
use crate::error::Result;
use crate::parsers;
use crate::utils::{output, progress};

use tabled::{Table, Tabled};

/// 执行校准
pub fn execute(args: CalibrateArgs) -> Result<()> {
    output::print_header("Detector Efficiency Calibration");

    let config = args.to_config()?;
    let files = collect_inputs(&args.inputs, &args.pattern, args.recursive)?;
    config.validate(files.len())?;

    output::print_info(&format!("Found {} scan files", files.len()));
    output::print_info(&format!(
        "Derivation: {}, method: {}, normalisation: {}",
        config.derivation, config.method, config.normalise_to
    ));

    let prior = match &args.calibration_file {
        Some(path) => {
            let table = parsers::parse_calibration_file(path)?;
            output::print_info(&format!(
                "Applying {} prior constants from '{}'",
                table.len(),
                path.display()
            ));
            Some(table)
        }
        None => None,
    };

    let scans = super::load_scans(&files, args.jobs)?;
    let title = args.title.clone().unwrap_or_else(|| {
        scans
            .first()
            .map(|s| format!("Efficiency constants: {}", s.name))
            .unwrap_or_else(|| "Efficiency constants".to_string())
    });

    let spinner = progress::create_spinner("Deriving efficiency constants...");
    let result = Calibrator::new(config).run(scans, prior.as_ref());
    spinner.finish_and_clear();
    let out = result?;

    print_report(&out);
    write_outputs(&args, &out, &title)?;

    output::print_done("Calibration complete");
    Ok(())
}

/// 打印警告、迭代表和常数统计
fn print_report(out: &CalibrationOutput) {
    if !out.warnings.is_empty() {
        output::print_separator();
        output::print_list(&out.warnings, 50, output::print_warning);
    }

    if !out.iterations.is_empty() {
        output::print_header("Global Reference Iterations");
        println!("{}", iteration_table(&out.iterations));
    }

    output::print_header("Calibration Summary");
    println!("{}", summary_table(out));
}

#[derive(Tabled)]
struct IterationRow {
    #[tabled(rename = "Iteration")]
    iteration: usize,
    #[tabled(rename = "chi2/ndof")]
    chi2_ndof: String,
}

fn iteration_table(reports: &[IterationReport]) -> Table {
    let rows: Vec<IterationRow> = reports
        .iter()
        .map(|r| IterationRow {
            iteration: r.iteration,
            chi2_ndof: format!("{:.6e}", r.chi2_ndof),
        })
        .collect();
    Table::new(&rows)
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Quantity")]
    quantity: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn summary_table(out: &CalibrationOutput) -> Table {
    let values: Vec<f64> = out.table.entries.iter().map(|e| e.constant).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = if values.is_empty() {
        f64::NAN
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };

    let rows = vec![
        SummaryRow {
            quantity: "Detectors",
            value: out.table.len().to_string(),
        },
        SummaryRow {
            quantity: "Live pixels",
            value: out.live_count.to_string(),
        },
        SummaryRow {
            quantity: "Normalisation median",
            value: format!("{:.6}", out.scale),
        },
        SummaryRow {
            quantity: "Constant range",
            value: format!("{:.6} - {:.6}", min, max),
        },
        SummaryRow {
            quantity: "Mean constant",
            value: format!("{:.6}", mean),
        },
        SummaryRow {
            quantity: "Masked entries",
            value: out.table.masked_count().to_string(),
        },
        SummaryRow {
            quantity: "Warnings",
            value: out.warnings.len().to_string(),
        },
    ];
    Table::new(&rows)
}

/// 写出常数表、响应曲线和图表
fn write_outputs(args: &CalibrateArgs, out: &CalibrationOutput, title: &str) -> Result<()> {
    export::constants_to_csv(&out.table, &args.output)?;
    output::print_success(&format!(
        "Constants saved to '{}'",
        args.output.display()
    ));

    if let Some(path) = &args.response {
        match &out.response {
            Some(curve) => {
                export::response_to_xy(curve, title, path)?;
                output::print_success(&format!("Combined response saved to '{}'", path.display()));
            }
            None => output::print_warning("No combined response curve was produced"),
        }
    }

    if let Some(path) = &args.plot {
        plot::plot_calibration(&out.table, out.response.as_ref(), title, path)?;
        output::print_success(&format!("Plot saved to '{}'", path.display()));
    }

    Ok(())
}
