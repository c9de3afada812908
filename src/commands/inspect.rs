//! # inspect 子命令实现
//!
//! 读取扫描文件并以表格列出几何与元数据，用于在校准前确认输入。
//!
//! ## 依赖关系
//! - 使用 `cli/inspect.rs` 定义的 InspectArgs
//! - 使用 `batch/` 模块收集与读取文件

use crate::batch::collect_inputs;
use crate::cli::inspect::InspectArgs;
use crate::error::Result;
use crate::models::DetectorScan;
use crate::utils::output;

use tabled::{Table, Tabled};

#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "Scan")]
    name: String,
    #[tabled(rename = "Instrument")]
    instrument: String,
    #[tabled(rename = "Tubes")]
    tubes: usize,
    #[tabled(rename = "Pixels/tube")]
    pixels: usize,
    #[tabled(rename = "Scan points")]
    points: usize,
    #[tabled(rename = "2θ range (°)")]
    range: String,
    #[tabled(rename = "Step (°)")]
    step: String,
    #[tabled(rename = "Pixel size (°)")]
    pixel_size: String,
    #[tabled(rename = "Bin offset")]
    bin_offset: usize,
    #[tabled(rename = "Live")]
    live: String,
}

impl From<&DetectorScan> for ScanRow {
    fn from(scan: &DetectorScan) -> Self {
        let (lo, hi) = scan.angle_range();
        let live = scan.live_mask();
        let live_count = live.iter().filter(|&&l| l).count();
        Self {
            name: scan.name.clone(),
            instrument: scan.instrument.clone().unwrap_or_else(|| "-".to_string()),
            tubes: scan.geometry.n_tubes,
            pixels: scan.geometry.n_pixels_per_tube,
            points: scan.n_scan_points,
            range: format!("{:.3} - {:.3}", lo, hi),
            step: format!("{:.4}", scan.scan_step),
            pixel_size: format!("{:.4}", scan.geometry.pixel_size),
            bin_offset: scan.bin_offset(),
            live: format!("{}/{}", live_count, live.len()),
        }
    }
}

/// 执行 inspect
pub fn execute(args: InspectArgs) -> Result<()> {
    output::print_header("Detector Scan Inspection");

    let files = collect_inputs(&args.inputs, &args.pattern, args.recursive)?;
    output::print_info(&format!("Found {} scan files", files.len()));

    let scans = super::load_scans(&files, args.jobs)?;
    let rows: Vec<ScanRow> = scans.iter().map(ScanRow::from).collect();
    println!("{}", Table::new(&rows));

    if let Some(head) = scans.first() {
        if let Some(other) = scans.iter().find(|s| !s.same_layout(head)) {
            output::print_warning(&format!(
                "'{}' and '{}' have different layouts; they cannot be combined",
                head.name, other.name
            ));
        }
    }

    Ok(())
}
