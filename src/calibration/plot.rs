//! # 校准结果图表
//!
//! 使用 `plotters` 绘制常数随探测单元下标的分布（被掩码的记录以红色标出），
//! 以及可选的组合响应曲线。文件扩展名为 `.svg` 时输出 SVG，否则输出 PNG。
//!
//! ## 依赖关系
//! - 被 `commands/calibrate.rs` 调用
//! - 使用 `plotters` 渲染图表

use crate::error::{DetcalError, Result};
use crate::models::{CalibrationTable, ResponseCurve};

use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 700;

fn plot_error<E: std::fmt::Debug>(e: E) -> DetcalError {
    DetcalError::Other(format!("Plot rendering failed: {:?}", e))
}

/// 根据扩展名判断是否输出 SVG
pub fn is_svg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("svg"))
        .unwrap_or(false)
}

/// 绘制常数图（有响应曲线时在下方追加一幅）
pub fn plot_calibration(
    table: &CalibrationTable,
    response: Option<&ResponseCurve>,
    title: &str,
    output_path: &Path,
) -> Result<()> {
    let height = if response.is_some() { HEIGHT * 2 } else { HEIGHT };
    if is_svg(output_path) {
        let root = SVGBackend::new(output_path, (WIDTH, height)).into_drawing_area();
        draw(&root, table, response, title)?;
        root.present().map_err(plot_error)?;
    } else {
        let root = BitMapBackend::new(output_path, (WIDTH, height)).into_drawing_area();
        draw(&root, table, response, title)?;
        root.present().map_err(plot_error)?;
    }
    Ok(())
}

fn draw<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    table: &CalibrationTable,
    response: Option<&ResponseCurve>,
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE).map_err(plot_error)?;

    match response {
        Some(curve) => {
            let (upper, lower) = root.split_vertically(HEIGHT as i32);
            draw_constants(&upper, table, title)?;
            draw_response(&lower, curve)?;
        }
        None => draw_constants(root, table, title)?,
    }
    Ok(())
}

/// 常数 vs 下标
fn draw_constants<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    table: &CalibrationTable,
    title: &str,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let n = table.len().max(1) as f64;
    let (y_min, y_max) = table
        .entries
        .iter()
        .map(|e| e.constant)
        .filter(|v| v.is_finite())
        .fold((1.0_f64, 1.0_f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let pad = ((y_max - y_min) * 0.1).max(0.05);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 26).into_font())
        .margin(25)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(-0.5..n - 0.5, (y_min - pad)..(y_max + pad))
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("Detector index")
        .y_desc("Efficiency constant")
        .x_label_style(("sans-serif", 15))
        .y_label_style(("sans-serif", 15))
        .axis_desc_style(("sans-serif", 17))
        .draw()
        .map_err(plot_error)?;

    let valid_color = RGBColor(0, 102, 204);
    chart
        .draw_series(
            table
                .entries
                .iter()
                .filter(|e| e.valid)
                .map(|e| Circle::new((e.index as f64, e.constant), 2, valid_color.filled())),
        )
        .map_err(plot_error)?
        .label("valid")
        .legend(move |(x, y)| Circle::new((x + 10, y), 4, valid_color.filled()));

    let masked_color = RGBColor(204, 0, 0);
    chart
        .draw_series(
            table
                .entries
                .iter()
                .filter(|e| !e.valid)
                .map(|e| Cross::new((e.index as f64, e.constant), 4, masked_color.stroke_width(2))),
        )
        .map_err(plot_error)?
        .label("masked")
        .legend(move |(x, y)| Cross::new((x + 10, y), 4, masked_color.stroke_width(2)));

    chart
        .configure_series_labels()
        .border_style(&BLACK)
        .background_style(&WHITE.mix(0.8))
        .draw()
        .map_err(plot_error)?;

    Ok(())
}

/// 组合响应曲线
fn draw_response<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    curve: &ResponseCurve,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let x_min = curve.min_angle().unwrap_or(0.0);
    let x_max = curve.max_angle().unwrap_or(1.0).max(x_min + 1e-6);
    let y_max = curve
        .intensities
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max)
        .max(1e-12);

    let mut chart = ChartBuilder::on(area)
        .caption("Combined response", ("sans-serif", 22).into_font())
        .margin(25)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, 0.0..y_max * 1.05)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("2θ (°)")
        .y_desc("Intensity")
        .x_label_style(("sans-serif", 15))
        .y_label_style(("sans-serif", 15))
        .axis_desc_style(("sans-serif", 17))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            curve
                .angles
                .iter()
                .zip(&curve.intensities)
                .map(|(x, y)| (*x, *y)),
            RGBColor(0, 102, 204).stroke_width(2),
        ))
        .map_err(plot_error)?;

    Ok(())
}
