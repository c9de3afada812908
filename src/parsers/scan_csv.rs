//! # 探测器扫描 CSV 解析器
//!
//! 每个文件保存一次探测器扫描。
//!
//! ## 格式说明
//! ```text
//! # instrument: D2B
//! # pixel_size: 1.25
//! # scan_step: 0.05
//! tube,pixel,scan_point,two_theta,counts,variance,monitor
//! 0,0,0,10.000,1523,1523,1000
//! 0,0,1,10.050,1498,1498,1000
//! ...
//! ```
//!
//! - `variance` 列缺省时取计数（泊松统计），`monitor` 缺省时取 1.0
//! - 元数据缺少 `scan_step`/`pixel_size` 时由角度推出
//! - 每个 (tube, pixel, scan_point) 必须恰好出现一次
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 使用
//! - 使用 `models/scan.rs`
//! - 使用 `csv` + `serde` 反序列化数据行，`regex` 匹配元数据行

use crate::error::{DetcalError, Result};
use crate::models::{DetectorGeometry, DetectorScan};

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const FORMAT: &str = "detector scan CSV";

/// 一行数据
#[derive(Debug, Deserialize)]
struct ScanRecord {
    tube: usize,
    pixel: usize,
    scan_point: usize,
    two_theta: f64,
    counts: f64,
    #[serde(default)]
    variance: Option<f64>,
    #[serde(default)]
    monitor: Option<f64>,
}

/// 解析扫描文件
pub fn parse_scan_file(path: &Path) -> Result<DetectorScan> {
    let content = fs::read_to_string(path).map_err(|e| DetcalError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    parse_scan_content(&content, name).map_err(|e| match e {
        DetcalError::ParseError { format, reason, .. } => DetcalError::ParseError {
            format,
            path: path.display().to_string(),
            reason,
        },
        other => other,
    })
}

/// `# key: value` 形式的元数据
fn parse_metadata(content: &str) -> HashMap<String, String> {
    let re = Regex::new(r"^#\s*([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.*?)\s*$");
    let Ok(re) = re else {
        return HashMap::new();
    };

    content
        .lines()
        .filter_map(|line| re.captures(line.trim()))
        .map(|caps| (caps[1].to_lowercase(), caps[2].to_string()))
        .collect()
}

fn parse_error(name: &str, reason: impl Into<String>) -> DetcalError {
    DetcalError::ParseError {
        format: FORMAT.to_string(),
        path: name.to_string(),
        reason: reason.into(),
    }
}

fn metadata_number(metadata: &HashMap<String, String>, key: &str, name: &str) -> Result<Option<f64>> {
    match metadata.get(key) {
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| parse_error(name, format!("invalid value '{}' for '{}'", text, key))),
        None => Ok(None),
    }
}

/// 从字符串内容解析扫描
pub fn parse_scan_content(content: &str, name: &str) -> Result<DetectorScan> {
    let metadata = parse_metadata(content);

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let records: Vec<ScanRecord> = reader
        .deserialize()
        .collect::<std::result::Result<_, csv::Error>>()
        .map_err(|e| parse_error(name, e.to_string()))?;

    if records.is_empty() {
        return Err(parse_error(name, "no data rows"));
    }

    let n_tubes = records.iter().map(|r| r.tube).max().unwrap_or(0).saturating_add(1);
    let n_pixels_per_tube = records.iter().map(|r| r.pixel).max().unwrap_or(0).saturating_add(1);
    let n_scan_points = records.iter().map(|r| r.scan_point).max().unwrap_or(0).saturating_add(1);
    let n = n_tubes
        .checked_mul(n_pixels_per_tube)
        .and_then(|v| v.checked_mul(n_scan_points))
        .ok_or_else(|| parse_error(name, "tube, pixel and scan point indices are too large"))?;
    // 每个单元恰好出现一次，行数必须等于单元数
    if n != records.len() {
        return Err(parse_error(
            name,
            format!(
                "{} rows do not fill a {} x {} x {} (tube, pixel, scan point) grid",
                records.len(),
                n_tubes,
                n_pixels_per_tube,
                n_scan_points
            ),
        ));
    }

    let mut angles = vec![0.0; n];
    let mut counts = vec![0.0; n];
    let mut variances = vec![0.0; n];
    let mut monitor: Vec<Option<f64>> = vec![None; n_scan_points];
    let mut seen = vec![false; n];

    for r in &records {
        let idx = (r.tube * n_pixels_per_tube + r.pixel) * n_scan_points + r.scan_point;
        if seen[idx] {
            return Err(parse_error(
                name,
                format!(
                    "duplicate row for tube {} pixel {} scan point {}",
                    r.tube, r.pixel, r.scan_point
                ),
            ));
        }
        seen[idx] = true;
        angles[idx] = r.two_theta;
        counts[idx] = r.counts;
        variances[idx] = r.variance.unwrap_or(r.counts);
        if monitor[r.scan_point].is_none() {
            monitor[r.scan_point] = r.monitor;
        }
    }

    let at = |t: usize, p: usize, s: usize| angles[(t * n_pixels_per_tube + p) * n_scan_points + s];

    let scan_step = match metadata_number(&metadata, "scan_step", name)? {
        Some(step) => step,
        None if n_scan_points > 1 => (at(0, 0, n_scan_points - 1) - at(0, 0, 0)) / (n_scan_points - 1) as f64,
        None => 0.0,
    };

    // 缺省像素宽度：优先取管内相邻像素的角距，其次取相邻管的角距
    let pixel_size = match metadata_number(&metadata, "pixel_size", name)? {
        Some(size) => size,
        None => {
            let along_tube = if n_pixels_per_tube > 1 { (at(0, 1, 0) - at(0, 0, 0)).abs() } else { 0.0 };
            let across_tubes = if n_tubes > 1 { (at(1, 0, 0) - at(0, 0, 0)).abs() } else { 0.0 };
            if along_tube > 1e-12 {
                along_tube
            } else {
                across_tubes
            }
        }
    };

    Ok(DetectorScan {
        name: metadata.get("name").cloned().unwrap_or_else(|| name.to_string()),
        instrument: metadata.get("instrument").cloned(),
        geometry: DetectorGeometry {
            n_tubes,
            n_pixels_per_tube,
            pixel_size,
        },
        n_scan_points,
        scan_step,
        angles,
        counts,
        variances,
        monitor: monitor.into_iter().map(|m| m.unwrap_or(1.0)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# instrument: D2B
# pixel_size: 0.5
# scan_step: 0.1
tube,pixel,scan_point,two_theta,counts,variance,monitor
0,0,0,10.0,100,90,1000
0,0,1,10.1,110,100,1010
0,1,0,10.5,200,180,1000
0,1,1,10.6,210,190,1010
";

    #[test]
    fn test_parse_full_format() {
        let scan = parse_scan_content(SAMPLE, "run1").unwrap();
        assert_eq!(scan.name, "run1");
        assert_eq!(scan.instrument.as_deref(), Some("D2B"));
        assert_eq!(scan.geometry.n_tubes, 1);
        assert_eq!(scan.geometry.n_pixels_per_tube, 2);
        assert_eq!(scan.n_scan_points, 2);
        assert_eq!(scan.geometry.pixel_size, 0.5);
        assert_eq!(scan.scan_step, 0.1);
        assert_eq!(scan.counts, vec![100.0, 110.0, 200.0, 210.0]);
        assert_eq!(scan.variances, vec![90.0, 100.0, 180.0, 190.0]);
        assert_eq!(scan.monitor, vec![1000.0, 1010.0]);
        assert_eq!(scan.bin_offset(), 5);
    }

    #[test]
    fn test_defaults_and_derived_metadata() {
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,0,0,20.0,5
0,0,1,20.25,6
0,0,2,20.5,7
1,0,0,21.0,8
1,0,1,21.25,9
1,0,2,21.5,10
";
        let scan = parse_scan_content(content, "bare").unwrap();
        assert_eq!(scan.instrument, None);
        assert_eq!(scan.variances, scan.counts);
        assert_eq!(scan.monitor, vec![1.0; 3]);
        assert!((scan.scan_step - 0.25).abs() < 1e-12);
        // 每管只有一个像素时取相邻管的角距
        assert!((scan.geometry.pixel_size - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_in_any_order() {
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,1,1,1.5,4
0,0,0,0.0,1
0,1,0,1.0,3
0,0,1,0.5,2
";
        let scan = parse_scan_content(content, "shuffled").unwrap();
        assert_eq!(scan.counts, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_missing_cell_rejected() {
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,0,0,0.0,1
0,1,1,1.5,4
";
        let err = parse_scan_content(content, "holes").unwrap_err();
        assert!(matches!(err, DetcalError::ParseError { .. }));
    }

    #[test]
    fn test_duplicate_cell_rejected() {
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,0,0,0.0,1
0,0,0,0.0,2
";
        assert!(parse_scan_content(content, "dup").is_err());

        // 行数等于单元数但有一个单元重复
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,0,0,0.0,1
0,0,0,0.0,2
0,0,2,1.0,4
";
        let err = parse_scan_content(content, "dup").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_huge_indices_rejected() {
        let content = "\
tube,pixel,scan_point,two_theta,counts
5000000000,5000000000,5000000000,1.0,1.0
";
        let err = parse_scan_content(content, "overflow").unwrap_err();
        assert!(matches!(err, DetcalError::ParseError { .. }));

        // 不溢出但远超行数的网格
        let content = "\
tube,pixel,scan_point,two_theta,counts
0,0,0,1.0,1.0
999,999,999,2.0,1.0
";
        let err = parse_scan_content(content, "sparse").unwrap_err();
        assert!(matches!(err, DetcalError::ParseError { .. }));
    }

    #[test]
    fn test_bad_metadata_value() {
        let content = "# scan_step: fast\ntube,pixel,scan_point,two_theta,counts\n0,0,0,0.0,1\n";
        let err = parse_scan_content(content, "meta").unwrap_err();
        assert!(err.to_string().contains("scan_step"));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join("detcal_scan_csv_test.csv");
        fs::write(&path, SAMPLE).unwrap();
        let scan = parse_scan_file(&path).unwrap();
        assert_eq!(scan.name, "detcal_scan_csv_test");
        fs::remove_file(&path).ok();
    }
}
