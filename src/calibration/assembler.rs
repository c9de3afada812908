//! # 结果组装
//!
//! 应用掩码判据 [low, high]：范围外的常数在表中标记为无效而不是删除。
//! 生成最终的常数表，并附带可选的组合响应曲线。
//!
//! ## 依赖关系
//! - 被 `calibration/pipeline.rs` 调用
//! - 使用 `models/constants.rs`

use crate::models::{CalibrationEntry, CalibrationTable, DetectorGeometry, FactorEstimate};

/// 组装常数表
pub fn assemble(
    constants: &[FactorEstimate],
    geometry: &DetectorGeometry,
    mask_criterion: Option<(f64, f64)>,
) -> CalibrationTable {
    let entries = constants
        .iter()
        .enumerate()
        .map(|(index, c)| {
            let (tube, pixel) = geometry.tube_pixel(index);
            let valid = match mask_criterion {
                Some((low, high)) => c.value >= low && c.value <= high,
                None => true,
            };
            CalibrationEntry {
                index,
                tube,
                pixel,
                constant: c.value,
                error: c.error,
                valid,
            }
        })
        .collect();

    CalibrationTable { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DetectorGeometry {
        DetectorGeometry {
            n_tubes: 2,
            n_pixels_per_tube: 2,
            pixel_size: 0.1,
        }
    }

    #[test]
    fn test_mask_criterion_flags_out_of_range() {
        let constants = vec![
            FactorEstimate::new(0.00001, 0.0),
            FactorEstimate::new(1.0, 0.0),
            FactorEstimate::new(1.5, 0.0),
            FactorEstimate::new(1.6, 0.0),
        ];
        let table = assemble(&constants, &geometry(), Some((0.5, 1.5)));

        assert_eq!(table.len(), 4);
        assert!(!table.entries[0].valid);
        assert!(table.entries[1].valid);
        assert!(table.entries[2].valid);
        assert!(!table.entries[3].valid);
        assert_eq!(table.entries[0].constant, 0.00001);
        assert_eq!((table.entries[3].tube, table.entries[3].pixel), (1, 1));
        assert_eq!(table.masked_count(), 2);
    }

    #[test]
    fn test_without_mask_everything_valid() {
        let constants = vec![FactorEstimate::new(50.0, 0.0); 4];
        let table = assemble(&constants, &geometry(), None);
        assert_eq!(table.masked_count(), 0);
    }
}
