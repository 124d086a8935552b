//! 运行配置
//!
//! 所有字段都有默认值，JSON 中可只写需要覆盖的部分。

use crate::error::{PipelineError, Result};
use kcad_core::crs::LocalFrame;
use kcad_core::math::Point2;
use kcad_core::precision::PrecisionConfig;
use kcad_core::topology::TopologyConfig;
use kcad_file::{ExportOptions, OutputFormat, ParseOptions};
use serde::{Deserialize, Serialize};
use tracing::info;
use std::path::{Path, PathBuf};

/// 同名点：工程坐标系中的坐标与目标投影坐标系中的坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub local: [f64; 2],
    pub projected: [f64; 2],
}

/// 用同名点标定工程坐标系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCalibration {
    pub name: String,
    pub control_points: Vec<ControlPoint>,
    /// 允许的最大拟合残差（米）
    #[serde(default)]
    pub max_rmse_m: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 距离容差 ε（米），同时是规整步长
    pub tolerance_m: f64,
    /// 声明面积与计算面积的相对差异阈值
    pub area_discrepancy_threshold: f64,
    pub treat_adjacency_as_blocking: bool,
    /// 出现任何提示性问题即令整次运行失败
    pub treat_warnings_as_blocking: bool,
    /// 相邻检查的搜索距离（米）
    pub adjacency_search_m: f64,
    pub spike_angle_deg: f64,
    pub output_format: OutputFormat,
    /// 源文档编码；None 时自动识别
    pub source_encoding: Option<String>,
    /// 源坐标系；None 时取记录中的 sk_id，再按地籍区查分区表
    pub source_crs: Option<String>,
    /// 目标坐标系；None 时保持源坐标系
    pub target_crs: Option<String>,
    /// 在目标坐标系上建立的工程坐标系
    pub local_frame: Option<LocalFrame>,
    /// 由同名点标定的工程坐标系，与 `local_frame` 互斥
    pub local_calibration: Option<LocalCalibration>,
    /// 每批处理的地块数
    pub batch_size: usize,
    /// 比例尺分母
    pub drawing_scale: f64,
    /// 标注字高（图纸毫米）
    pub label_height_mm: f64,
    /// 写出后用 dxf 库回读校验
    pub verify_dxf: bool,
    /// 替换内置分区表的 JSON 文件
    pub zone_table: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance_m: 0.01,
            area_discrepancy_threshold: 0.05,
            treat_adjacency_as_blocking: false,
            treat_warnings_as_blocking: false,
            adjacency_search_m: 0.1,
            spike_angle_deg: 1.0,
            output_format: OutputFormat::Dxf,
            source_encoding: None,
            source_crs: None,
            target_crs: None,
            local_frame: None,
            local_calibration: None,
            batch_size: 256,
            drawing_scale: 500.0,
            label_height_mm: 2.5,
            verify_dxf: false,
            zone_table: None,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        positive("tolerance_m", self.tolerance_m)?;
        positive("drawing_scale", self.drawing_scale)?;
        positive("label_height_mm", self.label_height_mm)?;
        if !(self.area_discrepancy_threshold > 0.0 && self.area_discrepancy_threshold <= 1.0) {
            return Err(PipelineError::Config(format!(
                "area_discrepancy_threshold must be in (0, 1], got {}",
                self.area_discrepancy_threshold
            )));
        }
        if !(self.adjacency_search_m.is_finite() && self.adjacency_search_m >= self.tolerance_m) {
            return Err(PipelineError::Config(format!(
                "adjacency_search_m ({}) must not be below tolerance_m ({})",
                self.adjacency_search_m, self.tolerance_m
            )));
        }
        if !(self.spike_angle_deg >= 0.0 && self.spike_angle_deg < 180.0) {
            return Err(PipelineError::Config(format!(
                "spike_angle_deg must be in [0, 180), got {}",
                self.spike_angle_deg
            )));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".to_string()));
        }
        if let Some(frame) = &self.local_frame {
            positive("local_frame.scale", frame.scale)?;
        }
        if let Some(calibration) = &self.local_calibration {
            if self.local_frame.is_some() {
                return Err(PipelineError::Config(
                    "local_frame and local_calibration are mutually exclusive".to_string(),
                ));
            }
            if calibration.control_points.len() < 2 {
                return Err(PipelineError::Config(format!(
                    "local_calibration needs at least 2 control points, got {}",
                    calibration.control_points.len()
                )));
            }
            if let Some(max) = calibration.max_rmse_m {
                positive("local_calibration.max_rmse_m", max)?;
            }
        }
        Ok(())
    }

    /// 工程坐标系：直接给出的参数，或由同名点拟合
    pub fn resolve_local_frame(&self) -> Result<Option<LocalFrame>> {
        if let Some(frame) = &self.local_frame {
            return Ok(Some(frame.clone()));
        }
        let Some(calibration) = &self.local_calibration else {
            return Ok(None);
        };
        let pairs: Vec<(Point2, Point2)> = calibration
            .control_points
            .iter()
            .map(|cp| {
                (
                    Point2::new(cp.local[0], cp.local[1]),
                    Point2::new(cp.projected[0], cp.projected[1]),
                )
            })
            .collect();
        let (frame, rmse) = LocalFrame::calibrate(calibration.name.clone(), &pairs)
            .map_err(|e| PipelineError::Config(format!("local_calibration: {}", e)))?;
        if let Some(max) = calibration.max_rmse_m {
            if rmse > max {
                return Err(PipelineError::Config(format!(
                    "local_calibration residual {:.4} m exceeds {} m",
                    rmse, max
                )));
            }
        }
        info!(
            "Calibrated local frame {} from {} control points, RMSE {:.4} m",
            frame.name,
            pairs.len(),
            rmse
        );
        Ok(Some(frame))
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            encoding: self.source_encoding.clone(),
            closure_tolerance: self.tolerance_m,
        }
    }

    pub fn topology_config(&self) -> TopologyConfig {
        TopologyConfig {
            tolerance: self.tolerance_m,
            spike_angle_deg: self.spike_angle_deg,
            adjacency_search: self.adjacency_search_m,
            adjacency_blocking: self.treat_adjacency_as_blocking,
            ..TopologyConfig::default()
        }
    }

    pub fn precision_config(&self) -> PrecisionConfig {
        PrecisionConfig {
            tolerance: self.tolerance_m,
            area_discrepancy_threshold: self.area_discrepancy_threshold,
        }
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            drawing_scale: self.drawing_scale,
            label_height_mm: self.label_height_mm,
            limits: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.tolerance_m, 0.01);
        assert_eq!(config.output_format, OutputFormat::Dxf);
        assert_eq!(config.batch_size, 256);
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_json(
            r#"{"output_format": "tab", "treat_adjacency_as_blocking": true,
                "local_frame": {"name": "Стройплощадка", "origin_x": 1300000, "origin_y": 480000}}"#,
        )
        .unwrap();
        assert_eq!(config.output_format, OutputFormat::Tab);
        assert!(config.topology_config().adjacency_blocking);
        let frame = config.local_frame.unwrap();
        assert_eq!(frame.scale, 1.0);
        assert_eq!(frame.rotation_deg, 0.0);
    }

    #[test]
    fn test_local_calibration() {
        let config = PipelineConfig::from_json(
            r#"{"local_calibration": {"name": "Стройплощадка", "control_points": [
                {"local": [0, 0], "projected": [1300000, 480000]},
                {"local": [0, 100], "projected": [1299900, 480000]},
                {"local": [100, 100], "projected": [1299900, 480100]}
            ]}}"#,
        )
        .unwrap();
        let frame = config.resolve_local_frame().unwrap().unwrap();
        assert_eq!(frame.name, "Стройплощадка");
        assert!((frame.origin_x - 1_300_000.0).abs() < 1e-6);
        assert!((frame.origin_y - 480_000.0).abs() < 1e-6);
        assert!((frame.rotation_deg - 90.0).abs() < 1e-9);
        assert!((frame.scale - 1.0).abs() < 1e-12);

        // 残差超限
        let mut strict = config.clone();
        if let Some(c) = strict.local_calibration.as_mut() {
            c.control_points[2].projected = [1_299_900.0, 480_100.5];
            c.max_rmse_m = Some(0.05);
        }
        assert!(matches!(strict.resolve_local_frame(), Err(PipelineError::Config(_))));

        // 与 local_frame 互斥；同名点不足
        for json in [
            r#"{"local_frame": {"name": "a", "origin_x": 0, "origin_y": 0},
                "local_calibration": {"name": "b", "control_points": [
                    {"local": [0, 0], "projected": [0, 0]}, {"local": [1, 0], "projected": [1, 0]}]}}"#,
            r#"{"local_calibration": {"name": "b", "control_points": [
                    {"local": [0, 0], "projected": [0, 0]}]}}"#,
        ] {
            assert!(matches!(PipelineConfig::from_json(json), Err(PipelineError::Config(_))));
        }
        assert_eq!(PipelineConfig::default().resolve_local_frame().unwrap(), None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for json in [
            r#"{"tolerance_m": 0}"#,
            r#"{"tolerance_m": -0.01}"#,
            r#"{"area_discrepancy_threshold": 1.5}"#,
            r#"{"area_discrepancy_threshold": 0}"#,
            r#"{"batch_size": 0}"#,
            r#"{"adjacency_search_m": 0.001}"#,
        ] {
            assert!(
                matches!(PipelineConfig::from_json(json), Err(PipelineError::Config(_))),
                "{}",
                json
            );
        }
        assert!(matches!(
            PipelineConfig::from_json(r#"{"output_format": "pdf"}"#),
            Err(PipelineError::Json(_))
        ));
    }
}
