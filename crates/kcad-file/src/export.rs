//! 导出模块
//!
//! 把校验、规整后的地块转换为与输出格式无关的导出记录（[`ExportRecord`]），
//! 再交给 DXF（[`crate::dxf_io`]）或 MIF/MID（[`crate::tab`]）写出。
//!
//! 每个环生成一条边界多段线记录，每个外环另生成一条带洞的填充记录。
//! 外环统一为逆时针，洞为顺时针。

use crate::error::Result;
use crate::{dxf_io, tab};
use kcad_core::crs::CoordinateSystemReference;
use kcad_core::geometry::{interior_point, polygon_contains, Ring, Winding};
use kcad_core::issue::{IssueKind, IssueLocation, ValidationIssue};
use kcad_core::layer::{LayerStyle, StyleTable, LABELS_LAYER};
use kcad_core::math::{BoundingBox2, Point2};
use kcad_core::parcel::{attr, CadastralNumber, Parcel, RingId};
use kcad_core::precision::METRES_PER_DEGREE;
use kcad_core::properties::{paper_to_model, standard_text_height};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Dxf,
    /// MapInfo 交换格式（MIF/MID）
    Tab,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Dxf => "dxf",
            OutputFormat::Tab => "tab",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "dxf" => Some(OutputFormat::Dxf),
            "tab" | "mif" | "mapinfo" => Some(OutputFormat::Tab),
            _ => None,
        }
    }
}

/// 格式的硬性限制
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatLimits {
    /// 一个地块最多的环数
    pub max_rings: usize,
    /// 一个环最多的顶点数
    pub max_vertices: usize,
}

impl FormatLimits {
    pub fn for_format(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Dxf => Self {
                max_rings: i32::MAX as usize,
                max_vertices: i32::MAX as usize,
            },
            // MapInfo 区域对象
            OutputFormat::Tab => Self {
                max_rings: 32_000,
                max_vertices: 1_048_572,
            },
        }
    }
}

/// 导出几何
#[derive(Debug, Clone, PartialEq)]
pub enum ExportGeometry {
    /// 闭合边界（循环序列，不含重复闭合点）
    Polyline(Vec<Point2>),
    /// 外环填充，洞作为孤岛
    Hatch { outer: Vec<Point2>, holes: Vec<Vec<Point2>> },
}

/// 文字标注
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub text: String,
    pub position: Point2,
    /// 模型单位的字高
    pub height: f64,
    pub layer: &'static str,
}

/// 一条导出记录，对应地块的一个环
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub parcel_id: CadastralNumber,
    pub ring: RingId,
    pub layer: String,
    pub style: LayerStyle,
    pub geometry: ExportGeometry,
    pub label: Option<Label>,
}

/// 地块级属性（MID 表行）
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelSummary {
    pub id: CadastralNumber,
    pub layer: String,
    pub category: Option<String>,
    pub declared_area: Option<f64>,
    pub computed_area: Option<f64>,
}

/// 一次导出的全部记录
#[derive(Debug, Clone, Default)]
pub struct ExportBatch {
    pub records: Vec<ExportRecord>,
    /// 已导出地块，按输入顺序
    pub parcels: Vec<ParcelSummary>,
    /// 超出格式限制而跳过的地块
    pub skipped: Vec<ValidationIssue>,
    pub extent: BoundingBox2,
    /// 坐标所在的坐标系
    pub crs: Option<CoordinateSystemReference>,
}

impl ExportBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 某地块的记录
    pub fn records_for<'a>(
        &'a self,
        id: &'a CadastralNumber,
    ) -> impl Iterator<Item = &'a ExportRecord> + 'a {
        self.records.iter().filter(move |r| &r.parcel_id == id)
    }

    pub fn is_geodetic(&self) -> bool {
        self.crs.as_ref().is_some_and(CoordinateSystemReference::is_geodetic)
    }

    /// 追加另一批次（分批格式化后合并）
    pub fn merge(&mut self, other: ExportBatch) {
        self.records.extend(other.records);
        self.parcels.extend(other.parcels);
        self.skipped.extend(other.skipped);
        self.extent = self.extent.union(&other.extent);
        if self.crs.is_none() {
            self.crs = other.crs;
        }
    }
}

/// 导出选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// 比例尺分母（1:500）
    pub drawing_scale: f64,
    /// 标注字高（图纸毫米），取不小于该值的标准字高
    pub label_height_mm: f64,
    /// 覆盖格式默认限制
    pub limits: Option<FormatLimits>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            drawing_scale: 500.0,
            label_height_mm: 2.5,
            limits: None,
        }
    }
}

/// 写出的文件
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    /// 文件名（不含目录）
    pub name: String,
    pub bytes: Vec<u8>,
}

/// 导出格式化器
#[derive(Debug, Clone)]
pub struct ExportFormatter {
    format: OutputFormat,
    styles: StyleTable,
    options: ExportOptions,
    limits: FormatLimits,
}

impl ExportFormatter {
    pub fn new(format: OutputFormat, options: ExportOptions) -> Self {
        let limits = options
            .limits
            .unwrap_or_else(|| FormatLimits::for_format(format));
        Self {
            format,
            styles: StyleTable::standard(),
            options,
            limits,
        }
    }

    pub fn with_styles(mut self, styles: StyleTable) -> Self {
        self.styles = styles;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn styles(&self) -> &StyleTable {
        &self.styles
    }

    pub fn limits(&self) -> FormatLimits {
        self.limits
    }

    /// 格式化一批地块，记录顺序与地块顺序一致
    pub fn build(&self, parcels: &[&Parcel]) -> ExportBatch {
        let results: Vec<std::result::Result<(Vec<ExportRecord>, ParcelSummary), ValidationIssue>> =
            parcels.par_iter().map(|p| self.format_parcel(p)).collect();

        let mut batch = ExportBatch {
            crs: parcels.iter().find_map(|p| p.crs.clone()),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok((records, summary)) => {
                    batch.records.extend(records);
                    batch.parcels.push(summary);
                }
                Err(issue) => {
                    warn!("Skipped {}: {}", issue.parcel_id, issue.message);
                    batch.skipped.push(issue);
                }
            }
        }
        batch.extent = batch
            .records
            .iter()
            .filter_map(|r| match &r.geometry {
                ExportGeometry::Polyline(points) => {
                    Some(BoundingBox2::from_points(points.iter().copied()))
                }
                ExportGeometry::Hatch { .. } => None,
            })
            .fold(BoundingBox2::empty(), |acc, b| acc.union(&b));
        debug!(
            "Export batch: {} records, {} parcels, {} skipped",
            batch.records.len(),
            batch.parcels.len(),
            batch.skipped.len()
        );
        batch
    }

    /// 检查格式限制
    pub fn check_limits(&self, parcel: &Parcel) -> std::result::Result<(), ValidationIssue> {
        let unsupported = |message: String| {
            ValidationIssue::new(
                parcel.id.clone(),
                IssueKind::UnsupportedGeometry,
                IssueLocation::Parcel,
                message,
            )
        };
        let rings = parcel.ring_count();
        if rings > self.limits.max_rings {
            return Err(unsupported(format!(
                "{} rings exceed the {} limit of {}",
                rings,
                self.format.name(),
                self.limits.max_rings
            )));
        }
        if let Some((id, ring)) = parcel
            .rings()
            .find(|(_, r)| r.cycle().len() > self.limits.max_vertices)
        {
            return Err(unsupported(format!(
                "{} has {} vertices, the {} limit is {}",
                id,
                ring.cycle().len(),
                self.format.name(),
                self.limits.max_vertices
            )));
        }
        Ok(())
    }

    /// 单个地块的导出记录
    pub fn format_parcel(
        &self,
        parcel: &Parcel,
    ) -> std::result::Result<(Vec<ExportRecord>, ParcelSummary), ValidationIssue> {
        self.check_limits(parcel)?;

        let style = self.styles.style_for(parcel);
        let mut label = self.label_for(parcel);
        let label_contour = parcel.largest_contour();

        let oriented = |ring: &Ring, winding: Winding| -> Vec<Point2> {
            ring.with_winding(winding).cycle().iter().map(|v| v.point()).collect()
        };

        let mut records = Vec::with_capacity(parcel.ring_count() + parcel.contours.len());
        for (ci, contour) in parcel.contours.iter().enumerate() {
            let outer = oriented(&contour.outer, Winding::CounterClockwise);
            let holes: Vec<Vec<Point2>> = contour
                .holes
                .iter()
                .map(|h| oriented(h, Winding::Clockwise))
                .collect();

            let record = |ring: RingId, geometry: ExportGeometry, label: Option<Label>| ExportRecord {
                parcel_id: parcel.id.clone(),
                ring,
                layer: style.name.clone(),
                style: style.clone(),
                geometry,
                label,
            };

            let outer_label = if label_contour == Some(ci) { label.take() } else { None };
            records.push(record(
                RingId::outer(ci),
                ExportGeometry::Polyline(outer.clone()),
                outer_label,
            ));
            for (hi, hole) in holes.iter().enumerate() {
                records.push(record(
                    RingId::hole(ci, hi),
                    ExportGeometry::Polyline(hole.clone()),
                    None,
                ));
            }
            if !style.fill.is_none() {
                records.push(record(
                    RingId::outer(ci),
                    ExportGeometry::Hatch { outer, holes },
                    None,
                ));
            }
        }

        let summary = ParcelSummary {
            id: parcel.id.clone(),
            layer: style.name.clone(),
            category: parcel.attribute(attr::CATEGORY).map(str::to_string),
            declared_area: parcel.declared_area,
            computed_area: parcel.computed_area,
        };
        Ok((records, summary))
    }

    /// 标注：地籍编号和面积，放在最大轮廓的质心；质心落在外环外或洞内时改用内部点
    pub fn label_for(&self, parcel: &Parcel) -> Option<Label> {
        let contour = &parcel.contours[parcel.largest_contour()?];
        let position = contour
            .outer
            .centroid()
            .filter(|c| polygon_contains(&contour.outer, &contour.holes, c))
            .or_else(|| interior_point(&contour.outer, &contour.holes))?;

        let geodetic = parcel.crs.as_ref().is_some_and(|c| c.is_geodetic());
        let mut height = paper_to_model(
            standard_text_height(self.options.label_height_mm),
            self.options.drawing_scale,
        );
        if geodetic {
            height /= METRES_PER_DEGREE;
        }

        let area = parcel.computed_area.unwrap_or_else(|| parcel.geometric_area());
        let text = if geodetic && parcel.computed_area.is_none() {
            parcel.id.to_string()
        } else {
            format!("{} S={:.2} м²", parcel.id, area)
        };
        Some(Label {
            text,
            position,
            height,
            layer: LABELS_LAYER,
        })
    }

    /// 写出文件
    pub fn render(&self, batch: &ExportBatch, stem: &str) -> Result<Vec<OutputFile>> {
        match self.format {
            OutputFormat::Dxf => Ok(vec![OutputFile {
                name: format!("{}.dxf", stem),
                bytes: dxf_io::write_dxf(batch, &self.styles, self.options.drawing_scale)
                    .into_bytes(),
            }]),
            OutputFormat::Tab => {
                let files = tab::write_tab(batch);
                Ok(vec![
                    OutputFile {
                        name: format!("{}.mif", stem),
                        bytes: files.mif,
                    },
                    OutputFile {
                        name: format!("{}.mid", stem),
                        bytes: files.mid,
                    },
                ])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcad_core::geometry::Vertex;
    use kcad_core::layer::BUILDINGS_LAYER;
    use kcad_core::parcel::{Contour, ObjectKind};
    use kcad_core::properties::FillPattern;

    fn ring(points: &[(f64, f64)]) -> Ring {
        let mut vertices: Vec<Vertex> = points.iter().map(|(x, y)| Vertex::new(*x, *y)).collect();
        vertices.push(vertices[0]);
        Ring::new(vertices)
    }

    fn parcel_with_hole() -> Parcel {
        let mut p = Parcel::new(
            CadastralNumber::parse("23:43:0302001:15").unwrap(),
            ObjectKind::Land,
        );
        // 外环顺时针给出，洞逆时针给出，导出时应翻转
        p.contours.push(Contour::with_holes(
            ring(&[(0.0, 0.0), (0.0, 100.0), (100.0, 100.0), (100.0, 0.0)]),
            vec![ring(&[(40.0, 40.0), (60.0, 40.0), (60.0, 60.0), (40.0, 60.0)])],
        ));
        p.computed_area = Some(9_600.0);
        p
    }

    fn signed_area(points: &[Point2]) -> f64 {
        Ring::from_points(points.iter().copied()).signed_area()
    }

    #[test]
    fn test_records_and_winding() {
        let formatter = ExportFormatter::new(OutputFormat::Dxf, ExportOptions::default());
        let p = parcel_with_hole();
        let (records, summary) = formatter.format_parcel(&p).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(summary.layer, "КАТ_Не_установлена");

        match &records[0].geometry {
            ExportGeometry::Polyline(points) => {
                assert_eq!(points.len(), 4);
                assert!(signed_area(points) > 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &records[2].geometry {
            ExportGeometry::Hatch { outer, holes } => {
                assert!(signed_area(outer) > 0.0);
                assert_eq!(holes.len(), 1);
                assert!(signed_area(&holes[0]) < 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(records[2].style.fill, FillPattern::Ansi31 { spacing_mm: 3.0 });
    }

    #[test]
    fn test_label_avoids_hole() {
        let formatter = ExportFormatter::new(OutputFormat::Dxf, ExportOptions::default());
        let p = parcel_with_hole();
        let label = formatter.label_for(&p).unwrap();
        // 质心 (50,50) 在洞内
        assert!(polygon_contains(
            &p.contours[0].outer,
            &p.contours[0].holes,
            &label.position
        ));
        assert_eq!(label.text, "23:43:0302001:15 S=9600.00 м²");
        assert!((label.height - 1.25).abs() < 1e-12);
        assert_eq!(label.layer, LABELS_LAYER);
    }

    #[test]
    fn test_label_on_concave_parcel() {
        let formatter = ExportFormatter::new(OutputFormat::Dxf, ExportOptions::default());
        let mut p = Parcel::new(
            CadastralNumber::parse("23:43:0302001:20").unwrap(),
            ObjectKind::Building,
        );
        // U 形，质心落在缺口里
        p.contours.push(Contour::new(ring(&[
            (0.0, 0.0),
            (30.0, 0.0),
            (30.0, 30.0),
            (20.0, 30.0),
            (20.0, 5.0),
            (10.0, 5.0),
            (10.0, 30.0),
            (0.0, 30.0),
        ])));
        let label = formatter.label_for(&p).unwrap();
        assert!(p.contours[0].outer.contains_point(&label.position));

        let (records, summary) = formatter.format_parcel(&p).unwrap();
        assert_eq!(summary.layer, BUILDINGS_LAYER);
        assert!(records[0].label.is_some());
    }

    #[test]
    fn test_limits_reject_parcel() {
        let formatter = ExportFormatter::new(
            OutputFormat::Tab,
            ExportOptions {
                limits: Some(FormatLimits {
                    max_rings: 1,
                    max_vertices: 1_000,
                }),
                ..Default::default()
            },
        );
        let p = parcel_with_hole();
        let issue = formatter.format_parcel(&p).unwrap_err();
        assert_eq!(issue.kind, IssueKind::UnsupportedGeometry);
        assert!(issue.is_blocking());

        let batch = formatter.build(&[&p]);
        assert!(batch.is_empty());
        assert_eq!(batch.skipped.len(), 1);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::parse("MIF"), Some(OutputFormat::Tab));
        assert_eq!(OutputFormat::parse("dxf"), Some(OutputFormat::Dxf));
        assert_eq!(OutputFormat::parse("shp"), None);
        assert_eq!(FormatLimits::for_format(OutputFormat::Tab).max_rings, 32_000);
    }
}
