//! MapInfo 交换格式（MIF/MID）
//!
//! 每个地块写成一个 Region 对象，包含地块的全部环；属性写入 MID。
//! 两个文件均为 windows-1251 编码。

use crate::export::{ExportBatch, ExportGeometry, ExportRecord, ParcelSummary};
use encoding_rs::WINDOWS_1251;
use kcad_core::math::Point2;
use tracing::warn;

/// MIF 与 MID 文件内容
#[derive(Debug, Clone, PartialEq)]
pub struct TabFiles {
    pub mif: Vec<u8>,
    pub mid: Vec<u8>,
}

/// 属性列
const COLUMNS: [(&str, &str); 5] = [
    ("cad_number", "Char(40)"),
    ("category", "Char(254)"),
    ("area_declared", "Float"),
    ("area_computed", "Float"),
    ("layer", "Char(64)"),
];

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn encode(text: &str, file: &str) -> Vec<u8> {
    let (bytes, _, unmappable) = WINDOWS_1251.encode(text);
    if unmappable {
        warn!("{}: characters outside windows-1251 written as numeric references", file);
    }
    bytes.into_owned()
}

fn coord_sys(batch: &ExportBatch) -> String {
    if batch.is_geodetic() {
        return "CoordSys Earth Projection 1, 104".to_string();
    }
    let (min, max) = if batch.extent.is_empty() {
        (Point2::new(0.0, 0.0), Point2::new(1.0, 1.0))
    } else {
        let margin = batch.extent.width().max(batch.extent.height()) * 0.1 + 1.0;
        let bounds = batch.extent.inflate(margin);
        (bounds.min, bounds.max)
    };
    format!(
        "CoordSys NonEarth Units \"m\" Bounds ({}, {}) ({}, {})",
        min.x.floor(),
        min.y.floor(),
        max.x.ceil(),
        max.y.ceil()
    )
}

fn write_region(mif: &mut String, rings: &[&Vec<Point2>], record: &ExportRecord) {
    mif.push_str(&format!("Region {}\n", rings.len()));
    for ring in rings {
        mif.push_str(&format!("  {}\n", ring.len() + 1));
        for p in ring.iter().chain(ring.first()) {
            mif.push_str(&format!("{} {}\n", p.x, p.y));
        }
    }
    let style = &record.style;
    mif.push_str(&format!(
        "    Pen ({},{},{})\n",
        style.line_weight.to_pixels(),
        style.line_type.mapinfo_pattern(),
        style.color.to_hex()
    ));
    mif.push_str(&format!(
        "    Brush ({},{},{})\n",
        style.fill.mapinfo_brush(),
        style.effective_fill_color().to_hex(),
        0xFF_FF_FF
    ));
    if let Some(label) = &record.label {
        mif.push_str(&format!("    Center {} {}\n", label.position.x, label.position.y));
    }
}

fn mid_row(summary: &ParcelSummary) -> String {
    [
        quoted(summary.id.as_str()),
        quoted(summary.category.as_deref().unwrap_or_default()),
        optional_number(summary.declared_area),
        optional_number(summary.computed_area),
        quoted(&summary.layer),
    ]
    .join(",")
}

/// 把导出记录写成 MIF/MID
pub fn write_tab(batch: &ExportBatch) -> TabFiles {
    let mut mif = String::new();
    mif.push_str("Version 300\n");
    mif.push_str("Charset \"WindowsCyrillic\"\n");
    mif.push_str("Delimiter \",\"\n");
    mif.push_str(&coord_sys(batch));
    mif.push('\n');
    mif.push_str(&format!("Columns {}\n", COLUMNS.len()));
    for (name, kind) in COLUMNS {
        mif.push_str(&format!("  {} {}\n", name, kind));
    }
    mif.push_str("Data\n\n");

    let mut mid = String::new();
    for summary in &batch.parcels {
        let records: Vec<&ExportRecord> = batch.records_for(&summary.id).collect();
        let rings: Vec<&Vec<Point2>> = records
            .iter()
            .filter_map(|r| match &r.geometry {
                ExportGeometry::Polyline(points) => Some(points),
                ExportGeometry::Hatch { .. } => None,
            })
            .collect();
        let Some(first) = records.first() else {
            continue;
        };
        let styled = records.iter().find(|r| r.label.is_some()).unwrap_or(first);
        write_region(&mut mif, &rings, styled);
        mid.push_str(&mid_row(summary));
        mid.push('\n');
    }

    TabFiles {
        mif: encode(&mif, "MIF"),
        mid: encode(&mid, "MID"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportFormatter, ExportOptions, OutputFormat};
    use kcad_core::crs::CoordinateSystemReference;
    use kcad_core::geometry::{Ring, Vertex};
    use kcad_core::parcel::{attr, CadastralNumber, Contour, ObjectKind, Parcel};

    fn square(id: &str, x: f64, y: f64) -> Parcel {
        let mut p = Parcel::new(CadastralNumber::parse(id).unwrap(), ObjectKind::Land);
        p.contours.push(Contour::new(Ring::new(vec![
            Vertex::new(x, y),
            Vertex::new(x + 10.0, y),
            Vertex::new(x + 10.0, y + 10.0),
            Vertex::new(x, y + 10.0),
            Vertex::new(x, y),
        ])));
        p.attributes.insert(
            attr::CATEGORY.to_string(),
            "Земли особо охраняемых территорий и объектов \"Заповедник\"".to_string(),
        );
        p.declared_area = Some(100.0);
        p.computed_area = Some(100.0);
        p
    }

    #[test]
    fn test_mif_mid_contents() {
        let formatter = ExportFormatter::new(OutputFormat::Tab, ExportOptions::default());
        let a = square("50:21:0010101:7", 2_200_000.0, 460_000.0);
        let b = square("50:21:0010101:8", 2_200_010.0, 460_000.0);
        let files = write_tab(&formatter.build(&[&a, &b]));

        let (mif, _, _) = WINDOWS_1251.decode(&files.mif);
        assert!(mif.starts_with("Version 300\nCharset \"WindowsCyrillic\""));
        assert!(mif.contains("CoordSys NonEarth Units \"m\" Bounds"));
        assert_eq!(mif.matches("Region 1\n").count(), 2);
        assert!(mif.contains("  5\n2200000 460000\n2200010 460000\n"));
        // 特别保护区：0.5 mm 线宽为 2 像素，斜线填充
        assert!(mif.contains("Pen (2,2,"));
        assert!(mif.contains("Brush (6,"));
        assert!(mif.contains("Center "));

        let (mid, _, had_errors) = WINDOWS_1251.decode(&files.mid);
        assert!(!had_errors);
        let rows: Vec<&str> = mid.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "\"50:21:0010101:7\",\"Земли особо охраняемых территорий и объектов \"\"Заповедник\"\"\",100,100,\"КАТ_ООТ\""
        );
    }

    #[test]
    fn test_geodetic_coordsys() {
        let formatter = ExportFormatter::new(OutputFormat::Tab, ExportOptions::default());
        let mut a = square("50:21:0010101:7", 37.5, 55.7);
        a.crs = Some(CoordinateSystemReference::wgs84());
        let files = write_tab(&formatter.build(&[&a]));
        let (mif, _, _) = WINDOWS_1251.decode(&files.mif);
        assert!(mif.contains("CoordSys Earth Projection 1, 104\n"));
    }
}
