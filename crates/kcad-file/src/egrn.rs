//! EGRN 不动产登记簿 XML 解析
//!
//! 支持的文档：
//! - `extract_about_property_*`：单个对象的详细信息摘录
//! - `extract_base_params_*`：对象基本参数摘录（土地、建筑、构筑物、未完工建筑）
//! - `extract_cadastral_plan_territory`：地籍街区平面图
//!
//! 解析分两步：先构建文档树（[`crate::xml`]），再在线程池上并行提取各条记录，
//! 输出顺序与文档顺序一致。单条记录的问题只跳过该记录，不影响整份文档；
//! 只有根元素无法识别（含空文件和非 XML）时才整体失败。
//!
//! EGRN 中 X 为北向、Y 为东向，解析时交换为 `x` = 东、`y` = 北。

use crate::error::{FileError, Result};
use crate::field::FieldValue;
use crate::xml::{parse_document, XmlElement};
use encoding_rs::{Encoding, UTF_8};
use kcad_core::geometry::{PointLocation, Ring, Vertex, TOUCH_TOLERANCE};
use kcad_core::issue::Severity;
use kcad_core::parcel::{attr, CadastralNumber, Contour, ObjectKind, Parcel};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// 解析问题类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseIssueKind {
    /// 解码时出现无法映射的字节
    EncodingReplacement,
    MissingIdentifier,
    MalformedIdentifier,
    DuplicateParcel,
    MissingBoundary,
    /// 坐标无法解析
    MalformedField,
    /// 不构成闭合环的空间元素（线、点）
    SkippedGeometry,
    MalformedArea,
}

impl ParseIssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            ParseIssueKind::EncodingReplacement
            | ParseIssueKind::SkippedGeometry
            | ParseIssueKind::MalformedArea => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }
}

impl fmt::Display for ParseIssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 解析问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    /// 记录在文档中的序号；文档级问题为 None
    pub record_index: Option<usize>,
    pub parcel_id: Option<String>,
    pub kind: ParseIssueKind,
    pub severity: Severity,
    pub message: String,
}

impl ParseIssue {
    pub fn new(
        record_index: Option<usize>,
        parcel_id: Option<&str>,
        kind: ParseIssueKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            record_index,
            parcel_id: parcel_id.map(str::to_string),
            kind,
            severity: kind.severity(),
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.record_index {
            write!(f, "record #{}: ", index + 1)?;
        }
        if let Some(id) = &self.parcel_id {
            write!(f, "{}: ", id)?;
        }
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// 解析结果
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    /// 根元素名
    pub document_kind: String,
    /// 实际使用的编码
    pub encoding: String,
    pub parcels: Vec<Parcel>,
    pub issues: Vec<ParseIssue>,
}

impl ParseOutput {
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(ParseIssue::is_blocking)
    }
}

/// 解析选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// 指定源编码；None 时按 BOM 和 XML 声明判断
    pub encoding: Option<String>,
    /// 首尾点在此距离内即视为闭合环（米）
    pub closure_tolerance: f64,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            encoding: None,
            closure_tolerance: 0.01,
        }
    }
}

/// 按指定编码解析
pub fn parse(bytes: &[u8], encoding: Option<&str>) -> Result<ParseOutput> {
    EgrnParser::new(ParseOptions {
        encoding: encoding.map(str::to_string),
        ..Default::default()
    })
    .parse(bytes)
}

/// 解码字节流，返回文本、使用的编码和是否出现替换字符
pub fn decode(bytes: &[u8], requested: Option<&str>) -> Result<(String, &'static Encoding, bool)> {
    let encoding = match requested.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => Encoding::for_label(label.as_bytes())
            .ok_or_else(|| FileError::Encoding(label.to_string()))?,
        None => Encoding::for_bom(bytes)
            .map(|(encoding, _)| encoding)
            .or_else(|| declared_encoding(bytes))
            .unwrap_or(UTF_8),
    };
    let (text, used, had_errors) = encoding.decode(bytes);
    Ok((text.into_owned(), used, had_errors))
}

/// XML 声明中的 encoding 属性
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
    let head = head.trim_start();
    if !head.starts_with("<?xml") {
        return None;
    }
    let decl = &head[..head.find("?>")?];
    let rest = decl[decl.find("encoding")? + "encoding".len()..].trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &rest[1..];
    let label = &value[..value.find(quote)?];
    // ASCII 兼容流里声明的 UTF-16 实际按 UTF-8 处理
    Encoding::for_label(label.as_bytes()).map(Encoding::output_encoding)
}

fn is_recognized_root(name: &str) -> bool {
    name.starts_with("extract_about_property_")
        || name.starts_with("extract_base_params_")
        || name == "extract_cadastral_plan_territory"
}

/// 记录内不属于地块边界的子树（部分、限制）
const FOREIGN_SUBTREES: [&str; 4] = [
    "object_parts",
    "parts",
    "restrict_records",
    "restrictions_encumbrances",
];

struct RecordRef<'a> {
    index: usize,
    kind: ObjectKind,
    element: &'a XmlElement,
    block: Option<&'a str>,
}

fn collect_records<'a>(node: &'a XmlElement, block: Option<&'a str>, out: &mut Vec<RecordRef<'a>>) {
    for child in &node.children {
        if let Some(kind) = ObjectKind::from_record_tag(&child.name) {
            out.push(RecordRef {
                index: out.len(),
                kind,
                element: child,
                block,
            });
            continue;
        }
        let block = if child.name == "cadastral_block" {
            child.text_at(&["cadastral_number"]).or(block)
        } else {
            block
        };
        collect_records(child, block, out);
    }
}

fn collect_entity_spatials<'a>(node: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    for child in &node.children {
        if FOREIGN_SUBTREES.contains(&child.name.as_str())
            || ObjectKind::from_record_tag(&child.name).is_some()
        {
            continue;
        }
        if child.name == "entity_spatial" {
            out.push(child);
        } else {
            collect_entity_spatials(child, out);
        }
    }
}

/// 子元素文本或同名属性
fn value_of<'a>(node: &'a XmlElement, name: &str) -> Option<&'a str> {
    node.text_at(&[name]).or_else(|| node.attribute(name))
}

/// 坐标点编号
fn point_number(ordinate: &XmlElement) -> Option<&str> {
    value_of(ordinate, "num_geopoint").or_else(|| value_of(ordinate, "ord_nmb"))
}

/// 单个空间元素读出的点
struct PointList {
    vertices: Vec<Vertex>,
    /// 首尾坐标点编号相同
    declared_closed: bool,
}

fn read_ordinates(ordinates: &[&XmlElement]) -> std::result::Result<PointList, String> {
    let mut vertices = Vec::with_capacity(ordinates.len());
    for (i, ordinate) in ordinates.iter().enumerate() {
        let coordinate = |axis: &str| match FieldValue::number(value_of(ordinate, axis)) {
            FieldValue::Present(v) => Ok(v),
            FieldValue::Missing => Err(format!("ordinate {} has no {}", i + 1, axis)),
            FieldValue::Malformed(raw) => Err(format!(
                "ordinate {}: {} = {:?} is not a number",
                i + 1,
                axis,
                raw
            )),
        };
        let north = coordinate("x")?;
        let east = coordinate("y")?;
        let vertex = match FieldValue::number(value_of(ordinate, "z")) {
            FieldValue::Present(z) => Vertex::with_z(east, north, z),
            FieldValue::Missing => Vertex::new(east, north),
            FieldValue::Malformed(raw) => {
                return Err(format!("ordinate {}: z = {:?} is not a number", i + 1, raw))
            }
        };
        vertices.push(vertex);
    }

    let declared_closed = match (ordinates.first(), ordinates.last()) {
        (Some(first), Some(last)) if ordinates.len() > 1 => {
            point_number(first).is_some() && point_number(first) == point_number(last)
        }
        _ => false,
    };
    Ok(PointList {
        vertices,
        declared_closed,
    })
}

/// 扁平坐标流：空白或分号分隔，每 2（或 srsDimension）个数构成一个点
fn read_token_stream(stream: &XmlElement) -> std::result::Result<PointList, String> {
    let dimension = value_of(stream, "srsDimension")
        .or_else(|| value_of(stream, "dimension"))
        .and_then(|d| d.trim().parse::<usize>().ok())
        .filter(|d| *d == 2 || *d == 3)
        .unwrap_or(2);

    let mut values = Vec::new();
    for token in stream
        .text
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|t| !t.is_empty())
    {
        match FieldValue::number(Some(token)) {
            FieldValue::Present(v) => values.push(v),
            _ => return Err(format!("coordinate token {:?} is not a number", token)),
        }
    }
    if values.len() % dimension != 0 {
        return Err(format!(
            "coordinate list has {} values, not a multiple of {}",
            values.len(),
            dimension
        ));
    }
    let vertices = values
        .chunks_exact(dimension)
        .map(|c| match c {
            [north, east, z] => Vertex::with_z(*east, *north, *z),
            [north, east] => Vertex::new(*east, *north),
            _ => Vertex::new(f64::NAN, f64::NAN),
        })
        .collect();
    Ok(PointList {
        vertices,
        declared_closed: false,
    })
}

/// 环的所有顶点都不在另一个环外
fn ring_within(inner: &Ring, outer: &Ring) -> bool {
    !inner.is_empty()
        && inner
            .points()
            .all(|p| outer.locate_point(&p, TOUCH_TOLERANCE) != PointLocation::Outside)
}

/// 组装轮廓：按面积从大到小，落在某外环内（且不在其洞内）的环作为洞，否则开始新轮廓
pub fn assemble_contours(mut rings: Vec<Ring>) -> Vec<Contour> {
    rings.sort_by(|a, b| b.area().total_cmp(&a.area()));
    let mut contours: Vec<Contour> = Vec::new();
    for ring in rings {
        let host = contours.iter().position(|c| {
            ring_within(&ring, &c.outer) && !c.holes.iter().any(|h| ring_within(&ring, h))
        });
        match host {
            Some(i) => contours[i].holes.push(ring),
            None => contours.push(Contour::new(ring)),
        }
    }
    contours
}

/// 记录的几何
struct Geometry {
    contours: Vec<Contour>,
    /// 被跳过的空间元素说明
    skipped: Vec<String>,
}

/// 单条记录的提取结果
struct Extracted {
    parcel: Option<Parcel>,
    issues: Vec<ParseIssue>,
}

/// EGRN 解析器
#[derive(Debug, Clone, Default)]
pub struct EgrnParser {
    options: ParseOptions,
}

impl EgrnParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// 解析整份文档
    pub fn parse(&self, bytes: &[u8]) -> Result<ParseOutput> {
        let (text, encoding, had_errors) = decode(bytes, self.options.encoding.as_deref())?;
        if text.trim().is_empty() {
            return Err(FileError::Schema("empty document".to_string()));
        }
        let root = parse_document(&text).map_err(|e| match e {
            FileError::Schema(message) => FileError::Schema(message),
            other => FileError::Schema(format!("not a well-formed XML document: {}", other)),
        })?;
        if !is_recognized_root(&root.name) {
            return Err(FileError::Schema(format!(
                "unrecognized root element <{}>",
                root.name
            )));
        }

        let mut output = ParseOutput {
            document_kind: root.name.clone(),
            encoding: encoding.name().to_string(),
            ..Default::default()
        };
        if had_errors {
            output.issues.push(ParseIssue::new(
                None,
                None,
                ParseIssueKind::EncodingReplacement,
                format!(
                    "input contains bytes that are not valid {}; replaced with U+FFFD",
                    encoding.name()
                ),
            ));
        }

        let mut records = Vec::new();
        collect_records(&root, None, &mut records);
        debug!("{}: {} records, encoding {}", root.name, records.len(), encoding.name());

        let extracted: Vec<Extracted> = records
            .par_iter()
            .map(|record| self.extract_record(record))
            .collect();

        let mut seen: HashSet<CadastralNumber> = HashSet::new();
        for (record, result) in records.iter().zip(extracted) {
            output.issues.extend(result.issues);
            let Some(parcel) = result.parcel else {
                continue;
            };
            if !seen.insert(parcel.id.clone()) {
                output.issues.push(ParseIssue::new(
                    Some(record.index),
                    Some(parcel.id.as_str()),
                    ParseIssueKind::DuplicateParcel,
                    "cadastral number already seen earlier in the document; record skipped",
                ));
                continue;
            }
            output.parcels.push(parcel);
        }

        for issue in output.issues.iter().filter(|i| i.is_blocking()) {
            warn!("Skipped {}", issue);
        }
        info!(
            "Parsed {}: {} parcels, {} issues",
            output.document_kind,
            output.parcels.len(),
            output.issues.len()
        );
        Ok(output)
    }

    fn extract_record(&self, record: &RecordRef<'_>) -> Extracted {
        let index = Some(record.index);
        let tag = record.kind.record_tag();
        let skip = |issue: ParseIssue| Extracted {
            parcel: None,
            issues: vec![issue],
        };

        let Some(raw_id) = record
            .element
            .text_at(&["object", "common_data", "cad_number"])
        else {
            return skip(ParseIssue::new(
                index,
                None,
                ParseIssueKind::MissingIdentifier,
                format!("<{}> has no object/common_data/cad_number", tag),
            ));
        };
        let id = match CadastralNumber::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                return skip(ParseIssue::new(
                    index,
                    Some(raw_id),
                    ParseIssueKind::MalformedIdentifier,
                    e.to_string(),
                ))
            }
        };

        let mut issues = Vec::new();
        let geometry = match self.extract_geometry(record.element) {
            Ok(geometry) => geometry,
            Err(message) => {
                return skip(ParseIssue::new(
                    index,
                    Some(id.as_str()),
                    ParseIssueKind::MalformedField,
                    message,
                ))
            }
        };
        for message in geometry.skipped {
            issues.push(ParseIssue::new(
                index,
                Some(id.as_str()),
                ParseIssueKind::SkippedGeometry,
                message,
            ));
        }
        if geometry.contours.is_empty() {
            issues.push(ParseIssue::new(
                index,
                Some(id.as_str()),
                ParseIssueKind::MissingBoundary,
                "record has no closed boundary ring",
            ));
            return Extracted {
                parcel: None,
                issues,
            };
        }

        let mut parcel = Parcel::new(id, record.kind);
        parcel.contours = geometry.contours;
        parcel.source_crs_name = record
            .element
            .find("sk_id")
            .and_then(XmlElement::non_empty_text)
            .map(str::to_string);
        self.extract_attributes(record, &mut parcel, &mut issues);

        debug!(
            "{} {}: {} rings, {} vertices",
            tag,
            parcel.id,
            parcel.ring_count(),
            parcel.vertex_count()
        );
        Extracted {
            parcel: Some(parcel),
            issues,
        }
    }

    fn extract_geometry(&self, record: &XmlElement) -> std::result::Result<Geometry, String> {
        let mut spatials = Vec::new();
        collect_entity_spatials(record, &mut spatials);

        let mut contours = Vec::new();
        let mut skipped = Vec::new();
        for (s, spatial) in spatials.iter().enumerate() {
            let mut rings = Vec::new();
            for (e, element) in spatial
                .descendants()
                .filter(|d| d.name == "spatial_element")
                .enumerate()
            {
                let label = format!("entity_spatial {} element {}", s + 1, e + 1);
                let ordinates: Vec<&XmlElement> =
                    element.descendants().filter(|d| d.name == "ordinate").collect();
                let points = if !ordinates.is_empty() {
                    read_ordinates(&ordinates)
                } else if let Some(stream) = element
                    .descendants()
                    .find(|d| matches!(d.name.as_str(), "coordinates" | "pos_list" | "posList"))
                {
                    read_token_stream(stream)
                } else {
                    skipped.push(format!("{} has no coordinates", label));
                    continue;
                }
                .map_err(|message| format!("{}: {}", label, message))?;

                let count = points.vertices.len();
                if count < 4 {
                    skipped.push(format!("{} has {} points, not a ring", label, count));
                    continue;
                }
                let ring = Ring::new(points.vertices);
                if !points.declared_closed && !ring.is_closed(self.options.closure_tolerance) {
                    skipped.push(format!(
                        "{} is an open line, ends {:.3} m apart",
                        label,
                        ring.closure_gap()
                    ));
                    continue;
                }
                rings.push(ring);
            }
            contours.extend(assemble_contours(rings));
        }
        Ok(Geometry { contours, skipped })
    }

    fn extract_attributes(
        &self,
        record: &RecordRef<'_>,
        parcel: &mut Parcel,
        issues: &mut Vec<ParseIssue>,
    ) {
        let el = record.element;
        let text_fields: [(&str, Option<&str>); 7] = [
            (attr::CATEGORY, el.text_at(&["params", "category", "type", "value"])),
            (attr::CATEGORY_CODE, el.text_at(&["params", "category", "type", "code"])),
            (
                attr::PERMITTED_USE,
                el.text_at(&[
                    "params",
                    "permitted_use",
                    "permitted_use_established",
                    "by_document",
                ]),
            ),
            (
                attr::PURPOSE,
                el.text_at(&["params", "purpose", "value"])
                    .or_else(|| el.text_at(&["params", "purpose"])),
            ),
            (
                attr::ADDRESS,
                el.find("readable_address").and_then(XmlElement::non_empty_text),
            ),
            (
                attr::REGISTRATION_DATE,
                el.text_at(&["record_info", "registration_date"]),
            ),
            (attr::CADASTRAL_COST, el.text_at(&["cost", "value"])),
        ];
        for (key, raw) in text_fields {
            if let FieldValue::Present(value) = FieldValue::text(raw) {
                parcel.attributes.insert(key.to_string(), value);
            }
        }
        let block = record.block.map(str::to_string).unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                parcel.id.region(),
                parcel.id.district(),
                parcel.id.quarter()
            )
        });
        parcel
            .attributes
            .insert(attr::CADASTRAL_BLOCK.to_string(), block);

        let area = el.path(&["params", "area"]);
        let raw_area = area.and_then(|a| a.text_at(&["value"]).or_else(|| a.non_empty_text()));
        match FieldValue::number(raw_area) {
            FieldValue::Present(v) if v >= 0.0 => parcel.declared_area = Some(v),
            FieldValue::Present(v) => issues.push(ParseIssue::new(
                Some(record.index),
                Some(parcel.id.as_str()),
                ParseIssueKind::MalformedArea,
                format!("declared area {} is negative; treated as missing", v),
            )),
            FieldValue::Malformed(raw) => issues.push(ParseIssue::new(
                Some(record.index),
                Some(parcel.id.as_str()),
                ParseIssueKind::MalformedArea,
                format!("declared area {:?} is not a number; treated as missing", raw),
            )),
            FieldValue::Missing => {}
        }

        let raw_inaccuracy = area.and_then(|a| a.text_at(&["inaccuracy"]));
        match FieldValue::number(raw_inaccuracy) {
            FieldValue::Present(v) => parcel.declared_area_inaccuracy = Some(v.abs()),
            FieldValue::Malformed(raw) => issues.push(ParseIssue::new(
                Some(record.index),
                Some(parcel.id.as_str()),
                ParseIssueKind::MalformedArea,
                format!("area inaccuracy {:?} is not a number; ignored", raw),
            )),
            FieldValue::Missing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcad_core::math::approx_eq;

    const SQUARE: &str = r#"
        <ordinate><x>480000.00</x><y>1300000.00</y><ord_nmb>1</ord_nmb></ordinate>
        <ordinate><x>480000.00</x><y>1300010.00</y><ord_nmb>2</ord_nmb></ordinate>
        <ordinate><x>480010.00</x><y>1300010.00</y><ord_nmb>3</ord_nmb></ordinate>
        <ordinate><x>480010.00</x><y>1300000.00</y><ord_nmb>4</ord_nmb></ordinate>
        <ordinate><x>480000.00</x><y>1300000.00</y><ord_nmb>1</ord_nmb></ordinate>"#;

    fn land_doc(records: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <extract_base_params_land>{}</extract_base_params_land>"#,
            records
        )
    }

    fn land_record(cad: &str, ordinates: &str) -> String {
        format!(
            r#"<land_record>
                 <object><common_data><cad_number>{}</cad_number></common_data></object>
                 <params>
                   <category><type><code>003002000000</code><value>Земли населённых пунктов</value></type></category>
                   <area><value>100</value><inaccuracy>3,5</inaccuracy></area>
                 </params>
                 <contours_location><contours><contour><entity_spatial>
                   <sk_id>МСК-23, зона 1</sk_id>
                   <spatials_elements><spatial_element><ordinates>{}</ordinates></spatial_element></spatials_elements>
                 </entity_spatial></contour></contours></contours_location>
               </land_record>"#,
            cad, ordinates
        )
    }

    #[test]
    fn test_parse_land_record() {
        let doc = land_doc(&land_record("23:43:0302001:15", SQUARE));
        let out = parse(doc.as_bytes(), None).unwrap();
        assert_eq!(out.document_kind, "extract_base_params_land");
        assert!(out.issues.is_empty(), "{:?}", out.issues);
        assert_eq!(out.parcels.len(), 1);

        let p = &out.parcels[0];
        assert_eq!(p.id.as_str(), "23:43:0302001:15");
        assert_eq!(p.kind, ObjectKind::Land);
        assert_eq!(p.declared_area, Some(100.0));
        assert_eq!(p.declared_area_inaccuracy, Some(3.5));
        assert_eq!(p.attribute(attr::CATEGORY_CODE), Some("003002000000"));
        assert_eq!(p.attribute(attr::CADASTRAL_BLOCK), Some("23:43:0302001"));
        assert_eq!(p.source_crs_name.as_deref(), Some("МСК-23, зона 1"));

        // 轴交换：第二个点 X=480000（北）、Y=1300010（东）
        let v = p.contours[0].outer.vertices[1];
        assert_eq!((v.x, v.y), (1_300_010.0, 480_000.0));
        assert!(approx_eq(p.geometric_area(), 100.0));
    }

    #[test]
    fn test_unrecognized_roots_fail() {
        for doc in ["", "   ", "not xml", "<html><body/></html>", "<extract_base_params_land>"] {
            assert!(
                matches!(parse(doc.as_bytes(), None), Err(FileError::Schema(_))),
                "{:?}",
                doc
            );
        }
    }

    #[test]
    fn test_missing_and_malformed_identifiers() {
        let records = [
            land_record("23:43:0302001:15", SQUARE),
            land_record("23:43:0302001", SQUARE),
            land_record("23:43:0302001:15", SQUARE),
            r#"<land_record><params/></land_record>"#.to_string(),
        ]
        .concat();
        let out = parse(land_doc(&records).as_bytes(), None).unwrap();
        assert_eq!(out.parcels.len(), 1);
        let kinds: Vec<ParseIssueKind> = out.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParseIssueKind::MalformedIdentifier,
                ParseIssueKind::DuplicateParcel,
                ParseIssueKind::MissingIdentifier
            ]
        );
        assert_eq!(out.issues[1].record_index, Some(2));
        assert!(out.has_blocking_issues());
    }

    #[test]
    fn test_malformed_coordinate_skips_record() {
        let bad = SQUARE.replacen("480010.00", "48O010.00", 1);
        let out = parse(land_doc(&land_record("23:43:0302001:16", &bad)).as_bytes(), None).unwrap();
        assert!(out.parcels.is_empty());
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].kind, ParseIssueKind::MalformedField);
        assert!(out.issues[0].message.contains("ordinate 3"));
    }

    #[test]
    fn test_open_line_is_skipped() {
        let line = r#"
            <ordinate><x>480000</x><y>1300000</y><ord_nmb>1</ord_nmb></ordinate>
            <ordinate><x>480000</x><y>1300010</y><ord_nmb>2</ord_nmb></ordinate>
            <ordinate><x>480010</x><y>1300010</y><ord_nmb>3</ord_nmb></ordinate>
            <ordinate><x>480010</x><y>1300000</y><ord_nmb>4</ord_nmb></ordinate>"#;
        let out = parse(land_doc(&land_record("23:43:0302001:17", line)).as_bytes(), None).unwrap();
        assert!(out.parcels.is_empty());
        let kinds: Vec<ParseIssueKind> = out.issues.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![ParseIssueKind::SkippedGeometry, ParseIssueKind::MissingBoundary]
        );
    }

    #[test]
    fn test_declared_closure_keeps_open_ring() {
        // 末点编号与首点相同，坐标相差 5 cm：交给拓扑校验报告
        let open = SQUARE.replacen(
            "<x>480000.00</x><y>1300000.00</y>",
            "<x>480000.05</x><y>1300000.00</y>",
            1,
        );
        let out = parse(land_doc(&land_record("23:43:0302001:18", &open)).as_bytes(), None).unwrap();
        assert_eq!(out.parcels.len(), 1);
        assert!(out.parcels[0].contours[0].outer.closure_gap() > 0.04);
    }

    #[test]
    fn test_token_stream_and_holes() {
        let record = r#"<land_record>
              <object><common_data><cad_number>50:21:0010101:7</cad_number></common_data></object>
              <params><area>9 600,0</area></params>
              <entity_spatial><spatials_elements>
                <spatial_element><coordinates>20 20; 20 40; 40 40; 40 20; 20 20</coordinates></spatial_element>
                <spatial_element><coordinates>0 0 0 100 100 100 100 0 0 0</coordinates></spatial_element>
                <spatial_element><coordinates>500 500 600 600</coordinates></spatial_element>
              </spatials_elements></entity_spatial>
            </land_record>"#;
        let out = parse(land_doc(record).as_bytes(), None).unwrap();
        assert_eq!(out.parcels.len(), 1);
        let p = &out.parcels[0];
        assert_eq!(p.contours.len(), 1);
        assert_eq!(p.contours[0].holes.len(), 1);
        assert!(approx_eq(p.geometric_area(), 10_000.0 - 400.0));
        assert_eq!(p.declared_area, Some(9_600.0));
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].kind, ParseIssueKind::SkippedGeometry);
    }

    #[test]
    fn test_malformed_area_is_advisory() {
        let doc = land_doc(&land_record("23:43:0302001:19", SQUARE).replace(
            "<value>100</value>",
            "<value>сто</value>",
        ));
        let out = parse(doc.as_bytes(), None).unwrap();
        assert_eq!(out.parcels.len(), 1);
        assert_eq!(out.parcels[0].declared_area, None);
        assert_eq!(out.issues[0].kind, ParseIssueKind::MalformedArea);
        assert!(!out.has_blocking_issues());
    }

    #[test]
    fn test_windows_1251_declaration() {
        let doc = land_doc(&land_record("23:43:0302001:15", SQUARE))
            .replace("encoding=\"UTF-8\"", "encoding=\"windows-1251\"");
        let (bytes, _, _) = encoding_rs::WINDOWS_1251.encode(&doc);
        let out = parse(&bytes, None).unwrap();
        assert_eq!(out.encoding, "windows-1251");
        assert_eq!(
            out.parcels[0].attribute(attr::CATEGORY),
            Some("Земли населённых пунктов")
        );

        // 错误地按 UTF-8 读取时产生替换字符
        let out = parse(&bytes, Some("utf-8")).unwrap();
        assert_eq!(out.issues[0].kind, ParseIssueKind::EncodingReplacement);
        assert!(matches!(parse(&bytes, Some("no-such")), Err(FileError::Encoding(_))));
    }
}
