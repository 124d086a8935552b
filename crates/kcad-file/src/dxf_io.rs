//! DXF 导出与回读
//!
//! 写出 AutoCAD R2000（AC1015）ASCII DXF：
//! - HEADER：版本、代码页、单位（米）、范围
//! - TABLES：VPORT、LTYPE、LAYER、STYLE、APPID、BLOCK_RECORD
//! - BLOCKS：模型空间与图纸空间块
//! - ENTITIES：LWPOLYLINE（边界）、HATCH（填充）、TEXT（标注）
//! - OBJECTS：根字典
//!
//! 文件只含 ASCII，非 ASCII 字符写为 `\U+XXXX`。
//! 坐标以最短往返形式写出，回读得到的数值与写入时逐位相同。
//!
//! # 组码 (Group Code)
//!
//! 每个数据项由两行组成：组码和值。常用组码：
//! - 0: 实体类型
//! - 2: 名称
//! - 5: 句柄 (Handle)
//! - 8: 图层名
//! - 10, 20, 30: X, Y, Z 坐标
//! - 62: 颜色
//! - 330: 软指针（所属对象）
//! - 370: 线宽

use crate::error::{FileError, Result};
use crate::export::{ExportBatch, ExportGeometry, ExportRecord, Label};
use kcad_core::layer::{LayerStyle, StyleTable};
use kcad_core::math::Point2;
use kcad_core::properties::{paper_to_model, FillPattern, LineType};
use std::io::BufRead;

/// ANSI31 图案在比例 1 时的线间距（图形单位）
const ANSI31_SPACING: f64 = 0.125;
/// ANSI31 图案线的偏移分量：0.125 / √2
const ANSI31_OFFSET: f64 = 0.0883883476483184;

/// 标注文字样式
pub const TEXT_STYLE: &str = "GOST";

/// 非 ASCII 字符转义为 `\U+XXXX`，换行替换为空格
pub fn encode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' | '\n' => out.push(' '),
            c if c.is_ascii() => out.push(c),
            c => out.push_str(&format!("\\U+{:04X}", c as u32)),
        }
    }
    out
}

/// 还原 `\U+XXXX` 转义
pub fn decode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("\\U+") {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 3..];
        let decoded = after
            .get(..4)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &after[4..];
            }
            None => {
                out.push_str("\\U+");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// DXF 文本写入器
pub struct DxfWriter {
    output: Vec<String>,
    handle_counter: u32,
    /// $HANDSEED 值所在行
    handseed_line: Option<usize>,
}

impl Default for DxfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DxfWriter {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            handle_counter: 0x100,
            handseed_line: None,
        }
    }

    /// 分配新句柄
    pub fn new_handle(&mut self) -> String {
        let handle = format!("{:X}", self.handle_counter);
        self.handle_counter += 1;
        handle
    }

    /// 写入组码-值对
    pub fn write_pair(&mut self, code: i32, value: impl std::fmt::Display) {
        self.output.push(format!("{:>3}", code));
        self.output.push(value.to_string());
    }

    /// 写入文本值（转义非 ASCII 字符）
    pub fn write_text(&mut self, code: i32, value: &str) {
        self.write_pair(code, encode_text(value));
    }

    /// 写入新句柄并返回
    pub fn write_handle(&mut self) -> String {
        let handle = self.new_handle();
        self.write_pair(5, &handle);
        handle
    }

    /// 写入点坐标（Z = 0）
    pub fn write_point(&mut self, base_code: i32, point: Point2) {
        self.write_pair(base_code, point.x);
        self.write_pair(base_code + 10, point.y);
        self.write_pair(base_code + 20, 0.0);
    }

    /// 写入 SECTION 开始
    pub fn begin_section(&mut self, name: &str) {
        self.write_pair(0, "SECTION");
        self.write_pair(2, name);
    }

    /// 写入 SECTION 结束
    pub fn end_section(&mut self) {
        self.write_pair(0, "ENDSEC");
    }

    /// 表头，返回表句柄
    pub fn begin_table(&mut self, name: &str, count: usize) -> String {
        self.write_pair(0, "TABLE");
        self.write_pair(2, name);
        let handle = self.write_handle();
        self.write_pair(330, 0);
        self.write_pair(100, "AcDbSymbolTable");
        self.write_pair(70, count);
        handle
    }

    pub fn end_table(&mut self) {
        self.write_pair(0, "ENDTAB");
    }

    /// 表记录公共部分
    fn begin_table_record(&mut self, kind: &str, subclass: &str, owner: &str) -> String {
        self.write_pair(0, kind);
        let handle = self.write_handle();
        self.write_pair(330, owner);
        self.write_pair(100, "AcDbSymbolTableRecord");
        self.write_pair(100, subclass);
        handle
    }

    /// 实体公共部分
    fn begin_entity(&mut self, kind: &str, owner: &str, layer: &str) {
        self.write_pair(0, kind);
        self.write_handle();
        self.write_pair(330, owner);
        self.write_pair(100, "AcDbEntity");
        self.write_text(8, layer);
    }

    /// 结束写入，补齐 $HANDSEED 并返回文本
    pub fn finish(mut self) -> String {
        if let Some(line) = self.handseed_line {
            let seed = format!("{:X}", self.handle_counter);
            if let Some(value) = self.output.get_mut(line) {
                *value = seed;
            }
        }
        self.output.push(format!("{:>3}", 0));
        self.output.push("EOF".to_string());
        let mut text = self.output.join("\n");
        text.push('\n');
        text
    }

    fn write_header(&mut self, batch: &ExportBatch) {
        self.begin_section("HEADER");
        self.write_pair(9, "$ACADVER");
        self.write_pair(1, "AC1015");
        self.write_pair(9, "$DWGCODEPAGE");
        self.write_pair(3, "ANSI_1251");
        self.write_pair(9, "$INSUNITS");
        self.write_pair(70, if batch.is_geodetic() { 0 } else { 6 });
        let (min, max) = if batch.extent.is_empty() {
            (Point2::origin(), Point2::origin())
        } else {
            (batch.extent.min, batch.extent.max)
        };
        self.write_pair(9, "$EXTMIN");
        self.write_point(10, min);
        self.write_pair(9, "$EXTMAX");
        self.write_point(10, max);
        self.write_pair(9, "$LTSCALE");
        self.write_pair(40, 1.0);
        self.write_pair(9, "$HANDSEED");
        self.write_pair(5, "0");
        self.handseed_line = Some(self.output.len() - 1);
        self.end_section();
    }

    fn write_tables(&mut self, styles: &StyleTable, drawing_scale: f64) -> String {
        self.begin_section("TABLES");

        self.begin_table("VPORT", 0);
        self.end_table();

        let owner = self.begin_table("LTYPE", LineType::ALL.len() + 2);
        for name in ["ByBlock", "ByLayer"] {
            self.begin_table_record("LTYPE", "AcDbLinetypeTableRecord", &owner);
            self.write_pair(2, name);
            self.write_pair(70, 0);
            self.write_pair(3, "");
            self.write_pair(72, 65);
            self.write_pair(73, 0);
            self.write_pair(40, 0.0);
        }
        for line_type in LineType::ALL {
            let pattern: Vec<f64> = line_type
                .pattern()
                .iter()
                .map(|mm| paper_to_model(*mm, drawing_scale))
                .collect();
            self.begin_table_record("LTYPE", "AcDbLinetypeTableRecord", &owner);
            self.write_pair(2, line_type.name());
            self.write_pair(70, 0);
            self.write_pair(3, line_type.description());
            self.write_pair(72, 65);
            self.write_pair(73, pattern.len());
            self.write_pair(40, pattern.iter().map(|v| v.abs()).sum::<f64>());
            for element in pattern {
                self.write_pair(49, element);
                self.write_pair(74, 0);
            }
        }
        self.end_table();

        let owner = self.begin_table("LAYER", styles.layers().len() + 1);
        self.write_layer(&LayerStyle::new("0"), &owner);
        for style in styles.layers() {
            self.write_layer(style, &owner);
        }
        self.end_table();

        let owner = self.begin_table("STYLE", 2);
        for (name, font) in [("Standard", "txt"), (TEXT_STYLE, "isocpeur.ttf")] {
            self.begin_table_record("STYLE", "AcDbTextStyleTableRecord", &owner);
            self.write_pair(2, name);
            self.write_pair(70, 0);
            self.write_pair(40, 0.0);
            self.write_pair(41, 1.0);
            // ГОСТ 2.304 字体倾斜 75°
            self.write_pair(50, if name == TEXT_STYLE { 15.0 } else { 0.0 });
            self.write_pair(71, 0);
            self.write_pair(42, 2.5);
            self.write_pair(3, font);
            self.write_pair(4, "");
        }
        self.end_table();

        let owner = self.begin_table("APPID", 1);
        self.begin_table_record("APPID", "AcDbRegAppTableRecord", &owner);
        self.write_pair(2, "ACAD");
        self.write_pair(70, 0);
        self.end_table();

        let owner = self.begin_table("BLOCK_RECORD", 2);
        let model_space =
            self.begin_table_record("BLOCK_RECORD", "AcDbBlockTableRecord", &owner);
        self.write_pair(2, "*Model_Space");
        let paper_space =
            self.begin_table_record("BLOCK_RECORD", "AcDbBlockTableRecord", &owner);
        self.write_pair(2, "*Paper_Space");
        self.end_table();

        self.end_section();

        self.begin_section("BLOCKS");
        for (name, record) in [("*Model_Space", &model_space), ("*Paper_Space", &paper_space)] {
            self.begin_entity("BLOCK", record, "0");
            self.write_pair(100, "AcDbBlockBegin");
            self.write_pair(2, name);
            self.write_pair(70, 0);
            self.write_point(10, Point2::origin());
            self.write_pair(3, name);
            self.write_pair(1, "");
            self.begin_entity("ENDBLK", record, "0");
            self.write_pair(100, "AcDbBlockEnd");
        }
        self.end_section();

        model_space
    }

    fn write_layer(&mut self, style: &LayerStyle, owner: &str) {
        self.begin_table_record("LAYER", "AcDbLayerTableRecord", owner);
        self.write_text(2, &style.name);
        self.write_pair(70, 0);
        self.write_pair(62, style.color.aci());
        self.write_pair(6, style.line_type.name());
        self.write_pair(370, style.line_weight.dxf_code());
    }

    fn write_polyline(&mut self, record: &ExportRecord, points: &[Point2], owner: &str) {
        self.begin_entity("LWPOLYLINE", owner, &record.layer);
        self.write_pair(100, "AcDbPolyline");
        self.write_pair(90, points.len());
        self.write_pair(70, 1);
        self.write_pair(43, 0.0);
        for p in points {
            self.write_pair(10, p.x);
            self.write_pair(20, p.y);
        }
    }

    fn write_loop(&mut self, points: &[Point2], outer: bool) {
        // 1 外部边界，2 多段线边界
        self.write_pair(92, if outer { 3 } else { 2 });
        self.write_pair(72, 0);
        self.write_pair(73, 1);
        self.write_pair(93, points.len());
        for p in points {
            self.write_pair(10, p.x);
            self.write_pair(20, p.y);
        }
        self.write_pair(97, 0);
    }

    fn write_hatch(
        &mut self,
        record: &ExportRecord,
        outer: &[Point2],
        holes: &[Vec<Point2>],
        owner: &str,
        drawing_scale: f64,
    ) {
        let fill = record.style.fill;
        let Some(pattern_name) = fill.dxf_name() else {
            return;
        };
        self.begin_entity("HATCH", owner, &record.layer);
        self.write_pair(62, record.style.effective_fill_color().aci());
        self.write_pair(100, "AcDbHatch");
        self.write_point(10, Point2::origin());
        self.write_pair(210, 0.0);
        self.write_pair(220, 0.0);
        self.write_pair(230, 1.0);
        self.write_pair(2, pattern_name);
        self.write_pair(70, if fill == FillPattern::Solid { 1 } else { 0 });
        self.write_pair(71, 0);
        self.write_pair(91, 1 + holes.len());
        self.write_loop(outer, true);
        for hole in holes {
            self.write_loop(hole, false);
        }
        self.write_pair(75, 0);
        self.write_pair(76, 1);
        if let FillPattern::Ansi31 { spacing_mm } = fill {
            let scale = paper_to_model(spacing_mm, drawing_scale) / ANSI31_SPACING;
            self.write_pair(52, 0.0);
            self.write_pair(41, scale);
            self.write_pair(77, 0);
            self.write_pair(78, 1);
            self.write_pair(53, 45.0);
            self.write_pair(43, 0.0);
            self.write_pair(44, 0.0);
            self.write_pair(45, -ANSI31_OFFSET * scale);
            self.write_pair(46, ANSI31_OFFSET * scale);
            self.write_pair(79, 0);
        }
        self.write_pair(98, 0);
    }

    fn write_label(&mut self, label: &Label, owner: &str) {
        self.begin_entity("TEXT", owner, label.layer);
        self.write_pair(100, "AcDbText");
        self.write_point(10, label.position);
        self.write_pair(40, label.height);
        self.write_text(1, &label.text);
        self.write_pair(7, TEXT_STYLE);
        // 水平居中、垂直居中，对齐点即标注位置
        self.write_pair(72, 1);
        self.write_point(11, label.position);
        self.write_pair(100, "AcDbText");
        self.write_pair(73, 2);
    }

    fn write_objects(&mut self) {
        self.begin_section("OBJECTS");
        let root = self.new_handle();
        let group = self.new_handle();
        self.write_pair(0, "DICTIONARY");
        self.write_pair(5, &root);
        self.write_pair(330, 0);
        self.write_pair(100, "AcDbDictionary");
        self.write_pair(281, 1);
        self.write_pair(3, "ACAD_GROUP");
        self.write_pair(350, &group);
        self.write_pair(0, "DICTIONARY");
        self.write_pair(5, &group);
        self.write_pair(330, &root);
        self.write_pair(100, "AcDbDictionary");
        self.write_pair(281, 1);
        self.end_section();
    }
}

/// 把导出记录写成 DXF 文本
pub fn write_dxf(batch: &ExportBatch, styles: &StyleTable, drawing_scale: f64) -> String {
    let mut writer = DxfWriter::new();
    writer.write_header(batch);
    let model_space = writer.write_tables(styles, drawing_scale);

    writer.begin_section("ENTITIES");
    for record in &batch.records {
        match &record.geometry {
            ExportGeometry::Polyline(points) => {
                writer.write_polyline(record, points, &model_space)
            }
            ExportGeometry::Hatch { outer, holes } => {
                writer.write_hatch(record, outer, holes, &model_space, drawing_scale)
            }
        }
        if let Some(label) = &record.label {
            writer.write_label(label, &model_space);
        }
    }
    writer.end_section();

    writer.write_objects();
    writer.finish()
}

/// DXF 组码-值对
#[derive(Debug, Clone, PartialEq)]
pub struct DxfPair {
    pub code: i32,
    pub value: String,
}

impl DxfPair {
    pub fn new(code: i32, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    /// 解析为浮点数
    pub fn as_f64(&self) -> Option<f64> {
        self.value.trim().parse().ok()
    }

    /// 解析为整数
    pub fn as_i32(&self) -> Option<i32> {
        self.value.trim().parse().ok()
    }
}

/// DXF 原始解析器
pub struct DxfRawParser {
    pairs: Vec<DxfPair>,
    position: usize,
}

impl DxfRawParser {
    /// 从文本解析
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut pairs = Vec::new();
        let mut lines = reader.lines();

        loop {
            let code_line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(FileError::Io(e)),
                None => break,
            };
            let value_line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(FileError::Io(e)),
                None => break,
            };

            let code: i32 = code_line.trim().parse().map_err(|_| {
                FileError::InvalidFormat(format!("Invalid group code: {}", code_line))
            })?;
            pairs.push(DxfPair::new(code, value_line));

            if code == 0 && pairs.last().map(|p| p.value.trim()) == Some("EOF") {
                break;
            }
        }

        Ok(Self { pairs, position: 0 })
    }

    /// 获取当前对
    pub fn current(&self) -> Option<&DxfPair> {
        self.pairs.get(self.position)
    }

    /// 前进一步
    pub fn advance(&mut self) -> Option<&DxfPair> {
        let pair = self.pairs.get(self.position)?;
        self.position += 1;
        Some(pair)
    }

    /// 跳到下一个指定组码（及值）
    pub fn skip_to(&mut self, code: i32, value: Option<&str>) -> bool {
        while let Some(pair) = self.advance() {
            if pair.code == code && value.map_or(true, |v| pair.value.trim() == v) {
                return true;
            }
        }
        false
    }

    /// 读取直到遇到组码 0
    pub fn read_until_zero(&mut self) -> Vec<DxfPair> {
        let mut result = Vec::new();
        while let Some(pair) = self.current() {
            if pair.code == 0 {
                break;
            }
            result.push(pair.clone());
            self.position += 1;
        }
        result
    }

    /// ENTITIES 段的实体：类型和组码
    pub fn entities(&mut self) -> Vec<(String, Vec<DxfPair>)> {
        self.position = 0;
        let mut entities = Vec::new();
        loop {
            if !self.skip_to(0, Some("SECTION")) {
                return entities;
            }
            if self.current().map(|p| p.value.trim()) == Some("ENTITIES") {
                self.position += 1;
                break;
            }
        }
        while let Some(pair) = self.advance() {
            let kind = pair.value.trim().to_string();
            if pair.code != 0 || kind == "ENDSEC" {
                break;
            }
            let pairs = self.read_until_zero();
            entities.push((kind, pairs));
        }
        entities
    }
}

/// 回读的多段线
#[derive(Debug, Clone, PartialEq)]
pub struct DxfPolyline {
    pub layer: String,
    pub points: Vec<Point2>,
    pub closed: bool,
}

/// 回读的文字
#[derive(Debug, Clone, PartialEq)]
pub struct DxfText {
    pub layer: String,
    pub text: String,
    pub position: Point2,
    pub height: f64,
}

/// 回读的填充
#[derive(Debug, Clone, PartialEq)]
pub struct DxfHatch {
    pub layer: String,
    pub pattern: String,
    /// 边界环（第一个为外环）
    pub loops: Vec<Vec<Point2>>,
}

/// 用原始解析器回读的实体
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DxfContents {
    pub polylines: Vec<DxfPolyline>,
    pub hatches: Vec<DxfHatch>,
    pub texts: Vec<DxfText>,
}

fn layer_of(pairs: &[DxfPair]) -> String {
    pairs
        .iter()
        .find(|p| p.code == 8)
        .map(|p| decode_text(&p.value))
        .unwrap_or_default()
}

fn coordinate(pair: &DxfPair) -> Result<f64> {
    pair.as_f64().ok_or_else(|| {
        FileError::InvalidFormat(format!("Invalid coordinate {:?} (code {})", pair.value, pair.code))
    })
}

/// 成对的 10/20 组码
fn points_of(pairs: &[DxfPair]) -> Result<Vec<Point2>> {
    let mut points = Vec::new();
    let mut x = None;
    for pair in pairs {
        match pair.code {
            10 => x = Some(coordinate(pair)?),
            20 => {
                if let Some(x) = x.take() {
                    points.push(Point2::new(x, coordinate(pair)?));
                }
            }
            _ => {}
        }
    }
    Ok(points)
}

/// 以原始组码方式回读 DXF 中的多段线、填充和文字
pub fn read_dxf<R: BufRead>(reader: R) -> Result<DxfContents> {
    let mut parser = DxfRawParser::parse(reader)?;
    let mut contents = DxfContents::default();
    for (kind, pairs) in parser.entities() {
        match kind.as_str() {
            "LWPOLYLINE" => {
                let flags = pairs
                    .iter()
                    .find(|p| p.code == 70)
                    .and_then(DxfPair::as_i32)
                    .unwrap_or(0);
                contents.polylines.push(DxfPolyline {
                    layer: layer_of(&pairs),
                    points: points_of(&pairs)?,
                    closed: flags & 1 == 1,
                });
            }
            "HATCH" => {
                let pattern = pairs
                    .iter()
                    .find(|p| p.code == 2)
                    .map(|p| p.value.trim().to_string())
                    .unwrap_or_default();
                // 每个边界从 92 开始，到 97 结束
                let mut loops = Vec::new();
                let mut current: Option<Vec<DxfPair>> = None;
                for pair in &pairs {
                    match pair.code {
                        92 => current = Some(Vec::new()),
                        97 => {
                            if let Some(loop_pairs) = current.take() {
                                loops.push(points_of(&loop_pairs)?);
                            }
                        }
                        _ => {
                            if let Some(loop_pairs) = current.as_mut() {
                                loop_pairs.push(pair.clone());
                            }
                        }
                    }
                }
                contents.hatches.push(DxfHatch {
                    layer: layer_of(&pairs),
                    pattern,
                    loops,
                });
            }
            "TEXT" => {
                let text = pairs
                    .iter()
                    .find(|p| p.code == 1)
                    .map(|p| decode_text(&p.value))
                    .unwrap_or_default();
                let height = pairs
                    .iter()
                    .find(|p| p.code == 40)
                    .and_then(DxfPair::as_f64)
                    .unwrap_or(0.0);
                let position = points_of(&pairs)?
                    .first()
                    .copied()
                    .unwrap_or_else(Point2::origin);
                contents.texts.push(DxfText {
                    layer: layer_of(&pairs),
                    text,
                    position,
                    height,
                });
            }
            _ => {}
        }
    }
    Ok(contents)
}

/// 用 dxf 库读取多段线
pub fn read_polylines(bytes: &[u8]) -> Result<Vec<DxfPolyline>> {
    let drawing = dxf::Drawing::load(&mut std::io::Cursor::new(bytes))
        .map_err(|e| FileError::Dxf(e.to_string()))?;
    let mut polylines = Vec::new();
    for entity in drawing.entities() {
        if let dxf::entities::EntityType::LwPolyline(lwpoly) = &entity.specific {
            polylines.push(DxfPolyline {
                layer: decode_text(&entity.common.layer),
                points: lwpoly
                    .vertices
                    .iter()
                    .map(|v| Point2::new(v.x, v.y))
                    .collect(),
                closed: lwpoly.is_closed(),
            });
        }
    }
    Ok(polylines)
}

/// 回读校验：文件中的边界多段线必须与导出记录逐点一致
pub fn verify(bytes: &[u8], batch: &ExportBatch) -> Result<()> {
    let expected: Vec<(&ExportRecord, &Vec<Point2>)> = batch
        .records
        .iter()
        .filter_map(|r| match &r.geometry {
            ExportGeometry::Polyline(points) => Some((r, points)),
            ExportGeometry::Hatch { .. } => None,
        })
        .collect();
    let actual = read_polylines(bytes)?;
    if actual.len() != expected.len() {
        return Err(FileError::Dxf(format!(
            "read back {} polylines, wrote {}",
            actual.len(),
            expected.len()
        )));
    }
    for ((record, points), polyline) in expected.iter().zip(&actual) {
        if polyline.points != **points || !polyline.closed {
            return Err(FileError::Dxf(format!(
                "{} {} differs after read-back",
                record.parcel_id, record.ring
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportFormatter, ExportOptions, OutputFormat};
    use kcad_core::geometry::{Ring, Vertex};
    use kcad_core::parcel::{CadastralNumber, Contour, ObjectKind, Parcel};

    fn parcel() -> Parcel {
        let mut p = Parcel::new(
            CadastralNumber::parse("23:43:0302001:15").unwrap(),
            ObjectKind::Land,
        );
        let ring = |pts: &[(f64, f64)]| {
            let mut v: Vec<Vertex> = pts.iter().map(|(x, y)| Vertex::new(*x, *y)).collect();
            v.push(v[0]);
            Ring::new(v)
        };
        p.contours.push(Contour::with_holes(
            ring(&[
                (1_300_000.12, 480_000.07),
                (1_300_100.33, 480_000.07),
                (1_300_100.33, 480_100.91),
                (1_300_000.12, 480_100.91),
            ]),
            vec![ring(&[
                (1_300_040.0, 480_040.0),
                (1_300_040.0, 480_060.0),
                (1_300_060.0, 480_060.0),
                (1_300_060.0, 480_040.0),
            ])],
        ));
        p.computed_area = Some(9_704.18);
        p
    }

    fn batch() -> (ExportFormatter, ExportBatch) {
        let formatter = ExportFormatter::new(OutputFormat::Dxf, ExportOptions::default());
        let p = parcel();
        let batch = formatter.build(&[&p]);
        (formatter, batch)
    }

    #[test]
    fn test_text_escapes() {
        assert_eq!(encode_text("Подписи"), "\\U+041F\\U+043E\\U+0434\\U+043F\\U+0438\\U+0441\\U+0438");
        assert_eq!(encode_text("S=1 м²"), "S=1 \\U+043C\\U+00B2");
        assert_eq!(decode_text(&encode_text("КАТ_Не_установлена")), "КАТ_Не_установлена");
        assert_eq!(decode_text("\\U+zz"), "\\U+zz");
    }

    #[test]
    fn test_dxf_structure() {
        let (formatter, batch) = batch();
        let text = write_dxf(&batch, formatter.styles(), 500.0);
        assert!(text.is_ascii());
        assert!(text.contains("AC1015"));
        assert!(text.contains("ANSI_1251"));
        assert!(text.ends_with("  0\nEOF\n"));
        for section in ["HEADER", "TABLES", "BLOCKS", "ENTITIES", "OBJECTS"] {
            assert!(text.contains(&format!("  2\n{}\n", section)), "{}", section);
        }
        // 3 mm 间距 · 1:500 / 0.125
        assert!(text.contains(" 41\n12\n"));
        assert!(text.contains("  2\nANSI31\n"));
    }

    #[test]
    fn test_raw_read_back_is_exact() {
        let (formatter, batch) = batch();
        let text = write_dxf(&batch, formatter.styles(), 500.0);
        let contents = read_dxf(text.as_bytes()).unwrap();

        assert_eq!(contents.polylines.len(), 2);
        let outer = &contents.polylines[0];
        assert_eq!(outer.layer, "КАТ_Не_установлена");
        assert!(outer.closed);
        match &batch.records[0].geometry {
            ExportGeometry::Polyline(points) => assert_eq!(&outer.points, points),
            other => panic!("unexpected {:?}", other),
        }
        assert!(outer.points.contains(&Point2::new(1_300_100.33, 480_100.91)));

        assert_eq!(contents.hatches.len(), 1);
        assert_eq!(contents.hatches[0].loops.len(), 2);
        assert_eq!(contents.hatches[0].loops[0].len(), 4);

        assert_eq!(contents.texts.len(), 1);
        assert_eq!(contents.texts[0].text, "23:43:0302001:15 S=9704.18 м²");
        assert_eq!(contents.texts[0].layer, "Подписи");
        assert_eq!(contents.texts[0].height, 1.25);
    }

    #[test]
    fn test_crate_read_back_verifies() {
        let (formatter, batch) = batch();
        let text = write_dxf(&batch, formatter.styles(), 500.0);
        verify(text.as_bytes(), &batch).unwrap();

        let polylines = read_polylines(text.as_bytes()).unwrap();
        assert_eq!(polylines.len(), 2);
        assert_eq!(polylines[1].points.len(), 4);
    }
}
