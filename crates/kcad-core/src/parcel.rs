//! 地块数据模型
//!
//! 地块（[`Parcel`]）由解析器按源文档记录创建，之后在流水线中被原地改写
//! （坐标转换、精度规整），导出阶段只读使用。校验问题不挂在地块上，
//! 而是存放在以地块标识为键的旁表中（见 [`crate::issue::IssueLog`]）。

use crate::crs::CoordinateSystemReference;
use crate::error::CoreError;
use crate::geometry::{polygon_area, Ring};
use crate::math::BoundingBox2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 地块的地籍编号：区:县:街区:号
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CadastralNumber {
    raw: String,
}

impl CadastralNumber {
    /// 解析地籍编号，四段均须为数字
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let raw: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let parts: Vec<&str> = raw.split(':').collect();
        let well_formed = parts.len() == 4
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        if !well_formed {
            return Err(CoreError::InvalidCadastralNumber(text.to_string()));
        }
        Ok(Self { raw })
    }

    fn part(&self, index: usize) -> &str {
        self.raw.split(':').nth(index).unwrap_or_default()
    }

    /// 区（联邦主体）代码，如 "23"
    pub fn region(&self) -> &str {
        self.part(0)
    }

    /// 县（地籍区）代码
    pub fn district(&self) -> &str {
        self.part(1)
    }

    /// 地籍街区
    pub fn quarter(&self) -> &str {
        self.part(2)
    }

    /// 街区内编号
    pub fn number(&self) -> &str {
        self.part(3)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for CadastralNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for CadastralNumber {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CadastralNumber> for String {
    fn from(value: CadastralNumber) -> Self {
        value.raw
    }
}

/// 不动产对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// 土地地块
    #[default]
    Land,
    /// 建筑物
    Building,
    /// 构筑物
    Construction,
    /// 未完工建筑
    UnderConstruction,
}

impl ObjectKind {
    /// 对应的 EGRN 记录标签
    pub fn record_tag(&self) -> &'static str {
        match self {
            ObjectKind::Land => "land_record",
            ObjectKind::Building => "build_record",
            ObjectKind::Construction => "construction_record",
            ObjectKind::UnderConstruction => "object_under_construction_record",
        }
    }

    pub fn from_record_tag(tag: &str) -> Option<Self> {
        match tag {
            "land_record" => Some(ObjectKind::Land),
            "build_record" => Some(ObjectKind::Building),
            "construction_record" => Some(ObjectKind::Construction),
            "object_under_construction_record" => Some(ObjectKind::UnderConstruction),
            _ => None,
        }
    }
}

/// 环在地块中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RingId {
    /// 轮廓序号
    pub contour: usize,
    /// 洞序号，外环为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hole: Option<usize>,
}

impl RingId {
    pub fn outer(contour: usize) -> Self {
        Self {
            contour,
            hole: None,
        }
    }

    pub fn hole(contour: usize, hole: usize) -> Self {
        Self {
            contour,
            hole: Some(hole),
        }
    }

    pub fn is_outer(&self) -> bool {
        self.hole.is_none()
    }
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hole {
            None => write!(f, "contour {} outer ring", self.contour + 1),
            Some(h) => write!(f, "contour {} hole {}", self.contour + 1, h + 1),
        }
    }
}

/// 轮廓：一个外环和若干洞
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contour {
    pub outer: Ring,
    #[serde(default)]
    pub holes: Vec<Ring>,
}

impl Contour {
    pub fn new(outer: Ring) -> Self {
        Self {
            outer,
            holes: Vec::new(),
        }
    }

    pub fn with_holes(outer: Ring, holes: Vec<Ring>) -> Self {
        Self { outer, holes }
    }

    /// 外环面积减去洞面积
    pub fn area(&self) -> f64 {
        polygon_area(&self.outer, &self.holes)
    }
}

/// 地块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub id: CadastralNumber,
    pub kind: ObjectKind,
    pub contours: Vec<Contour>,
    /// 文档中声明的面积（平方米）
    pub declared_area: Option<f64>,
    /// 声明面积的允许误差
    pub declared_area_inaccuracy: Option<f64>,
    /// 由几何计算的面积
    pub computed_area: Option<f64>,
    /// 透传属性（类别、用途、地址等）
    pub attributes: BTreeMap<String, String>,
    /// 源文档中的坐标系标识（sk_id）
    pub source_crs_name: Option<String>,
    /// 当前坐标所在的坐标系
    pub crs: Option<CoordinateSystemReference>,
}

impl Parcel {
    pub fn new(id: CadastralNumber, kind: ObjectKind) -> Self {
        Self {
            id,
            kind,
            contours: Vec::new(),
            declared_area: None,
            declared_area_inaccuracy: None,
            computed_area: None,
            attributes: BTreeMap::new(),
            source_crs_name: None,
            crs: None,
        }
    }

    /// 以扁平顺序遍历所有环：外环₀、洞₀…、外环₁…
    pub fn rings(&self) -> impl Iterator<Item = (RingId, &Ring)> + '_ {
        self.contours.iter().enumerate().flat_map(|(ci, contour)| {
            std::iter::once((RingId::outer(ci), &contour.outer)).chain(
                contour
                    .holes
                    .iter()
                    .enumerate()
                    .map(move |(hi, hole)| (RingId::hole(ci, hi), hole)),
            )
        })
    }

    /// 可变遍历所有环
    pub fn rings_mut(&mut self) -> impl Iterator<Item = (RingId, &mut Ring)> + '_ {
        self.contours.iter_mut().enumerate().flat_map(|(ci, contour)| {
            std::iter::once((RingId::outer(ci), &mut contour.outer)).chain(
                contour
                    .holes
                    .iter_mut()
                    .enumerate()
                    .map(move |(hi, hole)| (RingId::hole(ci, hi), hole)),
            )
        })
    }

    pub fn ring(&self, id: RingId) -> Option<&Ring> {
        let contour = self.contours.get(id.contour)?;
        match id.hole {
            None => Some(&contour.outer),
            Some(h) => contour.holes.get(h),
        }
    }

    pub fn ring_count(&self) -> usize {
        self.contours.iter().map(|c| 1 + c.holes.len()).sum()
    }

    pub fn vertex_count(&self) -> usize {
        self.rings().map(|(_, r)| r.len()).sum()
    }

    pub fn has_geometry(&self) -> bool {
        !self.contours.is_empty()
    }

    /// 所有轮廓面积之和
    pub fn geometric_area(&self) -> f64 {
        self.contours.iter().map(Contour::area).sum()
    }

    pub fn perimeter(&self) -> f64 {
        self.rings().map(|(_, r)| r.perimeter()).sum()
    }

    pub fn bounding_box(&self) -> BoundingBox2 {
        self.contours
            .iter()
            .map(|c| c.outer.bounding_box())
            .fold(BoundingBox2::empty(), |acc, b| acc.union(&b))
    }

    /// 面积最大的轮廓序号
    pub fn largest_contour(&self) -> Option<usize> {
        self.contours
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.area().total_cmp(&b.1.area()))
            .map(|(i, _)| i)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// 常用属性键
pub mod attr {
    pub const CATEGORY: &str = "category";
    pub const CATEGORY_CODE: &str = "category_code";
    pub const PERMITTED_USE: &str = "permitted_use";
    pub const ADDRESS: &str = "address";
    pub const REGISTRATION_DATE: &str = "registration_date";
    pub const CADASTRAL_COST: &str = "cadastral_cost";
    pub const CADASTRAL_BLOCK: &str = "cadastral_block";
    pub const PURPOSE: &str = "purpose";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{approx_eq, Point2};

    fn square(x: f64, y: f64, size: f64) -> Ring {
        Ring::from_points([
            Point2::new(x, y),
            Point2::new(x + size, y),
            Point2::new(x + size, y + size),
            Point2::new(x, y + size),
            Point2::new(x, y),
        ])
    }

    #[test]
    fn test_cadastral_number() {
        let id = CadastralNumber::parse("23:43:0302001:15").unwrap();
        assert_eq!(id.region(), "23");
        assert_eq!(id.district(), "43");
        assert_eq!(id.quarter(), "0302001");
        assert_eq!(id.number(), "15");
        assert_eq!(id.to_string(), "23:43:0302001:15");

        assert!(CadastralNumber::parse("23:43:0302001").is_err());
        assert!(CadastralNumber::parse("23:43:03O2001:15").is_err());
        assert!(CadastralNumber::parse(" 23:43:0302001:15 ").is_ok());
    }

    #[test]
    fn test_ring_iteration_order() {
        let mut parcel = Parcel::new(
            CadastralNumber::parse("50:21:0010101:7").unwrap(),
            ObjectKind::Land,
        );
        parcel.contours.push(Contour::with_holes(
            square(0.0, 0.0, 10.0),
            vec![square(2.0, 2.0, 2.0), square(6.0, 6.0, 2.0)],
        ));
        parcel.contours.push(Contour::new(square(20.0, 0.0, 5.0)));

        let ids: Vec<RingId> = parcel.rings().map(|(id, _)| id).collect();
        assert_eq!(
            ids,
            vec![
                RingId::outer(0),
                RingId::hole(0, 0),
                RingId::hole(0, 1),
                RingId::outer(1)
            ]
        );
        assert_eq!(parcel.ring_count(), 4);
        assert!(approx_eq(parcel.geometric_area(), 100.0 - 8.0 + 25.0));
        assert_eq!(parcel.largest_contour(), Some(0));
        assert!(parcel.ring(RingId::hole(0, 1)).is_some());
        assert!(parcel.ring(RingId::hole(1, 0)).is_none());
    }
}
