//! 坐标系参照与分区参数表
//!
//! 分区表（[`ZoneTable`]）在进程内只初始化一次，之后只读共享。
//! 内置表收录若干地方坐标系（МСК）分区、国家高斯-克吕格 6° 带（СК-42）和 WGS-84；
//! 需要其他分区时可在启动时从 JSON 加载完整的表。

use crate::error::{CoreError, Result};
use crate::math::Point2;
use crate::projection::{DatumShift, Ellipsoid, TmParams};
use crate::transform::{Helmert2D, Transform2D};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// 坐标单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    Metre,
    Degree,
}

/// 工程独立坐标系：相对投影坐标系的平移、旋转与缩放
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    pub name: String,
    /// 局部原点在投影坐标系中的位置
    pub origin_x: f64,
    pub origin_y: f64,
    /// 局部 X 轴相对投影东向的逆时针转角（度）
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl LocalFrame {
    /// 由同名点（局部坐标，投影坐标）标定，返回工程坐标系和拟合残差（米）
    pub fn calibrate(name: impl Into<String>, pairs: &[(Point2, Point2)]) -> Result<(Self, f64)> {
        let fit = Helmert2D::fit(pairs)?;
        let frame = Self {
            name: name.into(),
            origin_x: fit.dx,
            origin_y: fit.dy,
            rotation_deg: fit.rotation.to_degrees(),
            scale: fit.scale,
        };
        Ok((frame, fit.rmse))
    }

    /// 局部 → 投影
    pub fn to_projected(&self) -> Transform2D {
        Transform2D::translation(self.origin_x, self.origin_y)
            .then(&Transform2D::rotation(self.rotation_deg.to_radians()))
            .then(&Transform2D::uniform_scale(self.scale))
    }
}

/// 坐标系类别
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrsKind {
    /// 地方坐标系分区
    Msk { region: String, zone: u8 },
    /// 国家高斯-克吕格 6° 带
    GaussKruger { zone: u8 },
    /// 大地坐标（经纬度）
    Geodetic,
    /// 建立在某投影坐标系上的工程坐标系
    Local {
        base: Box<CoordinateSystemReference>,
        frame: LocalFrame,
    },
}

/// 坐标系参照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSystemReference {
    pub id: String,
    pub kind: CrsKind,
    pub units: Units,
    /// 投影参数；大地坐标与工程坐标系为 None
    pub projection: Option<TmParams>,
    pub ellipsoid: Ellipsoid,
    /// 到 WGS-84 的七参数；WGS-84 本身为 None
    pub to_wgs84: Option<DatumShift>,
}

impl CoordinateSystemReference {
    pub fn wgs84() -> Self {
        Self {
            id: "WGS84".to_string(),
            kind: CrsKind::Geodetic,
            units: Units::Degree,
            projection: None,
            ellipsoid: Ellipsoid::WGS84,
            to_wgs84: None,
        }
    }

    /// СК-42 高斯-克吕格 6° 带
    pub fn gauss_kruger(zone: u8) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(CoreError::UnknownZone(format!("СК-42 зона {}", zone)));
        }
        Ok(Self {
            id: format!("СК-42 зона {}", zone),
            kind: CrsKind::GaussKruger { zone },
            units: Units::Metre,
            projection: Some(TmParams {
                lat_0: 0.0,
                lon_0: 6.0 * zone as f64 - 3.0,
                k_0: 1.0,
                false_easting: zone as f64 * 1_000_000.0 + 500_000.0,
                false_northing: 0.0,
                ellipsoid: Ellipsoid::KRASOVSKY,
            }),
            ellipsoid: Ellipsoid::KRASOVSKY,
            to_wgs84: Some(DatumShift::SK42),
        })
    }

    /// 在投影坐标系上建立工程坐标系
    pub fn local(base: CoordinateSystemReference, frame: LocalFrame) -> Result<Self> {
        if base.units != Units::Metre {
            return Err(CoreError::Transform(format!(
                "local frame {} requires a projected base, got {}",
                frame.name, base.id
            )));
        }
        if !(frame.scale.is_finite() && frame.scale > 0.0) {
            return Err(CoreError::Transform(format!(
                "local frame {} has invalid scale {}",
                frame.name, frame.scale
            )));
        }
        Ok(Self {
            id: frame.name.clone(),
            units: Units::Metre,
            projection: None,
            ellipsoid: base.ellipsoid,
            to_wgs84: base.to_wgs84,
            kind: CrsKind::Local {
                base: Box::new(base),
                frame,
            },
        })
    }

    pub fn is_geodetic(&self) -> bool {
        matches!(self.kind, CrsKind::Geodetic)
    }

    /// 大地基准是否相同（椭球与七参数一致）
    pub fn same_datum(&self, other: &Self) -> bool {
        self.ellipsoid == other.ellipsoid && self.to_wgs84 == other.to_wgs84
    }
}

/// 分区表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneEntry {
    /// 联邦主体代码（地籍编号第一段）
    pub region: String,
    pub zone: u8,
    pub projection: TmParams,
    #[serde(default)]
    pub to_wgs84: Option<DatumShift>,
    /// 使用本分区的地籍区代码
    #[serde(default)]
    pub districts: Vec<String>,
}

impl ZoneEntry {
    pub fn reference(&self) -> CoordinateSystemReference {
        CoordinateSystemReference {
            id: format!("МСК-{} зона {}", self.region, self.zone),
            kind: CrsKind::Msk {
                region: self.region.clone(),
                zone: self.zone,
            },
            units: Units::Metre,
            projection: Some(self.projection),
            ellipsoid: self.projection.ellipsoid,
            to_wgs84: self.to_wgs84,
        }
    }
}

/// 比较两个数字代码（忽略前导零）
fn code_eq(a: &str, b: &str) -> bool {
    match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

fn msk(
    region: &str,
    zone: u8,
    lon_0: f64,
    false_easting: f64,
    false_northing: f64,
    districts: &[&str],
) -> ZoneEntry {
    ZoneEntry {
        region: region.to_string(),
        zone,
        projection: TmParams {
            lat_0: 0.0,
            lon_0,
            k_0: 1.0,
            false_easting,
            false_northing,
            ellipsoid: Ellipsoid::KRASOVSKY,
        },
        to_wgs84: Some(DatumShift::SK42),
        districts: districts.iter().map(|d| d.to_string()).collect(),
    }
}

// 多分区的区：地籍区按其经度落入的分区
const KRASNODAR_WEST: &[&str] = &[
    "01", "05", "08", "09", "11", "12", "13", "14", "16", "18", "20", "25", "26", "27", "28",
    "29", "31", "32", "34", "37", "39", "40", "41", "42", "43", "44", "45", "46", "47", "48",
    "49", "50",
];
const KRASNODAR_EAST: &[&str] = &[
    "02", "03", "04", "06", "07", "10", "15", "17", "19", "21", "22", "23", "24", "30", "33",
    "35", "36", "38",
];
const MOSCOW_WEST: &[&str] = &[
    "01", "02", "03", "04", "07", "08", "09", "10", "11", "12", "13", "18", "19", "20", "21",
    "22", "23", "26", "27", "28", "31", "32", "33",
];
const MOSCOW_EAST: &[&str] = &[
    "05", "06", "14", "15", "16", "17", "24", "25", "29", "30", "34", "35", "36", "37", "38",
    "39",
];
const SVERDLOVSK_WEST: &[&str] = &[
    "03", "04", "06", "07", "08", "11", "13", "14", "15", "16", "18", "19", "21", "22", "28",
    "29", "30", "31", "32", "33", "34", "35", "36", "37", "38", "39", "40", "41",
];
const SVERDLOVSK_EAST: &[&str] = &[
    "01", "02", "05", "09", "10", "12", "17", "20", "23", "24", "25", "26", "27",
];

static BUILTIN: LazyLock<ZoneTable> = LazyLock::new(|| ZoneTable {
    entries: vec![
        msk("23", 1, 37.983_333_333_33, 1_300_000.0, -4_511_057.63, KRASNODAR_WEST),
        msk("23", 2, 40.983_333_333_33, 2_300_000.0, -4_511_057.63, KRASNODAR_EAST),
        msk("50", 1, 37.5, 1_250_000.0, -5_712_900.566, MOSCOW_WEST),
        msk("50", 2, 38.483_333_333_33, 2_250_000.0, -5_712_900.566, MOSCOW_EAST),
        msk("66", 1, 60.05, 1_500_000.0, -5_911_057.63, SVERDLOVSK_WEST),
        msk("66", 2, 63.05, 2_500_000.0, -5_911_057.63, SVERDLOVSK_EAST),
        ZoneEntry {
            region: "77".to_string(),
            zone: 1,
            projection: TmParams {
                lat_0: 55.666_666_666_67,
                lon_0: 37.5,
                k_0: 1.0,
                false_easting: 16.098,
                false_northing: 14.512,
                ellipsoid: Ellipsoid::BESSEL,
            },
            to_wgs84: Some(DatumShift {
                dx: 316.151,
                dy: 78.924,
                dz: 589.65,
                rx: -1.57273,
                ry: 2.69209,
                rz: 2.34693,
                ds: 8.4507,
            }),
            districts: Vec::new(),
        },
    ],
});

/// 识别出的坐标系标识
#[derive(Debug, Clone, PartialEq, Eq)]
enum CrsIdent {
    Msk { region: String, zone: Option<u8> },
    GaussKruger(u8),
    Wgs84,
}

/// 标记之后第一段连续数字
fn digits_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let digits: String = text[start..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!digits.is_empty()).then_some(digits)
}

fn parse_ident(text: &str) -> Option<CrsIdent> {
    let upper = text.trim().to_uppercase();
    let compact: String = upper.chars().filter(|c| !c.is_whitespace()).collect();

    if matches!(compact.as_str(), "WGS84" | "WGS-84" | "EPSG:4326") {
        return Some(CrsIdent::Wgs84);
    }
    // Pulkovo 1942 / Gauss-Kruger zone 4..32
    if let Some(code) = compact.strip_prefix("EPSG:") {
        let code: u32 = code.parse().ok()?;
        return (28404..=28432)
            .contains(&code)
            .then(|| CrsIdent::GaussKruger((code - 28400) as u8));
    }

    let zone_of = |s: &str| {
        digits_after(s, "ЗОНА")
            .or_else(|| digits_after(s, "ZONE"))
            .and_then(|z| z.parse::<u8>().ok())
    };

    for marker in ["МСК", "MSK"] {
        if let Some(pos) = upper.find(marker) {
            let rest = &upper[pos + marker.len()..];
            let region = digits_after(rest, "")?;
            let after_region = &rest[rest.find(region.as_str())? + region.len()..];
            let zone = zone_of(after_region).or_else(|| {
                after_region
                    .trim_start()
                    .strip_prefix(['/', '.', '-'])
                    .and_then(|s| digits_after(s, ""))
                    .and_then(|z| z.parse().ok())
            });
            return Some(CrsIdent::Msk { region, zone });
        }
    }

    for marker in ["СК-42", "СК42", "SK-42", "SK42"] {
        if compact.contains(marker) {
            return zone_of(&upper).map(CrsIdent::GaussKruger);
        }
    }
    for marker in ["GK", "ГК"] {
        if let Some(rest) = compact.strip_prefix(marker) {
            return rest.parse::<u8>().ok().map(CrsIdent::GaussKruger);
        }
    }

    // 纯数字形式 "23.1" 或 "23/1"
    if let Some((region, zone)) = compact.split_once(['.', '/']) {
        if region.chars().all(|c| c.is_ascii_digit()) && !region.is_empty() {
            return Some(CrsIdent::Msk {
                region: region.to_string(),
                zone: zone.parse().ok(),
            });
        }
    }
    None
}

/// 分区参数表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneTable {
    entries: Vec<ZoneEntry>,
}

impl ZoneTable {
    /// 内置表（进程级只读）
    pub fn builtin() -> &'static ZoneTable {
        &BUILTIN
    }

    pub fn new(entries: Vec<ZoneEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            let p = &entry.projection;
            let finite = [p.lat_0, p.lon_0, p.k_0, p.false_easting, p.false_northing]
                .iter()
                .all(|v| v.is_finite());
            if !finite || p.k_0 <= 0.0 || entry.zone == 0 {
                return Err(CoreError::ZoneTable(format!(
                    "invalid parameters for МСК-{} зона {}",
                    entry.region, entry.zone
                )));
            }
            if entries[..i]
                .iter()
                .any(|e| code_eq(&e.region, &entry.region) && e.zone == entry.zone)
            {
                return Err(CoreError::ZoneTable(format!(
                    "duplicate entry МСК-{} зона {}",
                    entry.region, entry.zone
                )));
            }
        }
        Ok(Self { entries })
    }

    /// 从 JSON 数组加载
    pub fn from_json(text: &str) -> Result<Self> {
        let entries: Vec<ZoneEntry> = serde_json::from_str(text)?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[ZoneEntry] {
        &self.entries
    }

    /// 按区代码和分区号查找
    pub fn msk(&self, region: &str, zone: u8) -> Result<CoordinateSystemReference> {
        self.entries
            .iter()
            .find(|e| code_eq(&e.region, region) && e.zone == zone)
            .map(ZoneEntry::reference)
            .ok_or_else(|| CoreError::UnknownZone(format!("МСК-{} зона {}", region, zone)))
    }

    /// 按区和地籍区查找：优先匹配列出该地籍区的分区，单分区的区直接返回
    pub fn for_district(&self, region: &str, district: &str) -> Result<CoordinateSystemReference> {
        let candidates: Vec<&ZoneEntry> = self
            .entries
            .iter()
            .filter(|e| code_eq(&e.region, region))
            .collect();
        if let Some(entry) = candidates
            .iter()
            .find(|e| e.districts.iter().any(|d| code_eq(d, district)))
        {
            return Ok(entry.reference());
        }
        match candidates.as_slice() {
            [only] => Ok(only.reference()),
            _ => Err(CoreError::UnknownZone(format!("{}:{}", region, district))),
        }
    }

    /// 按标识文本解析坐标系
    pub fn resolve(&self, ident: &str) -> Result<CoordinateSystemReference> {
        match parse_ident(ident) {
            Some(CrsIdent::Wgs84) => Ok(CoordinateSystemReference::wgs84()),
            Some(CrsIdent::GaussKruger(zone)) => CoordinateSystemReference::gauss_kruger(zone),
            Some(CrsIdent::Msk {
                region,
                zone: Some(zone),
            }) => self.msk(&region, zone),
            Some(CrsIdent::Msk { region, zone: None }) => {
                let mut matching = self.entries.iter().filter(|e| code_eq(&e.region, &region));
                match (matching.next(), matching.next()) {
                    (Some(only), None) => Ok(only.reference()),
                    _ => Err(CoreError::UnknownZone(ident.to_string())),
                }
            }
            None => Err(CoreError::UnknownZone(ident.to_string())),
        }
    }
}
