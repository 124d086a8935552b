//! 绘图属性定义
//!
//! 包含颜色（AutoCAD ACI 索引）、线型、线宽（ГОСТ 2.303）、填充图案和文字高度（ГОСТ 2.304）。

use serde::{Deserialize, Serialize};

/// ACI 颜色索引
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u16);

impl Color {
    pub const RED: Color = Color(1);
    pub const YELLOW: Color = Color(2);
    pub const GREEN: Color = Color(3);
    pub const CYAN: Color = Color(4);
    pub const BLUE: Color = Color(5);
    pub const MAGENTA: Color = Color(6);
    pub const WHITE: Color = Color(7);
    pub const GRAY: Color = Color(8);
    pub const LIGHT_GRAY: Color = Color(9);
    pub const ORANGE: Color = Color(30);
    pub const BROWN: Color = Color(34);
    pub const OLIVE: Color = Color(52);
    pub const DARK_GREEN: Color = Color(94);
    pub const SKY_BLUE: Color = Color(140);

    /// 颜色跟随块（ByBlock）
    pub const BY_BLOCK: Color = Color(0);

    /// 颜色跟随图层（ByLayer）
    pub const BY_LAYER: Color = Color(256);

    pub fn aci(&self) -> u16 {
        self.0
    }

    pub fn is_by_layer(&self) -> bool {
        self.0 == 256
    }

    pub fn is_by_block(&self) -> bool {
        self.0 == 0
    }

    /// 近似的 RGB 值（用于 MapInfo 等不识别 ACI 的格式）
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self.0 {
            1 => (255, 0, 0),
            2 => (255, 255, 0),
            3 => (0, 255, 0),
            4 => (0, 255, 255),
            5 => (0, 0, 255),
            6 => (255, 0, 255),
            // 白/黑按打印色取黑
            7 => (0, 0, 0),
            8 => (128, 128, 128),
            9 => (192, 192, 192),
            10..=249 => {
                // 24 个色相，每个色相 10 级：偶数为纯色，奇数为浅色，亮度逐级降低
                let hue = ((self.0 / 10 - 1) * 15) as f64;
                let variant = self.0 % 10;
                let value = [1.0, 0.8, 0.6, 0.5, 0.3][(variant / 2) as usize];
                let saturation = if variant % 2 == 0 { 1.0 } else { 0.5 };
                hsv_to_rgb(hue, saturation, value)
            }
            250..=255 => {
                let level = [51, 91, 132, 173, 214, 255][(self.0 - 250) as usize];
                (level, level, level)
            }
            _ => (0, 0, 0),
        }
    }

    /// 以 0xRRGGBB 表示
    pub fn to_hex(&self) -> u32 {
        let (r, g, b) = self.rgb();
        (r as u32) << 16 | (g as u32) << 8 | b as u32
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BY_LAYER
    }
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_byte = |v: f64| ((v + m) * 255.0).round() as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}

/// 线型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    /// 连续线（实线）
    #[default]
    Continuous,
    /// 虚线
    Dashed,
    /// 点划线
    DashDot,
}

impl LineType {
    pub const ALL: [LineType; 3] = [LineType::Continuous, LineType::Dashed, LineType::DashDot];

    /// DXF 线型名
    pub fn name(&self) -> &'static str {
        match self {
            LineType::Continuous => "CONTINUOUS",
            LineType::Dashed => "DASHED",
            LineType::DashDot => "DASHDOT",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LineType::Continuous => "Solid line",
            LineType::Dashed => "Dashed __ __ __",
            LineType::DashDot => "Dash dot __ . __ .",
        }
    }

    /// 线型的模式数据（图纸毫米，正数表示画线，负数表示空白）
    pub fn pattern(&self) -> Vec<f64> {
        match self {
            LineType::Continuous => vec![],
            LineType::Dashed => vec![6.0, -2.0],
            LineType::DashDot => vec![12.0, -3.0, 0.0, -3.0],
        }
    }

    /// 计算线型的总长度（一个重复单元）
    pub fn pattern_length(&self) -> f64 {
        self.pattern().iter().map(|x| x.abs()).sum()
    }

    /// MapInfo 笔型编号
    pub fn mapinfo_pattern(&self) -> u8 {
        match self {
            LineType::Continuous => 2,
            LineType::Dashed => 5,
            LineType::DashDot => 10,
        }
    }
}

/// 线宽（毫米）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LineWeight {
    /// 跟随图层
    ByLayer,
    /// 指定线宽（毫米）
    Width(f64),
}

/// DXF 允许的线宽值（百分之一毫米）
const DXF_LINEWEIGHTS: [i16; 24] = [
    0, 5, 9, 13, 15, 18, 20, 25, 30, 35, 40, 50, 53, 60, 70, 80, 90, 100, 106, 120, 140, 158, 200,
    211,
];

impl LineWeight {
    /// ГОСТ 2.303 粗实线 S
    pub const MAIN: LineWeight = LineWeight::Width(0.5);
    /// 细实线 S/2
    pub const THIN: LineWeight = LineWeight::Width(0.25);
    /// 加粗线 1.4·S
    pub const BOLD: LineWeight = LineWeight::Width(0.7);

    /// DXF 组码 370 的取值：最接近的标准线宽，ByLayer 为 -1
    pub fn dxf_code(&self) -> i16 {
        match self {
            LineWeight::ByLayer => -1,
            LineWeight::Width(mm) => {
                let target = mm * 100.0;
                DXF_LINEWEIGHTS
                    .iter()
                    .copied()
                    .min_by(|a, b| {
                        (*a as f64 - target)
                            .abs()
                            .total_cmp(&(*b as f64 - target).abs())
                    })
                    .unwrap_or(25)
            }
        }
    }

    /// 打印像素宽度（96dpi），至少 1
    pub fn to_pixels(&self) -> u8 {
        match self {
            LineWeight::ByLayer => 1,
            LineWeight::Width(mm) => ((mm * 96.0 / 25.4).round() as u8).max(1),
        }
    }
}

impl Default for LineWeight {
    fn default() -> Self {
        LineWeight::ByLayer
    }
}

/// 填充图案
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum FillPattern {
    /// 不填充
    #[default]
    None,
    /// 实心填充
    Solid,
    /// 45° 斜线，间距为图纸毫米
    Ansi31 { spacing_mm: f64 },
}

impl FillPattern {
    pub fn is_none(&self) -> bool {
        matches!(self, FillPattern::None)
    }

    /// DXF 图案名
    pub fn dxf_name(&self) -> Option<&'static str> {
        match self {
            FillPattern::None => None,
            FillPattern::Solid => Some("SOLID"),
            FillPattern::Ansi31 { .. } => Some("ANSI31"),
        }
    }

    /// MapInfo 画刷图案编号
    pub fn mapinfo_brush(&self) -> u8 {
        match self {
            FillPattern::None => 1,
            FillPattern::Solid => 2,
            FillPattern::Ansi31 { .. } => 6,
        }
    }
}

/// ГОСТ 2.304 字高系列（毫米）
pub const TEXT_HEIGHTS_MM: [f64; 8] = [1.8, 2.5, 3.5, 5.0, 7.0, 10.0, 14.0, 20.0];

/// 取不小于请求值的标准字高
pub fn standard_text_height(requested_mm: f64) -> f64 {
    TEXT_HEIGHTS_MM
        .iter()
        .copied()
        .find(|h| *h >= requested_mm - 1e-9)
        .unwrap_or(TEXT_HEIGHTS_MM[TEXT_HEIGHTS_MM.len() - 1])
}

/// 图纸毫米 → 模型米
pub fn paper_to_model(mm: f64, drawing_scale: f64) -> f64 {
    mm * drawing_scale / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lineweight_codes() {
        assert_eq!(LineWeight::MAIN.dxf_code(), 50);
        assert_eq!(LineWeight::THIN.dxf_code(), 25);
        assert_eq!(LineWeight::Width(0.33).dxf_code(), 35);
        assert_eq!(LineWeight::ByLayer.dxf_code(), -1);
        assert_eq!(LineWeight::MAIN.to_pixels(), 2);
    }

    #[test]
    fn test_text_heights() {
        assert_eq!(standard_text_height(2.5), 2.5);
        assert_eq!(standard_text_height(3.0), 3.5);
        assert_eq!(standard_text_height(50.0), 20.0);
        assert!((paper_to_model(2.5, 500.0) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_colors() {
        assert_eq!(Color::RED.to_hex(), 0xFF0000);
        assert_eq!(Color(10).rgb(), (255, 0, 0));
        assert_eq!(Color(250).rgb(), (51, 51, 51));
        assert!(Color::default().is_by_layer());
    }
}
