//! 图层与样式表
//!
//! 土地按类别归入 `КАТ_*` 图层，建筑物、构筑物和未完工建筑各有独立的 `ОКС_*` 图层。
//! 样式表固定不变，只对外提供只读参数（颜色、线型、线宽、填充）。

use crate::parcel::{attr, ObjectKind, Parcel};
use crate::properties::{Color, FillPattern, LineType, LineWeight};
use serde::{Deserialize, Serialize};

/// 土地类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandCategory {
    Agricultural,
    Settlements,
    Industrial,
    ProtectedAreas,
    Forest,
    Water,
    Reserve,
    Unset,
}

impl LandCategory {
    pub const ALL: [LandCategory; 8] = [
        LandCategory::Settlements,
        LandCategory::Agricultural,
        LandCategory::Industrial,
        LandCategory::ProtectedAreas,
        LandCategory::Forest,
        LandCategory::Water,
        LandCategory::Reserve,
        LandCategory::Unset,
    ];

    /// 按 EGRN 类别代码（dCategories）
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code.trim() {
            "003001000000" => LandCategory::Agricultural,
            "003002000000" => LandCategory::Settlements,
            "003003000000" => LandCategory::Industrial,
            "003004000000" => LandCategory::ProtectedAreas,
            "003005000000" => LandCategory::Forest,
            "003006000000" => LandCategory::Water,
            "003007000000" => LandCategory::Reserve,
            "003008000000" => LandCategory::Unset,
            _ => return None,
        })
    }

    /// 按类别名称做部分匹配，空值和 "-" 视为未确定
    pub fn from_text(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase().replace('ё', "е");
        if normalized.is_empty() || normalized == "-" {
            return Some(LandCategory::Unset);
        }
        const KEYS: [(&str, LandCategory); 8] = [
            ("населенных пунктов", LandCategory::Settlements),
            ("сельскохозяйственного", LandCategory::Agricultural),
            ("промышленности", LandCategory::Industrial),
            ("особо охраняемых", LandCategory::ProtectedAreas),
            ("лесного фонда", LandCategory::Forest),
            ("водного фонда", LandCategory::Water),
            ("запаса", LandCategory::Reserve),
            ("не установлена", LandCategory::Unset),
        ];
        KEYS.iter()
            .find(|(key, _)| normalized.contains(key))
            .map(|(_, category)| *category)
    }

    /// 代码优先，其次名称；都无法识别时为未确定
    pub fn classify(code: Option<&str>, text: Option<&str>) -> Self {
        code.and_then(Self::from_code)
            .or_else(|| text.and_then(Self::from_text))
            .unwrap_or(LandCategory::Unset)
    }

    pub fn layer_name(&self) -> &'static str {
        match self {
            LandCategory::Settlements => "КАТ_Населенные_пункты",
            LandCategory::Agricultural => "КАТ_Сельхоз",
            LandCategory::Industrial => "КАТ_Промышленность",
            LandCategory::ProtectedAreas => "КАТ_ООТ",
            LandCategory::Forest => "КАТ_Лесной_фонд",
            LandCategory::Water => "КАТ_Водный_фонд",
            LandCategory::Reserve => "КАТ_Запас",
            LandCategory::Unset => "КАТ_Не_установлена",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LandCategory::Settlements => "Земли населённых пунктов",
            LandCategory::Agricultural => "Земли сельскохозяйственного назначения",
            LandCategory::Industrial => "Земли промышленности и иного специального назначения",
            LandCategory::ProtectedAreas => "Земли особо охраняемых территорий и объектов",
            LandCategory::Forest => "Земли лесного фонда",
            LandCategory::Water => "Земли водного фонда",
            LandCategory::Reserve => "Земли запаса",
            LandCategory::Unset => "Категория не установлена",
        }
    }
}

/// 图层样式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    /// 图层名称
    pub name: String,
    /// 描述
    pub description: String,
    pub color: Color,
    pub line_type: LineType,
    pub line_weight: LineWeight,
    pub fill: FillPattern,
    /// 填充颜色，ByLayer 时与图层颜色相同
    pub fill_color: Color,
}

impl LayerStyle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            color: Color::WHITE,
            line_type: LineType::Continuous,
            line_weight: LineWeight::THIN,
            fill: FillPattern::None,
            fill_color: Color::BY_LAYER,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 设置颜色
    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// 设置线型
    pub fn with_line_type(mut self, line_type: LineType) -> Self {
        self.line_type = line_type;
        self
    }

    pub fn with_line_weight(mut self, line_weight: LineWeight) -> Self {
        self.line_weight = line_weight;
        self
    }

    pub fn with_fill(mut self, fill: FillPattern) -> Self {
        self.fill = fill;
        self
    }

    /// 实际使用的填充颜色
    pub fn effective_fill_color(&self) -> Color {
        if self.fill_color.is_by_layer() {
            self.color
        } else {
            self.fill_color
        }
    }
}

pub const BUILDINGS_LAYER: &str = "ОКС_Здания";
pub const CONSTRUCTIONS_LAYER: &str = "ОКС_Сооружения";
pub const UNFINISHED_LAYER: &str = "ОКС_ОНС";
/// 标注图层
pub const LABELS_LAYER: &str = "Подписи";

/// 固定样式表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleTable {
    layers: Vec<LayerStyle>,
}

impl StyleTable {
    /// 标准样式表
    pub fn standard() -> Self {
        let hatch = FillPattern::Ansi31 { spacing_mm: 3.0 };
        let land = |category: LandCategory, color: Color| {
            LayerStyle::new(category.layer_name())
                .with_description(category.description())
                .with_color(color)
                .with_line_weight(LineWeight::MAIN)
                .with_fill(hatch)
        };

        let mut layers = vec![
            land(LandCategory::Settlements, Color::RED),
            land(LandCategory::Agricultural, Color::OLIVE),
            land(LandCategory::Industrial, Color::MAGENTA),
            land(LandCategory::ProtectedAreas, Color::DARK_GREEN),
            land(LandCategory::Forest, Color::GREEN),
            land(LandCategory::Water, Color::SKY_BLUE),
            land(LandCategory::Reserve, Color::BROWN),
            land(LandCategory::Unset, Color::GRAY),
        ];
        layers.push(
            LayerStyle::new(BUILDINGS_LAYER)
                .with_description("Здания")
                .with_color(Color::ORANGE)
                .with_line_weight(LineWeight::BOLD)
                .with_fill(FillPattern::Solid),
        );
        layers.push(
            LayerStyle::new(CONSTRUCTIONS_LAYER)
                .with_description("Сооружения")
                .with_color(Color::BLUE)
                .with_line_weight(LineWeight::MAIN)
                .with_fill(hatch),
        );
        layers.push(
            LayerStyle::new(UNFINISHED_LAYER)
                .with_description("Объекты незавершённого строительства")
                .with_color(Color::CYAN)
                .with_line_type(LineType::Dashed)
                .with_line_weight(LineWeight::MAIN)
                .with_fill(FillPattern::Ansi31 { spacing_mm: 5.0 }),
        );
        layers.push(
            LayerStyle::new(LABELS_LAYER)
                .with_description("Подписи кадастровых номеров и площадей")
                .with_color(Color::WHITE),
        );
        Self { layers }
    }

    pub fn layers(&self) -> &[LayerStyle] {
        &self.layers
    }

    pub fn get(&self, name: &str) -> Option<&LayerStyle> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// 地块所属图层名
    pub fn layer_name_for(parcel: &Parcel) -> &'static str {
        match parcel.kind {
            ObjectKind::Land => LandCategory::classify(
                parcel.attribute(attr::CATEGORY_CODE),
                parcel.attribute(attr::CATEGORY),
            )
            .layer_name(),
            ObjectKind::Building => BUILDINGS_LAYER,
            ObjectKind::Construction => CONSTRUCTIONS_LAYER,
            ObjectKind::UnderConstruction => UNFINISHED_LAYER,
        }
    }

    /// 地块的图层样式；表中缺失时使用同名的默认样式
    pub fn style_for(&self, parcel: &Parcel) -> LayerStyle {
        let name = Self::layer_name_for(parcel);
        self.get(name)
            .cloned()
            .unwrap_or_else(|| LayerStyle::new(name))
    }
}

impl Default for StyleTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parcel::CadastralNumber;

    #[test]
    fn test_classify_by_code_and_text() {
        assert_eq!(
            LandCategory::classify(Some("003002000000"), None),
            LandCategory::Settlements
        );
        assert_eq!(
            LandCategory::classify(None, Some("Земли населённых пунктов")),
            LandCategory::Settlements
        );
        assert_eq!(
            LandCategory::classify(None, Some("  земли лесного фонда ")),
            LandCategory::Forest
        );
        assert_eq!(
            LandCategory::classify(Some("999"), Some("Земли запаса")),
            LandCategory::Reserve
        );
        assert_eq!(LandCategory::classify(None, Some("-")), LandCategory::Unset);
        assert_eq!(LandCategory::classify(None, Some("что-то")), LandCategory::Unset);
        assert_eq!(LandCategory::classify(None, None), LandCategory::Unset);
    }

    #[test]
    fn test_style_for_parcel() {
        let table = StyleTable::standard();
        let mut p = Parcel::new(
            CadastralNumber::parse("23:43:0302001:15").unwrap(),
            ObjectKind::Land,
        );
        assert_eq!(table.style_for(&p).name, "КАТ_Не_установлена");

        p.attributes
            .insert(attr::CATEGORY.to_string(), "Земли сельскохозяйственного назначения".to_string());
        let style = table.style_for(&p);
        assert_eq!(style.name, "КАТ_Сельхоз");
        assert_eq!(style.line_weight, LineWeight::MAIN);
        assert_eq!(style.effective_fill_color(), Color::OLIVE);

        p.kind = ObjectKind::Building;
        assert_eq!(table.style_for(&p).name, BUILDINGS_LAYER);
    }

    #[test]
    fn test_every_layer_is_styled() {
        let table = StyleTable::standard();
        for category in LandCategory::ALL {
            assert!(table.get(category.layer_name()).is_some());
        }
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("КАТ_Водный_фонд"));
    }
}
