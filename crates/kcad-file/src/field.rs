//! 逐字段的解析结果
//!
//! 源文档中一个字段可能存在、缺失或无法解析，三者的处理不同：
//! 缺失按未知处理，格式错误则需要记录问题。

use std::str::FromStr;

/// 字段取值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<T> {
    Present(T),
    Missing,
    /// 保留原始文本
    Malformed(String),
}

impl<T> FieldValue<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, FieldValue::Present(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, FieldValue::Malformed(_))
    }

    /// 转为 Option，格式错误按缺失处理
    pub fn present(self) -> Option<T> {
        match self {
            FieldValue::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FieldValue<U> {
        match self {
            FieldValue::Present(v) => FieldValue::Present(f(v)),
            FieldValue::Missing => FieldValue::Missing,
            FieldValue::Malformed(raw) => FieldValue::Malformed(raw),
        }
    }
}

impl FieldValue<String> {
    /// 文本字段：空白视为缺失
    pub fn text(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(t) if !t.is_empty() => FieldValue::Present(t.to_string()),
            _ => FieldValue::Missing,
        }
    }
}

impl FieldValue<f64> {
    /// 数值字段，接受小数逗号和数字间的空格（千分位）
    pub fn number(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|t| !t.is_empty()) else {
            return FieldValue::Missing;
        };
        match parse_decimal(raw) {
            Some(v) => FieldValue::Present(v),
            None => FieldValue::Malformed(raw.to_string()),
        }
    }
}

/// 解析十进制数，逗号作小数点，拒绝非有限值
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    f64::from_str(&cleaned).ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_forms() {
        assert_eq!(parse_decimal("480123,45"), Some(480123.45));
        assert_eq!(parse_decimal(" 1 200.5 "), Some(1200.5));
        assert_eq!(parse_decimal("-12.5"), Some(-12.5));
        assert_eq!(parse_decimal("1e3"), Some(1000.0));
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_decimal("12.3.4"), None);
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_field_states() {
        assert_eq!(FieldValue::number(None), FieldValue::Missing);
        assert_eq!(FieldValue::number(Some("  ")), FieldValue::Missing);
        assert_eq!(FieldValue::number(Some("1500")), FieldValue::Present(1500.0));
        assert_eq!(
            FieldValue::number(Some("около 1500")),
            FieldValue::Malformed("около 1500".to_string())
        );
        assert!(FieldValue::number(Some("x")).present().is_none());
        assert_eq!(
            FieldValue::text(Some(" Москва ")).map(|s| s.len()),
            FieldValue::Present("Москва".len())
        );
    }
}
