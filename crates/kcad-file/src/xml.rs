//! 最小 XML 文档树
//!
//! EGRN 各版本的 XSD 差异较大，解析器不绑定具体模式，
//! 先用 quick-xml 构建只含元素名（去掉命名空间前缀）、属性、文本和子元素的树，
//! 再按路径取值。

use crate::error::{FileError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// XML 元素
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// 本地名（不含前缀）
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// 直接文本内容（已去除首尾空白）
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 第一个同名子元素
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// 按子元素路径查找
    pub fn path(&self, path: &[&str]) -> Option<&XmlElement> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// 路径处的非空文本
    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.path(path).and_then(XmlElement::non_empty_text)
    }

    pub fn non_empty_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 先序遍历所有后代（不含自身）
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// 第一个同名后代
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.descendants().find(|e| e.name == name)
    }
}

/// 先序后代迭代器
pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// 去掉命名空间前缀
pub fn local_name(qualified: &str) -> &str {
    match qualified.rfind(':') {
        Some(pos) => &qualified[pos + 1..],
        None => qualified,
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| FileError::InvalidFormat(e.to_string()))?
        .to_string();
    let mut element = XmlElement::new(local_name(&name));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| FileError::InvalidFormat(e.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| FileError::InvalidFormat(e.to_string()))?;
        // 属性值中的实体引用由 quick-xml 展开
        let value = attr
            .decode_and_unescape_value(start.decoder())
            .map_err(|e| FileError::InvalidFormat(e.to_string()))?;
        element
            .attributes
            .push((local_name(key).to_string(), value.trim().to_string()));
    }
    Ok(element)
}

/// 预定义实体与字符引用
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn append_text(stack: &mut [XmlElement], text: &str) {
    if let Some(node) = stack.last_mut() {
        node.text.push_str(text);
    }
}

/// 解析整份文档，返回根元素
pub fn parse_document(text: &str) -> Result<XmlElement> {
    // 文本片段可能被实体引用切开，不能逐段去空白，元素结束时统一处理
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let xml_error = |message: String| FileError::Xml { position, message };

        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(element_from(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = element_from(e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::End(_)) => {
                if let Some(mut element) = stack.pop() {
                    let trimmed = element.text.trim();
                    if trimmed.len() != element.text.len() {
                        element.text = trimmed.to_string();
                    }
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(ref e)) => {
                // 实体引用以单独的 GeneralRef 事件到达
                let text = e.decode().map_err(|e| xml_error(e.to_string()))?;
                append_text(&mut stack, &text);
            }
            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e.as_ref()).map_err(|e| xml_error(e.to_string()))?;
                append_text(&mut stack, text);
            }
            Ok(Event::GeneralRef(ref e)) => {
                let name = e.decode().map_err(|e| xml_error(e.to_string()))?;
                match resolve_entity(&name) {
                    Some(c) => append_text(&mut stack, c.encode_utf8(&mut [0u8; 4])),
                    None => return Err(xml_error(format!("unknown entity &{};", name))),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e.to_string())),
            Ok(_) => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(FileError::Xml {
            position: reader.buffer_position() as u64,
            message: format!("unclosed element <{}>", stack[stack.len() - 1].name),
        });
    }
    root.ok_or_else(|| FileError::Schema("document has no root element".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree() {
        let doc = parse_document(
            r#"<?xml version="1.0"?>
            <ns:root xmlns:ns="urn:x" a="1">
              <item id="7"><name> Участок &quot;Луг&quot; </name></item>
              <item/>
              <![CDATA[raw]]>
            </ns:root>"#,
        )
        .unwrap();
        assert_eq!(doc.name, "root");
        assert_eq!(doc.attribute("a"), Some("1"));
        assert_eq!(doc.children_named("item").count(), 2);
        assert_eq!(doc.text_at(&["item", "name"]), Some("Участок \"Луг\""));
        assert_eq!(doc.child("item").and_then(|i| i.attribute("id")), Some("7"));
        assert_eq!(doc.text, "raw");
        assert_eq!(doc.descendants().count(), 3);
        assert!(doc.find("name").is_some());
    }

    #[test]
    fn test_attribute_entities_are_expanded() {
        let doc = parse_document(
            r#"<root note="&quot;Луг&quot; &amp; поле" code="&#x34;2"><a>x &lt; y &#1046;</a></root>"#,
        )
        .unwrap();
        assert_eq!(doc.attribute("note"), Some("\"Луг\" & поле"));
        assert_eq!(doc.attribute("code"), Some("42"));
        assert_eq!(doc.text_at(&["a"]), Some("x < y Ж"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(parse_document(""), Err(FileError::Schema(_))));
        assert!(matches!(parse_document("just text"), Err(FileError::Schema(_))));
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a><b>").is_err());
    }
}
