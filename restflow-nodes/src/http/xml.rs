//! xml.rs
//!
//! XML -> JSON 的宽松转换：
//! - 根元素成为唯一的顶层 key；
//! - 属性放在 `_attributes` 下，与子元素并存时文本放在 `_text` 下；
//! - 只有文本的元素直接变成字符串；
//! - 同名兄弟元素合并成数组，单个元素不强制数组；
//! - 标签名中的 `:` 替换为 `-`。

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::node_type::NodeError;

pub const ATTRIBUTES_KEY: &str = "_attributes";
pub const TEXT_KEY: &str = "_text";

struct Frame {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, NodeError> {
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(parse_error)?;
            let key = normalize_name(attr.key.as_ref());
            let value = attr.unescape_value().map_err(parse_error)?;
            attributes.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name: normalize_name(start.name().as_ref()),
            attributes,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim().to_owned();
        if self.attributes.is_empty() && self.children.is_empty() {
            return (self.name, Value::String(text));
        }
        let mut object = Map::new();
        if !self.attributes.is_empty() {
            object.insert(ATTRIBUTES_KEY.to_owned(), Value::Object(self.attributes));
        }
        object.extend(self.children);
        if !text.is_empty() {
            object.insert(TEXT_KEY.to_owned(), Value::String(text));
        }
        (self.name, Value::Object(object))
    }
}

fn normalize_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace(':', "-")
}

fn parse_error(e: impl std::fmt::Display) -> NodeError {
    NodeError::Parse(format!("XML parse error: {e}"))
}

/// 同名 key 再次出现时转为数组。
fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

/// 结束标签不匹配、未闭合或没有根元素时返回 [`NodeError::Parse`]。
pub fn xml_to_json(input: &str) -> Result<Value, NodeError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().check_end_names = true;

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        let event = reader.read_event().map_err(parse_error)?;
        match event {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let (name, value) = Frame::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape().map_err(parse_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| parse_error("unexpected closing tag"))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, value),
                    None => root = Some((name, value)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(parse_error(format!("unclosed tag <{}>", open.name)));
    }
    let (name, value) = root.ok_or_else(|| parse_error("no root element"))?;
    let mut object = Map::new();
    object.insert(name, value);
    Ok(Value::Object(object))
}
