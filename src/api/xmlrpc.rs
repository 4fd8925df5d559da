use std::collections::BTreeMap;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a struct value from `(name, value)` pairs.
    pub fn record<I, K>(members: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Struct(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(key),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Double(d) => Some(*d as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Scalar rendered as text; identifiers may arrive as ints or strings.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::DateTime(s) | Value::Base64(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Nil | Value::Array(_) | Value::Struct(_) => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<&[String]> for Value {
    fn from(items: &[String]) -> Self {
        Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Nil => out.push_str("<nil/>"),
        Value::Bool(b) => out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" }),
        Value::Int(i) if i32::try_from(*i).is_ok() => out.push_str(&format!("<int>{}</int>", i)),
        Value::Int(i) => out.push_str(&format!("<i8>{}</i8>", i)),
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Base64(s) => {
            out.push_str("<base64>");
            out.push_str(s);
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

/// Decodes a `methodResponse`. A `<fault>` becomes [`ApiError::Fault`].
pub fn decode_response(xml: &str) -> ApiResult<Value> {
    let root = parse_document(xml)?;
    let response = root
        .child("methodResponse")
        .ok_or_else(|| ApiError::Decode("missing methodResponse".to_string()))?;

    if let Some(fault) = response.child("fault") {
        let value = fault
            .child("value")
            .ok_or_else(|| ApiError::Decode("fault without value".to_string()))
            .and_then(parse_value)?;
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or_default();
        let message = value
            .get("faultString")
            .and_then(Value::to_text)
            .unwrap_or_default();
        return Err(ApiError::Fault {
            code: i32::try_from(code).unwrap_or_default(),
            message,
        });
    }

    response
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| ApiError::Decode("response has no return value".to_string()))
        .and_then(parse_value)
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(raw: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(raw).into_owned(),
            ..Default::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn malformed<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::Decode(e.to_string())
}

fn open_element(stack: &mut [Element]) -> ApiResult<&mut Element> {
    stack
        .last_mut()
        .ok_or_else(|| ApiError::Decode("unbalanced document".to_string()))
}

// Text is kept verbatim: page sources may start or end with whitespace.
fn parse_document(xml: &str) -> ApiResult<Element> {
    let mut reader = Reader::from_str(xml);
    let mut stack = vec![Element::default()];

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => stack.push(Element::named(e.local_name().as_ref())),
            Event::Empty(e) => {
                let element = Element::named(e.local_name().as_ref());
                open_element(&mut stack)?.children.push(element);
            }
            Event::End(_) => {
                let element = match stack.pop() {
                    Some(element) if !stack.is_empty() => element,
                    _ => return Err(ApiError::Decode("unexpected closing tag".to_string())),
                };
                open_element(&mut stack)?.children.push(element);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?;
                open_element(&mut stack)?.text.push_str(&text);
            }
            Event::CData(c) => {
                let raw = c.into_inner();
                open_element(&mut stack)?
                    .text
                    .push_str(&String::from_utf8_lossy(&raw));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(root), true) => Ok(root),
        _ => Err(ApiError::Decode("unexpected end of document".to_string())),
    }
}

fn parse_value(element: &Element) -> ApiResult<Value> {
    let Some(typed) = element.children.first() else {
        return Ok(Value::String(element.text.clone()));
    };

    match typed.name.as_str() {
        "i4" | "int" | "i8" => typed.text.trim().parse().map(Value::Int).map_err(malformed),
        "boolean" => Ok(Value::Bool(matches!(typed.text.trim(), "1" | "true"))),
        "double" => typed.text.trim().parse().map(Value::Double).map_err(malformed),
        "string" => Ok(Value::String(typed.text.clone())),
        "dateTime.iso8601" => Ok(Value::DateTime(typed.text.trim().to_string())),
        "base64" => Ok(Value::Base64(typed.text.trim().to_string())),
        "nil" => Ok(Value::Nil),
        "array" => {
            let items = match typed.child("data") {
                Some(data) => data
                    .children
                    .iter()
                    .filter(|c| c.name == "value")
                    .map(parse_value)
                    .collect::<ApiResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(Value::Array(items))
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|c| c.name == "member") {
                let name = member
                    .child("name")
                    .map(|n| n.text.clone())
                    .ok_or_else(|| ApiError::Decode("struct member without name".to_string()))?;
                let value = match member.child("value") {
                    Some(v) => parse_value(v)?,
                    None => Value::Nil,
                };
                members.insert(name, value);
            }
            Ok(Value::Struct(members))
        }
        other => Err(ApiError::Decode(format!("unsupported value type '{}'", other))),
    }
}
