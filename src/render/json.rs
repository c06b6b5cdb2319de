//! JSON renderer. Output uses `", "` and `": "` separators.

use super::{CacheOptions, Renderer};
use crate::error::AppError;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, AppError> {
    let mut ser = serde_json::Serializer::with_formatter(Vec::new(), SpacedFormatter);
    value
        .serialize(&mut ser)
        .map_err(|e| AppError::Render(e.to_string()))?;
    String::from_utf8(ser.into_inner()).map_err(|e| AppError::Render(e.to_string()))
}

/// Ignores the template name and serializes the controller's data.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn render(&self, _template: &str, vars: &Map<String, Value>, _cache: &CacheOptions) -> Result<String, AppError> {
        to_json_string(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn separators_have_spaces() {
        assert_eq!(to_json_string(&json!({"ok": true})).unwrap(), r#"{"ok": true}"#);
        assert_eq!(to_json_string(&json!({"a": [1, 2], "b": {}})).unwrap(), r#"{"a": [1, 2], "b": {}}"#);
        assert_eq!(to_json_string(&json!([])).unwrap(), "[]");
    }
}
