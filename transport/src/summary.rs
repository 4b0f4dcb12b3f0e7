//! One-line descriptions of protocol messages for logs.
//!
//! A summary borrows the message and only reads it.

use std::fmt;

use lspbridge_types::{MessageShape, ProtocolMessage};
use serde_json::Value;

/// `Display` adapter that renders a short, log-friendly description of a message.
pub struct MessageSummary<'a>(pub &'a ProtocolMessage);

impl fmt::Display for MessageSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.0;
        let value = message.as_value();
        write!(f, "{}", message.shape().label())?;
        if let Some(method) = message.method() {
            write!(f, " {method}")?;
        }
        if let Some(id) = message.id() {
            write!(f, " id={id}")?;
        }

        match message.shape() {
            MessageShape::Response => describe_response(f, value),
            MessageShape::Request | MessageShape::Notification => {
                describe_params(f, message.method().unwrap_or_default(), value.get("params"))
            }
        }
    }
}

fn describe_params(f: &mut fmt::Formatter<'_>, method: &str, params: Option<&Value>) -> fmt::Result {
    let Some(params) = params else {
        return Ok(());
    };
    let document = params.get("textDocument");
    let uri = document.and_then(|d| d.get("uri")).and_then(Value::as_str);
    let version = document.and_then(|d| d.get("version")).and_then(Value::as_i64);

    match method {
        "initialize" => {
            if let Some(root) = params.get("rootUri").and_then(Value::as_str) {
                write!(f, " rootUri={root}")?;
            }
            if let Some(locale) = params.get("locale").and_then(Value::as_str) {
                write!(f, " locale={locale}")?;
            }
        }
        "textDocument/didChange" => {
            let content_len = params
                .pointer("/contentChanges/0/text")
                .and_then(Value::as_str)
                .map_or(0, str::len);
            write_document(f, uri, version)?;
            write!(f, " contentLen={content_len}")?;
        }
        "textDocument/didOpen" => write_document(f, uri, version)?,
        _ => {
            write_document(f, uri, None)?;
            if let Some(position) = params.get("position") {
                let line = position.get("line").and_then(Value::as_u64);
                let character = position.get("character").and_then(Value::as_u64);
                if let (Some(line), Some(character)) = (line, character) {
                    write!(f, " at {line}:{character}")?;
                }
            }
        }
    }
    Ok(())
}

fn write_document(f: &mut fmt::Formatter<'_>, uri: Option<&str>, version: Option<i64>) -> fmt::Result {
    if let Some(uri) = uri {
        write!(f, " uri={uri}")?;
    }
    if let Some(version) = version {
        write!(f, " version={version}")?;
    }
    Ok(())
}

fn describe_response(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let text = error.get("message").and_then(Value::as_str).unwrap_or_default();
        return write!(f, " error {code}: {text}");
    }
    match value.get("result") {
        None => Ok(()),
        Some(Value::Null) => write!(f, " result=null"),
        Some(Value::Array(items)) => {
            write!(f, " result=array({})", items.len())?;
            match items.first() {
                Some(first) if first.get("label").is_some() => write!(f, " completion items"),
                Some(first) if first.get("range").is_some() && first.get("target").is_some() => {
                    write!(f, " document links")
                }
                _ => Ok(()),
            }
        }
        Some(Value::Object(fields)) => write!(f, " result=object({} fields)", fields.len()),
        Some(other) => write!(f, " result={}", kind(other)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn summary(value: Value) -> String {
        MessageSummary(&ProtocolMessage::new(value)).to_string()
    }

    #[test]
    fn initialize_request() {
        assert_eq!(
            summary(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": { "rootUri": "file:///ws", "locale": "en" }
            })),
            "request initialize id=1 rootUri=file:///ws locale=en"
        );
    }

    #[test]
    fn completion_request_position() {
        assert_eq!(
            summary(json!({
                "jsonrpc": "2.0", "id": 4, "method": "textDocument/completion",
                "params": {
                    "textDocument": { "uri": "file:///ws/main.spx" },
                    "position": { "line": 3, "character": 12 }
                }
            })),
            "request textDocument/completion id=4 uri=file:///ws/main.spx at 3:12"
        );
    }

    #[test]
    fn did_change_notification() {
        assert_eq!(
            summary(json!({
                "jsonrpc": "2.0", "method": "textDocument/didChange",
                "params": {
                    "textDocument": { "uri": "file:///ws/a.spx", "version": 3 },
                    "contentChanges": [{ "text": "hello" }]
                }
            })),
            "notification textDocument/didChange uri=file:///ws/a.spx version=3 contentLen=5"
        );
    }

    #[test]
    fn responses() {
        assert_eq!(
            summary(json!({ "jsonrpc": "2.0", "id": 2, "result": [{ "label": "x" }, { "label": "y" }] })),
            "response id=2 result=array(2) completion items"
        );
        assert_eq!(
            summary(json!({ "jsonrpc": "2.0", "id": 3, "result": null })),
            "response id=3 result=null"
        );
        assert_eq!(
            summary(json!({ "jsonrpc": "2.0", "id": 5, "error": { "code": -32601, "message": "nope" } })),
            "response id=5 error -32601: nope"
        );
    }

    #[test]
    fn summary_leaves_message_untouched() {
        let message = ProtocolMessage::new(json!({ "jsonrpc": "2.0", "method": "x", "params": [1] }));
        let before = message.clone();
        let _ = MessageSummary(&message).to_string();
        assert_eq!(message, before);
    }
}
