//! The slice of the DevTools wire protocol the connector speaks: one command out,
//! two event kinds in.

use crate::types::{ConsoleLine, FeedEvent, UncaughtError};
use serde_json::{json, Value};

pub const RUNTIME_ENABLE: &str = "Runtime.enable";
pub const CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
pub const EXCEPTION_THROWN: &str = "Runtime.exceptionThrown";

pub fn command(id: u64, method: &str) -> String {
    json!({ "id": id, "method": method }).to_string()
}

/// Maps one incoming websocket message to a feed event. Command responses and events
/// outside the console/exception pair yield `None`.
pub fn parse_event(message: &Value) -> Option<FeedEvent> {
    let method = message.get("method")?.as_str()?;
    let params = message.get("params")?;
    match method {
        CONSOLE_API_CALLED => Some(FeedEvent::Console(console_line(params))),
        EXCEPTION_THROWN => Some(FeedEvent::UncaughtError(uncaught_error(params))),
        _ => None,
    }
}

fn console_line(params: &Value) -> ConsoleLine {
    let kind = params
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("log");
    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| args.iter().map(remote_object_text).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    ConsoleLine::new(kind, text)
}

/// Renders a `RemoteObject` the way the console would print it.
fn remote_object_text(arg: &Value) -> String {
    if let Some(value) = arg.get("value") {
        return match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    }
    if let Some(unserializable) = arg.get("unserializableValue").and_then(Value::as_str) {
        return unserializable.to_string();
    }
    if let Some(description) = arg.get("description").and_then(Value::as_str) {
        return description.to_string();
    }
    arg.get("type")
        .and_then(Value::as_str)
        .unwrap_or("undefined")
        .to_string()
}

fn uncaught_error(params: &Value) -> UncaughtError {
    let details = params.get("exceptionDetails").unwrap_or(&Value::Null);
    let description = details
        .get("exception")
        .and_then(|exception| exception.get("description"))
        .and_then(Value::as_str);

    let message = description
        .and_then(|d| d.lines().next())
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Uncaught exception")
        .to_string();

    let stack = description
        .filter(|d| d.contains('\n'))
        .map(str::to_string)
        .or_else(|| format_call_frames(details.get("stackTrace")?));

    UncaughtError { message, stack }
}

fn format_call_frames(stack_trace: &Value) -> Option<String> {
    let frames = stack_trace.get("callFrames")?.as_array()?;
    if frames.is_empty() {
        return None;
    }
    let lines: Vec<String> = frames
        .iter()
        .map(|frame| {
            let function = frame
                .get("functionName")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .unwrap_or("<anonymous>");
            let url = frame.get("url").and_then(Value::as_str).unwrap_or("");
            let line = frame.get("lineNumber").and_then(Value::as_u64).unwrap_or(0) + 1;
            let column = frame.get("columnNumber").and_then(Value::as_u64).unwrap_or(0) + 1;
            format!("    at {function} ({url}:{line}:{column})")
        })
        .collect();
    Some(lines.join("\n"))
}
