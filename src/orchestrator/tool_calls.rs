// 解析模型输出里的 OpenAI 风格 tool_calls 数组。
use serde_json::Value;

#[derive(Debug, Clone)]
pub(crate) struct ParsedToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

pub(crate) fn collect_tool_calls(payload: Option<&Value>) -> Vec<ParsedToolCall> {
    let Some(Value::Array(items)) = payload else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let function = item.get("function")?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())?
                .to_string();
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            Some(ParsedToolCall {
                id,
                name,
                arguments: parse_arguments(function.get("arguments")),
            })
        })
        .collect()
}

fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        // 接口通常把 arguments 编码成 JSON 字符串。
        Some(Value::String(text)) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::Object(Default::default()))
        }
        Some(value @ Value::Object(_)) => value.clone(),
        _ => Value::Object(Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_string_encoded_arguments() {
        let payload = json!([{
            "id": "call_1",
            "function": {
                "name": "add_task",
                "arguments": "{\"title\": \"buy milk\"}"
            }
        }]);
        let calls = collect_tool_calls(Some(&payload));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_1"));
        assert_eq!(calls[0].name, "add_task");
        assert_eq!(calls[0].arguments["title"], "buy milk");
    }

    #[test]
    fn accepts_object_arguments_and_skips_nameless_entries() {
        let payload = json!([
            {"function": {"name": "list_tasks", "arguments": {"status": "pending"}}},
            {"function": {"name": "  ", "arguments": "{}"}},
            {"function": {"arguments": "{}"}},
        ]);
        let calls = collect_tool_calls(Some(&payload));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["status"], "pending");
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let payload = json!([{
            "function": {"name": "list_tasks", "arguments": "not json"}
        }]);
        let calls = collect_tool_calls(Some(&payload));
        assert_eq!(calls[0].arguments, json!({}));
        assert!(collect_tool_calls(None).is_empty());
        assert!(collect_tool_calls(Some(&json!("text"))).is_empty());
    }
}
