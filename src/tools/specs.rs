// 工具参数 Schema：模型可见的声明，调用方身份由服务端注入，绝不出现在这里。
use serde_json::{json, Value};

pub fn tool_specs() -> Vec<Value> {
    vec![
        function_spec(
            "add_task",
            "Create a new task for the current user.",
            json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Short task title, 1 to 200 characters."
                    },
                    "description": {
                        "type": "string",
                        "description": "Optional longer description, up to 1000 characters."
                    },
                    "priority": {
                        "type": "string",
                        "enum": ["high", "medium", "low"],
                        "description": "Task priority, defaults to medium."
                    },
                    "category": {
                        "type": "string",
                        "enum": ["work", "personal", "shopping", "health", "other"],
                        "description": "Task category, defaults to personal."
                    }
                },
                "required": ["title"]
            }),
        ),
        function_spec(
            "list_tasks",
            "List the current user's tasks, optionally filtered by status.",
            json!({
                "type": "object",
                "properties": {
                    "status": {
                        "type": "string",
                        "enum": ["all", "pending", "completed"],
                        "description": "Which tasks to return, defaults to all."
                    }
                }
            }),
        ),
        function_spec(
            "complete_task",
            "Toggle completion of a task. A completed task becomes pending again.",
            task_ref_parameters(),
        ),
        function_spec(
            "delete_task",
            "Permanently delete a task.",
            task_ref_parameters(),
        ),
        function_spec(
            "update_task",
            "Update one or more fields of an existing task.",
            json!({
                "type": "object",
                "properties": {
                    "task_id": {
                        "type": "string",
                        "description": "Identifier of the task to update."
                    },
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "priority": {
                        "type": "string",
                        "enum": ["high", "medium", "low"]
                    },
                    "category": {
                        "type": "string",
                        "enum": ["work", "personal", "shopping", "health", "other"]
                    }
                },
                "required": ["task_id"]
            }),
        ),
    ]
}

fn task_ref_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": {
                "type": "string",
                "description": "Identifier of the task."
            }
        },
        "required": ["task_id"]
    })
}

fn function_spec(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_cover_all_tools() {
        let names: Vec<String> = tool_specs()
            .iter()
            .map(|spec| spec["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            ["add_task", "list_tasks", "complete_task", "delete_task", "update_task"]
        );
    }

    #[test]
    fn schemas_never_expose_caller_identity() {
        for spec in tool_specs() {
            let text = spec.to_string();
            let name = spec["function"]["name"].as_str().unwrap();
            assert!(
                !text.contains("user_id"),
                "schema for {name} leaks user_id"
            );
        }
    }
}
