// 工具集合：封闭的枚举 + 类型化参数，解析即校验。
mod gateway;
mod specs;

use crate::storage::TaskFilter;
use serde::Deserialize;
use serde_json::Value;

pub use gateway::{ErrorCode, GatewayError, ToolGateway, ToolOutcome};
pub use specs::tool_specs;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

const PRIORITIES: [&str; 3] = ["high", "medium", "low"];
const CATEGORIES: [&str; 5] = ["work", "personal", "shopping", "health", "other"];

#[derive(Debug, Clone, Deserialize)]
pub struct AddTaskArgs {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksArgs {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRefArgs {
    pub task_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskArgs {
    pub task_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// 网关可执行的全部工具。新增工具必须同时补充 specs 与 dispatch。
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    AddTask(AddTaskArgs),
    ListTasks(ListTasksArgs),
    CompleteTask(TaskRefArgs),
    DeleteTask(TaskRefArgs),
    UpdateTask(UpdateTaskArgs),
}

impl ToolInvocation {
    pub fn parse(tool_name: &str, arguments: &Value) -> Result<Self, GatewayError> {
        match tool_name {
            "add_task" => {
                let mut args: AddTaskArgs = decode_args(arguments)?;
                args.title = validate_title(&args.title)?;
                args.description = validate_description(args.description.as_deref())?;
                args.priority = Some(normalize_priority(args.priority.as_deref())?);
                args.category = Some(normalize_category(args.category.as_deref())?);
                Ok(Self::AddTask(args))
            }
            "list_tasks" => {
                let args: ListTasksArgs = decode_args(arguments)?;
                // 提前拒绝非法过滤值，避免静默回退到 all。
                parse_status_filter(args.status.as_deref())?;
                Ok(Self::ListTasks(args))
            }
            "complete_task" => Ok(Self::CompleteTask(decode_task_ref(arguments)?)),
            "delete_task" => Ok(Self::DeleteTask(decode_task_ref(arguments)?)),
            "update_task" => {
                let mut args: UpdateTaskArgs = decode_args(arguments)?;
                args.task_id = validate_task_id(&args.task_id)?;
                if args.title.is_none()
                    && args.description.is_none()
                    && args.priority.is_none()
                    && args.category.is_none()
                {
                    return Err(GatewayError::validation(
                        "at least one field to update must be provided",
                        Some("fields"),
                    ));
                }
                if let Some(title) = args.title.as_deref() {
                    args.title = Some(validate_title(title)?);
                }
                if args.description.is_some() {
                    args.description = validate_description(args.description.as_deref())?;
                }
                if let Some(priority) = args.priority.as_deref() {
                    args.priority = Some(normalize_priority(Some(priority))?);
                }
                if let Some(category) = args.category.as_deref() {
                    args.category = Some(normalize_category(Some(category))?);
                }
                Ok(Self::UpdateTask(args))
            }
            // 注册表之外的工具名属于配置故障，不是参数问题。
            other => Err(GatewayError::internal(format!("unknown tool: {other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddTask(_) => "add_task",
            Self::ListTasks(_) => "list_tasks",
            Self::CompleteTask(_) => "complete_task",
            Self::DeleteTask(_) => "delete_task",
            Self::UpdateTask(_) => "update_task",
        }
    }
}

fn decode_args<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, GatewayError> {
    if !arguments.is_object() {
        return Err(GatewayError::validation(
            "tool arguments must be a JSON object",
            None,
        ));
    }
    serde_json::from_value(arguments.clone())
        .map_err(|err| GatewayError::validation(format!("invalid arguments: {err}"), None))
}

fn decode_task_ref(arguments: &Value) -> Result<TaskRefArgs, GatewayError> {
    let mut args: TaskRefArgs = decode_args(arguments)?;
    args.task_id = validate_task_id(&args.task_id)?;
    Ok(args)
}

fn validate_task_id(task_id: &str) -> Result<String, GatewayError> {
    let trimmed = task_id.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation(
            "task_id must not be empty",
            Some("task_id"),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_title(title: &str) -> Result<String, GatewayError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::validation(
            "title must not be empty",
            Some("title"),
        ));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(GatewayError::validation(
            format!("title must be at most {MAX_TITLE_CHARS} characters"),
            Some("title"),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_description(description: Option<&str>) -> Result<Option<String>, GatewayError> {
    let Some(text) = description else {
        return Ok(None);
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(GatewayError::validation(
            format!("description must be at most {MAX_DESCRIPTION_CHARS} characters"),
            Some("description"),
        ));
    }
    Ok(Some(trimmed.to_string()))
}

fn normalize_priority(priority: Option<&str>) -> Result<String, GatewayError> {
    let value = priority.map(str::trim).filter(|v| !v.is_empty());
    let Some(value) = value else {
        return Ok("medium".to_string());
    };
    let lowered = value.to_ascii_lowercase();
    if PRIORITIES.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(GatewayError::validation(
            format!("priority must be one of {PRIORITIES:?}"),
            Some("priority"),
        ))
    }
}

fn normalize_category(category: Option<&str>) -> Result<String, GatewayError> {
    let value = category.map(str::trim).filter(|v| !v.is_empty());
    let Some(value) = value else {
        return Ok("personal".to_string());
    };
    let lowered = value.to_ascii_lowercase();
    if CATEGORIES.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(GatewayError::validation(
            format!("category must be one of {CATEGORIES:?}"),
            Some("category"),
        ))
    }
}

pub(crate) fn parse_status_filter(status: Option<&str>) -> Result<TaskFilter, GatewayError> {
    match status.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(TaskFilter::All),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "pending" => Ok(TaskFilter::Pending),
            "completed" => Ok(TaskFilter::Completed),
            other => Err(GatewayError::validation(
                format!("status must be all, pending or completed, got {other}"),
                Some("status"),
            )),
        },
    }
}

pub(crate) use parse_status_filter as status_filter;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_task_trims_and_defaults() {
        let parsed = ToolInvocation::parse(
            "add_task",
            &json!({"title": "  buy milk  ", "description": "   "}),
        )
        .expect("parse");
        match parsed {
            ToolInvocation::AddTask(args) => {
                assert_eq!(args.title, "buy milk");
                assert_eq!(args.description, None);
                assert_eq!(args.priority.as_deref(), Some("medium"));
                assert_eq!(args.category.as_deref(), Some("personal"));
            }
            other => panic!("unexpected invocation: {other:?}"),
        }
    }

    #[test]
    fn add_task_rejects_bad_title() {
        let err = ToolInvocation::parse("add_task", &json!({"title": "   "})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);

        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        let err = ToolInvocation::parse("add_task", &json!({"title": long})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn update_task_requires_some_field() {
        let err =
            ToolInvocation::parse("update_task", &json!({"task_id": "task_1"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("at least one"));
    }

    #[test]
    fn list_tasks_rejects_unknown_status() {
        let err = ToolInvocation::parse("list_tasks", &json!({"status": "done"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(ToolInvocation::parse("list_tasks", &json!({"status": "Pending"})).is_ok());
    }

    #[test]
    fn unknown_tool_is_an_internal_fault() {
        let err = ToolInvocation::parse("drop_tables", &json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(err.message.contains("drop_tables"));
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = ToolInvocation::parse("add_task", &json!("title")).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }
}
