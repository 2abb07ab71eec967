// 工具执行网关：校验、归属检查与落库的唯一入口。
use crate::storage::{StorageBackend, TaskRecord};
use crate::tools::{status_filter, ToolInvocation};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError,
    TaskNotFound,
    Unauthorized,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub field: Option<String>,
}

impl GatewayError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self {
            code: ErrorCode::TaskNotFound,
            message: format!("task {task_id} does not exist"),
            field: None,
        }
    }

    pub fn unauthorized(task_id: &str) -> Self {
        Self {
            code: ErrorCode::Unauthorized,
            message: format!("task {task_id} belongs to another user"),
            field: None,
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DatabaseError,
            message: message.into(),
            field: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            field: None,
        }
    }

    /// 回传给模型的结构化失败载荷。
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "status": "error",
            "code": self.code.as_str(),
            "message": self.message,
        });
        if let Some(field) = &self.field {
            payload["field"] = json!(field);
        }
        payload
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug)]
pub struct ToolOutcome {
    pub tool: String,
    pub call_id: String,
    pub result: Result<Value, GatewayError>,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.result.as_ref().err().map(|err| err.code)
    }

    /// 喂回模型的观察内容，成功与失败都走数据通道。
    pub fn to_observation(&self) -> String {
        let payload = match &self.result {
            Ok(data) => data.clone(),
            Err(err) => err.to_payload(),
        };
        payload.to_string()
    }

    /// 面向最终用户的一行摘要。
    pub fn result_preview(&self) -> String {
        match &self.result {
            Err(err) => match err.code {
                ErrorCode::TaskNotFound => "task not found".to_string(),
                ErrorCode::Unauthorized => "not your task".to_string(),
                ErrorCode::ValidationError => format!("invalid input ({})", err.message),
                _ => "failed".to_string(),
            },
            Ok(data) => {
                let title = data.get("title").and_then(Value::as_str).unwrap_or("task");
                match data.get("status").and_then(Value::as_str) {
                    Some("created") => format!("created \"{title}\""),
                    Some("completed") => format!("completed \"{title}\""),
                    Some("pending") => format!("reopened \"{title}\""),
                    Some("deleted") => format!("deleted \"{title}\""),
                    Some("updated") => format!("updated \"{title}\""),
                    _ => match data.get("count").and_then(Value::as_i64) {
                        Some(count) => format!("listed {count} task(s)"),
                        None => "done".to_string(),
                    },
                }
            }
        }
    }
}

pub struct ToolGateway {
    storage: Arc<dyn StorageBackend>,
}

impl ToolGateway {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// 执行一次工具调用。requester_id 由服务端注入，模型参数无法覆盖它。
    pub async fn execute(&self, tool_name: &str, arguments: &Value, requester_id: &str) -> ToolOutcome {
        let call_id = format!("call_{}", Uuid::new_v4().simple());
        let started = Instant::now();
        let result = self.dispatch(tool_name, arguments, requester_id).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => info!(
                tool = tool_name,
                requester = requester_id,
                call_id = call_id.as_str(),
                latency_ms,
                outcome = "ok",
                "工具调用完成"
            ),
            Err(err) => warn!(
                tool = tool_name,
                requester = requester_id,
                call_id = call_id.as_str(),
                latency_ms,
                outcome = err.code.as_str(),
                error = err.message.as_str(),
                "工具调用失败"
            ),
        }

        ToolOutcome {
            tool: tool_name.to_string(),
            call_id,
            result,
        }
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        arguments: &Value,
        requester_id: &str,
    ) -> Result<Value, GatewayError> {
        // 参数校验先于任何副作用。
        let invocation = ToolInvocation::parse(tool_name, arguments)?;
        let storage = self.storage.clone();
        let requester = requester_id.to_string();
        tokio::task::spawn_blocking(move || run_invocation(storage, invocation, &requester))
            .await
            .map_err(|err| GatewayError::internal(format!("tool task panicked: {err}")))?
    }
}

fn run_invocation(
    storage: Arc<dyn StorageBackend>,
    invocation: ToolInvocation,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    match invocation {
        ToolInvocation::AddTask(args) => add_task(storage, args, requester_id),
        ToolInvocation::ListTasks(args) => list_tasks(storage, args, requester_id),
        ToolInvocation::CompleteTask(args) => complete_task(storage, &args.task_id, requester_id),
        ToolInvocation::DeleteTask(args) => delete_task(storage, &args.task_id, requester_id),
        ToolInvocation::UpdateTask(args) => update_task(storage, args, requester_id),
    }
}

fn add_task(
    storage: Arc<dyn StorageBackend>,
    args: crate::tools::AddTaskArgs,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    let now = crate::storage::now_ts();
    let record = TaskRecord {
        task_id: format!("task_{}", Uuid::new_v4().simple()),
        user_id: requester_id.to_string(),
        title: args.title,
        description: args.description,
        priority: args.priority.unwrap_or_else(|| "medium".to_string()),
        category: args.category.unwrap_or_else(|| "personal".to_string()),
        completed: false,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };
    storage
        .insert_task(&record)
        .map_err(|err| GatewayError::database(format!("failed to create task: {err}")))?;
    Ok(json!({
        "task_id": record.task_id,
        "status": "created",
        "title": record.title,
        "priority": record.priority,
        "category": record.category,
    }))
}

fn list_tasks(
    storage: Arc<dyn StorageBackend>,
    args: crate::tools::ListTasksArgs,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    let filter = status_filter(args.status.as_deref())?;
    let tasks = storage
        .list_tasks(requester_id, filter)
        .map_err(|err| GatewayError::database(format!("failed to list tasks: {err}")))?;
    let items: Vec<Value> = tasks.iter().map(task_to_json).collect();
    Ok(json!({
        "tasks": items,
        "count": items.len(),
    }))
}

fn complete_task(
    storage: Arc<dyn StorageBackend>,
    task_id: &str,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    let mut record = load_owned_task(&storage, task_id, requester_id)?;
    let now = crate::storage::now_ts();
    // 重复调用回到未完成，幂等翻转而不是报错。
    record.completed = !record.completed;
    record.completed_at = record.completed.then_some(now);
    record.updated_at = now;
    storage
        .update_task(&record)
        .map_err(|err| GatewayError::database(format!("failed to update task: {err}")))?;
    Ok(json!({
        "task_id": record.task_id,
        "status": if record.completed { "completed" } else { "pending" },
        "title": record.title,
    }))
}

fn delete_task(
    storage: Arc<dyn StorageBackend>,
    task_id: &str,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    let record = load_owned_task(&storage, task_id, requester_id)?;
    storage
        .delete_task(&record.task_id)
        .map_err(|err| GatewayError::database(format!("failed to delete task: {err}")))?;
    Ok(json!({
        "task_id": record.task_id,
        "status": "deleted",
        "title": record.title,
    }))
}

fn update_task(
    storage: Arc<dyn StorageBackend>,
    args: crate::tools::UpdateTaskArgs,
    requester_id: &str,
) -> Result<Value, GatewayError> {
    let mut record = load_owned_task(&storage, &args.task_id, requester_id)?;
    if let Some(title) = args.title {
        record.title = title;
    }
    if let Some(description) = args.description {
        record.description = Some(description);
    }
    if let Some(priority) = args.priority {
        record.priority = priority;
    }
    if let Some(category) = args.category {
        record.category = category;
    }
    record.updated_at = crate::storage::now_ts();
    storage
        .update_task(&record)
        .map_err(|err| GatewayError::database(format!("failed to update task: {err}")))?;
    Ok(json!({
        "task_id": record.task_id,
        "status": "updated",
        "title": record.title,
    }))
}

fn load_owned_task(
    storage: &Arc<dyn StorageBackend>,
    task_id: &str,
    requester_id: &str,
) -> Result<TaskRecord, GatewayError> {
    let record = storage
        .get_task(task_id)
        .map_err(|err| GatewayError::database(format!("failed to load task: {err}")))?
        .ok_or_else(|| GatewayError::task_not_found(task_id))?;
    if record.user_id != requester_id {
        // 存在性探测的取舍：明确告知归属问题，便于模型纠正。
        return Err(GatewayError::unauthorized(task_id));
    }
    Ok(record)
}

fn task_to_json(record: &TaskRecord) -> Value {
    json!({
        "id": record.task_id,
        "title": record.title,
        "description": record.description,
        "completed": record.completed,
        "priority": record.priority,
        "category": record.category,
        "created_at": iso_ts(record.created_at),
    })
}

fn iso_ts(seconds: f64) -> String {
    let millis = (seconds * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|value| value.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    fn temp_gateway() -> (tempfile::TempDir, ToolGateway, Arc<dyn StorageBackend>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("taskwise.db");
        let storage: Arc<dyn StorageBackend> =
            Arc::new(SqliteStorage::new(path.to_string_lossy().to_string()));
        let gateway = ToolGateway::new(storage.clone());
        (dir, gateway, storage)
    }

    async fn create_task(gateway: &ToolGateway, user: &str, title: &str) -> String {
        let outcome = gateway
            .execute("add_task", &json!({"title": title}), user)
            .await;
        outcome.result.expect("create")["task_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn complete_toggles_back_to_pending() {
        let (_dir, gateway, _storage) = temp_gateway();
        let task_id = create_task(&gateway, "user-1", "water plants").await;

        let first = gateway
            .execute("complete_task", &json!({"task_id": task_id}), "user-1")
            .await;
        assert_eq!(first.result.unwrap()["status"], "completed");

        let second = gateway
            .execute("complete_task", &json!({"task_id": task_id}), "user-1")
            .await;
        assert_eq!(second.result.unwrap()["status"], "pending");

        let listed = gateway
            .execute("list_tasks", &json!({"status": "pending"}), "user-1")
            .await;
        assert_eq!(listed.result.unwrap()["count"], 1);
    }

    #[tokio::test]
    async fn other_users_tasks_are_untouchable() {
        let (_dir, gateway, storage) = temp_gateway();
        let task_id = create_task(&gateway, "user-owner", "secret errand").await;

        for tool in ["complete_task", "delete_task"] {
            let outcome = gateway
                .execute(tool, &json!({"task_id": task_id}), "user-intruder")
                .await;
            assert_eq!(outcome.error_code(), Some(ErrorCode::Unauthorized));
        }

        let outcome = gateway
            .execute(
                "update_task",
                &json!({"task_id": task_id, "title": "hijacked"}),
                "user-intruder",
            )
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::Unauthorized));

        // 任务保持原样。
        let record = storage.get_task(&task_id).unwrap().expect("task");
        assert_eq!(record.title, "secret errand");
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn missing_task_reports_not_found() {
        let (_dir, gateway, _storage) = temp_gateway();
        let outcome = gateway
            .execute("delete_task", &json!({"task_id": "task_missing"}), "user-1")
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::TaskNotFound));
    }

    #[tokio::test]
    async fn validation_happens_before_any_write() {
        let (_dir, gateway, _storage) = temp_gateway();
        let outcome = gateway
            .execute("add_task", &json!({"title": ""}), "user-1")
            .await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::ValidationError));

        let listed = gateway.execute("list_tasks", &json!({}), "user-1").await;
        assert_eq!(listed.result.unwrap()["count"], 0);
    }

    #[tokio::test]
    async fn update_changes_only_provided_fields() {
        let (_dir, gateway, storage) = temp_gateway();
        let task_id = create_task(&gateway, "user-1", "draft report").await;

        let outcome = gateway
            .execute(
                "update_task",
                &json!({"task_id": task_id, "priority": "high"}),
                "user-1",
            )
            .await;
        assert_eq!(outcome.result.unwrap()["status"], "updated");

        let record = storage.get_task(&task_id).unwrap().expect("task");
        assert_eq!(record.priority, "high");
        assert_eq!(record.title, "draft report");
        assert_eq!(record.category, "personal");
    }

    #[tokio::test]
    async fn failure_observation_is_structured_data() {
        let (_dir, gateway, _storage) = temp_gateway();
        let outcome = gateway
            .execute("complete_task", &json!({"task_id": "task_missing"}), "user-1")
            .await;
        let observation: Value = serde_json::from_str(&outcome.to_observation()).unwrap();
        assert_eq!(observation["status"], "error");
        assert_eq!(observation["code"], "TASK_NOT_FOUND");
        assert_eq!(outcome.result_preview(), "task not found");
    }
}
