// SQLite 存储实现：单文件 WAL 模式，按调用打开连接。
use crate::storage::{
    ConversationRecord, MessageRecord, StorageBackend, TaskFilter, TaskRecord,
};
use anyhow::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct SqliteStorage {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

impl SqliteStorage {
    pub fn new(db_path: String) -> Self {
        let path = if db_path.trim().is_empty() {
            PathBuf::from("./data/taskwise.db")
        } else {
            PathBuf::from(db_path)
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        self.ensure_db_dir()?;
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(conn)
    }

    fn conn(&self) -> Result<Connection> {
        self.ensure_initialized()?;
        self.open()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                category TEXT NOT NULL DEFAULT 'personal',
                completed INTEGER NOT NULL DEFAULT 0,
                completed_at REAL,
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user_created
                ON tasks (user_id, created_at);

            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at REAL NOT NULL,
                last_activity REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user_activity
                ON conversations (user_id, last_activity);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages (conversation_id, id);",
        )?;
        Ok(())
    }

    fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
        Ok(TaskRecord {
            task_id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
            category: row.get(5)?,
            completed: row.get::<_, i64>(6)? != 0,
            completed_at: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
        Ok(ConversationRecord {
            conversation_id: row.get(0)?,
            user_id: row.get(1)?,
            created_at: row.get(2)?,
            last_activity: row.get(3)?,
        })
    }
}

const TASK_COLUMNS: &str = "task_id, user_id, title, description, priority, category, \
                            completed, completed_at, created_at, updated_at";

impl StorageBackend for SqliteStorage {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.open()?;
        Self::init_schema(&conn)?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn insert_task(&self, record: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (task_id, user_id, title, description, priority, category, \
             completed, completed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.task_id,
                record.user_id,
                record.title,
                record.description,
                record.priority,
                record.category,
                record.completed as i64,
                record.completed_at,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                params![task_id],
                Self::task_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn update_task(&self, record: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, priority = ?4, category = ?5, \
             completed = ?6, completed_at = ?7, updated_at = ?8 WHERE task_id = ?1",
            params![
                record.task_id,
                record.title,
                record.description,
                record.priority,
                record.category,
                record.completed as i64,
                record.completed_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?;
        Ok(())
    }

    fn list_tasks(&self, user_id: &str, filter: TaskFilter) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let clause = match filter {
            TaskFilter::All => "",
            TaskFilter::Pending => " AND completed = 0",
            TaskFilter::Completed => " AND completed = 1",
        };
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1{clause} \
             ORDER BY created_at DESC, task_id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], Self::task_from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    fn insert_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO conversations (conversation_id, user_id, created_at, last_activity) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.conversation_id,
                record.user_id,
                record.created_at,
                record.last_activity,
            ],
        )?;
        Ok(())
    }

    fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT conversation_id, user_id, created_at, last_activity \
                 FROM conversations WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
                Self::conversation_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn find_active_conversation(
        &self,
        user_id: &str,
        cutoff: f64,
    ) -> Result<Option<ConversationRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT conversation_id, user_id, created_at, last_activity \
                 FROM conversations WHERE user_id = ?1 AND last_activity >= ?2 \
                 ORDER BY last_activity DESC LIMIT 1",
                params![user_id, cutoff],
                Self::conversation_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn touch_conversation(&self, conversation_id: &str, last_activity: f64) -> Result<()> {
        let conn = self.conn()?;
        // 单调推进，避免并发回拨活跃时间。
        conn.execute(
            "UPDATE conversations SET last_activity = max(last_activity, ?2) \
             WHERE conversation_id = ?1",
            params![conversation_id, last_activity],
        )?;
        Ok(())
    }

    fn list_conversations(&self, user_id: &str, limit: i64) -> Result<Vec<ConversationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, user_id, created_at, last_activity \
             FROM conversations WHERE user_id = ?1 \
             ORDER BY last_activity DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit.max(1)], Self::conversation_from_row)?;
        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    fn append_message(&self, record: &MessageRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (message_id, conversation_id, role, content, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.message_id,
                record.conversation_id,
                record.role,
                record.content,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn load_recent_messages(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, conversation_id, role, content, created_at \
             FROM messages WHERE conversation_id = ?1 \
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit.max(0)], |row| {
            Ok(MessageRecord {
                message_id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        // 查询取的是最近的一段，这里恢复时间顺序。
        messages.reverse();
        Ok(messages)
    }

    fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn first_user_message(&self, conversation_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let content = conn
            .query_row(
                "SELECT content FROM messages \
                 WHERE conversation_id = ?1 AND role = 'user' \
                 ORDER BY id ASC LIMIT 1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::now_ts;

    fn temp_storage() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("taskwise.db");
        let storage = SqliteStorage::new(path.to_string_lossy().to_string());
        (dir, storage)
    }

    fn sample_task(task_id: &str, user_id: &str, completed: bool, created_at: f64) -> TaskRecord {
        TaskRecord {
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            title: format!("task {task_id}"),
            description: None,
            priority: "medium".to_string(),
            category: "personal".to_string(),
            completed,
            completed_at: completed.then_some(created_at),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn task_filters_split_by_completion() {
        let (_dir, storage) = temp_storage();
        storage
            .insert_task(&sample_task("task_a", "user-1", false, 1.0))
            .unwrap();
        storage
            .insert_task(&sample_task("task_b", "user-1", true, 2.0))
            .unwrap();
        storage
            .insert_task(&sample_task("task_c", "user-2", false, 3.0))
            .unwrap();

        let all = storage.list_tasks("user-1", TaskFilter::All).unwrap();
        assert_eq!(all.len(), 2);
        // 最近创建的排在前面。
        assert_eq!(all[0].task_id, "task_b");

        let pending = storage.list_tasks("user-1", TaskFilter::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "task_a");

        let completed = storage.list_tasks("user-1", TaskFilter::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].task_id, "task_b");
    }

    #[test]
    fn recent_messages_keep_insertion_order() {
        let (_dir, storage) = temp_storage();
        let now = now_ts();
        for index in 0..15 {
            storage
                .append_message(&MessageRecord {
                    message_id: format!("msg_{index}"),
                    conversation_id: "conv_1".to_string(),
                    role: if index % 2 == 0 { "user" } else { "assistant" }.to_string(),
                    content: format!("message {index}"),
                    // 同一秒写入也必须保持顺序。
                    created_at: now,
                })
                .unwrap();
        }

        let window = storage.load_recent_messages("conv_1", 10).unwrap();
        assert_eq!(window.len(), 10);
        assert_eq!(window.first().unwrap().content, "message 5");
        assert_eq!(window.last().unwrap().content, "message 14");
        assert_eq!(storage.count_messages("conv_1").unwrap(), 15);
        assert_eq!(
            storage.first_user_message("conv_1").unwrap().as_deref(),
            Some("message 0")
        );
    }

    #[test]
    fn touch_never_moves_activity_backwards() {
        let (_dir, storage) = temp_storage();
        storage
            .insert_conversation(&ConversationRecord {
                conversation_id: "conv_1".to_string(),
                user_id: "user-1".to_string(),
                created_at: 100.0,
                last_activity: 100.0,
            })
            .unwrap();
        storage.touch_conversation("conv_1", 200.0).unwrap();
        storage.touch_conversation("conv_1", 150.0).unwrap();

        let record = storage
            .get_conversation("user-1", "conv_1")
            .unwrap()
            .expect("conversation");
        assert_eq!(record.last_activity, 200.0);
    }

    #[test]
    fn active_conversation_respects_cutoff() {
        let (_dir, storage) = temp_storage();
        storage
            .insert_conversation(&ConversationRecord {
                conversation_id: "conv_old".to_string(),
                user_id: "user-1".to_string(),
                created_at: 10.0,
                last_activity: 10.0,
            })
            .unwrap();
        storage
            .insert_conversation(&ConversationRecord {
                conversation_id: "conv_new".to_string(),
                user_id: "user-1".to_string(),
                created_at: 500.0,
                last_activity: 500.0,
            })
            .unwrap();

        let active = storage
            .find_active_conversation("user-1", 100.0)
            .unwrap()
            .expect("active conversation");
        assert_eq!(active.conversation_id, "conv_new");
        assert!(storage
            .find_active_conversation("user-1", 600.0)
            .unwrap()
            .is_none());
    }
}
