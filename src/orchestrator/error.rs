// 调度层错误：固定错误码 + 人类可读描述。
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub struct OrchestratorError {
    code: &'static str,
    message: String,
}

impl OrchestratorError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_REQUEST",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR",
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for OrchestratorError {}
