// 面向用户的固定文案。所有兜底回复集中在这里，便于审阅措辞。
use crate::schemas::ToolCallSummary;

/// 模型或存储不可用时的统一道歉，原样返回，不重试。
pub const APOLOGY_UNAVAILABLE: &str = "I'm sorry, I'm having trouble completing that right now. \
Please try again in a moment.";

pub const EMPTY_REPLY_FALLBACK: &str =
    "I didn't manage to put together a reply. Could you rephrase that?";

/// 轮次上限触发时本地合成的总结，不再请求模型。
pub fn round_limit_summary(summaries: &[ToolCallSummary]) -> String {
    if summaries.is_empty() {
        return "I couldn't work out an answer within the allowed number of steps. \
                Could you simplify or split up the request?"
            .to_string();
    }
    let mut lines =
        vec!["I ran out of steps before writing a full reply. Here's what I did:".to_string()];
    for summary in summaries {
        let detail = summary
            .result_preview
            .clone()
            .unwrap_or_else(|| if summary.success { "done" } else { "failed" }.to_string());
        lines.push(format!("- {}: {}", summary.tool, detail));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_each_tool_call() {
        let summaries = vec![
            ToolCallSummary {
                tool: "add_task".to_string(),
                success: true,
                result_preview: Some("created \"buy milk\"".to_string()),
            },
            ToolCallSummary {
                tool: "delete_task".to_string(),
                success: false,
                result_preview: Some("task not found".to_string()),
            },
        ];
        let text = round_limit_summary(&summaries);
        assert!(text.contains("add_task: created \"buy milk\""));
        assert!(text.contains("delete_task: task not found"));
    }

    #[test]
    fn empty_summary_still_says_something() {
        let text = round_limit_summary(&[]);
        assert!(!text.is_empty());
    }
}
