use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Per-entry character budget when replaying history into the prompt.
const HISTORY_CHAR_BUDGET: usize = 500;

/// One prior exchange in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Snapshot of the flow editor's current tab, injected into prompts for
/// situational awareness. Field names match the editor's JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowContext {
    #[serde(rename = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    #[serde(rename = "tabLabel", skip_serializing_if = "Option::is_none")]
    pub tab_label: Option<String>,
    #[serde(rename = "nodeCount", skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u64>,
    #[serde(default)]
    pub nodes: Vec<Value>,
}

impl FlowContext {
    fn node_count(&self) -> u64 {
        self.node_count.unwrap_or(self.nodes.len() as u64)
    }
}

/// Render the fenced JSON block describing the current flow, or None when
/// the context is absent or empty.
pub fn flow_context_block(flow: Option<&FlowContext>) -> Option<String> {
    let flow = flow?;
    if flow.node_count() == 0 {
        return None;
    }
    let snapshot = json!({
        "tab": flow.tab_label,
        "tabId": flow.tab_id,
        "nodeCount": flow.node_count(),
        "nodes": flow.nodes,
    });
    let pretty = serde_json::to_string_pretty(&snapshot).unwrap_or_default();
    Some(format!("Current flow context:\n```json\n{pretty}\n```\n\n"))
}

/// Compose the final prompt sent to the agent. Pure string transform:
/// flow-context block first (when present and non-empty), then a role-labeled
/// transcript of prior messages, then the current message.
pub fn compose(prompt: &str, history: &[Message], flow: Option<&FlowContext>) -> String {
    let mut out = String::new();

    if let Some(block) = flow_context_block(flow) {
        out.push_str(&block);
    }

    if !history.is_empty() {
        out.push_str("Conversation so far:\n");
        for message in history {
            out.push_str(&message.role);
            out.push_str(": ");
            out.push_str(&truncate(&message.content, HISTORY_CHAR_BUDGET));
            out.push('\n');
        }
        out.push_str("\nCurrent message:\n");
    }

    out.push_str(prompt);
    out
}

fn truncate(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    let head: String = text.chars().take(budget).collect();
    format!("{head}...")
}
