//! 审批门控的纯文本规则
//!
//! 审批请求识别是合取判定：必须同时出现（a）明确的审批征询短语与（b）具体工件的
//! 结构标记（邮件草稿的 To:/Subject:）。只有短语没有工件的对话性文字不得进台账。
//! 规则由调度引擎调用，台账本身不做识别。

use regex::Regex;

/// 审批征询短语（缺一类则不算审批请求）
const APPROVAL_PHRASES: &[&str] = &[
    "do you approve",
    "please reply 'yes' to approve",
    "reply 'yes' to approve",
    "approve sending",
    "approve or reject",
];

/// 决断令牌：批准
const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "approve", "send", "confirm"];

/// 决断令牌：拒绝
const NEGATIVE_TOKENS: &[&str] = &["no", "reject", "cancel", "deny"];

/// 回复文本是否在征询审批（含 yes/no 决断提示）
pub fn is_approval_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    let has_phrase = APPROVAL_PHRASES.iter().any(|p| lower.contains(p));
    let offers_decision = lower.contains("yes") || lower.contains("no");
    has_phrase && offers_decision
}

/// 回复文本是否带邮件草稿结构
pub fn has_email_structure(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("to:") && (lower.contains("subject:") || lower.contains("body:"))
}

/// 合取门控：是否应为该回复登记一条 email_send 审批
pub fn detect_email_approval(text: &str) -> bool {
    is_approval_request(text) && has_email_structure(text)
}

/// 归一后的输入是否为批准令牌
pub fn is_affirmative(normalized_input: &str) -> bool {
    AFFIRMATIVE_TOKENS.contains(&normalized_input)
}

/// 归一后的输入是否为拒绝令牌
pub fn is_negative(normalized_input: &str) -> bool {
    NEGATIVE_TOKENS.contains(&normalized_input)
}

/// 寒暄式确认的罐头回复（无未决审批时避免浪费专家调用）
pub fn conversational_reply(normalized_input: &str) -> Option<&'static str> {
    let reply = match normalized_input {
        "yes" => "Great! How can I help you today?",
        "no" => "No problem. Is there anything else I can help you with?",
        "ok" | "okay" => "Understood. What would you like to do next?",
        "thanks" | "thank you" => "You're welcome! Let me know if you need anything else.",
        "nope" => "Alright. Feel free to ask if you need anything.",
        "yep" => "Great! What can I do for you?",
        "sure" => "Perfect! How can I assist you?",
        "nah" => "No worries. Let me know if you need help with something.",
        _ => return None,
    };
    Some(reply)
}

/// 解析出的邮件草稿字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailDraft {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 从批准的草稿中提取 To/Subject/正文（正文 = 主题之后至 '---' 分隔符）
pub fn parse_email_draft(draft: &str) -> Option<EmailDraft> {
    let to_re = Regex::new(r"(?i)To:\s*(.+)").ok()?;
    let subject_re = Regex::new(r"(?i)Subject:\s*(.+)").ok()?;

    let to = to_re.captures(draft)?.get(1)?.as_str().trim().to_string();
    let subject_match = subject_re.captures(draft)?.get(1)?;
    let subject = subject_match.as_str().trim().to_string();

    let body_start = subject_match.end();
    let body_end = draft.find("---").unwrap_or(draft.len());
    let body = if body_start <= body_end {
        draft[body_start..body_end].trim().to_string()
    } else {
        String::new()
    };

    Some(EmailDraft { to, subject, body })
}
