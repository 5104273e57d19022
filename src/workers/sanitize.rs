//! 专家响应净化
//!
//! 专家不得反向追问用户：编排器独占对话轮次。净化会剔除套话式拒绝/推诿行、
//! 带澄清语气的问句行与空行，并反复剥掉整段包裹引号直至稳定（幂等）。

/// 套话式拒绝/推诿标记，命中即整行剔除
const DEFLECTION_MARKERS: &[&str] = &[
    "i cannot provide information",
    "i do not have access",
    "outside of my",
    "outside my",
    "i cannot check",
    "i cannot draft",
    "i cannot send",
    "limited to my",
    "please contact",
    "please check",
    "would you like me to proceed",
    "nor can i",
];

/// 问句行中出现这些词即视为反向澄清
const CLARIFICATION_HINTS: &[&str] = &["would you", "should i", "proceed"];

/// 净化一段专家回复；对已净化文本再调用是恒等（不动点）
pub fn sanitize_reply(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();

    for line in text.lines() {
        let lower = line.to_lowercase();
        if DEFLECTION_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        if lower.trim_end().ends_with('?') && CLARIFICATION_HINTS.iter().any(|k| lower.contains(k))
        {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        kept.push(line);
    }

    let mut cleaned = kept.join("\n").trim().to_string();

    loop {
        match strip_wrapping_quote(&cleaned, '"').or_else(|| strip_wrapping_quote(&cleaned, '\'')) {
            Some(inner) => cleaned = inner.trim().to_string(),
            None => break,
        }
    }

    cleaned
}

/// 整段被同一种引号包裹时剥掉一层
fn strip_wrapping_quote(s: &str, quote: char) -> Option<String> {
    if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}
