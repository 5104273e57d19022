//! 分类器输出修复与解析
//!
//! 上游补全不保证严格合法的 JSON：可能带说明性前后缀、代码围栏，或在对象中途被截断。
//! 修复顺序：剥围栏 → 定位首个 '{' → 按分隔符深度找首个配平对象并截掉尾部杂质 →
//! 找不到配平点时补未闭合的引号与分隔符收尾。仍解析不了就返回 None，绝不向上抛。

use crate::intent::plan::{DispatchPlan, RawIntentClassification};

/// 解析分类器原始文本为调度计划；任何失败都归于 None
pub fn parse_dispatch_plan(response_text: &str) -> Option<DispatchPlan> {
    let repaired = repair_json(response_text)?;

    match serde_json::from_str::<RawIntentClassification>(&repaired) {
        Ok(raw) => DispatchPlan::from_raw(raw),
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw = %truncate_for_log(response_text),
                "Failed to parse classifier output"
            );
            None
        }
    }
}

/// 从自由文本中恢复一个尽可能完整的 JSON 对象
pub fn repair_json(text: &str) -> Option<String> {
    let mut text = text.trim();

    // 代码围栏：取 ```json 或 ``` 之后的部分
    if let Some(pos) = text.find("```json") {
        text = &text[pos + 7..];
    } else if let Some(pos) = text.find("```") {
        text = &text[pos + 3..];
    }

    // 丢掉对象前的说明性文字
    let start = text.find('{')?;
    let mut text = text[start..].trim_end().to_string();

    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim_end().to_string();
    }

    let scan = scan_delimiters(&text);

    // 首个配平对象：之后的一切都是尾部杂质
    if let Some(close) = scan.close_index {
        text.truncate(close + 1);
        return Some(text);
    }

    // 无配平点：对象被截断。先补未闭合的字符串，再按打开顺序反向补分隔符
    if scan.in_string {
        text.push('"');
    }
    for open in scan.open_stack.iter().rev() {
        text.push(match open {
            '[' => ']',
            _ => '}',
        });
    }

    Some(text)
}

/// 分隔符扫描结果
struct DelimiterScan {
    /// 首个配平 '}' 的字节下标
    close_index: Option<usize>,
    /// 扫描结束时仍未闭合的 '{' / '['
    open_stack: Vec<char>,
    /// 扫描结束时是否停在字符串内部
    in_string: bool,
}

/// 跟踪嵌套分隔符深度，跳过字符串字面量（含转义）
fn scan_delimiters(text: &str) -> DelimiterScan {
    let mut open_stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => open_stack.push(c),
            '}' | ']' => {
                open_stack.pop();
                if open_stack.is_empty() && c == '}' {
                    return DelimiterScan {
                        close_index: Some(i),
                        open_stack,
                        in_string: false,
                    };
                }
            }
            _ => {}
        }
    }

    DelimiterScan {
        close_index: None,
        open_stack,
        in_string,
    }
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(500).collect()
}
