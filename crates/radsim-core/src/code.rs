//! 小组代码（租户标识）
//!
//! 每个学生小组通过一个不透明的代码访问自己的数据分区。代码的规范形式只包含
//! `[A-Za-z0-9_-]`，最长24个字符；两个代码当且仅当规范形式相同时相等。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规范化代码的最大长度
pub const MAX_CODE_LEN: usize = 24;

/// 小组代码
///
/// 只能通过 [`GroupCode::normalize`] 构造，因此内部字符串始终是规范形式。
/// 空代码永远不是有效租户。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct GroupCode(String);

impl GroupCode {
    /// 规范化原始输入：去除首尾空白，删除 `[A-Za-z0-9_-]` 以外的字符，截断到24个字符
    pub fn normalize(raw: &str) -> Self {
        let code: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(MAX_CODE_LEN)
            .collect();
        Self(code)
    }

    /// 空代码
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 该租户拥有的患者标识前缀 `{code}-`
    pub fn identifier_prefix(&self) -> String {
        format!("{}-", self.0)
    }

    /// 标识符是否以 `{code}-` 开头
    pub fn owns_identifier(&self, identifier: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        identifier
            .strip_prefix(self.0.as_str())
            .map_or(false, |rest| rest.starts_with('-'))
    }

    /// 给本地标识加上租户前缀
    ///
    /// 空输入保持为空；没有代码时原样返回；已经带前缀的标识不会重复加前缀。
    pub fn prefix_identifier(&self, raw: &str) -> String {
        let value = raw.trim();
        if value.is_empty() || self.is_empty() || self.owns_identifier(value) {
            return value.to_string();
        }
        format!("{}-{}", self.0, value)
    }

    /// 归档查询使用的通配模式 `{code}-*`
    pub fn wildcard_pattern(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("{}-*", self.0)
    }
}

impl From<String> for GroupCode {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

impl From<&str> for GroupCode {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<GroupCode> for String {
    fn from(code: GroupCode) -> Self {
        code.0
    }
}

impl AsRef<str> for GroupCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_canonical(code: &GroupCode) -> bool {
        code.as_str().len() <= MAX_CODE_LEN
            && code
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    #[test]
    fn test_normalize_strips_foreign_characters() {
        assert_eq!(GroupCode::normalize("  SUS-AB12 ").as_str(), "SUS-AB12");
        assert_eq!(GroupCode::normalize("sus/../ab 12").as_str(), "susab12");
        assert_eq!(GroupCode::normalize("Grüße_1").as_str(), "Gre_1");
        assert!(GroupCode::normalize("").is_empty());
        assert!(GroupCode::normalize(" \t/.. ").is_empty());
    }

    #[test]
    fn test_normalize_truncates() {
        let code = GroupCode::normalize(&"A".repeat(40));
        assert_eq!(code.as_str().len(), MAX_CODE_LEN);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "",
            "SUS-1234",
            "  mixed Case_code-with-a-very-long-tail-xyz ",
            "../../etc/passwd",
            "ÄÖÜ-äöü-ß",
            "tab\tand\nnewline",
            "名字-ABC",
            "-_-_-",
        ];
        for raw in samples {
            let once = GroupCode::normalize(raw);
            let twice = GroupCode::normalize(once.as_str());
            assert_eq!(once, twice, "input {:?}", raw);
            assert!(is_canonical(&once), "input {:?}", raw);
        }
    }

    #[test]
    fn test_owns_identifier() {
        let code = GroupCode::normalize("SUS-AAAA");
        assert!(code.owns_identifier("SUS-AAAA-PID1"));
        assert!(!code.owns_identifier("SUS-AAAA"));
        assert!(!code.owns_identifier("SUS-AAAAB-PID1"));
        assert!(!code.owns_identifier("SUS-BBBB-PID1"));
        assert!(!GroupCode::empty().owns_identifier("-PID1"));
    }

    #[test]
    fn test_prefix_identifier() {
        let code = GroupCode::normalize("SUS-AAAA");
        assert_eq!(code.prefix_identifier(" PID1 "), "SUS-AAAA-PID1");
        assert_eq!(code.prefix_identifier("SUS-AAAA-PID1"), "SUS-AAAA-PID1");
        assert_eq!(code.prefix_identifier(""), "");
        assert_eq!(GroupCode::empty().prefix_identifier("PID1"), "PID1");
    }

    #[test]
    fn test_serde_normalizes_on_read() {
        let code: GroupCode = serde_json::from_str("\" sus-ab/12 \"").unwrap();
        assert_eq!(code.as_str(), "sus-ab12");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"sus-ab12\"");
    }
}
