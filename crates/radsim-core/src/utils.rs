//! 通用工具函数

/// 文件名组件的最大长度
const MAX_FILENAME_COMPONENT_LEN: usize = 64;

/// 把任意字符串转换为可安全用作文件名的组件
///
/// `[A-Za-z0-9_-]` 以外的字符全部替换为 `_`，结果不可能包含路径分隔符或 `.`，
/// 因此无法跳出存储目录。空结果返回 `default`。
pub fn safe_filename_component(value: &str) -> String {
    let safe: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_COMPONENT_LEN)
        .collect();

    if safe.is_empty() {
        "default".to_string()
    } else {
        safe
    }
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= 64
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        && !uid.starts_with('.')
        && !uid.ends_with('.')
        && !uid.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename_component() {
        assert_eq!(safe_filename_component("SUS-AB12"), "SUS-AB12");
        assert_eq!(safe_filename_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(safe_filename_component("a\\b c"), "a_b_c");
        assert_eq!(safe_filename_component(""), "default");
        assert_eq!(safe_filename_component(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn test_safe_filename_component_has_no_separators() {
        for raw in ["..", "/", "\\", "a/../../b", ".hidden", "C:\\x"] {
            let safe = safe_filename_component(raw);
            assert!(!safe.contains('/') && !safe.contains('\\') && !safe.contains('.'));
        }
    }

    #[test]
    fn test_is_valid_dicom_uid() {
        assert!(is_valid_dicom_uid("1.2.840.10008.5.1.4.1.1.4"));
        assert!(!is_valid_dicom_uid(""));
        assert!(!is_valid_dicom_uid("invalid.uid.with.letters"));
        assert!(!is_valid_dicom_uid("1..2"));
        assert!(!is_valid_dicom_uid("1.2."));
    }
}
