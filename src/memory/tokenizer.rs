//! 分词模块
//!
//! 中英文混合分词，用于长期记忆的关键词重叠检索：
//! 含 CJK 字符时使用 jieba 分词（搜索引擎模式），纯英文按空白切分。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 切分为小写词集合；过短的纯 ASCII 词被过滤
pub fn tokenize(text: &str) -> HashSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return HashSet::new();
    }

    if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.to_lowercase())
            .filter(|s| s.len() > 1 || s.chars().next().map(is_cjk).unwrap_or(false))
            .collect()
    } else {
        text.split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| w.len() > 1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_tokenize() {
        let tokens = tokenize("Open the browser, search for weather");
        assert!(tokens.contains("browser"));
        assert!(tokens.contains("weather"));
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn test_cjk_detection() {
        assert!(contains_cjk("打开浏览器"));
        assert!(!contains_cjk("open browser"));
        assert!(!tokenize("打开浏览器搜索天气").is_empty());
    }
}
