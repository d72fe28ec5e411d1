//! Keyword survivors: the subset of a citation's keyword text that is specific
//! enough to search a page for.

/// Functional and question words in the languages the answers are written in.
const STOPWORDS: &[&str] = &[
    // English
    "the", "and", "for", "are", "was", "were", "with", "from", "that", "this", "these", "those",
    "what", "which", "who", "whom", "whose", "where", "when", "why", "how", "into", "about",
    "does", "did", "have", "has", "had", "not", "but", "can", "could", "should", "would",
    "will", "shall", "may", "might", "must", "there", "their", "they", "them", "then", "than",
    "been", "being", "also", "such", "any", "all", "each", "other", "some", "more", "most",
    "please", "tell", "show", "explain", "describe", "find", "page", "document",
    // Korean
    "그리고", "그러나", "하지만", "또는", "또한", "및", "등", "에서", "에게", "으로", "에는",
    "에도", "부터", "까지", "대한", "대해", "대하여", "관련", "관한", "있는", "없는", "하는",
    "되는", "있다", "없다", "한다", "된다", "이다", "입니다", "있습니다", "무엇", "무엇인가요",
    "무엇입니까", "뭐야", "뭔가요", "어떻게", "어떤", "어디", "어디서", "언제", "누구", "누가",
    "왜", "얼마", "얼마나", "몇", "알려줘", "알려주세요", "설명해줘", "설명해주세요", "인가요",
    "인가", "이란", "란", "해당", "경우", "위한", "통해", "페이지", "문서",
];

/// Lowercases and splits `text` on whitespace, keeping only terms that are
/// at least two characters long, are not stopwords, and are not short
/// (< 4 chars) ASCII-alphanumeric fragments such as `"10"` or `"bar"`.
pub fn keyword_survivors(text: &str) -> Vec<String> {
    let mut survivors: Vec<String> = Vec::new();
    for term in text.to_lowercase().split_whitespace() {
        let len = term.chars().count();
        if len < 2 {
            continue;
        }
        if STOPWORDS.contains(&term) {
            continue;
        }
        if len < 4 && term.chars().all(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        if !survivors.iter().any(|existing| existing == term) {
            survivors.push(term.to_owned());
        }
    }
    survivors
}
