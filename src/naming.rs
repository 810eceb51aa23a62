//! Table and key naming conventions.

use heck::ToSnakeCase;

/// `BlogPost` -> `blog_post`.
pub fn snake(name: &str) -> String {
    name.to_snake_case()
}

/// Default table for a model: pluralized snake case of its name.
///
/// ```
/// use quarry::naming::table_name;
///
/// assert_eq!(table_name("Post"), "posts");
/// assert_eq!(table_name("BlogCategory"), "blog_categories");
/// assert_eq!(table_name("Person"), "people");
/// ```
pub fn table_name(model: &str) -> String {
    let snake = snake(model);
    match snake.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", plural(last)),
        None => plural(&snake),
    }
}

/// Foreign key pointing at `model`: `Post` -> `post_id`.
pub fn foreign_key(model: &str, key: &str) -> String {
    format!("{}_{key}", snake(model))
}

/// Pivot table joining two models: both singular snake names, sorted.
pub fn pivot_table(a: &str, b: &str) -> String {
    let (a, b) = (snake(a), snake(b));
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("foot", "feet"),
];

const UNCOUNTABLE: &[&str] = &["data", "equipment", "information", "media", "metadata", "news", "series", "species"];

/// English plural of a lowercase word.
pub fn plural(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == word) {
        return (*plural).to_string();
    }
    let bytes = word.as_bytes();
    let last = bytes[bytes.len() - 1];
    let before = bytes.len().checked_sub(2).map(|i| bytes[i]);
    let is_vowel = |b: u8| matches!(b, b'a' | b'e' | b'i' | b'o' | b'u');

    if word.ends_with("sh") || word.ends_with("ch") || matches!(last, b's' | b'x' | b'z') {
        return format!("{word}es");
    }
    if last == b'y' && before.is_some_and(|b| !is_vowel(b)) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    format!("{word}s")
}
