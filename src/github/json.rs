//! JSON decoding for upstream responses with path-aware error messages.

use serde::de::DeserializeOwned;

/// Decode `body`, reporting the JSON path and a snippet around the failure.
///
/// A plain serde error only says "invalid type: null, expected u32 at line 1
/// column 212"; this names the field (`items[3].login`) so schema drift in the
/// upstream is obvious from one log line.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        let inner = err.into_inner();
        let (line, column) = (inner.line(), inner.column());
        let snippet = snippet_at(body, line, column, 24);
        if path.is_empty() || path == "." {
            format!("{inner}\n{snippet}")
        } else {
            format!("at path '{path}': {inner}\n{snippet}")
        }
    })
}

/// The text around (`line`, `column`), with a caret under the column.
fn snippet_at(body: &str, line: usize, column: usize, width: usize) -> String {
    let Some(text) = body.lines().nth(line.saturating_sub(1)) else {
        return "(no source line)".to_owned();
    };
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return "(empty line)".to_owned();
    }
    let at = column.saturating_sub(1).min(chars.len() - 1);
    let start = at.saturating_sub(width / 2);
    let end = (at + width / 2).min(chars.len());
    let excerpt: String = chars[start..end].iter().collect();
    format!("  {excerpt}\n  {}^", " ".repeat(at - start))
}
