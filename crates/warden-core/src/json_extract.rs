//! Pulls the first balanced `{...}` object out of an LLM's free-form text
//! reply so a chatty or lightly-fenced response doesn't fail strict JSON
//! parsing outright (§4.3, §4.8).

use serde_json::Value;

pub fn extract_first_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in text.char_indices() {
        if i < start {
            continue;
        }
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..i + ch.len_utf8()];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_surrounded_by_prose() {
        let text = "Sure thing! Here's my answer:\n{\"intent\": \"question\", \"confidence\": 0.9}\nHope that helps.";
        let value = extract_first_json_object(text).unwrap();
        assert_eq!(value["intent"], "question");
    }

    #[test]
    fn handles_nested_braces_and_strings_with_braces_inside() {
        let text = r#"{"a": {"b": 1}, "c": "a { curly brace } in a string"}"#;
        let value = extract_first_json_object(text).unwrap();
        assert_eq!(value["a"]["b"], 1);
        assert_eq!(value["c"], "a { curly brace } in a string");
    }

    #[test]
    fn returns_none_when_no_object_present() {
        assert!(extract_first_json_object("no json here").is_none());
    }

    #[test]
    fn returns_none_on_unbalanced_braces() {
        assert!(extract_first_json_object("{\"a\": 1").is_none());
    }
}
