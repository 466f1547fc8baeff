use crate::core::state::Beat;
use anyhow::{Context, Result};
use log::warn;

/// Remove markdown code fences wherever the model put them.
pub fn strip_code_blocks(s: &str) -> String {
    s.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse a provider response into a beat. Choices are only kept on decision
/// pages, and never more than two.
pub fn parse_beat(raw: &str, is_decision: bool) -> Result<Beat> {
    let clean_json = strip_code_blocks(raw);
    let mut beat: Beat = serde_json::from_str(&clean_json)
        .with_context(|| format!("Failed to parse beat JSON: {}", clean_json))?;

    if is_decision {
        beat.choices.truncate(2);
        if beat.choices.len() < 2 {
            warn!(
                "Decision beat came back with {} choice(s) instead of 2",
                beat.choices.len()
            );
        }
    } else {
        beat.choices.clear();
    }
    Ok(beat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::FocusChar;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_choices_forced_empty_off_decision_pages() {
        let raw = r#"```json
{"caption": "Rain.", "dialogue": "Run!", "scene": "alley", "focus_char": "hero", "choices": ["A", "B"]}
```"#;
        let beat = parse_beat(raw, false).unwrap();
        assert!(beat.choices.is_empty());
        assert_eq!(beat.dialogue, "Run!");

        let beat = parse_beat(raw, true).unwrap();
        assert_eq!(beat.choices, vec!["A", "B"]);
    }

    #[test]
    fn test_decision_choices_truncated_to_two() {
        let raw = r#"{"scene": "bridge", "focus_char": "friend", "choices": ["A", "B", "C"]}"#;
        let beat = parse_beat(raw, true).unwrap();
        assert_eq!(beat.choices, vec!["A", "B"]);
        assert_eq!(beat.focus_char, FocusChar::CoStar);
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let raw = r#"{"caption": "The door creaks.", "dialogue": null, "scene": "cellar", "focus_char": null, "choices": null}"#;
        let beat = parse_beat(raw, false).unwrap();
        assert_eq!(beat.caption, "The door creaks.");
        assert_eq!(beat.dialogue, "");
        assert_eq!(beat.scene, "cellar");
        assert_eq!(beat.focus_char, FocusChar::Hero);
        assert!(beat.choices.is_empty());

        let beat = parse_beat(raw, true).unwrap();
        assert!(beat.choices.is_empty());
    }

    #[test]
    fn test_non_json_is_error() {
        assert!(parse_beat("Once upon a time", false).is_err());
        assert!(parse_beat("[1, 2]", false).is_err());
    }
}
