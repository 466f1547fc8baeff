use crate::core::catalog::{Language, CUSTOM_GENRE, GENRES, LANGUAGES, TONES};
use crate::core::config::Config;
use anyhow::Result;
use inquire::{Confirm, Select, Text};

/// Interactive story setup. Saves the config when anything changed.
pub fn run_setup(config: &mut Config) -> Result<()> {
    let mut story = config.story.clone();

    story.genre = select_from("Select Genre:", GENRES, &story.genre)?;
    if story.genre == CUSTOM_GENRE {
        story.premise = Text::new("Story premise:")
            .with_initial_value(&story.premise)
            .with_help_message("Leave empty for a totally unique, unpredictable adventure")
            .prompt()?;
    } else {
        story.tone = select_from("Select Tone:", TONES, &story.tone)?;
    }

    let options: Vec<String> = LANGUAGES.iter().map(language_option).collect();
    let start = LANGUAGES
        .iter()
        .position(|l| l.code == story.language)
        .unwrap_or(0);
    let selection = Select::new("Select Language:", options)
        .with_starting_cursor(start)
        .prompt()?;
    if let Some(code) = parse_language_option(&selection) {
        story.language = code.to_string();
    }

    story.rich_mode = Confirm::new("Rich mode (longer narration)?")
        .with_default(story.rich_mode)
        .prompt()?;

    if story != config.story {
        config.story = story;
        config.save()?;
        println!("Configuration saved.");
    }
    Ok(())
}

fn select_from(prompt: &str, options: &[&str], current: &str) -> Result<String> {
    let start = options.iter().position(|o| *o == current).unwrap_or(0);
    let selection = Select::new(prompt, options.to_vec())
        .with_starting_cursor(start)
        .prompt()?;
    Ok(selection.to_string())
}

fn language_option(language: &Language) -> String {
    format!("{} - {}", language.code, language.name)
}

fn parse_language_option(option: &str) -> Option<&'static str> {
    let code = option.split_whitespace().next()?;
    LANGUAGES.iter().find(|l| l.code == code).map(|l| l.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_option_round_trips_code() {
        for language in LANGUAGES {
            let option = language_option(language);
            assert_eq!(parse_language_option(&option), Some(language.code));
        }
        assert_eq!(parse_language_option("xx-XX - Nowhere"), None);
        assert_eq!(parse_language_option(""), None);
    }
}
