pub const CUSTOM_GENRE: &str = "Custom";

pub const GENRES: &[&str] = &[
    "Classic Horror",
    "Superhero Action",
    "Dark Sci-Fi",
    "High Fantasy",
    "Neon Noir Detective",
    "Wasteland Apocalypse",
    "Lighthearted Comedy",
    "Teen Drama / Slice of Life",
    CUSTOM_GENRE,
];

pub const TONES: &[&str] = &[
    "ACTION-HEAVY (Short, punchy dialogue. Focus on kinetics.)",
    "INNER-MONOLOGUE (Heavy captions revealing thoughts.)",
    "QUIPPY (Characters use humor as a defense mechanism.)",
    "OPERATIC (Grand, dramatic declarations and high stakes.)",
    "CASUAL (Natural dialogue, focus on relationships.)",
    "WHOLESOME (Warm, gentle, optimistic.)",
];

pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

pub const LANGUAGES: &[Language] = &[
    Language { code: "en-US", name: "English (US)" },
    Language { code: "ar-EG", name: "Arabic (Egyptian)" },
    Language { code: "de-DE", name: "German (Germany)" },
    Language { code: "es-MX", name: "Spanish (Mexico)" },
    Language { code: "fr-FR", name: "French (France)" },
    Language { code: "hi-IN", name: "Hindi (India)" },
    Language { code: "id-ID", name: "Indonesian (Indonesia)" },
    Language { code: "it-IT", name: "Italian (Italy)" },
    Language { code: "ja-JP", name: "Japanese (Japan)" },
    Language { code: "ko-KR", name: "Korean (South Korea)" },
    Language { code: "pt-BR", name: "Portuguese (Brazil)" },
    Language { code: "ru-RU", name: "Russian (Russia)" },
    Language { code: "zh-TW", name: "Chinese (Traditional)" },
];

pub fn language_name(code: &str) -> &'static str {
    LANGUAGES
        .iter()
        .find(|l| l.code == code)
        .map(|l| l.name)
        .unwrap_or("English")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_name_lookup() {
        assert_eq!(language_name("ja-JP"), "Japanese (Japan)");
        assert_eq!(language_name("xx-XX"), "English");
    }

    #[test]
    fn test_custom_genre_listed_last() {
        assert_eq!(GENRES.last(), Some(&CUSTOM_GENRE));
    }
}
