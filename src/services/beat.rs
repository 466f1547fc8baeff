use crate::core::config::StoryConfig;
use crate::core::random::FocusRng;
use crate::core::state::{Beat, FocusChar, Page, PageKind};
use crate::services::llm::LlmClient;
use crate::services::script::parse_beat;
use anyhow::{anyhow, Result};
use log::{debug, error};
use std::sync::Arc;
use std::time::Duration;

/// Values above this nudge the next beat toward an active co-star.
const CO_STAR_BIAS_THRESHOLD: f64 = 0.4;

const GUARDRAILS: &str = "\
NEGATIVE CONSTRAINTS:
1. UNLESS GENRE IS \"Dark Sci-Fi\" OR \"Superhero Action\": DO NOT use technical jargon like \"Quantum\" or \"Singularity\".
2. IF GENRE IS \"Teen Drama / Slice of Life\": Stakes must be SOCIAL or PERSONAL.";

pub struct BeatRequest<'a> {
    /// Pages generated so far; anything that is not a finished story page
    /// below `page` is ignored.
    pub history: &'a [Page],
    pub page: usize,
    pub is_decision: bool,
    pub is_final: bool,
    pub co_star_active: bool,
}

pub struct BeatSynthesizer {
    llm: Arc<dyn LlmClient>,
    story: StoryConfig,
    max_story_pages: usize,
    rng: Arc<dyn FocusRng>,
    timeout: Duration,
}

impl BeatSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        story: StoryConfig,
        max_story_pages: usize,
        rng: Arc<dyn FocusRng>,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            story,
            max_story_pages,
            rng,
            timeout,
        }
    }

    /// Produce the beat for `request.page`. Never fails: any provider,
    /// parse, or timeout error yields [`Beat::fallback`].
    pub async fn synthesize(&self, request: &BeatRequest<'_>) -> Beat {
        let prompt = self.compose_prompt(request);
        match self.request_beat(&prompt, request.is_decision).await {
            Ok(beat) => beat,
            Err(e) => {
                error!("Beat synthesis failed for page {}: {:#}", request.page, e);
                Beat::fallback(request.page)
            }
        }
    }

    async fn request_beat(&self, prompt: &str, is_decision: bool) -> Result<Beat> {
        let raw = tokio::time::timeout(self.timeout, self.llm.generate_json(prompt))
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.timeout))??;
        parse_beat(&raw, is_decision)
    }

    pub fn compose_prompt(&self, request: &BeatRequest<'_>) -> String {
        let lang_name = self.story.language_name();

        let context = story_context(request.history, request.page);
        let last_focus = context
            .last()
            .and_then(|p| p.beat.as_ref())
            .map(|b| b.focus_char);

        let history_text = context
            .iter()
            .map(|p| format_history_line(p))
            .collect::<Vec<_>>()
            .join("\n");

        let mut co_star_instruction = "Not yet introduced.".to_string();
        if request.co_star_active {
            co_star_instruction = "ACTIVE and PRESENT.".to_string();
            if last_focus != Some(FocusChar::CoStar)
                && self.rng.next_f64() > CO_STAR_BIAS_THRESHOLD
            {
                debug!("Nudging page {} toward the co-star", request.page);
                co_star_instruction.push_str(" MANDATORY: FOCUS ON THE CO-STAR FOR THIS PANEL.");
            }
        }

        let core_driver = if self.story.is_custom() {
            let premise = if self.story.premise.trim().is_empty() {
                "A totally unique, unpredictable adventure"
            } else {
                self.story.premise.trim()
            };
            format!("STORY PREMISE: {}.", premise)
        } else {
            format!("GENRE: {}. TONE: {}.", self.story.genre, self.story.tone)
        };

        let mut instruction = format!(
            "Continue the story in {}. {}\n{}",
            lang_name.to_uppercase(),
            core_driver,
            GUARDRAILS
        );
        if self.story.rich_mode {
            instruction.push_str("\nRICH MODE ENABLED: Detailed narration, elaborate on mood and inner thoughts.");
        }
        if request.is_final {
            instruction.push_str("\nFINAL PAGE. End with 'TO BE CONTINUED...'.");
        } else if request.is_decision {
            instruction.push_str(
                "\nEnd with a PSYCHOLOGICAL choice: exactly two options the reader must pick between.",
            );
        } else {
            instruction.push_str("\nKeep the story open for the next page.");
        }

        let (cap_limit, dia_limit) = if self.story.rich_mode {
            ("max 35 words", "max 30 words")
        } else {
            ("max 15 words", "max 12 words")
        };

        let choices_field = if request.is_decision {
            "\"choices\": [\"Option A\", \"Option B\"] (EXACTLY two options)"
        } else {
            "\"choices\": [] (ALWAYS empty on this page)"
        };

        format!(
            "You are writing a comic book script. PAGE {page} of {max}.\n\
             TARGET LANGUAGE: {lang}.\n\
             {driver}\n\
             CO-STAR: {co_star}\n\
             \n\
             PREVIOUS PANELS:\n\
             {history}\n\
             \n\
             INSTRUCTIONS:\n\
             {instruction}\n\
             \n\
             OUTPUT STRICT JSON ONLY:\n\
             {{\n\
             \x20 \"caption\": \"Narrator text in {lang}. ({cap}).\",\n\
             \x20 \"dialogue\": \"Speech in {lang}. ({dia}).\",\n\
             \x20 \"scene\": \"Visual description in English.\",\n\
             \x20 \"focus_char\": \"hero\" OR \"friend\" OR \"other\",\n\
             \x20 {choices}\n\
             }}\n",
            page = request.page,
            max = self.max_story_pages,
            lang = lang_name,
            driver = core_driver,
            co_star = co_star_instruction,
            history = if history_text.is_empty() {
                "Start the adventure."
            } else {
                history_text.as_str()
            },
            instruction = instruction,
            cap = cap_limit,
            dia = dia_limit,
            choices = choices_field,
        )
    }
}

/// Finished story pages strictly before `page`, ascending by index.
pub fn story_context(history: &[Page], page: usize) -> Vec<&Page> {
    let mut context: Vec<&Page> = history
        .iter()
        .filter(|p| p.kind == PageKind::Story && p.beat.is_some() && p.index < page)
        .collect();
    context.sort_by_key(|p| p.index);
    context
}

fn format_history_line(page: &Page) -> String {
    let beat = page.beat.clone().unwrap_or_default();
    let mut line = format!(
        "[Page {}] [Focus: {}] (Caption: \"{}\") (Dialogue: \"{}\") (Scene: {})",
        page.index,
        beat.focus_char.as_str(),
        beat.caption,
        beat.dialogue,
        beat.scene
    );
    if let Some(choice) = &page.resolved_choice {
        line.push_str(&format!(" -> USER CHOICE: \"{}\"", choice));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::CUSTOM_GENRE;
    use crate::core::random::FixedFocusRng;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct ScriptedLlm {
        reply: Result<String, String>,
        prompts: Arc<Mutex<Vec<String>>>,
        delay: Option<Duration>,
    }

    impl ScriptedLlm {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Arc::new(Mutex::new(Vec::new())),
                delay: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                prompts: Arc::new(Mutex::new(Vec::new())),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate_json(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn synthesizer(llm: ScriptedLlm, story: StoryConfig, roll: f64) -> BeatSynthesizer {
        BeatSynthesizer::new(
            Arc::new(llm),
            story,
            10,
            Arc::new(FixedFocusRng(roll)),
            Duration::from_secs(5),
        )
    }

    fn story_page(index: usize, focus: FocusChar, choice: Option<&str>) -> Page {
        let mut page = Page::placeholder(index, PageKind::Story);
        page.beat = Some(Beat {
            caption: format!("caption {}", index),
            dialogue: format!("dialogue {}", index),
            scene: format!("scene {}", index),
            focus_char: focus,
            choices: Vec::new(),
        });
        page.resolved_choice = choice.map(str::to_string);
        page
    }

    #[test]
    fn test_context_excludes_covers_pending_and_later_pages() {
        let mut cover = Page::placeholder(0, PageKind::Cover);
        cover.beat = Some(Beat::blank());
        let pending = Page::placeholder(3, PageKind::Story);
        let history = vec![
            story_page(4, FocusChar::Hero, None),
            cover,
            story_page(2, FocusChar::Hero, None),
            pending,
            story_page(1, FocusChar::Hero, None),
        ];

        let indices: Vec<usize> = story_context(&history, 4).iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_prompt_carries_history_and_resolved_choice() {
        let synth = synthesizer(ScriptedLlm::replying("{}"), StoryConfig::default(), 0.0);
        let history = vec![
            story_page(1, FocusChar::Hero, None),
            story_page(2, FocusChar::Other, Some("Trust the stranger")),
        ];
        let prompt = synth.compose_prompt(&BeatRequest {
            history: &history,
            page: 3,
            is_decision: false,
            is_final: false,
            co_star_active: false,
        });

        assert!(prompt.contains("PAGE 3 of 10"));
        assert!(prompt.contains("[Page 1] [Focus: hero]"));
        assert!(prompt.contains("-> USER CHOICE: \"Trust the stranger\""));
        assert!(prompt.contains("GENRE: Classic Horror."));
        assert!(prompt.contains("NEGATIVE CONSTRAINTS"));
        assert!(prompt.contains("Visual description in English."));
        assert!(prompt.contains("\"choices\": [] (ALWAYS empty"));
        assert!(prompt.contains("Not yet introduced."));
    }

    #[test]
    fn test_prompt_for_first_page_starts_adventure() {
        let synth = synthesizer(ScriptedLlm::replying("{}"), StoryConfig::default(), 0.0);
        let prompt = synth.compose_prompt(&BeatRequest {
            history: &[],
            page: 1,
            is_decision: false,
            is_final: false,
            co_star_active: false,
        });
        assert!(prompt.contains("Start the adventure."));
    }

    #[test]
    fn test_custom_genre_uses_premise_and_verbosity_limits() {
        let story = StoryConfig {
            genre: CUSTOM_GENRE.to_string(),
            premise: "A lighthouse keeper befriends a storm".to_string(),
            rich_mode: false,
            language: "fr-FR".to_string(),
            ..Default::default()
        };
        let synth = synthesizer(ScriptedLlm::replying("{}"), story, 0.0);
        let prompt = synth.compose_prompt(&BeatRequest {
            history: &[],
            page: 10,
            is_decision: false,
            is_final: true,
            co_star_active: false,
        });

        assert!(prompt.contains("STORY PREMISE: A lighthouse keeper befriends a storm."));
        assert!(!prompt.contains("GENRE: Custom"));
        assert!(prompt.contains("max 15 words"));
        assert!(!prompt.contains("RICH MODE"));
        assert!(prompt.contains("Continue the story in FRENCH (FRANCE)."));
        assert!(prompt.contains("FINAL PAGE"));
    }

    #[test]
    fn test_decision_page_demands_two_choices() {
        let synth = synthesizer(ScriptedLlm::replying("{}"), StoryConfig::default(), 0.0);
        let prompt = synth.compose_prompt(&BeatRequest {
            history: &[],
            page: 3,
            is_decision: true,
            is_final: false,
            co_star_active: false,
        });
        assert!(prompt.contains("PSYCHOLOGICAL choice"));
        assert!(prompt.contains("EXACTLY two options"));
        assert!(prompt.contains("RICH MODE ENABLED"));
        assert!(prompt.contains("max 35 words"));
    }

    #[test]
    fn test_co_star_nudge_follows_rng() {
        let history = vec![story_page(1, FocusChar::Hero, None)];
        let request = BeatRequest {
            history: &history,
            page: 2,
            is_decision: false,
            is_final: false,
            co_star_active: true,
        };

        let high = synthesizer(ScriptedLlm::replying("{}"), StoryConfig::default(), 0.9);
        assert!(high.compose_prompt(&request).contains("FOCUS ON THE CO-STAR"));

        let low = synthesizer(ScriptedLlm::replying("{}"), StoryConfig::default(), 0.1);
        let prompt = low.compose_prompt(&request);
        assert!(prompt.contains("ACTIVE and PRESENT."));
        assert!(!prompt.contains("FOCUS ON THE CO-STAR"));

        let co_star_last = vec![story_page(1, FocusChar::CoStar, None)];
        let prompt = high.compose_prompt(&BeatRequest {
            history: &co_star_last,
            ..request
        });
        assert!(!prompt.contains("FOCUS ON THE CO-STAR"));
    }

    #[tokio::test]
    async fn test_synthesize_parses_fenced_reply() {
        let llm = ScriptedLlm::replying(
            "```json\n{\"caption\": \"Night falls.\", \"dialogue\": \"Who's there?\", \"scene\": \"dark hall\", \"focus_char\": \"other\", \"choices\": [\"Stay\", \"Flee\"]}\n```",
        );
        let synth = synthesizer(llm, StoryConfig::default(), 0.0);

        let beat = synth
            .synthesize(&BeatRequest {
                history: &[],
                page: 2,
                is_decision: false,
                is_final: false,
                co_star_active: false,
            })
            .await;
        assert_eq!(beat.caption, "Night falls.");
        assert_eq!(beat.focus_char, FocusChar::Other);
        assert!(beat.choices.is_empty());
    }

    #[tokio::test]
    async fn test_provider_error_becomes_fallback() {
        let synth = synthesizer(ScriptedLlm::failing("connection reset"), StoryConfig::default(), 0.0);
        let beat = synth
            .synthesize(&BeatRequest {
                history: &[],
                page: 4,
                is_decision: true,
                is_final: false,
                co_star_active: false,
            })
            .await;
        assert_eq!(beat, Beat::fallback(4));
    }

    #[tokio::test]
    async fn test_parse_error_becomes_fallback() {
        let synth = synthesizer(ScriptedLlm::replying("not json at all"), StoryConfig::default(), 0.0);
        let beat = synth
            .synthesize(&BeatRequest {
                history: &[],
                page: 5,
                is_decision: false,
                is_final: false,
                co_star_active: false,
            })
            .await;
        assert_eq!(beat.caption, "...");
        assert_eq!(beat.scene, "Scene 5");
        assert_eq!(beat.focus_char, FocusChar::Hero);
        assert!(beat.choices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_fallback() {
        let mut llm = ScriptedLlm::replying("{\"caption\": \"late\"}");
        llm.delay = Some(Duration::from_secs(60));
        let synth = synthesizer(llm, StoryConfig::default(), 0.0);

        let beat = synth
            .synthesize(&BeatRequest {
                history: &[],
                page: 6,
                is_decision: false,
                is_final: false,
                co_star_active: false,
            })
            .await;
        assert_eq!(beat, Beat::fallback(6));
    }
}
