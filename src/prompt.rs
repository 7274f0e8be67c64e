//! Prompt construction for outline and section requests.
//!
//! Prompts are plain text. The outline prompt pins the JSON shape the
//! model must return; the section prompt carries the outline structure and
//! the tail of already written sections so consecutive sections read as
//! one piece.

use crate::models::{GenerationConfig, Outline, Section};

/// Smallest per-section word budget requested from the model.
const MIN_SECTION_WORDS: u32 = 50;

/// Characters of each previous section quoted back for continuity.
const PREVIOUS_TAIL_CHARS: usize = 1200;

pub const OUTLINE_INSTRUCTIONS: &str = "You are a structured writing assistant. \
Plan documents as a title and an ordered list of sections. \
Respond with a single JSON object and nothing else.";

pub const SECTION_INSTRUCTIONS: &str = "You are a careful prose writer. \
Write only the body text of the requested section: no heading, no preamble, no closing remarks.";

fn style_block(config: &GenerationConfig) -> String {
    let mut out = format!(
        "Tone: {}\nTarget length: about {} words in total.\n",
        config.tone, config.target_words
    );
    if !config.allowed_elements.is_empty() {
        out.push_str(&format!(
            "Include these elements where natural: {}.\n",
            config.allowed_elements.join(", ")
        ));
    }
    if !config.denied_elements.is_empty() {
        out.push_str(&format!(
            "Never include: {}.\n",
            config.denied_elements.join(", ")
        ));
    }
    out
}

fn context_block(context: Option<&str>) -> String {
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!(
            "\nReference material from the user's knowledge base (use it where relevant):\n{}\n",
            ctx.trim()
        ),
        _ => String::new(),
    }
}

pub fn outline_prompt(config: &GenerationConfig, prompt: &str, context: Option<&str>) -> String {
    format!(
        "Create an outline for the following request.\n\nRequest: {}\n\n{}{}\n\
Return JSON of exactly this shape:\n\
{{\"title\": string, \"sections\": [{{\"title\": string, \"role\": string, \"subSteps\": [string], \"cues\": [string]}}]}}\n\
`role` states the purpose of the section, `subSteps` lists the beats it covers in order, \
and `cues` (optional) lists short stylistic hints.",
        prompt.trim(),
        style_block(config),
        context_block(context),
    )
}

/// Per-section word budget: the document target split evenly, floored at [`MIN_SECTION_WORDS`].
pub fn section_word_budget(config: &GenerationConfig, section_count: usize) -> u32 {
    let count = section_count.max(1) as u32;
    (config.target_words / count).max(MIN_SECTION_WORDS)
}

pub fn section_prompt(
    outline: &Outline,
    section: &Section,
    previous: &[Section],
    config: &GenerationConfig,
    context: Option<&str>,
) -> String {
    let mut out = format!("Document title: {}\n\nOutline:\n", outline.title);
    for (i, s) in outline.sections.iter().enumerate() {
        let marker = if s.id == section.id { " <- write this" } else { "" };
        out.push_str(&format!("{}. {} ({}){}\n", i + 1, s.title, s.role, marker));
    }

    if !previous.is_empty() {
        out.push_str("\nAlready written (continue naturally from here):\n");
        for prev in previous {
            let content = prev.content().unwrap_or_default();
            out.push_str(&format!("## {}\n{}\n", prev.title, tail(content, PREVIOUS_TAIL_CHARS)));
        }
    }

    out.push_str(&format!(
        "\nWrite the section \"{}\".\nPurpose: {}\n",
        section.title, section.role
    ));
    if !section.sub_steps.is_empty() {
        out.push_str("Cover, in order:\n");
        for step in &section.sub_steps {
            out.push_str(&format!("- {}\n", step));
        }
    }
    if let Some(ref cues) = section.cues {
        if !cues.is_empty() {
            out.push_str(&format!("Stylistic cues: {}\n", cues.join("; ")));
        }
    }

    out.push('\n');
    out.push_str(&style_block(config));
    out.push_str(&format!(
        "This section should be about {} words.\n",
        section_word_budget(config, outline.sections.len())
    ));
    out.push_str(&context_block(context));
    out
}

/// Last `max_chars` characters of `text`, cut on a char boundary.
fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline() -> Outline {
        Outline {
            title: "Night Train".to_string(),
            sections: vec![
                Section::new("a", "Departure", "intro", vec!["platform".to_string()]),
                Section::new("b", "Tunnel", "conflict", vec![]),
            ],
        }
    }

    #[test]
    fn test_outline_prompt_mentions_style_and_shape() {
        let config = GenerationConfig {
            denied_elements: vec!["gore".to_string()],
            ..GenerationConfig::default()
        };
        let p = outline_prompt(&config, "  a ghost story  ", None);
        assert!(p.contains("Request: a ghost story"));
        assert!(p.contains("Never include: gore."));
        assert!(p.contains("\"subSteps\""));
    }

    #[test]
    fn test_section_prompt_marks_target_and_quotes_previous() {
        let o = outline();
        let prev = vec![o.sections[0].clone().with_content("The whistle blew.")];
        let p = section_prompt(
            &o,
            &o.sections[1],
            &prev,
            &GenerationConfig::default(),
            Some("[notes.md] trains"),
        );
        assert!(p.contains("2. Tunnel (conflict) <- write this"));
        assert!(p.contains("The whistle blew."));
        assert!(p.contains("[notes.md] trains"));
    }

    #[test]
    fn test_word_budget_floor() {
        let config = GenerationConfig {
            target_words: 100,
            ..GenerationConfig::default()
        };
        assert_eq!(section_word_budget(&config, 4), 50);
        assert_eq!(section_word_budget(&config, 1), 100);
        assert_eq!(section_word_budget(&config, 0), 100);
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("héllo", 3), "llo");
        assert_eq!(tail("hi", 10), "hi");
    }
}
