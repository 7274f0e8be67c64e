//! Outline generation.
//!
//! Sends one streaming request asking for a JSON outline, forwards every
//! delta to the caller for live display, then extracts and parses the JSON
//! once the stream completes. Models often wrap the object in a fenced code
//! block or add a sentence before it; [`extract_json`] tolerates both.
//!
//! Each section gets an id derived from its title and position (see
//! [`section_id`]), so re-parsing the same outline yields the same ids and
//! duplicate titles never collide.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::backend::{collect_stream, GenerationBackend, GenerationRequest};
use crate::cancel::StopToken;
use crate::error::GenerationError;
use crate::models::{CacheMetrics, GenerationConfig, Outline, Section};
use crate::prompt;

/// A parsed outline plus the vendor metadata of the call that produced it.
#[derive(Debug, Clone)]
pub struct OutlineResult {
    pub outline: Outline,
    pub response_id: Option<String>,
    pub usage: Option<CacheMetrics>,
}

/// Inputs for [`generate_outline`].
pub struct OutlineRequest<'a> {
    pub config: &'a GenerationConfig,
    pub prompt: &'a str,
    /// Knowledge base excerpt to blend into the prompt.
    pub context: Option<&'a str>,
    pub previous_response_id: Option<&'a str>,
    pub model: &'a str,
}

/// Ask the backend for an outline.
///
/// # Errors
///
/// - [`GenerationError::InvalidInput`] for an empty prompt or a zero word
///   target; no request is made.
/// - [`GenerationError::Transport`] when the backend call fails.
/// - [`GenerationError::Parse`] when the response holds no usable outline.
pub async fn generate_outline(
    backend: &dyn GenerationBackend,
    request: OutlineRequest<'_>,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<OutlineResult, GenerationError> {
    if request.prompt.trim().is_empty() {
        return Err(GenerationError::InvalidInput(
            "prompt must not be empty".to_string(),
        ));
    }
    if request.config.target_words == 0 {
        return Err(GenerationError::InvalidInput(
            "target word count must be positive".to_string(),
        ));
    }

    let stream = backend
        .stream(GenerationRequest {
            model: request.model.to_string(),
            prompt: prompt::outline_prompt(request.config, request.prompt, request.context),
            instructions: Some(prompt::OUTLINE_INSTRUCTIONS.to_string()),
            previous_response_id: request.previous_response_id.map(str::to_string),
        })
        .await?;

    // Outline streams are not user-cancellable; only section runs are.
    let outcome = collect_stream(stream, &StopToken::new(), on_delta).await?;
    let outline = parse_outline(&outcome.text)?;

    tracing::info!(
        title = %outline.title,
        sections = outline.sections.len(),
        "outline generated"
    );

    Ok(OutlineResult {
        outline,
        response_id: outcome.response_id,
        usage: outcome.usage,
    })
}

/// Locate the JSON object in a raw model response.
///
/// Prefers the body of a fenced block (```` ```json ```` or bare ```` ``` ````);
/// otherwise takes the span from the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Result<&str, GenerationError> {
    if let Some(body) = fenced_body(raw) {
        if body.trim_start().starts_with('{') {
            return Ok(body.trim());
        }
    }

    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => Ok(&raw[start..=end]),
        _ => Err(GenerationError::Parse(
            "no JSON object found in model response".to_string(),
        )),
    }
}

fn fenced_body(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_fence = &raw[open + 3..];
    // Skip the info string (e.g. "json") up to the end of the line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutline {
    #[serde(default)]
    title: String,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSection {
    title: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    sub_steps: Vec<String>,
    #[serde(default)]
    cues: Option<Vec<String>>,
}

/// Parse a raw model response into an [`Outline`] with stable section ids.
///
/// Any `id` the model supplies is ignored in favour of [`section_id`].
pub fn parse_outline(raw: &str) -> Result<Outline, GenerationError> {
    let json = extract_json(raw)?;
    let parsed: RawOutline = serde_json::from_str(json)
        .map_err(|e| GenerationError::Parse(format!("invalid outline JSON: {}", e)))?;

    if parsed.title.trim().is_empty() {
        return Err(GenerationError::Parse("outline has no title".to_string()));
    }
    if parsed.sections.is_empty() {
        return Err(GenerationError::Parse("outline has no sections".to_string()));
    }

    let sections = parsed
        .sections
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut section = Section::new(
                section_id(&raw.title, index),
                raw.title,
                raw.role,
                raw.sub_steps,
            );
            section.cues = raw.cues.filter(|c| !c.is_empty());
            section
        })
        .collect();

    Ok(Outline {
        title: parsed.title.trim().to_string(),
        sections,
    })
}

/// Deterministic section id from title and position.
pub fn section_id(title: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", index, title).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("sec-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};

    const FENCED: &str = "Here you go:\n```json\n{\"title\":\"T\",\"sections\":[{\"id\":\"x\",\"title\":\"S1\",\"role\":\"intro\",\"subSteps\":[\"a\",\"b\"]}]}\n```";

    fn request<'a>(config: &'a GenerationConfig, prompt: &'a str) -> OutlineRequest<'a> {
        OutlineRequest {
            config,
            prompt,
            context: None,
            previous_response_id: None,
            model: "m",
        }
    }

    #[test]
    fn test_parse_fenced_outline() {
        let outline = parse_outline(FENCED).unwrap();
        assert_eq!(outline.title, "T");
        assert_eq!(outline.sections.len(), 1);
        let s = &outline.sections[0];
        assert_eq!(s.title, "S1");
        assert_eq!(s.role, "intro");
        assert_eq!(s.sub_steps, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(s.id, section_id("S1", 0));
        assert!(!s.has_content());
    }

    #[test]
    fn test_parse_bare_object_with_preamble() {
        let raw = "Sure! {\"title\":\"T\",\"sections\":[{\"title\":\"S\"}]} Enjoy.";
        let outline = parse_outline(raw).unwrap();
        assert_eq!(outline.sections[0].title, "S");
    }

    #[test]
    fn test_not_json_is_parse_error() {
        let err = parse_outline("not json").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_outline("{\"title\": \"T\", \"sections\": [").unwrap_err();
        assert!(err.is_parse());
        let err = parse_outline("{\"title\":\"T\",\"sections\":[]}").unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_duplicate_titles_get_distinct_ids() {
        assert_ne!(section_id("Scene", 0), section_id("Scene", 1));
        assert_eq!(section_id("Scene", 2), section_id("Scene", 2));
    }

    #[tokio::test]
    async fn test_generate_outline_streams_then_parses() {
        let backend = ScriptedBackend::new();
        let (head, rest) = FENCED.split_at(20);
        backend.push(ScriptedResponse::chunks([head, rest]));

        let config = GenerationConfig::default();
        let mut seen = Vec::new();
        let result = generate_outline(&backend, request(&config, "a story"), &mut |d: &str| {
            seen.push(d.to_string())
        })
        .await
        .unwrap();

        assert_eq!(seen.len(), 2);
        assert_eq!(result.outline.title, "T");
        assert_eq!(result.response_id.as_deref(), Some("resp-1"));
    }

    #[tokio::test]
    async fn test_empty_prompt_makes_no_call() {
        let backend = ScriptedBackend::new();
        let config = GenerationConfig::default();
        let err = generate_outline(&backend, request(&config, "   "), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_parse_error() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::transport_error("offline"));
        let config = GenerationConfig::default();
        let err = generate_outline(&backend, request(&config, "x"), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
    }
}
