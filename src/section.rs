//! Section generation.
//!
//! Expands one outline section into prose. The prompt carries the whole
//! outline for structure and the already written sections before the
//! target for continuity. Output is raw prose; no parsing is involved.

use crate::backend::{collect_stream, GenerationBackend, GenerationRequest};
use crate::cancel::StopToken;
use crate::error::GenerationError;
use crate::models::{CacheMetrics, GenerationConfig, Outline, Section};
use crate::prompt;

/// Inputs for [`generate_section`].
pub struct SectionRequest<'a> {
    pub outline: &'a Outline,
    pub section_id: &'a str,
    /// Sections with content strictly before the target, in outline order.
    pub previous: &'a [Section],
    pub config: &'a GenerationConfig,
    pub context: Option<&'a str>,
    pub previous_response_id: Option<&'a str>,
    pub model: &'a str,
}

#[derive(Debug, Clone)]
pub struct SectionResult {
    pub content: String,
    pub word_count: u32,
    pub response_id: Option<String>,
    pub usage: Option<CacheMetrics>,
}

/// Count whitespace-delimited words, ignoring empty tokens.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Generate prose for one section.
///
/// The stop token is polled at each chunk boundary; once set, the stream
/// is abandoned and [`GenerationError::Stopped`] is returned.
///
/// # Errors
///
/// - [`GenerationError::InvalidInput`] if the target is not in the outline
///   or `previous` is not an in-order, content-bearing prefix of it.
/// - [`GenerationError::Transport`] when the backend call fails.
/// - [`GenerationError::Stopped`] on cooperative cancellation.
pub async fn generate_section(
    backend: &dyn GenerationBackend,
    request: SectionRequest<'_>,
    stop: &StopToken,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<SectionResult, GenerationError> {
    let target_index = request
        .outline
        .sections
        .iter()
        .position(|s| s.id == request.section_id)
        .ok_or_else(|| {
            GenerationError::InvalidInput(format!(
                "section {} is not part of the outline",
                request.section_id
            ))
        })?;
    validate_previous(request.outline, target_index, request.previous)?;

    let target = &request.outline.sections[target_index];
    let stream = backend
        .stream(GenerationRequest {
            model: request.model.to_string(),
            prompt: prompt::section_prompt(
                request.outline,
                target,
                request.previous,
                request.config,
                request.context,
            ),
            instructions: Some(prompt::SECTION_INSTRUCTIONS.to_string()),
            previous_response_id: request.previous_response_id.map(str::to_string),
        })
        .await?;

    let outcome = collect_stream(stream, stop, on_delta).await?;
    let content = outcome.text.trim().to_string();
    let words = word_count(&content);

    tracing::debug!(section = %target.id, words, "section generated");

    Ok(SectionResult {
        content,
        word_count: words,
        response_id: outcome.response_id,
        usage: outcome.usage,
    })
}

fn validate_previous(
    outline: &Outline,
    target_index: usize,
    previous: &[Section],
) -> Result<(), GenerationError> {
    let mut last_index: Option<usize> = None;
    for prev in previous {
        if !prev.has_content() {
            return Err(GenerationError::InvalidInput(format!(
                "previous section {} has no content",
                prev.id
            )));
        }
        let index = outline
            .sections
            .iter()
            .position(|s| s.id == prev.id)
            .filter(|&i| i < target_index)
            .ok_or_else(|| {
                GenerationError::InvalidInput(format!(
                    "previous section {} does not precede the target",
                    prev.id
                ))
            })?;
        if last_index.is_some_and(|last| index <= last) {
            return Err(GenerationError::InvalidInput(
                "previous sections are out of outline order".to_string(),
            ));
        }
        last_index = Some(index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ScriptedBackend, ScriptedResponse};

    fn outline() -> Outline {
        Outline {
            title: "T".to_string(),
            sections: vec![
                Section::new("a", "A", "intro", vec![]),
                Section::new("b", "B", "body", vec![]),
                Section::new("c", "C", "end", vec![]),
            ],
        }
    }

    fn request<'a>(
        outline: &'a Outline,
        id: &'a str,
        previous: &'a [Section],
        config: &'a GenerationConfig,
    ) -> SectionRequest<'a> {
        SectionRequest {
            outline,
            section_id: id,
            previous,
            config,
            context: None,
            previous_response_id: None,
            model: "m",
        }
    }

    #[test]
    fn test_word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("Alpha  beta\nbeta gamma"), 4);
        assert_eq!(word_count("   "), 0);
        assert_eq!(word_count(""), 0);
    }

    #[tokio::test]
    async fn test_generates_content_and_word_count() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::chunks(["Alpha  beta\n", "beta gamma"]));
        let o = outline();
        let config = GenerationConfig::default();

        let result = generate_section(
            &backend,
            request(&o, "a", &[], &config),
            &StopToken::new(),
            &mut |_: &str| {},
        )
        .await
        .unwrap();

        assert_eq!(result.content, "Alpha  beta\nbeta gamma");
        assert_eq!(result.word_count, 4);
    }

    #[tokio::test]
    async fn test_unknown_section_rejected_without_call() {
        let backend = ScriptedBackend::new();
        let o = outline();
        let config = GenerationConfig::default();
        let err = generate_section(
            &backend,
            request(&o, "zzz", &[], &config),
            &StopToken::new(),
            &mut |_: &str| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_previous_must_precede_target_and_have_content() {
        let backend = ScriptedBackend::new();
        let o = outline();
        let config = GenerationConfig::default();

        let empty_prev = vec![o.sections[0].clone()];
        let err = generate_section(
            &backend,
            request(&o, "b", &empty_prev, &config),
            &StopToken::new(),
            &mut |_: &str| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));

        let later_prev = vec![o.sections[2].clone().with_content("x")];
        let err = generate_section(
            &backend,
            request(&o, "b", &later_prev, &config),
            &StopToken::new(),
            &mut |_: &str| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidInput(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_mid_stream_is_distinguishable() {
        let stop = StopToken::new();
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::chunks(["one ", "two ", "three"]).stop_after_chunk(&stop, 1));
        let o = outline();
        let config = GenerationConfig::default();

        let mut seen = 0;
        let err = generate_section(&backend, request(&o, "a", &[], &config), &stop, &mut |_: &str| {
            seen += 1
        })
        .await
        .unwrap_err();

        assert!(err.is_stopped());
        assert_eq!(seen, 1);
    }
}
