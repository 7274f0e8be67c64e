//! Export a document as flat text or Markdown.
//!
//! Rendering is pure: [`render_text`] and [`render_markdown`] only read
//! the document. Sections without content render the explicit
//! [`NOT_GENERATED`] placeholder, never an empty string.

use anyhow::{bail, Result};
use std::path::Path;

use crate::models::Document;
use crate::store::DocumentStore;

pub const NOT_GENERATED: &str = "[Section not generated yet]";

/// Output format for [`run_export`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportFormat {
    Text,
    Markdown,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" | "txt" => Ok(ExportFormat::Text),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => bail!("Unknown export format: {}. Use text or markdown.", other),
        }
    }
}

/// Title line, then a `## heading` and body per section.
pub fn render_text(doc: &Document) -> String {
    let mut out = format!("{}\n\n", doc.outline.title);
    for section in doc.sections() {
        out.push_str(&format!(
            "## {}\n\n{}\n\n",
            section.title,
            section.content().unwrap_or(NOT_GENERATED)
        ));
    }
    out.trim_end().to_string() + "\n"
}

/// Markdown with the document title as `#` and each section's role in italics.
pub fn render_markdown(doc: &Document) -> String {
    let mut out = format!("# {}\n\n", doc.outline.title);
    for section in doc.sections() {
        out.push_str(&format!("## {}\n\n", section.title));
        if !section.role.trim().is_empty() {
            out.push_str(&format!("_{}_\n\n", section.role.trim()));
        }
        out.push_str(section.content().unwrap_or(NOT_GENERATED));
        out.push_str("\n\n");
    }
    out.trim_end().to_string() + "\n"
}

pub fn render(doc: &Document, format: ExportFormat) -> String {
    match format {
        ExportFormat::Text => render_text(doc),
        ExportFormat::Markdown => render_markdown(doc),
    }
}

/// Export a stored document.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(
    store: &dyn DocumentStore,
    id: &str,
    format: ExportFormat,
    output: Option<&Path>,
) -> Result<()> {
    let Some(doc) = store.load_document(id).await? else {
        bail!("document not found: {}", id);
    };

    let rendered = render(&doc, format);

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &rendered)?;
            eprintln!(
                "Exported \"{}\" ({} sections, {} words) to {}",
                doc.outline.title,
                doc.sections().len(),
                doc.total_words(),
                path.display()
            );
        }
        None => {
            print!("{}", rendered);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationConfig, Outline, Section};

    fn doc() -> Document {
        Document::new(
            "p",
            Outline {
                title: "Guide".to_string(),
                sections: vec![
                    Section::new("a", "Start", "intro", vec![]),
                    Section::new("b", "Finish", "", vec![]),
                ],
            },
            GenerationConfig::default(),
        )
    }

    #[test]
    fn test_ungenerated_sections_get_placeholder() {
        let text = render_text(&doc());
        assert_eq!(text.matches(NOT_GENERATED).count(), 2);
        assert!(text.starts_with("Guide\n\n## Start\n\n"));
    }

    #[test]
    fn test_generated_content_is_rendered_verbatim() {
        let mut d = doc();
        d.outline.sections[0] = d.outline.sections[0].clone().with_content("Hello there.");
        let text = render_text(&d);
        assert!(text.contains("## Start\n\nHello there.\n\n## Finish"));
        assert_eq!(text.matches(NOT_GENERATED).count(), 1);
    }

    #[test]
    fn test_markdown_includes_role_only_when_present() {
        let md = render_markdown(&doc());
        assert!(md.starts_with("# Guide\n\n## Start\n\n_intro_\n\n"));
        assert!(md.contains("## Finish\n\n[Section"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("md").unwrap(), ExportFormat::Markdown);
        assert!(ExportFormat::parse("pdf").is_err());
    }
}
