//! Turns an issue's markdown into a complete, email-safe HTML document.
mod email_safe;
mod layout;
mod markdown;

pub use email_safe::{ImageTreatment, SkipReason, classify_image, make_email_safe};
pub use layout::{EmailLayout, UNSUBSCRIBE_PLACEHOLDER};
pub use markdown::markdown_to_html;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Failed to convert markdown to HTML: {0}")]
    Markdown(String),
}

/// Markdown to HTML, image rewriting, then the surrounding layout.
#[tracing::instrument(name = "Render issue email", skip(markdown, layout))]
pub fn render_issue_email(
    title: &str,
    markdown: &str,
    layout: &EmailLayout,
) -> Result<String, RenderError> {
    let body = markdown_to_html(markdown)?;
    let body = make_email_safe(&body);
    Ok(layout.wrap(title, &body))
}
