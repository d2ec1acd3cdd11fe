use super::RenderError;
use pulldown_cmark::{Options, Parser, html};

fn markdown_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

/// Converts CommonMark (plus GFM tables, strikethrough and task lists)
/// into an HTML fragment. Raw HTML in the source is passed through.
pub fn markdown_to_html(markdown: &str) -> Result<String, RenderError> {
    std::panic::catch_unwind(|| {
        let parser = Parser::new_ext(markdown, markdown_options());
        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, parser);
        output
    })
    .map_err(|payload| {
        let cause = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic in the markdown renderer".to_string());
        RenderError::Markdown(cause)
    })
}
