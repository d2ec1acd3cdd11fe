/// Left in the footer for the sending provider to substitute per recipient.
pub const UNSUBSCRIBE_PLACEHOLDER: &str = "{{unsubscribe_url}}";

const HEAD_STYLE: &str = "<style>\
body { margin: 0; padding: 0; background-color: #f4f4f4; }\
.container { width: 600px; max-width: 600px; margin: 0 auto; background-color: #ffffff; }\
.content { padding: 24px; font-family: Helvetica, Arial, sans-serif; font-size: 16px; line-height: 1.6; color: #222222; }\
.footer { padding: 16px 24px; font-family: Helvetica, Arial, sans-serif; font-size: 12px; color: #888888; text-align: center; }\
@media only screen and (max-width: 620px) {\
.container { width: 100% !important; }\
.content { padding: 16px !important; }\
}\
</style>";

/// The HTML document every issue email is wrapped in.
#[derive(Debug, Clone)]
pub struct EmailLayout {
    newsletter_name: String,
}

impl EmailLayout {
    pub fn new(newsletter_name: impl Into<String>) -> Self {
        Self {
            newsletter_name: newsletter_name.into(),
        }
    }

    /// Wraps an already email-safe body. The body is inserted untouched.
    pub fn wrap(&self, title: &str, body: &str) -> String {
        let title = htmlescape::encode_minimal(title);
        let newsletter_name = htmlescape::encode_minimal(&self.newsletter_name);

        let mut html = String::with_capacity(body.len() + 2048);
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("<meta charset=\"utf-8\">\n");
        html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
        html.push_str(&format!("<title>{}</title>\n", title));
        html.push_str(HEAD_STYLE);
        html.push_str("\n</head>\n<body>\n");
        html.push_str("<table role=\"presentation\" width=\"100%\" cellpadding=\"0\" cellspacing=\"0\" border=\"0\">\n<tr><td align=\"center\">\n");
        html.push_str("<div class=\"container\">\n<div class=\"content\">\n");
        html.push_str(&format!("<h1>{}</h1>\n", title));
        html.push_str(body);
        html.push_str("\n</div>\n<div class=\"footer\">\n");
        html.push_str(&format!(
            "<p>You are receiving this email because you subscribed to {}.</p>\n",
            newsletter_name
        ));
        html.push_str(&format!(
            "<p><a href=\"{}\">Unsubscribe</a></p>\n",
            UNSUBSCRIBE_PLACEHOLDER
        ));
        html.push_str("</div>\n</div>\n</td></tr>\n</table>\n</body>\n</html>\n");
        html
    }
}
