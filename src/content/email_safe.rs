//! Rewrites `<img>` tags so that they render consistently across email
//! clients, while leaving tracking pixels and decorative images alone.
use scraper::{Html, Selector};
use std::borrow::Cow;

/// Images smaller than this, in either dimension, are pixels or decoration.
pub const MIN_IMAGE_DIMENSION_PX: f32 = 50.0;

const CLASS_OR_ID_MARKERS: [&str; 6] = ["track", "analytics", "pixel", "spacer", "hidden", "beacon"];
const SOURCE_MARKERS: [&str; 4] = ["track", "analytics", "pixel", "beacon"];

const EMAIL_SAFE_DECLARATIONS: [(&str, &str); 7] = [
    ("display", "block"),
    ("max-width", "100%"),
    ("height", "auto"),
    ("border", "0"),
    ("outline", "none"),
    ("text-decoration", "none"),
    ("margin", "16px auto"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SmallDimensionAttribute,
    TrackingClassOrId,
    TrackingSource,
    HiddenOrSmallInlineStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTreatment {
    Skip(SkipReason),
    Restyle,
}

/// Attributes of a single image, names lowercased, values entity-decoded.
#[derive(Debug)]
struct ImageAttributes(Vec<(String, String)>);

impl ImageAttributes {
    fn parse(tag: &str) -> Option<Self> {
        let fragment = Html::parse_fragment(tag);
        let selector = Selector::parse("img").expect("Invalid selector");
        let image = fragment.select(&selector).next()?;
        let attributes = image
            .value()
            .attrs()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect();
        Some(Self(attributes))
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.as_str())
    }

    fn classify(&self) -> ImageTreatment {
        let is_small = |name| self.get(name).and_then(pixel_value).is_some_and(is_below_threshold);
        if is_small("width") || is_small("height") {
            return ImageTreatment::Skip(SkipReason::SmallDimensionAttribute);
        }

        let has_marker = |value: Option<&str>, markers: &[&str]| {
            value.is_some_and(|v| {
                let v = v.to_lowercase();
                markers.iter().any(|marker| v.contains(marker))
            })
        };
        if has_marker(self.get("class"), &CLASS_OR_ID_MARKERS)
            || has_marker(self.get("id"), &CLASS_OR_ID_MARKERS)
        {
            return ImageTreatment::Skip(SkipReason::TrackingClassOrId);
        }
        if has_marker(self.get("src"), &SOURCE_MARKERS) {
            return ImageTreatment::Skip(SkipReason::TrackingSource);
        }

        let style = parse_declarations(self.get("style").unwrap_or_default());
        let hides_image = style.iter().any(|(property, value)| match property.as_str() {
            "width" | "height" => pixel_value(value).is_some_and(is_below_threshold),
            "display" => value == "none",
            "visibility" => value == "hidden",
            _ => false,
        });
        if hides_image {
            return ImageTreatment::Skip(SkipReason::HiddenOrSmallInlineStyle);
        }

        ImageTreatment::Restyle
    }

    fn restyled_tag(&self) -> String {
        let mut tag = String::from("<img");
        for (name, value) in self.0.iter().filter(|(name, _)| name != "style") {
            tag.push_str(&format!(r#" {}="{}""#, name, htmlescape::encode_minimal(value)));
        }
        let style = merge_style(self.get("style"));
        tag.push_str(&format!(r#" style="{}" />"#, htmlescape::encode_minimal(&style)));
        tag
    }
}

fn is_below_threshold(pixels: f32) -> bool {
    pixels < MIN_IMAGE_DIMENSION_PX
}

/// `"1"`, `"1px"` and `"1.5 px"` are pixel values; `"100%"` and `"auto"` are not.
fn pixel_value(raw: &str) -> Option<f32> {
    let raw = raw.trim().to_lowercase();
    let number = raw.strip_suffix("px").unwrap_or(&raw).trim();
    number.parse::<f32>().ok()
}

/// Splits an inline style into trimmed `(property, value)` pairs.
/// A `;` inside quotes or parentheses belongs to the value, so
/// `url(data:image/png;base64,...)` and `'A;B'` survive intact.
fn split_declarations(style: &str) -> Vec<(&str, &str)> {
    let mut declarations = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in style.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ';' if depth == 0 => {
                    declarations.push(&style[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
    }
    declarations.push(&style[start..]);
    declarations
        .into_iter()
        .filter_map(|declaration| declaration.split_once(':'))
        .map(|(property, value)| (property.trim(), value.trim()))
        .filter(|(property, _)| !property.is_empty())
        .collect()
}

/// Lowercased declarations with `!important` dropped, for classification.
fn parse_declarations(style: &str) -> Vec<(String, String)> {
    split_declarations(style)
        .into_iter()
        .map(|(property, value)| {
            let value = value.to_lowercase();
            let value = value.trim_end_matches("!important").trim().to_owned();
            (property.to_lowercase(), value)
        })
        .collect()
}

/// The email-safe block first, the author's declarations after it.
/// Properties the author already set are not repeated from the block.
fn merge_style(existing: Option<&str>) -> String {
    let existing = split_declarations(existing.unwrap_or_default());

    let is_overridden =
        |property: &str| existing.iter().any(|(p, _)| p.eq_ignore_ascii_case(property));
    EMAIL_SAFE_DECLARATIONS
        .iter()
        .filter(|(property, _)| !is_overridden(property))
        .map(|(property, value)| format!("{}: {};", property, value))
        .chain(
            existing
                .iter()
                .map(|(property, value)| format!("{}: {};", property, value)),
        )
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_image_tag_start(html: &str, from: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut position = from;
    while let Some(offset) = html[position..].find('<') {
        let start = position + offset;
        let is_image = bytes
            .get(start + 1..start + 4)
            .is_some_and(|name| name.eq_ignore_ascii_case(b"img"));
        let ends_name = bytes
            .get(start + 4)
            .is_some_and(|b| b.is_ascii_whitespace() || *b == b'/' || *b == b'>');
        if is_image && ends_name {
            return Some(start);
        }
        position = start + 1;
    }
    None
}

/// Index just past the `>` closing the tag opened at `start`.
/// Quoted attribute values may contain `>`.
fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut previous = b'<';
    for (i, &b) in html.as_bytes().iter().enumerate().skip(start + 1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => continue,
            None => match b {
                b'"' | b'\'' if previous == b'=' => {
                    quote = Some(b);
                    continue;
                }
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
        if !b.is_ascii_whitespace() {
            previous = b;
        }
    }
    None
}

fn rewrite_image_tag(tag: &str) -> Cow<'_, str> {
    let Some(image) = ImageAttributes::parse(tag) else {
        return Cow::Borrowed(tag);
    };
    match image.classify() {
        ImageTreatment::Skip(reason) => {
            tracing::debug!(?reason, "Leaving image untouched");
            Cow::Borrowed(tag)
        }
        ImageTreatment::Restyle => Cow::Owned(image.restyled_tag()),
    }
}

/// Classifies a single `<img ...>` tag.
pub fn classify_image(tag: &str) -> Option<ImageTreatment> {
    ImageAttributes::parse(tag).map(|image| image.classify())
}

/// Applies the email-safe image rules to every `<img>` in `html`.
/// Everything that is not a restyled image is copied byte for byte;
/// an unterminated tag ends the scan and is copied as-is.
pub fn make_email_safe(html: &str) -> String {
    let mut output = String::with_capacity(html.len() + 256);
    let mut cursor = 0;
    while let Some(start) = find_image_tag_start(html, cursor) {
        let Some(end) = find_tag_end(html, start) else {
            break;
        };
        output.push_str(&html[cursor..start]);
        output.push_str(&rewrite_image_tag(&html[start..end]));
        cursor = end;
    }
    output.push_str(&html[cursor..]);
    output
}
