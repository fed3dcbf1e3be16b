//! Markdown → inline-styled HTML suitable for the blog platform's post editor.
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("article body is empty")]
    Empty,
    #[error("article body contains no renderable text")]
    NoText,
}

/// Image block placed above the article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturedImage {
    pub url: String,
    pub alt: String,
    pub author: String,
    pub credit_url: String,
}

const CONTAINER_STYLE: &str = "font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif; max-width: 100%; padding: 0;";
const P_STYLE: &str = "line-height: 1.9; margin: 18px 0; color: #333; font-size: 17px; text-align: justify;";
const UL_STYLE: &str = "margin: 20px 0; padding-left: 35px; line-height: 1.9;";
const LI_STYLE: &str = "margin: 10px 0; color: #444; font-size: 17px;";

static H1: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^# (.+)$").unwrap());
static H2: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^## (.+)$").unwrap());
static H3: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^### (.+)$").unwrap());
static H4_6: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{4,6}) •?\s*(.+)$").unwrap());
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+?)\*|\b_([^_\n]+?)_\b").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap());
static NUMBERED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\s+").unwrap());

/// Render an article body, optionally preceded by a featured image.
pub fn render_post(markdown: &str, image: Option<&FeaturedImage>) -> Result<String, MarkupError> {
    let body = markdown_to_html(markdown)?;
    Ok(match image {
        Some(img) => format!("{}\n\n{}", image_block(img), body),
        None => body,
    })
}

pub fn markdown_to_html(markdown: &str) -> Result<String, MarkupError> {
    let source = markdown.replace("\r\n", "\n");
    if source.trim().is_empty() {
        return Err(MarkupError::Empty);
    }

    let html = escape_html(&source);
    let html = render_headings(&html);
    let html = render_inline(&html);
    let html = render_lists(&html);

    let paragraphs: Vec<String> = html
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.starts_with('<') {
                p.to_string()
            } else {
                format!(r#"<p style="{P_STYLE}">{p}</p>"#)
            }
        })
        .collect();
    if paragraphs.is_empty() {
        return Err(MarkupError::NoText);
    }

    Ok(format!(
        r#"<div style="{CONTAINER_STYLE}">{}</div>"#,
        paragraphs.join("\n\n")
    ))
}

pub fn image_block(img: &FeaturedImage) -> String {
    let alt = escape_attr(&img.alt);
    let credit = if img.author.trim().is_empty() {
        String::new()
    } else {
        format!(
            r#"
    <p style="font-size: 13px; color: #777; margin-top: 8px;">Photo by <a href="{}" style="color: #777;">{}</a></p>"#,
            escape_attr(&img.credit_url),
            escape_html(&img.author)
        )
    };
    format!(
        r#"<div class="featured-image" style="text-align: center; margin: 30px 0 20px 0;">
    <img src="{}" alt="{alt}" style="max-width: 100%; height: auto; display: block; margin: 0 auto;" />{credit}
</div>"#,
        escape_attr(&img.url)
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_html(s).replace('"', "&quot;")
}

fn render_headings(html: &str) -> String {
    let html = H4_6.replace_all(html, |caps: &regex::Captures| {
        let (color, size, indent, bullet) = match caps[1].len() {
            4 => ("#2c3e50", 18, 10, "#4CAF50"),
            5 => ("#34495e", 17, 15, "#3498db"),
            _ => ("#34495e", 16, 20, "#3498db"),
        };
        format!(
            r#"<div style="color: {color}; font-size: {size}px; font-weight: 600; margin: 20px 0 12px {indent}px; line-height: 1.4;"><span style="color: {bullet}; margin-right: 8px;">•</span>{}</div>"#,
            &caps[2]
        )
    });
    let html = H3.replace_all(&html, r#"<h3 style="color: #2c3e50; font-size: 22px; font-weight: 600; margin: 28px 0 15px 0; line-height: 1.4; border-left: 4px solid #3498db; padding-left: 15px;">$1</h3>"#);
    let html = H2.replace_all(&html, r#"<h2 style="color: #1a1a1a; font-size: 28px; font-weight: 700; margin: 35px 0 20px 0; padding-bottom: 12px; border-bottom: 3px solid #4CAF50; line-height: 1.3;">$1</h2>"#);
    let html = H1.replace_all(&html, r#"<h1 style="color: #1a1a1a; font-size: 32px; font-weight: 800; margin: 40px 0 25px 0;">$1</h1>"#);
    html.into_owned()
}

fn render_inline(html: &str) -> String {
    let html = BOLD.replace_all(html, |caps: &regex::Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        format!(r#"<strong style="color: #2196F3; font-weight: 600;">{inner}</strong>"#)
    });
    let html = rewrite_lines(&html, |line| {
        // List markers (`* item`) are handled later and must not read as emphasis.
        let (marker, rest) = match line.strip_prefix("* ") {
            Some(rest) => ("* ", rest),
            None => ("", line),
        };
        let rendered = ITALIC.replace_all(rest, |caps: &regex::Captures| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!(r#"<em style="color: #555;">{inner}</em>"#)
        });
        format!("{marker}{rendered}")
    });
    // Text is already entity-escaped; only the attribute delimiter is left to neutralize.
    LINK.replace_all(&html, |caps: &regex::Captures| {
        format!(
            r#"<a href="{}" style="color: #3498db; text-decoration: none; border-bottom: 2px solid #3498db;">{}</a>"#,
            caps[2].replace('"', "&quot;"),
            &caps[1]
        )
    })
    .into_owned()
}

fn rewrite_lines<F: Fn(&str) -> String>(html: &str, f: F) -> String {
    html.split('\n').map(f).collect::<Vec<_>>().join("\n")
}

#[derive(PartialEq)]
enum ListKind {
    Bullet,
    Numbered,
}

fn render_lists(html: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut open: Option<ListKind> = None;

    let close = |open: &mut Option<ListKind>, out: &mut Vec<String>| match open.take() {
        Some(ListKind::Bullet) => out.push("</ul>".into()),
        Some(ListKind::Numbered) => out.push("</ol>".into()),
        None => {}
    };

    for line in html.split('\n') {
        let stripped = line.trim();
        let item = if let Some(rest) = stripped
            .strip_prefix("- ")
            .or_else(|| stripped.strip_prefix("* "))
        {
            Some((ListKind::Bullet, rest.to_string()))
        } else if NUMBERED.is_match(stripped) {
            Some((ListKind::Numbered, NUMBERED.replace(stripped, "").into_owned()))
        } else {
            None
        };

        match item {
            Some((kind, text)) => {
                if open.as_ref() != Some(&kind) {
                    close(&mut open, &mut out);
                    out.push(match kind {
                        ListKind::Bullet => format!(r#"<ul style="{UL_STYLE}">"#),
                        ListKind::Numbered => format!(r#"<ol style="{UL_STYLE}">"#),
                    });
                    open = Some(kind);
                }
                let extra = if open == Some(ListKind::Bullet) {
                    " list-style-type: disc;"
                } else {
                    ""
                };
                out.push(format!(r#"<li style="{LI_STYLE}{extra}">{text}</li>"#));
            }
            None => {
                close(&mut open, &mut out);
                out.push(line.to_string());
            }
        }
    }
    close(&mut open, &mut out);
    out.join("\n")
}
