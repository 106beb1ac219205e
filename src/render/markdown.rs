//! Markdown-to-HTML formatter for assistant replies.
//!
//! The formatter is a chain of small text passes over a restricted Markdown
//! subset. Every pass is a pure `&str -> String` function, and each one
//! relies on what the previous pass left behind: the input is HTML-escaped
//! before any markup is introduced, and fenced code is lifted out before the
//! inline passes run so its body is never touched twice.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\w*)\s*((?s:.*?))```").expect("fence pattern"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+?)`").expect("inline code pattern"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern"));
static UNDERLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__(.*?)__").expect("underline pattern"));
static RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^---[ \t]*$").expect("rule pattern"));
static LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\((https?://[^)]+)\)").expect("link pattern")
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})[ \t]*(.*?)$").expect("heading pattern"));
static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s").expect("ordered item pattern"));
static ORDERED_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").expect("ordered prefix pattern"));
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").expect("placeholder pattern"));
static STRAY_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<p>\s*(<ul>|</ul>|<ol>|</ol>|<div class="code-block-container">|<h[1-6]>|<hr>)"#)
        .expect("stray open pattern")
});
static STRAY_CLOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<ul>|</ul>|<ol>|</ol>|</div>|</h[1-6]>|<hr>)\s*</p>").expect("stray close pattern")
});

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

/// Formats a raw reply into the restricted HTML subset rendered by the chat UI.
pub fn format_response(raw: &str) -> String {
    let escaped = escape_lines(raw);
    let (text, blocks) = extract_code_blocks(&escaped);
    let text = inline_code(&text);
    let text = emphasis(&text);
    let text = horizontal_rules(&text);
    let text = links(&text);
    let text = headings(&text);
    let text = group_blocks(&text);
    let text = restore_code_blocks(&text, &blocks);
    strip_stray_paragraphs(&text).trim_matches('\n').to_string()
}

/// Escapes the five HTML-sensitive characters, plus the two private-use
/// characters that delimit code-block placeholders.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            PLACEHOLDER_OPEN => out.push_str("&#xE000;"),
            PLACEHOLDER_CLOSE => out.push_str("&#xE001;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape_html`].
pub fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#xE000;", "\u{E000}")
        .replace("&#xE001;", "\u{E001}")
        .replace("&amp;", "&")
}

/// Escapes every line independently; carriage returns before line breaks are dropped.
pub fn escape_lines(raw: &str) -> String {
    raw.split('\n')
        .map(|line| escape_html(line.strip_suffix('\r').unwrap_or(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A fenced code block lifted out of the text before inline formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    /// Already-escaped body, inserted into the output as-is.
    pub body: String,
}

impl CodeBlock {
    pub fn to_html(&self) -> String {
        let language = if self.language.is_empty() {
            "text"
        } else {
            self.language.as_str()
        };
        format!(
            "<div class=\"code-block-container\"><button class=\"copy-code-btn\" title=\"Copy code\">Copy</button><pre><code class=\"language-{language}\">{}</code></pre></div>",
            self.body
        )
    }
}

/// Replaces each fenced block with a placeholder line and returns the blocks in order.
///
/// An unterminated fence does not match and stays in the text as literal backticks.
pub fn extract_code_blocks(text: &str) -> (String, Vec<CodeBlock>) {
    let mut blocks = Vec::new();
    let replaced = FENCE.replace_all(text, |caps: &Captures| {
        let index = blocks.len();
        blocks.push(CodeBlock {
            language: caps[1].to_string(),
            body: caps[2].to_string(),
        });
        format!("\n{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}\n")
    });
    (replaced.into_owned(), blocks)
}

pub fn restore_code_blocks(text: &str, blocks: &[CodeBlock]) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| blocks.get(index))
                .map(CodeBlock::to_html)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn inline_code(text: &str) -> String {
    INLINE_CODE.replace_all(text, "<code>$1</code>").into_owned()
}

/// Bold, single-marker italics and double-underscore underline, in that order.
pub fn emphasis(text: &str) -> String {
    let text = BOLD.replace_all(text, "<strong>$1</strong>");
    let text = wrap_lone_markers(&text, '*', "em");
    let text = wrap_lone_markers(&text, '_', "em");
    UNDERLINE.replace_all(&text, "<u>$1</u>").into_owned()
}

/// Wraps text between two single `marker` characters on the same line.
///
/// A marker counts only when it is neither preceded nor followed by another
/// marker, so doubled markers never open or close an italic span. Neighbours
/// are judged against the input text, not against earlier replacements.
pub fn wrap_lone_markers(text: &str, marker: char, tag: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let is_lone = |i: usize| {
        chars[i] == marker
            && (i == 0 || chars[i - 1] != marker)
            && chars.get(i + 1) != Some(&marker)
    };

    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if is_lone(i) {
            let close = (i + 1..chars.len())
                .take_while(|&j| chars[j] != '\n')
                .find(|&j| is_lone(j));
            if let Some(j) = close {
                out.push('<');
                out.push_str(tag);
                out.push('>');
                out.extend(&chars[i + 1..j]);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

pub fn horizontal_rules(text: &str) -> String {
    RULE.replace_all(text, "<hr>").into_owned()
}

/// Converts `[text](url)` for http and https targets only.
pub fn links(text: &str) -> String {
    LINK.replace_all(
        text,
        r#"<a href="$2" target="_blank" rel="noopener noreferrer">$1</a>"#,
    )
    .into_owned()
}

pub fn headings(text: &str) -> String {
    HEADING
        .replace_all(text, |caps: &Captures| {
            let level = caps[1].len();
            format!("<h{level}>{}</h{level}>", caps[2].trim())
        })
        .into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenList {
    None,
    Unordered,
    Ordered,
}

impl OpenList {
    fn close(&mut self, out: &mut Vec<String>) {
        match self {
            OpenList::Unordered => out.push("</ul>".to_string()),
            OpenList::Ordered => out.push("</ol>".to_string()),
            OpenList::None => {}
        }
        *self = OpenList::None;
    }

    fn open(&mut self, kind: OpenList, out: &mut Vec<String>) {
        if *self == kind {
            return;
        }
        self.close(out);
        out.push(
            match kind {
                OpenList::Unordered => "<ul>",
                _ => "<ol>",
            }
            .to_string(),
        );
        *self = kind;
    }
}

/// Groups list lines into `<ul>`/`<ol>` and wraps remaining lines in `<p>`.
///
/// At most one list is open at a time; a list of the other kind, a non-list
/// line or the end of input closes it. Headings, rules and code-block
/// placeholders are left unwrapped. Blank lines are kept as empty lines.
pub fn group_blocks(text: &str) -> String {
    let mut out = Vec::new();
    let mut open = OpenList::None;

    for line in text.split('\n') {
        let trimmed = line.trim();
        if let Some(item) = trimmed
            .strip_prefix("* ")
            .or_else(|| trimmed.strip_prefix("- "))
        {
            open.open(OpenList::Unordered, &mut out);
            out.push(format!("<li>{}</li>", item.trim()));
        } else if ORDERED_ITEM.is_match(trimmed) {
            open.open(OpenList::Ordered, &mut out);
            let item = ORDERED_PREFIX.replace(trimmed, "");
            out.push(format!("<li>{}</li>", item.trim()));
        } else {
            open.close(&mut out);
            if trimmed.is_empty() {
                out.push(String::new());
            } else if trimmed.starts_with("<h") || trimmed.starts_with(PLACEHOLDER_OPEN) {
                out.push(trimmed.to_string());
            } else {
                out.push(format!("<p>{trimmed}</p>"));
            }
        }
    }
    open.close(&mut out);

    out.join("\n")
}

/// Removes `<p>` wrappers sitting directly around list, heading, rule or code containers.
pub fn strip_stray_paragraphs(text: &str) -> String {
    let text = STRAY_OPEN.replace_all(text, "$1");
    STRAY_CLOSE.replace_all(&text, "$1").into_owned()
}
