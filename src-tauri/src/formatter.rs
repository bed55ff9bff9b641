//! Reply formatting: the Gen-Z restyling pass and the markdown-to-markup
//! renderer used for assistant bubbles.
//!
//! Both are ordered pipelines of regex passes. The order is part of the
//! output contract: masking runs before slang and emoji injection, and the
//! renderer converts code before emphasis, emphasis before block structure,
//! and line breaks last.

use std::sync::LazyLock;

use rand::seq::{index, SliceRandom};
use rand::Rng;
use regex::Regex;

pub const MAX_STYLED_LEN: usize = 500;

const TECHNICAL_MARKERS: [&str; 4] = ["```", "def ", "class ", "<html>"];

const SENTENCE_BREAK: &str = ". ";

const SLANG_CHANCE: f64 = 0.7;

const SLANG: [&str; 15] = [
  " no cap",
  " fr",
  " tbh",
  " lowkey",
  " highkey",
  " bet",
  " vibes",
  " bruh",
  " slay",
  " iconic",
  " tho",
  " ngl",
  " hit different",
  " is giving",
  " sheesh",
];

const EMOJI: [&str; 15] = [
  "😂", "💯", "👀", "✨", "🔥", "💅", "🙌", "👑", "🤩", "😭", "💀", "🤌", "🤷‍♀️", "🥺", "👉👈",
];

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

fn pattern(src: &str) -> Regex {
  Regex::new(src).expect("formatter patterns are valid")
}

// fenced code, inline code, bold, italic
static MASK_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
  [
    pattern(r"```[\s\S]*?```"),
    pattern(r"`[^`]*`"),
    pattern(r"\*\*[^*]*\*\*"),
    pattern(r"\*[^*]*\*"),
  ]
});

/// Text with protected spans swapped out for indexed placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedText {
  text: String,
  spans: Vec<String>,
}

impl MaskedText {
  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn spans(&self) -> &[String] {
    &self.spans
  }

  /// Puts every masked span back into `text`. Later spans may enclose the
  /// placeholders of earlier ones, so expansion runs newest first.
  pub fn restore(&self, text: &str) -> String {
    let mut restored = text.to_string();
    for (idx, span) in self.spans.iter().enumerate().rev() {
      restored = restored.replace(&placeholder(idx), span);
    }
    restored
  }
}

fn placeholder(idx: usize) -> String {
  format!("{PLACEHOLDER_OPEN}{idx}{PLACEHOLDER_CLOSE}")
}

pub fn mask(text: &str) -> MaskedText {
  let mut spans: Vec<String> = Vec::new();
  let mut masked = text.to_string();
  for re in MASK_PATTERNS.iter() {
    masked = re
      .replace_all(&masked, |caps: &regex::Captures<'_>| {
        spans.push(caps[0].to_string());
        placeholder(spans.len() - 1)
      })
      .into_owned();
  }
  MaskedText { text: masked, spans }
}

pub fn is_technical(text: &str) -> bool {
  text.chars().count() > MAX_STYLED_LEN || TECHNICAL_MARKERS.iter().any(|m| text.contains(m))
}

pub fn stylize(raw: &str) -> String {
  stylize_with(raw, &mut rand::thread_rng())
}

pub fn stylize_with<R: Rng + ?Sized>(raw: &str, rng: &mut R) -> String {
  if is_technical(raw) {
    return raw.to_string();
  }

  let masked = mask(raw);
  let text = add_slang(masked.text(), rng);
  let text = add_emoji(&text, rng);
  masked.restore(&text)
}

fn add_slang<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
  let mut sentences: Vec<String> = text.split(SENTENCE_BREAK).map(str::to_string).collect();
  if sentences.len() <= 3 {
    return text.to_string();
  }

  let count = (sentences.len() / 3).min(2);
  let last = sentences.len() - 1;
  for idx in index::sample(rng, sentences.len(), count).into_iter() {
    if idx < last && rng.gen_bool(SLANG_CHANCE) {
      if let Some(expr) = SLANG.choose(rng) {
        sentences[idx].push_str(expr);
      }
    }
  }
  sentences.join(SENTENCE_BREAK)
}

fn add_emoji<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
  let mut text = text.to_string();
  for _ in 0..rng.gen_range(1..=2) {
    let Some(emoji) = EMOJI.choose(rng) else {
      break;
    };
    if text.contains(SENTENCE_BREAK) {
      let mut parts: Vec<String> = text.split(SENTENCE_BREAK).map(str::to_string).collect();
      let idx = rng.gen_range(0..parts.len());
      parts[idx].push(' ');
      parts[idx].push_str(emoji);
      text = parts.join(SENTENCE_BREAK);
    } else {
      text.push(' ');
      text.push_str(emoji);
    }
  }
  text
}

struct MarkupPass {
  re: Regex,
  replacement: &'static str,
}

impl MarkupPass {
  fn new(src: &str, replacement: &'static str) -> Self {
    Self {
      re: pattern(src),
      replacement,
    }
  }
}

static MARKUP_PASSES: LazyLock<Vec<MarkupPass>> = LazyLock::new(|| {
  vec![
    MarkupPass::new(r"```([\s\S]*?)```", r#"<pre class="code-block">${1}</pre>"#),
    MarkupPass::new(r"`([^`]+)`", r#"<code class="inline-code">${1}</code>"#),
    MarkupPass::new(r"\*\*(.*?)\*\*", "<strong>${1}</strong>"),
    MarkupPass::new(r"\*(.*?)\*", "<em>${1}</em>"),
    MarkupPass::new(r"(?m)^# (.*?)$", "<h1>${1}</h1>"),
    MarkupPass::new(r"(?m)^## (.*?)$", "<h2>${1}</h2>"),
    MarkupPass::new(r"(?m)^### (.*?)$", "<h3>${1}</h3>"),
    MarkupPass::new(r"(?m)^\* (.*?)$", "<ul><li>${1}</li></ul>"),
    MarkupPass::new(r"</ul>\s*<ul>", ""),
    MarkupPass::new(r"(?m)^(\d+)\. (.*?)$", r#"<ol start="${1}"><li>${2}</li></ol>"#),
    MarkupPass::new(r#"</ol>\s*<ol start="\d+">"#, ""),
  ]
});

static LINK: LazyLock<Regex> = LazyLock::new(|| pattern(r"\[(.*?)\]\((.*?)\)"));

static BREAK_PASSES: LazyLock<Vec<MarkupPass>> = LazyLock::new(|| {
  vec![
    MarkupPass::new(r"\n\s*\n", "<br><br>"),
    MarkupPass::new(r"\n", "<br>"),
  ]
});

const LINK_SCHEMES: [&str; 3] = ["https://", "http://", "mailto:"];

fn apply(passes: &[MarkupPass], text: String) -> String {
  passes.iter().fold(text, |acc, pass| {
    pass.re.replace_all(&acc, pass.replacement).into_owned()
  })
}

fn escape_html(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

// Only web and mail targets become anchors; anything else stays as its label.
fn render_link(caps: &regex::Captures<'_>) -> String {
  let (label, href) = (&caps[1], caps[2].trim());
  let lower = href.to_ascii_lowercase();
  if LINK_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
    format!(r#"<a href="{href}" class="link">{label}</a>"#)
  } else {
    label.to_string()
  }
}

/// Converts the markdown subset the model emits into bubble markup.
/// The input is HTML-escaped first, so only the markup produced here reaches
/// the page. Apply once to raw model output; the result is not meant to be
/// re-rendered.
pub fn render_markup(text: &str) -> String {
  let markup = apply(&MARKUP_PASSES, escape_html(text));
  let markup = LINK.replace_all(&markup, render_link).into_owned();
  apply(&BREAK_PASSES, markup)
}

pub fn format_reply<R: Rng + ?Sized>(raw: &str, rng: &mut R) -> String {
  render_markup(&stylize_with(raw, rng))
}
