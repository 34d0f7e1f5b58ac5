//! Threat pattern classifier and sanitizer for untrusted input.
//!
//! One pure entry point, [`classify_and_sanitize`], covering four threat
//! families (markup injection, query injection, command injection, path
//! traversal) plus three format kinds (email, username, JSON). Detection and
//! sanitization are independent passes: a markup input with no detected
//! signature is still HTML-escaped. Malformed input is reported through the
//! outcome's `threats`/`errors` lists — nothing in this module returns an
//! error or panics.
//!
//! This is advisory defense-in-depth. Query escaping is not a substitute for
//! parameterized statements in the persistence layer, and the Command kind
//! only flags — the terminal simulator stays responsible for safe
//! interpretation of command text.

pub mod patterns;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use patterns::{
    default_signatures, scan_shell_metacharacters, SignatureDatabase, SignatureEntry, SignatureSet,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The threat family a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatCategory {
    Markup,
    Query,
    Command,
    Path,
}

/// A structured annotation naming the threat family and matched signature.
/// Transient — returned with each call, never persisted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatFinding {
    pub category: ThreatCategory,
    /// Stable signature id, e.g. `"markup_script_tag"`.
    pub pattern_id: String,
}

/// How an input should be interpreted for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Markup,
    Query,
    Command,
    Path,
    Email,
    Username,
    Json,
}

/// Result of classifying and sanitizing one input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeOutcome {
    pub sanitized: String,
    /// Signature matches from the four threat families.
    pub threats: Vec<ThreatFinding>,
    /// Format/validation problems (email, username, JSON kinds).
    pub errors: Vec<String>,
    /// Whether `sanitized` differs from the original input.
    pub modified: bool,
}

impl SanitizeOutcome {
    fn new(input: &str, sanitized: String, threats: Vec<ThreatFinding>, errors: Vec<String>) -> Self {
        let modified = sanitized != input;
        SanitizeOutcome {
            sanitized,
            threats,
            errors,
            modified,
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed tables
// ---------------------------------------------------------------------------

/// HTML escape substitution table. Applied after the strip pass, always.
const HTML_ESCAPES: &[(char, &str)] = &[
    ('&', "&amp;"),
    ('<', "&lt;"),
    ('>', "&gt;"),
    ('"', "&quot;"),
    ('\'', "&#x27;"),
    ('/', "&#x2F;"),
    ('`', "&#x60;"),
    ('=', "&#x3D;"),
];

static ALLOWED_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[a-zA-Z0-9\s\-_./:@='"]+$"#).expect("command allow-list pattern")
});

static EMAIL_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$").expect("email format pattern")
});

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 50;

// ---------------------------------------------------------------------------
// Sanitizer
// ---------------------------------------------------------------------------

/// Compiled classifier state: one signature set per regex-based threat
/// family. Construct once (optionally with extra signatures from a TOML
/// file) and share; [`classify_and_sanitize`] uses a process-wide default.
pub struct Sanitizer {
    markup: SignatureSet,
    query: SignatureSet,
    path: SignatureSet,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::from_entries(default_signatures())
    }
}

impl Sanitizer {
    /// Built-in signatures plus any entries loaded from `signatures_path`.
    pub fn with_signature_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut entries = default_signatures();
        entries.extend(SignatureDatabase::load_from_file(path)?.signatures);
        Ok(Self::from_entries(entries))
    }

    fn from_entries(entries: Vec<SignatureEntry>) -> Self {
        Sanitizer {
            markup: SignatureSet::compile(&entries, ThreatCategory::Markup),
            query: SignatureSet::compile(&entries, ThreatCategory::Query),
            path: SignatureSet::compile(&entries, ThreatCategory::Path),
        }
    }

    /// Classify `input` as `kind`, returning the sanitized value, any threat
    /// findings and any validation errors. Pure and total.
    pub fn classify(&self, input: &str, kind: InputKind) -> SanitizeOutcome {
        match kind {
            InputKind::Markup => self.classify_markup(input),
            InputKind::Query => self.classify_query(input),
            InputKind::Command => classify_command(input),
            InputKind::Path => self.classify_path(input),
            InputKind::Email => classify_email(input),
            InputKind::Username => classify_username(input),
            InputKind::Json => classify_json(input),
        }
    }

    fn classify_markup(&self, input: &str) -> SanitizeOutcome {
        let threats = self.markup.scan(input);
        // Strip and escape are independent of detection: escaping runs even
        // when no signature matched.
        let stripped = self.markup.strip_all(input);
        let sanitized = escape_html(&stripped);
        SanitizeOutcome::new(input, sanitized, threats, Vec::new())
    }

    fn classify_query(&self, input: &str) -> SanitizeOutcome {
        let threats = self.query.scan(input);
        let sanitized = escape_query(input);
        SanitizeOutcome::new(input, sanitized, threats, Vec::new())
    }

    fn classify_path(&self, input: &str) -> SanitizeOutcome {
        let threats = self.path.scan(input);
        let mut s = self.path.strip_all(input);
        if let Some(rest) = s.strip_prefix("~/") {
            s = rest.to_string();
        }
        s = collapse_slashes(&s);
        let sanitized = s.trim_start_matches('/').to_string();
        SanitizeOutcome::new(input, sanitized, threats, Vec::new())
    }
}

static DEFAULT_SANITIZER: LazyLock<Sanitizer> = LazyLock::new(Sanitizer::default);

/// Classify with the process-wide default (built-in) signature catalogue.
pub fn classify_and_sanitize(input: &str, kind: InputKind) -> SanitizeOutcome {
    DEFAULT_SANITIZER.classify(input, kind)
}

// ---------------------------------------------------------------------------
// Kind-specific passes
// ---------------------------------------------------------------------------

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match HTML_ESCAPES.iter().find(|(ch, _)| *ch == c) {
            Some((_, rep)) => out.push_str(rep),
            None => out.push(c),
        }
    }
    out
}

/// Escape quotes, backslashes and control characters for query contexts.
fn escape_query(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out
}

/// Command text is flagged, never rewritten: the sanitized value is the
/// trimmed original and the simulator decides what to do with it.
fn classify_command(input: &str) -> SanitizeOutcome {
    let trimmed = input.trim();
    let threats = if ALLOWED_COMMAND.is_match(trimmed) {
        Vec::new()
    } else {
        scan_shell_metacharacters(trimmed)
    };
    SanitizeOutcome::new(input, trimmed.to_string(), threats, Vec::new())
}

fn collapse_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_slash = false;
    for c in text.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

fn classify_email(input: &str) -> SanitizeOutcome {
    let normalized = input.trim().to_lowercase();
    let sanitized: String = normalized
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-' | '@'))
        .collect();
    let mut errors = Vec::new();
    if !EMAIL_FORMAT.is_match(&sanitized) {
        errors.push("invalid email format".to_string());
    }
    SanitizeOutcome::new(input, sanitized, Vec::new(), errors)
}

fn classify_username(input: &str) -> SanitizeOutcome {
    let mut sanitized: String = input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let mut errors = Vec::new();
    if sanitized.len() > USERNAME_MAX_LEN {
        sanitized.truncate(USERNAME_MAX_LEN);
        errors.push(format!(
            "username exceeds {USERNAME_MAX_LEN} characters; truncated"
        ));
    }
    if sanitized.len() < USERNAME_MIN_LEN {
        errors.push(format!(
            "username shorter than {USERNAME_MIN_LEN} characters"
        ));
    }
    SanitizeOutcome::new(input, sanitized, Vec::new(), errors)
}

fn classify_json(input: &str) -> SanitizeOutcome {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(value) => {
            // Canonical re-serialization; key order follows the parsed value.
            let sanitized =
                serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
            SanitizeOutcome::new(input, sanitized, Vec::new(), Vec::new())
        }
        Err(e) => SanitizeOutcome::new(
            input,
            "{}".to_string(),
            Vec::new(),
            vec![format!("invalid JSON: {e}")],
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
