//! Threat signature catalogues.
//!
//! Each threat family is an ordered list of named regex signatures kept as
//! data, so the catalogue can be unit-tested and extended independently of
//! the sanitization passes. Built-in signatures are compiled into the binary;
//! additional signatures can be loaded from a TOML file and are appended
//! after the built-ins.

use std::path::Path;
use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{ThreatCategory, ThreatFinding};

// ---------------------------------------------------------------------------
// Signature database (TOML-loadable)
// ---------------------------------------------------------------------------

/// A single signature entry as stored in the TOML signature file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEntry {
    /// Stable identifier reported in [`ThreatFinding::pattern_id`].
    pub id: String,
    pub category: ThreatCategory,
    pub regex: String,
}

/// Top-level structure of the signatures TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDatabase {
    #[serde(rename = "signatures")]
    pub signatures: Vec<SignatureEntry>,
}

impl SignatureDatabase {
    /// Load signatures from a TOML file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let db: SignatureDatabase = toml::from_str(&contents)?;
        Ok(db)
    }
}

// ---------------------------------------------------------------------------
// Built-in signatures
// ---------------------------------------------------------------------------

fn entry(id: &str, category: ThreatCategory, regex: &str) -> SignatureEntry {
    SignatureEntry {
        id: id.into(),
        category,
        regex: regex.into(),
    }
}

/// All built-in signatures, in scan order.
pub fn default_signatures() -> Vec<SignatureEntry> {
    use ThreatCategory::{Markup, Path, Query};
    vec![
        // --- Markup injection ---
        entry(
            "markup_script_tag",
            Markup,
            r"(?is)<script[^>]*>.*?</script\s*>|<script[^>]*>",
        ),
        entry(
            "markup_event_handler",
            Markup,
            r#"(?i)\bon\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
        ),
        entry("markup_javascript_uri", Markup, r"(?i)javascript\s*:"),
        entry(
            "markup_embed_tag",
            Markup,
            r"(?is)</?\s*(?:iframe|object|embed)[^>]*>",
        ),
        entry("markup_svg_onload", Markup, r"(?is)<svg[^>]*\bonload[^>]*>"),
        entry("markup_css_expression", Markup, r"(?i)expression\s*\("),
        // --- Query injection ---
        entry(
            "query_keyword",
            Query,
            r#"(?i)(?:^|[\s'";(])(?:select|insert|update|delete|drop|alter|create|truncate|exec|union)\b"#,
        ),
        entry(
            "query_quote_tautology",
            Query,
            r"(?i)'\s*(?:or|and)\s+'?\w+'?\s*=\s*'?\w+",
        ),
        entry("query_comment_terminator", Query, r"--|/\*|\*/"),
        entry(
            "query_stacked_statement",
            Query,
            r"(?i);\s*(?:select|insert|update|delete|drop|alter|create|exec)\b",
        ),
        entry(
            "query_time_blind",
            Query,
            r"(?i)\bsleep\s*\(|\bbenchmark\s*\(|\bwaitfor\s+delay\b",
        ),
        // --- Path traversal ---
        entry("path_dot_dot", Path, r"\.\./|\.\.\\"),
        entry(
            "path_dot_dot_encoded",
            Path,
            r"(?i)%2e%2e(?:%2f|%5c|/|\\)|\.\.(?:%2f|%5c)",
        ),
        entry(
            "path_dot_dot_double_encoded",
            Path,
            r"(?i)%252e%252e(?:%252f|%255c)|\.\.(?:%252f|%255c)",
        ),
    ]
}

// ---------------------------------------------------------------------------
// Compiled signature set
// ---------------------------------------------------------------------------

struct CompiledSignature {
    id: String,
    category: ThreatCategory,
    regex: Regex,
}

/// An ordered set of compiled signatures for one threat family.
pub struct SignatureSet {
    signatures: Vec<CompiledSignature>,
}

impl SignatureSet {
    /// Compile the entries matching `category`, preserving order. Entries
    /// with invalid regexes are skipped (the built-ins are covered by a
    /// compile test; file-loaded entries are best-effort).
    pub fn compile(entries: &[SignatureEntry], category: ThreatCategory) -> Self {
        let signatures = entries
            .iter()
            .filter(|e| e.category == category)
            .filter_map(|e| {
                Regex::new(&e.regex).ok().map(|r| CompiledSignature {
                    id: e.id.clone(),
                    category: e.category,
                    regex: r,
                })
            })
            .collect();
        SignatureSet { signatures }
    }

    /// Report a finding for every signature present in `text`.
    pub fn scan(&self, text: &str) -> Vec<ThreatFinding> {
        self.signatures
            .iter()
            .filter(|s| s.regex.is_match(text))
            .map(|s| ThreatFinding {
                category: s.category,
                pattern_id: s.id.clone(),
            })
            .collect()
    }

    /// Remove every signature match from `text` in a single pass per
    /// signature, in catalogue order.
    pub fn strip_all(&self, text: &str) -> String {
        let mut out = text.to_string();
        for s in &self.signatures {
            if s.regex.is_match(&out) {
                out = s.regex.replace_all(&out, "").into_owned();
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Shell metacharacter set (literal, Aho-Corasick)
// ---------------------------------------------------------------------------

/// Literal shell metacharacter signatures for the Command kind, paired with
/// their reported pattern ids. Multi-character operators come first so
/// leftmost-longest matching prefers `&&` over `&`.
const SHELL_META: &[(&str, &str)] = &[
    ("&&", "command_and_chain"),
    ("||", "command_or_chain"),
    (";", "command_separator"),
    ("|", "command_pipe"),
    ("&", "command_background"),
    ("`", "command_backtick"),
    ("$", "command_substitution"),
    ("(", "command_paren"),
    (")", "command_paren"),
    ("{", "command_brace"),
    ("}", "command_brace"),
    ("[", "command_bracket"),
    ("]", "command_bracket"),
    ("<", "command_redirect"),
    (">", "command_redirect"),
    ("\n", "command_newline"),
    ("\r", "command_newline"),
    ("\0", "command_nul"),
];

static SHELL_META_AC: LazyLock<AhoCorasick> = LazyLock::new(|| {
    let literals: Vec<&str> = SHELL_META.iter().map(|(lit, _)| *lit).collect();
    AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(&literals)
        .expect("shell metacharacter literal set")
});

/// Scan a command rejected by the allow-list for shell metacharacters.
/// Each metacharacter id is reported at most once.
pub fn scan_shell_metacharacters(text: &str) -> Vec<ThreatFinding> {
    let mut seen: Vec<&str> = Vec::new();
    for m in SHELL_META_AC.find_iter(text) {
        let id = SHELL_META[m.pattern().as_usize()].1;
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen.into_iter()
        .map(|id| ThreatFinding {
            category: ThreatCategory::Command,
            pattern_id: id.to_string(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
