//! Candidate extraction from raw model text.
//!
//! Models wrap code in markdown fences, preface it with prose, or emit it
//! bare. Extraction is a total function over that mess: one of the three
//! strategies always applies, in fixed priority order, and the chosen one is
//! recorded on the candidate so callers and reports can see how trustworthy
//! the slice is.

use std::fmt;

use crate::grammar::DomainGrammar;

/// How a candidate was recovered from the raw completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Interior of the first fenced code block.
    FencedBlock,
    /// Remaining text from the first grammar-shaped line onward.
    HeuristicSlice,
    /// Whole trimmed completion; nothing better matched.
    RawPassthrough,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMethod::FencedBlock => write!(f, "fenced-block"),
            ExtractionMethod::HeuristicSlice => write!(f, "heuristic-slice"),
            ExtractionMethod::RawPassthrough => write!(f, "raw-passthrough"),
        }
    }
}

/// Code pulled out of a completion, with provenance.
#[derive(Debug, Clone)]
pub struct CandidateCode {
    pub source_text: String,
    pub extraction_method: ExtractionMethod,
}

/// Extract candidate code from raw model text. Never fails; the worst input
/// still comes back as a `RawPassthrough` candidate for the validator to
/// judge.
pub fn extract(grammar: &DomainGrammar, raw: &str) -> CandidateCode {
    if let Some(block) = first_fenced_block(raw) {
        return CandidateCode {
            source_text: block,
            extraction_method: ExtractionMethod::FencedBlock,
        };
    }
    if let Some(slice) = grammar_slice(grammar, raw) {
        return CandidateCode {
            source_text: slice,
            extraction_method: ExtractionMethod::HeuristicSlice,
        };
    }
    CandidateCode {
        source_text: raw.trim().to_string(),
        extraction_method: ExtractionMethod::RawPassthrough,
    }
}

/// Interior of the first ``` fence. An optional language tag on the opening
/// line is dropped; an unterminated fence runs to the end of the text,
/// since models routinely truncate the closing fence.
fn first_fenced_block(raw: &str) -> Option<String> {
    let mut lines = raw.lines();
    loop {
        let line = lines.next()?;
        if line.trim_start().starts_with("```") {
            break;
        }
    }

    let mut interior = Vec::new();
    for line in lines {
        if line.trim_start().starts_with("```") {
            break;
        }
        interior.push(line);
    }
    Some(interior.join("\n").trim().to_string())
}

/// Everything from the first grammar-shaped line to the end of the text.
/// Only the leading prose is cut; whatever follows the code is kept and
/// left for the validator to judge.
fn grammar_slice(grammar: &DomainGrammar, raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let first = lines.iter().position(|l| is_grammar_line(grammar, l))?;
    Some(lines[first..].join("\n").trim().to_string())
}

/// Whether a line looks like the topology language: a framework import, a
/// device construction, or a known method call.
fn is_grammar_line(grammar: &DomainGrammar, line: &str) -> bool {
    let trimmed = line.trim();

    if trimmed.starts_with("from ") || trimmed.starts_with("import ") {
        return trimmed.contains(&grammar.import_root);
    }

    // name = Class(...)
    if let Some(eq) = trimmed.find('=') {
        let rhs = trimmed[eq + 1..].trim();
        if let Some(paren) = rhs.find('(') {
            if grammar.is_device_class(rhs[..paren].trim()) {
                return true;
            }
        }
    }

    // name.method(...)
    if let Some(dot) = trimmed.find('.') {
        let rest = &trimmed[dot + 1..];
        if let Some(paren) = rest.find('(') {
            if grammar.method_kind(rest[..paren].trim()).is_some() {
                return true;
            }
        }
    }

    false
}
