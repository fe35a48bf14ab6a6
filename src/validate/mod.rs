//! Structural validation of candidate topology code.
//!
//! Validation never fails: every candidate, however mangled, comes back as
//! a [`ValidationReport`]. A candidate that does not scan yields the single
//! `SyntaxError` violation and an empty entity set. A candidate that scans
//! is walked statement by statement against the grammar's structural rules,
//! each rule reporting at most one violation (its first offending site):
//!
//! - `UndeclaredReference`: a link/address/gateway operation names a device
//!   with no prior construction.
//! - `UninstantiatedDevice`: a constructed device is linked before its
//!   instantiation call.
//! - `SelfLink`: a link whose endpoints are the same device.
//! - `MalformedAddress`: an address or prefix literal that does not parse.
//! - `MissingImport`: no framework import anywhere in the candidate.
//!
//! Reports are deterministic: the same candidate and grammar produce the
//! same report, bit for bit. Validation reads nothing but its arguments and
//! never executes the candidate.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use crate::extract::CandidateCode;
use crate::grammar::{DomainGrammar, MethodKind};

pub mod parser;

use parser::{Arg, Stmt, StmtKind};

/// Identifier of a validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleId {
    SyntaxError,
    UndeclaredReference,
    UninstantiatedDevice,
    SelfLink,
    MalformedAddress,
    MissingImport,
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleId::SyntaxError => "SyntaxError",
            RuleId::UndeclaredReference => "UndeclaredReference",
            RuleId::UninstantiatedDevice => "UninstantiatedDevice",
            RuleId::SelfLink => "SelfLink",
            RuleId::MalformedAddress => "MalformedAddress",
            RuleId::MissingImport => "MissingImport",
        };
        write!(f, "{name}")
    }
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub rule_id: RuleId,
    pub message: String,
    /// 1-based source line, when derivable.
    pub location: Option<usize>,
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// True exactly when `violations` is empty.
    pub is_valid: bool,
    /// Violations in discovery order, at most one per rule.
    pub violations: Vec<Violation>,
    /// Every device identifier the scan classified, valid or not.
    pub parsed_entities: BTreeSet<String>,
}

impl ValidationReport {
    fn new(violations: Vec<Violation>, parsed_entities: BTreeSet<String>) -> Self {
        Self {
            is_valid: violations.is_empty(),
            violations,
            parsed_entities,
        }
    }

    /// Human-readable block for CLI output and logs.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.is_valid {
            out.push_str("Validation PASSED\n");
        } else {
            out.push_str(&format!(
                "Validation FAILED: {} violation(s)\n",
                self.violations.len()
            ));
        }
        for v in &self.violations {
            match v.location {
                Some(line) => out.push_str(&format!("  [{}] line {}: {}\n", v.rule_id, line, v.message)),
                None => out.push_str(&format!("  [{}] {}\n", v.rule_id, v.message)),
            }
        }
        if !self.parsed_entities.is_empty() {
            let names: Vec<&str> = self.parsed_entities.iter().map(String::as_str).collect();
            out.push_str(&format!("Entities: {}\n", names.join(", ")));
        }
        out
    }
}

/// Validates candidates against one grammar vocabulary.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    grammar: DomainGrammar,
}

impl Validator {
    pub fn new(grammar: DomainGrammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> &DomainGrammar {
        &self.grammar
    }

    /// Validate an extracted candidate.
    pub fn validate(&self, candidate: &CandidateCode) -> ValidationReport {
        self.validate_source(&candidate.source_text)
    }

    /// Validate raw source text.
    pub fn validate_source(&self, source: &str) -> ValidationReport {
        let statements = match parser::parse_source(source) {
            Ok(statements) => statements,
            Err(e) => {
                let violation = Violation {
                    rule_id: RuleId::SyntaxError,
                    message: e.message.clone(),
                    location: Some(e.line),
                };
                return ValidationReport::new(vec![violation], BTreeSet::new());
            }
        };
        StructuralPass::new(&self.grammar).run(&statements)
    }
}

/// Validate one candidate against a grammar.
pub fn validate_candidate(candidate: &CandidateCode, grammar: &DomainGrammar) -> ValidationReport {
    Validator::new(grammar.clone()).validate(candidate)
}

/// One walk over the scanned statements, accumulating rule violations and
/// the entity set.
struct StructuralPass<'a> {
    grammar: &'a DomainGrammar,
    violations: Vec<Violation>,
    entities: BTreeSet<String>,
    constructed: BTreeSet<String>,
    instantiated: BTreeSet<String>,
    has_import: bool,
}

impl<'a> StructuralPass<'a> {
    fn new(grammar: &'a DomainGrammar) -> Self {
        Self {
            grammar,
            violations: Vec::new(),
            entities: BTreeSet::new(),
            constructed: BTreeSet::new(),
            instantiated: BTreeSet::new(),
            has_import: false,
        }
    }

    fn run(mut self, statements: &[Stmt]) -> ValidationReport {
        for stmt in statements {
            self.visit(stmt);
        }
        if !self.has_import {
            self.record(
                RuleId::MissingImport,
                None,
                format!("no '{}' import found", self.grammar.import_root),
            );
        }
        ValidationReport::new(self.violations, self.entities)
    }

    /// Record a violation unless its rule already fired.
    fn record(&mut self, rule_id: RuleId, location: Option<usize>, message: String) {
        if self.violations.iter().any(|v| v.rule_id == rule_id) {
            return;
        }
        self.violations.push(Violation {
            rule_id,
            message,
            location,
        });
    }

    fn visit(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import { module } => {
                let root = &self.grammar.import_root;
                if module == root || module.starts_with(&format!("{root}.")) {
                    self.has_import = true;
                }
            }
            StmtKind::Construction { device, class, .. } => {
                if self.grammar.is_device_class(class) {
                    self.constructed.insert(device.clone());
                    self.entities.insert(device.clone());
                }
            }
            StmtKind::Call {
                device,
                method,
                args,
            } => {
                let Some(kind) = self.grammar.method_kind(method) else {
                    return;
                };
                self.entities.insert(device.clone());
                match kind {
                    MethodKind::Instantiate => {
                        self.instantiated.insert(device.clone());
                    }
                    MethodKind::Link => self.check_link(stmt.line, device, args),
                    MethodKind::Address => {
                        self.require_declared(stmt.line, device, "addressed");
                        self.check_address(stmt.line, args.first(), args.get(1));
                    }
                    MethodKind::Gateway => {
                        self.require_declared(stmt.line, device, "assigned a gateway");
                        self.check_gateway(stmt.line, args.first());
                    }
                    MethodKind::InternetUplink => {
                        self.require_declared(stmt.line, device, "wired to the internet");
                        self.check_address(stmt.line, args.first(), args.get(1));
                    }
                }
            }
            StmtKind::Auxiliary => {}
        }
    }

    fn require_declared(&mut self, line: usize, device: &str, action: &str) {
        if !self.constructed.contains(device) {
            self.record(
                RuleId::UndeclaredReference,
                Some(line),
                format!("device '{device}' is {action} before any construction"),
            );
        }
    }

    fn check_link(&mut self, line: usize, device: &str, args: &[Arg]) {
        self.require_declared(line, device, "linked");
        if self.constructed.contains(device) && !self.instantiated.contains(device) {
            self.record(
                RuleId::UninstantiatedDevice,
                Some(line),
                format!(
                    "device '{device}' is linked before {}()",
                    self.grammar.instantiate_method
                ),
            );
        }
        if let Some(Arg::Ident(peer)) = args.first() {
            self.entities.insert(peer.clone());
            if peer == device {
                self.record(
                    RuleId::SelfLink,
                    Some(line),
                    format!("device '{device}' is linked to itself"),
                );
            }
            if !self.constructed.contains(peer) {
                self.record(
                    RuleId::UndeclaredReference,
                    Some(line),
                    format!("device '{peer}' is linked before any construction"),
                );
            } else if !self.instantiated.contains(peer) {
                self.record(
                    RuleId::UninstantiatedDevice,
                    Some(line),
                    format!(
                        "device '{peer}' is linked before {}()",
                        self.grammar.instantiate_method
                    ),
                );
            }
        }
    }

    fn check_address(&mut self, line: usize, ip: Option<&Arg>, prefix: Option<&Arg>) {
        let addr = match ip {
            Some(Arg::Str(s)) => match s.parse::<IpAddr>() {
                Ok(addr) => addr,
                Err(_) => {
                    self.record(
                        RuleId::MalformedAddress,
                        Some(line),
                        format!("'{s}' is not a valid IP address"),
                    );
                    return;
                }
            },
            // A variable reference cannot be judged statically.
            Some(Arg::Ident(_)) => return,
            Some(other) => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    format!("address must be a quoted literal, got {other:?}"),
                );
                return;
            }
            None => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    "address assignment has no address argument".to_string(),
                );
                return;
            }
        };

        match prefix {
            Some(Arg::Int(n)) => {
                let max = if addr.is_ipv4() { 32 } else { 128 };
                if *n < 0 || *n > max {
                    self.record(
                        RuleId::MalformedAddress,
                        Some(line),
                        format!("prefix length {n} is out of range for {addr}"),
                    );
                }
            }
            Some(Arg::Ident(_)) => {}
            Some(other) => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    format!("prefix length must be an integer literal, got {other:?}"),
                );
            }
            None => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    "address assignment is missing its prefix length".to_string(),
                );
            }
        }
    }

    fn check_gateway(&mut self, line: usize, ip: Option<&Arg>) {
        match ip {
            Some(Arg::Str(s)) => {
                if s.parse::<IpAddr>().is_err() {
                    self.record(
                        RuleId::MalformedAddress,
                        Some(line),
                        format!("'{s}' is not a valid gateway address"),
                    );
                }
            }
            Some(Arg::Ident(_)) => {}
            Some(other) => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    format!("gateway address must be a quoted literal, got {other:?}"),
                );
            }
            None => {
                self.record(
                    RuleId::MalformedAddress,
                    Some(line),
                    "gateway assignment has no address argument".to_string(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{CandidateCode, ExtractionMethod};
    use crate::prompt::default_exemplars;

    fn validator() -> Validator {
        Validator::default()
    }

    fn candidate(source: &str) -> CandidateCode {
        CandidateCode {
            source_text: source.to_string(),
            extraction_method: ExtractionMethod::FencedBlock,
        }
    }

    fn two_host_sample() -> String {
        [
            "from profissa_lft.host import Host",
            "from profissa_lft.switch import Switch",
            "",
            "h1 = Host('h1')",
            "h2 = Host('h2')",
            "s1 = Switch('s1')",
            "",
            "h1.instantiate()",
            "h2.instantiate()",
            "s1.instantiate()",
            "",
            "h1.connect(s1, \"h1s1\", \"s1h1\")",
            "h2.connect(s1, \"h2s1\", \"s1h2\")",
            "",
            "h1.setIp('10.0.0.1', 24, \"h1s1\")",
            "h2.setIp('10.0.0.2', 24, \"h2s1\")",
            "",
            "h1.setDefaultGateway('10.0.0.254', \"h1s1\")",
            "h2.setDefaultGateway('10.0.0.254', \"h2s1\")",
        ]
        .join("\n")
    }

    #[test]
    fn test_round_trip_valid_sample() {
        let report = validator().validate(&candidate(&two_host_sample()));
        assert!(report.is_valid, "unexpected: {}", report.summary());
        assert!(report.violations.is_empty());
        let entities: Vec<&str> = report.parsed_entities.iter().map(String::as_str).collect();
        assert_eq!(entities, vec!["h1", "h2", "s1"]);
    }

    #[test]
    fn test_canonical_exemplars_validate_clean() {
        for exemplar in default_exemplars() {
            let report = validator().validate(&candidate(&exemplar.code));
            assert!(
                report.is_valid,
                "exemplar '{}' failed: {}",
                exemplar.description,
                report.summary()
            );
        }
    }

    #[test]
    fn test_self_link_yields_exactly_one_violation() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.connect(h1, \"a\", \"b\")";
        let report = validator().validate(&candidate(source));
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].rule_id, RuleId::SelfLink);
        assert_eq!(report.violations[0].location, Some(4));
    }

    #[test]
    fn test_undeclared_reference() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.connect(s9, \"a\", \"b\")";
        let report = validator().validate(&candidate(source));
        assert!(!report.is_valid);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::UndeclaredReference && v.message.contains("s9")));
        // The undeclared peer still shows up in the entity set.
        assert!(report.parsed_entities.contains("s9"));
    }

    #[test]
    fn test_uninstantiated_device_in_link() {
        let source = "from profissa_lft.host import Host\n\
                      from profissa_lft.switch import Switch\n\
                      h1 = Host('h1')\n\
                      s1 = Switch('s1')\n\
                      h1.connect(s1, \"a\", \"b\")";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::UninstantiatedDevice));
    }

    #[test]
    fn test_instantiation_after_link_still_flagged() {
        let source = "from profissa_lft.host import Host\n\
                      from profissa_lft.switch import Switch\n\
                      h1 = Host('h1')\n\
                      s1 = Switch('s1')\n\
                      h1.connect(s1, \"a\", \"b\")\n\
                      h1.instantiate()\n\
                      s1.instantiate()";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::UninstantiatedDevice));
    }

    #[test]
    fn test_malformed_ip_address() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.setIp('999.0.0.1', 24, \"a\")";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::MalformedAddress && v.message.contains("999.0.0.1")));
    }

    #[test]
    fn test_prefix_out_of_range_for_v4() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.setIp('10.0.0.1', 64, \"a\")";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::MalformedAddress && v.message.contains("64")));
    }

    #[test]
    fn test_ipv6_address_with_wide_prefix_is_fine() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.setIp('2001:db8::1', 64, \"a\")";
        let report = validator().validate(&candidate(source));
        assert!(report.is_valid, "unexpected: {}", report.summary());
    }

    #[test]
    fn test_gateway_address_checked() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.setDefaultGateway('not-an-ip', \"a\")";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::MalformedAddress && v.message.contains("not-an-ip")));
    }

    #[test]
    fn test_missing_import() {
        let source = "h1 = Host('h1')\nh1.instantiate()";
        let report = validator().validate(&candidate(source));
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].rule_id, RuleId::MissingImport);
        assert_eq!(report.violations[0].location, None);
    }

    #[test]
    fn test_syntax_error_is_single_violation_with_empty_entities() {
        let report = validator().validate(&candidate("h1 = Host('h1'"));
        assert!(!report.is_valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].rule_id, RuleId::SyntaxError);
        assert!(report.parsed_entities.is_empty());
    }

    #[test]
    fn test_prose_candidate_is_syntax_error() {
        let report =
            validator().validate(&candidate("I could not generate a topology for that."));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].rule_id, RuleId::SyntaxError);
    }

    #[test]
    fn test_at_most_one_violation_per_rule() {
        // Two distinct undeclared devices; the rule fires once, on the first.
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.connect(s8, \"a\", \"b\")\n\
                      h1.connect(s9, \"c\", \"d\")";
        let report = validator().validate(&candidate(source));
        let undeclared: Vec<&Violation> = report
            .violations
            .iter()
            .filter(|v| v.rule_id == RuleId::UndeclaredReference)
            .collect();
        assert_eq!(undeclared.len(), 1);
        assert!(undeclared[0].message.contains("s8"));
    }

    #[test]
    fn test_reports_are_deterministic() {
        let v = validator();
        let c = candidate(&two_host_sample());
        assert_eq!(v.validate(&c), v.validate(&c));
    }

    #[test]
    fn test_auxiliary_statements_do_not_violate() {
        let source = "from profissa_lft.host import Host\n\
                      import time\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      time.sleep(1)\n\
                      print(h1)\n\
                      x = 5";
        let report = validator().validate(&candidate(source));
        assert!(report.is_valid, "unexpected: {}", report.summary());
        let entities: Vec<&str> = report.parsed_entities.iter().map(String::as_str).collect();
        assert_eq!(entities, vec!["h1"]);
    }

    #[test]
    fn test_summary_renders_rule_and_line() {
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      h1.connect(h1, \"a\", \"b\")";
        let report = validator().validate(&candidate(source));
        let summary = report.summary();
        assert!(summary.contains("FAILED"));
        assert!(summary.contains("[SelfLink] line 4"));
        assert!(summary.contains("Entities: h1"));
    }

    #[test]
    fn test_unknown_device_class_is_not_a_construction() {
        // Widget is not in the vocabulary; w1 never becomes a device, so
        // linking it is an undeclared reference.
        let source = "from profissa_lft.host import Host\n\
                      h1 = Host('h1')\n\
                      h1.instantiate()\n\
                      w1 = Widget('w1')\n\
                      h1.connect(w1, \"a\", \"b\")";
        let report = validator().validate(&candidate(source));
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == RuleId::UndeclaredReference && v.message.contains("w1")));
    }
}
