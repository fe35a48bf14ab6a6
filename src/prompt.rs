//! Prompt assembly.
//!
//! A [`PromptBuilder`] turns a topology description into the full model
//! prompt: a chat-markup transcript with a system preamble rendered from the
//! grammar, the few-shot exemplar pairs, and the user's description in the
//! final turn. Building is pure; identical inputs produce byte-identical
//! prompts, which keeps generation runs reproducible modulo the model.

use crate::grammar::DomainGrammar;

pub(crate) const TURN_START: &str = "<|im_start|>";
pub(crate) const TURN_END: &str = "<|im_end|>";

/// A description/code pair shown to the model before the real request.
#[derive(Debug, Clone)]
pub struct Exemplar {
    pub description: String,
    pub code: String,
}

impl Exemplar {
    pub fn new(description: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            code: code.into(),
        }
    }
}

/// Builds model prompts from a grammar vocabulary and an exemplar set.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    framework_name: String,
    grammar_notes: String,
    exemplars: Vec<Exemplar>,
}

impl PromptBuilder {
    /// Builder with the canonical exemplar set for `grammar`.
    pub fn new(grammar: &DomainGrammar) -> Self {
        Self {
            framework_name: grammar.framework_name.clone(),
            grammar_notes: grammar.prompt_notes(),
            exemplars: default_exemplars(),
        }
    }

    /// Replace the few-shot exemplar set.
    pub fn with_exemplars(mut self, exemplars: Vec<Exemplar>) -> Self {
        self.exemplars = exemplars;
        self
    }

    /// Assemble the complete prompt for one description.
    pub fn build(&self, description: &str) -> String {
        let mut prompt = String::new();

        prompt.push_str(TURN_START);
        prompt.push_str("system\n");
        prompt.push_str(&format!(
            "You are an expert network engineer and Python developer specializing in \
             the {} framework. Your task is to generate Python code that creates \
             network topologies.\n\n",
            self.framework_name
        ));
        prompt.push_str(&self.grammar_notes);
        prompt.push_str(
            "\nGenerate ONLY the Python code without any explanations or markdown \
             formatting. The code should be complete and executable.\n",
        );
        prompt.push_str(TURN_END);
        prompt.push('\n');

        for exemplar in &self.exemplars {
            prompt.push_str(&format!(
                "{TURN_START}user\n{}{TURN_END}\n",
                exemplar.description
            ));
            prompt.push_str(&format!(
                "{TURN_START}assistant\n{}{TURN_END}\n",
                exemplar.code
            ));
        }

        prompt.push_str(&format!(
            "{TURN_START}user\n{description}{TURN_END}\n{TURN_START}assistant\n"
        ));
        prompt
    }
}

/// The description the caller actually asked about, recovered from a built
/// prompt. Used by the stand-in local engine, which sees only the prompt.
pub(crate) fn last_user_turn(prompt: &str) -> &str {
    let needle = format!("{TURN_START}user\n");
    match prompt.rfind(&needle) {
        Some(idx) => {
            let rest = &prompt[idx + needle.len()..];
            rest.split(TURN_END).next().unwrap_or(rest).trim()
        }
        None => prompt.trim(),
    }
}

/// The two canonical topologies: a small SDN segment and a 4G cell.
pub fn default_exemplars() -> Vec<Exemplar> {
    vec![
        Exemplar::new(
            "Create a simple SDN topology with 2 hosts connected to a switch",
            r#"from profissa_lft.host import Host
from profissa_lft.switch import Switch

h1 = Host('h1')
h2 = Host('h2')
s1 = Switch('s1')

h1.instantiate()
h2.instantiate()
s1.instantiate()

h1.connect(s1, "h1s1", "s1h1")
h2.connect(s1, "h2s1", "s1h2")

h1.setIp('10.0.0.1', 24, "h1s1")
h2.setIp('10.0.0.2', 24, "h2s1")

s1.connectToInternet('10.0.0.4', 24, "s1host", "hosts1")

h1.setDefaultGateway('10.0.0.4', "h1s1")
h2.setDefaultGateway('10.0.0.4', "h2s1")"#,
        ),
        Exemplar::new(
            "Create a 4G wireless network with 2 UEs connected to an eNodeB and EPC",
            r#"from profissa_lft.ue import UE
from profissa_lft.enb import EnB
from profissa_lft.epc import EPC

ue1 = UE('ue1')
ue2 = UE('ue2')
enb = EnB('enb1')
epc = EPC('epc1')

ue1.instantiate()
ue2.instantiate()
enb.instantiate()
epc.instantiate()

ue1.connect(enb, "ue1enb", "enblue1")
ue2.connect(enb, "ue2enb", "enblue2")
enb.connect(epc, "enbs1", "s1enb")

ue1.setIp('192.168.1.10', 24, "ue1enb")
ue2.setIp('192.168.1.11', 24, "ue2enb")
enb.setIp('192.168.1.1', 24, "enblue1")
enb.setIp('192.168.1.2', 24, "enblue2")
enb.setIp('10.0.0.1', 24, "enbs1")
epc.setIp('10.0.0.2', 24, "s1enb")

epc.connectToInternet('10.0.0.4', 24, "epchost", "hostepc")

ue1.setDefaultGateway('192.168.1.1', "ue1enb")
ue2.setDefaultGateway('192.168.1.1', "ue2enb")
enb.setDefaultGateway('10.0.0.2', "enbs1")
epc.setDefaultGateway('10.0.0.4', "epchost")"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(&DomainGrammar::default())
    }

    #[test]
    fn test_build_is_deterministic() {
        let b = builder();
        let description = "Create a ring of 3 switches";
        assert_eq!(b.build(description), b.build(description));
    }

    #[test]
    fn test_prompt_structure() {
        let prompt = builder().build("two hosts connected by a switch");

        assert!(prompt.starts_with("<|im_start|>system\n"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
        assert!(prompt.contains("two hosts connected by a switch"));
        // Grammar notes made it in.
        assert!(prompt.contains("setDefaultGateway"));
        // Both exemplars made it in.
        assert!(prompt.contains("h1 = Host('h1')"));
        assert!(prompt.contains("enb = EnB('enb1')"));
    }

    #[test]
    fn test_exemplar_override() {
        let prompt = builder()
            .with_exemplars(vec![Exemplar::new("one router", "r1 = Host('r1')")])
            .build("whatever");
        assert!(prompt.contains("one router"));
        assert!(!prompt.contains("enb = EnB('enb1')"));
    }

    #[test]
    fn test_last_user_turn_roundtrip() {
        let description = "Create an IoT network with sensors and gateways";
        let prompt = builder().build(description);
        assert_eq!(last_user_turn(&prompt), description);
    }

    #[test]
    fn test_last_user_turn_without_markup() {
        assert_eq!(last_user_turn("  plain text  "), "plain text");
    }
}
