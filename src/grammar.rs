//! Topology grammar vocabulary.
//!
//! One `DomainGrammar` value names everything the gateway knows about the
//! target topology language: the device classes a model may construct, the
//! methods it may call on them, and the import root that marks generated
//! code as belonging to the framework. The prompt builder renders its notes
//! from this value and the validator classifies statements against it, so
//! both ends of the pipeline share a single vocabulary definition.

/// A device class the topology language can construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClass {
    /// Constructor name as it appears in code (e.g. `Host`).
    pub name: String,
    /// One-line summary used in prompt notes.
    pub summary: String,
}

impl DeviceClass {
    pub fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
        }
    }
}

/// What a method call on a device does, as far as validation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Creates and starts the node.
    Instantiate,
    /// Connects two devices through a pair of interfaces.
    Link,
    /// Assigns an address/prefix to an interface.
    Address,
    /// Sets the default gateway for an interface.
    Gateway,
    /// Wires a device to the outside world through a gateway address.
    InternetUplink,
}

/// Vocabulary of the target topology language.
#[derive(Debug, Clone)]
pub struct DomainGrammar {
    /// Human-readable framework name for prompt text.
    pub framework_name: String,
    /// Import root that identifies framework code (e.g. `profissa_lft`).
    pub import_root: String,
    /// Device classes the language can construct.
    pub device_classes: Vec<DeviceClass>,
    /// Method name for node instantiation.
    pub instantiate_method: String,
    /// Method name for linking two nodes.
    pub link_method: String,
    /// Method name for address assignment.
    pub address_method: String,
    /// Method name for default-gateway assignment.
    pub gateway_method: String,
    /// Method name for internet uplink wiring.
    pub uplink_method: String,
}

impl Default for DomainGrammar {
    /// The LFT (Lightweight Fog Testbed) vocabulary.
    fn default() -> Self {
        Self {
            framework_name: "Lightweight Fog Testbed (LFT)".to_string(),
            import_root: "profissa_lft".to_string(),
            device_classes: vec![
                DeviceClass::new("Host", "Network hosts with IP configuration"),
                DeviceClass::new("Switch", "OpenFlow switches for SDN"),
                DeviceClass::new("Controller", "SDN controllers (e.g., OpenDaylight, ONOS)"),
                DeviceClass::new("UE", "User Equipment for wireless networks"),
                DeviceClass::new("EPC", "Evolved Packet Core for 4G networks"),
                DeviceClass::new("EnB", "eNodeB for 4G base stations"),
            ],
            instantiate_method: "instantiate".to_string(),
            link_method: "connect".to_string(),
            address_method: "setIp".to_string(),
            gateway_method: "setDefaultGateway".to_string(),
            uplink_method: "connectToInternet".to_string(),
        }
    }
}

impl DomainGrammar {
    /// Whether `name` is a known device constructor.
    pub fn is_device_class(&self, name: &str) -> bool {
        self.device_classes.iter().any(|c| c.name == name)
    }

    /// Classify a method name, if the grammar knows it.
    pub fn method_kind(&self, name: &str) -> Option<MethodKind> {
        if name == self.instantiate_method {
            Some(MethodKind::Instantiate)
        } else if name == self.link_method {
            Some(MethodKind::Link)
        } else if name == self.address_method {
            Some(MethodKind::Address)
        } else if name == self.gateway_method {
            Some(MethodKind::Gateway)
        } else if name == self.uplink_method {
            Some(MethodKind::InternetUplink)
        } else {
            None
        }
    }

    /// Render the grammar notes block for the system prompt.
    pub fn prompt_notes(&self) -> String {
        let mut notes = String::new();
        notes.push_str("Components Available:\n");
        for class in &self.device_classes {
            notes.push_str(&format!("- {}: {}\n", class.name, class.summary));
        }
        notes.push_str("\nKey Methods:\n");
        notes.push_str(&format!(
            "- {}(): Create and start the node\n",
            self.instantiate_method
        ));
        notes.push_str(&format!(
            "- {}(node, interface1, interface2): Connect two nodes\n",
            self.link_method
        ));
        notes.push_str(&format!(
            "- {}(ip, prefix, interface): Configure IP address\n",
            self.address_method
        ));
        notes.push_str(&format!(
            "- {}(gateway, interface): Set default gateway\n",
            self.gateway_method
        ));
        notes.push_str(&format!(
            "- {}(gateway_ip, prefix, interface1, interface2): Connect to internet\n",
            self.uplink_method
        ));
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vocabulary() {
        let grammar = DomainGrammar::default();
        assert!(grammar.is_device_class("Host"));
        assert!(grammar.is_device_class("EnB"));
        assert!(!grammar.is_device_class("Router"));
        assert_eq!(grammar.method_kind("connect"), Some(MethodKind::Link));
        assert_eq!(grammar.method_kind("setIp"), Some(MethodKind::Address));
        assert_eq!(
            grammar.method_kind("connectToInternet"),
            Some(MethodKind::InternetUplink)
        );
        assert_eq!(grammar.method_kind("reboot"), None);
    }

    #[test]
    fn test_prompt_notes_mention_every_class() {
        let grammar = DomainGrammar::default();
        let notes = grammar.prompt_notes();
        for class in &grammar.device_classes {
            assert!(notes.contains(&class.name));
        }
        assert!(notes.contains("setDefaultGateway"));
    }
}
