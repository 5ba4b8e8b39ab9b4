//! Broker network configuration
//!
//! [`AddressSpec`] is the typed record a transport plug-in consumes: which
//! interface family to bind, which ports to use or negotiate, how to reach
//! the parent broker, and the retry/size budgets. Validation and address
//! normalisation happen here so transports see a fully-resolved record.

use serde::{Deserialize, Serialize};

use super::address::{extract_interface_and_port, is_ipv6, make_port_address, strip_protocol};
use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Interface Enumerations
// ----------------------------------------------------------------------------

/// Which network scope to open ports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceNetwork {
    /// Local ports only.
    #[default]
    Local,
    /// External IPv4 interfaces.
    Ipv4,
    /// External IPv6 interfaces.
    Ipv6,
    /// All external interfaces.
    All,
}

/// The transport family an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Tcp,
    Udp,
    /// Either tcp or udp; composes with the tcp scheme.
    #[default]
    Ip,
    Ipc,
    Inproc,
}

impl InterfaceType {
    /// The URL scheme prefix for this interface family.
    pub fn scheme(&self) -> &'static str {
        match self {
            InterfaceType::Tcp | InterfaceType::Ip => "tcp://",
            InterfaceType::Udp => "udp://",
            InterfaceType::Ipc => "ipc://",
            InterfaceType::Inproc => "inproc://",
        }
    }

    /// Whether addresses of this family carry port numbers.
    pub fn uses_ports(&self) -> bool {
        matches!(
            self,
            InterfaceType::Tcp | InterfaceType::Udp | InterfaceType::Ip
        )
    }
}

/// Whether the node also runs a connection server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    #[default]
    Unspecified,
    DefaultActive,
    DefaultDeactivated,
    Active,
    Deactivated,
}

impl ServerMode {
    pub fn is_active(&self) -> bool {
        matches!(self, ServerMode::DefaultActive | ServerMode::Active)
    }
}

// ----------------------------------------------------------------------------
// Address Specification
// ----------------------------------------------------------------------------

/// Port value meaning "unassigned".
pub const PORT_UNASSIGNED: i32 = -1;

/// Declarative description of a node's network identity.
///
/// Defaults mirror the unconfigured state: every port is unassigned and the
/// node listens locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressSpec {
    /// Identifier of the parent broker, when known by name.
    pub broker_name: String,
    /// Address or domain name of the parent broker.
    pub broker_address: String,
    /// Interface used for the local connection.
    pub local_interface: String,
    pub interface_network: InterfaceNetwork,
    pub interface_type: InterfaceType,
    /// Port for the local interface.
    pub port: i32,
    /// Port of the parent broker interface.
    pub broker_port: i32,
    /// First port for automatic port assignment.
    pub start_port: i32,
    pub reuse_address: bool,
    /// Let the operating system pick automatically assigned ports.
    pub use_os_port: bool,
    pub max_retries: i32,
    pub max_message_size: i32,
    pub max_message_count: i32,
    pub server_mode: ServerMode,
    /// Start a broker automatically if none is reachable.
    pub autobroker: bool,
    /// Append the node name to the address.
    pub append_name: bool,
    /// Skip the connection acknowledgement for broker connections.
    pub no_ack: bool,
    /// Serialize messages as JSON instead of the binary format.
    pub json_serialization: bool,
}

impl Default for AddressSpec {
    fn default() -> Self {
        Self {
            broker_name: String::new(),
            broker_address: String::new(),
            local_interface: String::new(),
            interface_network: InterfaceNetwork::Local,
            interface_type: InterfaceType::Ip,
            port: PORT_UNASSIGNED,
            broker_port: PORT_UNASSIGNED,
            start_port: PORT_UNASSIGNED,
            reuse_address: false,
            use_os_port: false,
            max_retries: 5,
            max_message_size: 16 * 256,
            max_message_count: 256,
            server_mode: ServerMode::Unspecified,
            autobroker: false,
            append_name: false,
            no_ack: false,
            json_serialization: false,
        }
    }
}

impl AddressSpec {
    pub fn new(interface_type: InterfaceType) -> Self {
        Self {
            interface_type,
            ..Self::default()
        }
    }

    /// Normalise the broker and local addresses and validate the port
    /// configuration.
    ///
    /// `local_default` is the address to fall back to for an unspecified
    /// local interface (typically the loopback of the active family).
    pub fn check_and_update_broker_address(
        &mut self,
        local_default: &str,
    ) -> Result<(), ConfigError> {
        if self.broker_address.is_empty() {
            if !self.autobroker {
                return Err(ConfigError::MissingBrokerAddress);
            }
        } else {
            let stripped = strip_protocol(&self.broker_address);
            let (_, port) = extract_interface_and_port(&stripped);
            if port < 0 && self.broker_port > 0 {
                self.broker_address = make_port_address(&self.broker_address, self.broker_port);
            }
        }

        if self.interface_network == InterfaceNetwork::Local {
            self.localize_interface(local_default);
        }

        if !self.interface_type.uses_ports() {
            self.port = PORT_UNASSIGNED;
            self.broker_port = PORT_UNASSIGNED;
            self.start_port = PORT_UNASSIGNED;
        }

        self.validate_ports()
    }

    /// Rewrite an external local interface to loopback, preserving any port.
    fn localize_interface(&mut self, local_default: &str) {
        if self.local_interface.is_empty() {
            self.local_interface = local_default.to_string();
            return;
        }
        let stripped = strip_protocol(&self.local_interface);
        let (host, port) = extract_interface_and_port(&stripped);
        let loops_back = host == "localhost" || host.starts_with("127.") || host == "::1";
        if !loops_back {
            let loopback = if is_ipv6(&stripped) { "::1" } else { "127.0.0.1" };
            self.local_interface = make_port_address(loopback, port);
        }
    }

    fn validate_ports(&self) -> Result<(), ConfigError> {
        if self.start_port != PORT_UNASSIGNED && self.start_port < 1024 {
            return Err(ConfigError::InvalidPort {
                field: "start_port",
                value: self.start_port,
            });
        }
        if self.port != PORT_UNASSIGNED && self.port < 1 {
            return Err(ConfigError::InvalidPort {
                field: "port",
                value: self.port,
            });
        }
        if self.broker_port != PORT_UNASSIGNED && self.broker_port < 1 {
            return Err(ConfigError::InvalidPort {
                field: "broker_port",
                value: self.broker_port,
            });
        }
        if self.max_retries < 0 {
            return Err(ConfigError::InvalidField {
                field: "max_retries",
                value: self.max_retries.to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = AddressSpec::default();
        assert_eq!(spec.port, -1);
        assert_eq!(spec.broker_port, -1);
        assert_eq!(spec.start_port, -1);
        assert_eq!(spec.max_message_size, 16 * 256);
        assert_eq!(spec.max_message_count, 256);
        assert_eq!(spec.max_retries, 5);
        assert_eq!(spec.server_mode, ServerMode::Unspecified);
    }

    #[test]
    fn test_missing_broker_address_is_fatal_without_autobroker() {
        let mut spec = AddressSpec::default();
        assert!(matches!(
            spec.check_and_update_broker_address("127.0.0.1"),
            Err(ConfigError::MissingBrokerAddress)
        ));

        spec.autobroker = true;
        assert!(spec.check_and_update_broker_address("127.0.0.1").is_ok());
    }

    #[test]
    fn test_broker_port_composed_into_address() {
        let mut spec = AddressSpec {
            broker_address: "tcp://10.0.0.4".to_string(),
            broker_port: 23500,
            ..AddressSpec::default()
        };
        spec.check_and_update_broker_address("127.0.0.1").unwrap();
        assert_eq!(spec.broker_address, "tcp://10.0.0.4:23500");
    }

    #[test]
    fn test_broker_address_with_port_left_alone() {
        let mut spec = AddressSpec {
            broker_address: "tcp://10.0.0.4:23500".to_string(),
            broker_port: 9999,
            ..AddressSpec::default()
        };
        spec.check_and_update_broker_address("127.0.0.1").unwrap();
        assert_eq!(spec.broker_address, "tcp://10.0.0.4:23500");
    }

    #[test]
    fn test_local_network_rewrites_external_interface() {
        let mut spec = AddressSpec {
            broker_address: "tcp://10.0.0.4:23500".to_string(),
            local_interface: "192.168.1.20:4040".to_string(),
            ..AddressSpec::default()
        };
        spec.check_and_update_broker_address("127.0.0.1").unwrap();
        assert_eq!(spec.local_interface, "127.0.0.1:4040");
    }

    #[test]
    fn test_ipc_clears_ports() {
        let mut spec = AddressSpec {
            interface_type: InterfaceType::Ipc,
            broker_address: "ipc://broker.sock".to_string(),
            port: 4000,
            broker_port: 4001,
            start_port: 4100,
            ..AddressSpec::default()
        };
        spec.check_and_update_broker_address("127.0.0.1").unwrap();
        assert_eq!(spec.port, -1);
        assert_eq!(spec.broker_port, -1);
        assert_eq!(spec.start_port, -1);
    }

    #[test]
    fn test_port_range_validation() {
        let mut spec = AddressSpec {
            broker_address: "tcp://10.0.0.4:23500".to_string(),
            start_port: 80,
            ..AddressSpec::default()
        };
        assert!(matches!(
            spec.check_and_update_broker_address("127.0.0.1"),
            Err(ConfigError::InvalidPort {
                field: "start_port",
                ..
            })
        ));

        let mut spec = AddressSpec {
            broker_address: "tcp://10.0.0.4:23500".to_string(),
            port: 0,
            ..AddressSpec::default()
        };
        assert!(matches!(
            spec.check_and_update_broker_address("127.0.0.1"),
            Err(ConfigError::InvalidPort { field: "port", .. })
        ));
    }
}
