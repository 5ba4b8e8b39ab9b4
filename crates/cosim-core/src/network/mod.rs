//! Network metadata for brokers and cores
//!
//! - [`address`]: parsing, composing, and prioritising endpoint strings
//! - [`config`]: the declarative description of a node's listening
//!   interfaces, negotiated ports, and peer broker address

pub mod address;
pub mod config;

pub use address::{
    add_protocol, extract_interface_and_port, extract_interface_and_port_string,
    generate_matching_interface_address, insert_protocol, is_ipv6, make_port_address,
    prioritize_external_addresses, remove_protocol, strip_protocol,
};
pub use config::{AddressSpec, InterfaceNetwork, InterfaceType, ServerMode};
