//! Compose project to swarm object conversion
//!
//! Everything here is a pure function of the project and the stack name,
//! except service conversion, which asks the cluster for the IDs of the
//! secrets and configs a service references. Every derived list is sorted
//! so that converting the same project twice yields identical specs.

pub mod network;
pub mod object;
pub mod policy;
pub mod service;

pub use network::{convert_networks, is_user_defined_network, service_networks};
pub use object::{convert_configs, convert_secrets};
pub use service::{convert_service, convert_services};

use std::collections::BTreeMap;

/// Label carrying the owning stack
pub const LABEL_NAMESPACE: &str = "com.docker.stack.namespace";

/// Label recording the logical image a service was last deployed with
pub const LABEL_IMAGE: &str = "com.docker.stack.image";

/// Driver for stack networks that do not name one
pub const DEFAULT_NETWORK_DRIVER: &str = "overlay";

/// `<stack>_<name>`
pub fn scope_name(stack: &str, name: &str) -> String {
    format!("{}_{}", stack, name)
}

/// Copy of `labels` with the namespace label set
pub fn add_stack_label(stack: &str, labels: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut result = labels;
    result.insert(LABEL_NAMESPACE.to_string(), stack.to_string());
    result
}

/// `label=<namespace>=<stack>` filter value
pub fn stack_filter(stack: &str) -> String {
    format!("{}={}", LABEL_NAMESPACE, stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_and_label() {
        assert_eq!(scope_name("demo", "web"), "demo_web");

        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "core".to_string());
        labels.insert(LABEL_NAMESPACE.to_string(), "other".to_string());

        let labels = add_stack_label("demo", labels);
        assert_eq!(labels[LABEL_NAMESPACE], "demo");
        assert_eq!(labels["team"], "core");
        assert_eq!(stack_filter("demo"), "com.docker.stack.namespace=demo");
    }
}
