//! Service generation for Redis roles.
//!
//! Each role gets one Service named after its StatefulSet:
//! - **Headless** (cluster roles): per-pod DNS with `publishNotReadyAddresses`
//!   so nodes can discover each other before they report ready
//! - **ClusterIP** (everything else): a stable address for clients

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::Role;
use crate::resources::common::ParentRef;

/// Addressing mode of a role service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    Headless,
    ClusterIp,
}

/// Generate the Service for one role.
pub fn generate_service(
    parent: &ParentRef,
    name: &str,
    role: Role,
    ports: &[(&'static str, i32)],
    mode: ServiceMode,
) -> Service {
    let spec = match mode {
        ServiceMode::Headless => ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        },
        ServiceMode::ClusterIp => ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        },
    };

    Service {
        metadata: parent.child_metadata(name, role),
        spec: Some(ServiceSpec {
            selector: Some(parent.selector_labels(role)),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| ServicePort {
                        port: *port,
                        target_port: Some(IntOrString::String((*port_name).to_string())),
                        name: Some((*port_name).to_string()),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..spec
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::{
        CLUSTER_BUS_PORT_OFFSET, REDIS_PORT, RedisCluster, RedisClusterSpec,
    };
    use crate::resources::common::COMPONENT_LABEL;
    use std::collections::BTreeMap;

    fn test_parent(name: &str) -> ParentRef {
        let mut resource = RedisCluster::new(name, RedisClusterSpec::default());
        resource.metadata.namespace = Some("default".to_string());
        resource.metadata.uid = Some("test-uid".to_string());
        ParentRef::new(&resource, &BTreeMap::new(), &BTreeMap::new())
    }

    #[test]
    fn test_generate_headless_service() {
        let parent = test_parent("my-cluster");
        let svc = generate_service(
            &parent,
            "my-cluster-master",
            Role::Master,
            &[
                ("redis", REDIS_PORT),
                ("cluster-bus", REDIS_PORT + CLUSTER_BUS_PORT_OFFSET),
            ],
            ServiceMode::Headless,
        );

        assert_eq!(svc.metadata.name, Some("my-cluster-master".to_string()));
        assert_eq!(svc.metadata.namespace, Some("default".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert!(spec.type_.is_none());

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(
            ports
                .iter()
                .any(|p| p.name == Some("cluster-bus".to_string()) && p.port == 16379)
        );
    }

    #[test]
    fn test_generate_client_service() {
        let parent = test_parent("my-cluster");
        let svc = generate_service(
            &parent,
            "my-cluster-replica",
            Role::Replica,
            &[("redis", REDIS_PORT)],
            ServiceMode::ClusterIp,
        );

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_, Some("ClusterIP".to_string()));
        assert!(spec.cluster_ip.is_none());
        let selector = spec.selector.unwrap();
        assert_eq!(selector.get(COMPONENT_LABEL), Some(&"replica".to_string()));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports.first().unwrap().port, REDIS_PORT);
    }
}
