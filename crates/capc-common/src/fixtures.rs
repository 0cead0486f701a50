//! Deterministic test objects
//!
//! Every function returns a fresh value; tests mutate their own copy.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::crd::capi::{Bootstrap, Machine, MachineSpec, ObjectReference};
use crate::crd::{
    Affinity, ApiEndpoint, CloudStackAffinityGroup, CloudStackAffinityGroupSpec,
    CloudStackCluster, CloudStackClusterSpec, CloudStackFailureDomain,
    CloudStackFailureDomainSpec, CloudStackIsolatedNetwork, CloudStackIsolatedNetworkSpec,
    CloudStackMachine, CloudStackMachineSpec, CloudStackMachineTemplate,
    CloudStackMachineTemplateResource, CloudStackMachineTemplateSpec, DiskOffering, IdentityRef,
    NetworkSpec, NetworkType, ResourceIdentifier, SecretRef, Zone,
};
use crate::{CLUSTER_NAME_LABEL, CONTROL_PLANE_LABEL};

/// Workload cluster name
pub const CLUSTER_NAME: &str = "test-cluster";
/// Namespace every fixture lives in
pub const NAMESPACE: &str = "default";
/// Control plane endpoint host
pub const ENDPOINT_HOST: &str = "EndpointHost";
/// Control plane endpoint port
pub const ENDPOINT_PORT: i32 = 5309;
/// Endpoint credentials secret
pub const ENDPOINT_SECRET: &str = "acsendpointsecret1";
/// Worker MachineSet owning worker machines
pub const MACHINE_SET_NAME: &str = "capi-test-md-0-0";
/// Affinity group name
pub const AFFINITY_GROUP_NAME: &str = "fakeaffinitygroup";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        uid: Some(format!("uid-{}", name)),
        labels: Some(BTreeMap::from([(
            CLUSTER_NAME_LABEL.to_string(),
            CLUSTER_NAME.to_string(),
        )])),
        ..Default::default()
    }
}

/// Owner reference with the given kind
pub fn owner_ref(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Reference to the worker MachineSet
pub fn machine_set_owner_ref() -> OwnerReference {
    owner_ref("cluster.x-k8s.io/v1beta1", "MachineSet", MACHINE_SET_NAME)
}

/// Reference to the kubeadm control plane, named after the cluster
pub fn control_plane_owner_ref() -> OwnerReference {
    owner_ref(
        "controlplane.cluster.x-k8s.io/v1beta1",
        "KubeadmControlPlane",
        CLUSTER_NAME,
    )
}

/// Reference to an etcdadm cluster
pub fn etcd_cluster_owner_ref() -> OwnerReference {
    owner_ref(
        "etcdcluster.cluster.x-k8s.io/v1beta1",
        "EtcdadmCluster",
        CLUSTER_NAME,
    )
}

/// Reference to the CAPI Cluster
pub fn capi_cluster_owner_ref() -> OwnerReference {
    owner_ref("cluster.x-k8s.io/v1beta1", "Cluster", CLUSTER_NAME)
}

/// Reference to a CAPI Machine
pub fn capi_machine_owner_ref(name: &str) -> OwnerReference {
    owner_ref("cluster.x-k8s.io/v1beta1", "Machine", name)
}

/// Shared guest network
pub fn shared_network() -> NetworkSpec {
    NetworkSpec {
        name: "SharedGuestNet1".to_string(),
        id: String::new(),
        type_: NetworkType::Shared,
    }
}

/// Isolated guest network
pub fn isolated_network_spec() -> NetworkSpec {
    NetworkSpec {
        name: "isoguestnet1".to_string(),
        id: String::new(),
        type_: NetworkType::Isolated,
    }
}

/// First zone, on the shared network
pub fn zone1() -> Zone {
    Zone {
        name: "Zone1".to_string(),
        id: "FakeZone1ID".to_string(),
        network: Some(shared_network()),
    }
}

/// Second zone, on the isolated network
pub fn zone2() -> Zone {
    Zone {
        name: "Zone2".to_string(),
        id: "FakeZone2ID".to_string(),
        network: Some(isolated_network_spec()),
    }
}

/// Fully populated CloudStackCluster owned by the CAPI Cluster
pub fn cluster() -> CloudStackCluster {
    let mut metadata = meta(CLUSTER_NAME);
    metadata.owner_references = Some(vec![capi_cluster_owner_ref()]);
    CloudStackCluster {
        metadata,
        spec: CloudStackClusterSpec {
            zones: vec![zone1(), zone2()],
            control_plane_endpoint: ApiEndpoint {
                host: ENDPOINT_HOST.to_string(),
                port: ENDPOINT_PORT,
            },
            identity_ref: Some(IdentityRef::secret(ENDPOINT_SECRET)),
            account: None,
            domain: None,
        },
        status: None,
    }
}

/// Data disk
pub fn disk_offering() -> DiskOffering {
    DiskOffering {
        offering: ResourceIdentifier::named("Small"),
        custom_size_in_gb: None,
        mount_path: "/data".to_string(),
        device: "/dev/vdb".to_string(),
        filesystem: "ext4".to_string(),
        label: "data_disk".to_string(),
    }
}

/// Machine spec with every immutable attribute populated
pub fn machine_spec() -> CloudStackMachineSpec {
    CloudStackMachineSpec {
        provider_id: None,
        failure_domain_name: Some("fd1".to_string()),
        offering: ResourceIdentifier::named("Medium"),
        template: ResourceIdentifier::named("ubuntu-2204-kube-v1.32.0"),
        disk_offering: Some(disk_offering()),
        ssh_key: Some("test-keypair".to_string()),
        details: BTreeMap::from([("memoryOvercommitRatio".to_string(), "1.2".to_string())]),
        affinity: Affinity::No,
        affinity_group_ids: Vec::new(),
        identity_ref: Some(IdentityRef::secret(ENDPOINT_SECRET)),
    }
}

/// CloudStackMachine owned by the CAPI Machine of the same name
pub fn machine(name: &str) -> CloudStackMachine {
    let mut metadata = meta(name);
    metadata.owner_references = Some(vec![capi_machine_owner_ref(name)]);
    CloudStackMachine {
        metadata,
        spec: machine_spec(),
        status: None,
    }
}

/// Machine template wrapping [`machine_spec`]
pub fn machine_template() -> CloudStackMachineTemplate {
    CloudStackMachineTemplate {
        metadata: meta("test-machinetemplate-1"),
        spec: CloudStackMachineTemplateSpec {
            template: CloudStackMachineTemplateResource {
                spec: machine_spec(),
            },
        },
    }
}

/// CAPI Machine; control plane members carry the control plane label
pub fn capi_machine(name: &str, control_plane: bool, owners: Vec<OwnerReference>) -> Machine {
    let mut metadata = meta(name);
    if control_plane {
        if let Some(labels) = metadata.labels.as_mut() {
            labels.insert(CONTROL_PLANE_LABEL.to_string(), String::new());
        }
    }
    metadata.owner_references = Some(owners);
    Machine {
        metadata,
        spec: MachineSpec {
            cluster_name: CLUSTER_NAME.to_string(),
            bootstrap: Bootstrap {
                data_secret_name: Some(format!("{}-bootstrap", name)),
            },
            failure_domain: Some("fd1".to_string()),
            infrastructure_ref: ObjectReference {
                api_version: "infrastructure.cluster.x-k8s.io/v1beta2".to_string(),
                kind: "CloudStackMachine".to_string(),
                name: name.to_string(),
                namespace: Some(NAMESPACE.to_string()),
            },
        },
    }
}

/// Failure domain for `zone`, named after the cluster
pub fn failure_domain(name: &str, zone: Zone) -> CloudStackFailureDomain {
    let mut metadata = meta(&format!("{}-{}", name, CLUSTER_NAME));
    metadata.owner_references = Some(vec![owner_ref(
        "infrastructure.cluster.x-k8s.io/v1beta2",
        "CloudStackCluster",
        CLUSTER_NAME,
    )]);
    CloudStackFailureDomain {
        metadata,
        spec: CloudStackFailureDomainSpec {
            name: name.to_string(),
            zone,
            account: None,
            domain: None,
            acs_endpoint: SecretRef {
                name: ENDPOINT_SECRET.to_string(),
                namespace: NAMESPACE.to_string(),
            },
        },
        status: None,
    }
}

/// Affinity group in failure domain "fd1"
pub fn affinity_group() -> CloudStackAffinityGroup {
    CloudStackAffinityGroup {
        metadata: meta(AFFINITY_GROUP_NAME),
        spec: CloudStackAffinityGroupSpec {
            name: AFFINITY_GROUP_NAME.to_string(),
            type_: "host anti-affinity".to_string(),
            failure_domain_name: "fd1".to_string(),
        },
        status: None,
    }
}

/// Isolated network in failure domain "fd2"
pub fn isolated_network() -> CloudStackIsolatedNetwork {
    CloudStackIsolatedNetwork {
        metadata: meta(&format!("isoguestnet1-{}", CLUSTER_NAME)),
        spec: CloudStackIsolatedNetworkSpec {
            name: "isoguestnet1".to_string(),
            failure_domain_name: "fd2".to_string(),
        },
        status: None,
    }
}

/// Contents of the endpoint credentials secret
pub fn endpoint_secret_data() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("api-url".to_string(), "http://cloudstack.local:8080/client/api".to_string()),
        ("api-key".to_string(), "ApiKey".to_string()),
        ("secret-key".to_string(), "SecretKey".to_string()),
        ("verify-ssl".to_string(), "false".to_string()),
    ])
}
