//! CloudStackMachineTemplate CRD

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::machine::CloudStackMachineSpec;

/// CloudStackMachineTemplate is cloned by CAPI into CloudStackMachines.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackMachineTemplate",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackMachineTemplateSpec {
    /// Template resource cloned into each machine
    pub template: CloudStackMachineTemplateResource,
}

/// Template body
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackMachineTemplateResource {
    /// Machine spec stamped onto each clone
    pub spec: CloudStackMachineSpec,
}

impl CloudStackMachineTemplate {
    /// Machine spec every clone starts from
    pub fn machine_spec(&self) -> &CloudStackMachineSpec {
        &self.spec.template.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_nests_machine_spec() {
        let yaml = r#"
apiVersion: infrastructure.cluster.x-k8s.io/v1beta2
kind: CloudStackMachineTemplate
metadata:
  name: test-machinetemplate-1
spec:
  template:
    spec:
      offering:
        name: Medium
      template:
        name: ubuntu-2204-kube
      details:
        memoryOvercommitRatio: "1.2"
"#;
        let tmpl: CloudStackMachineTemplate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(tmpl.machine_spec().offering.name, "Medium");
        assert_eq!(tmpl.machine_spec().details["memoryOvercommitRatio"], "1.2");
        assert!(tmpl.machine_spec().disk_offering.is_none());
    }
}
