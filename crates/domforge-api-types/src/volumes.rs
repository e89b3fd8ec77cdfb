// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage and network sources referenced by devices.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Quantity;

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum VolumeSource {
    HostDisk(HostDisk),
    PersistentVolumeClaim(ClaimSource),
    DataVolume(DataVolumeSource),
    /// A claim used read-only behind a throwaway copy-on-write overlay.
    Ephemeral(ClaimSource),
    ContainerDisk(ContainerDiskSource),
    CloudInitNoCloud(CloudInitSource),
    CloudInitConfigDrive(CloudInitSource),
    Secret(SecretSource),
    ConfigMap(ConfigMapSource),
    ServiceAccount(ServiceAccountSource),
    DownwardApi,
    Sysprep(ConfigMapSource),
    EmptyDisk(EmptyDiskSource),
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HostDisk {
    pub path: String,

    #[serde(default)]
    pub capacity: Option<Quantity>,

    #[serde(default)]
    pub shared: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClaimSource {
    pub claim_name: String,

    #[serde(default)]
    pub read_only: Option<bool>,

    /// The claim is attached while the VM is running.
    #[serde(default)]
    pub hotpluggable: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DataVolumeSource {
    pub name: String,

    #[serde(default)]
    pub hotpluggable: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContainerDiskSource {
    pub image: String,

    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CloudInitSource {
    #[serde(default)]
    pub user_data: Option<String>,

    #[serde(default)]
    pub network_data: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SecretSource {
    pub secret_name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConfigMapSource {
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServiceAccountSource {
    pub service_account_name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EmptyDiskSource {
    pub capacity: Quantity,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Network {
    pub name: String,
    pub source: NetworkSource,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum NetworkSource {
    /// The pod's primary network.
    Pod,
    /// A secondary network attached through a network attachment definition.
    Multus {
        network_name: String,
        #[serde(default)]
        default: bool,
    },
}
