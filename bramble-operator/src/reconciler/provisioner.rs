//! Resource Provisioner
//!
//! Ensures the volume and claim holding an execution's checkout exist.
//! Both are named deterministically from the execution, so a creation
//! retried after a crash finds the earlier object instead of failing.

use bramble_client::{ChildKind, ClientError, ClusterClient};
use bramble_core::domain::execution::Execution;
use bramble_core::naming;
use k8s_openapi::api::core::v1::{
    HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::ReconcileSettings;
use crate::reconciler::{Ensured, child_labels, ensure_child};

const ACCESS_MODE: &str = "ReadWriteOnce";

fn storage(settings: &ReconcileSettings) -> BTreeMap<String, Quantity> {
    BTreeMap::from([(
        "storage".to_string(),
        Quantity(settings.volume_capacity.clone()),
    )])
}

/// Cluster-scoped volume backed by `<source_root>/<namespace>/<execution>` on the node
pub fn volume(execution: &Execution, settings: &ReconcileSettings) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(naming::volume_name(execution.namespace(), execution.name())),
            labels: Some(child_labels(execution)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(storage(settings)),
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            storage_class_name: Some(settings.storage_class.clone()),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            host_path: Some(HostPathVolumeSource {
                path: settings.host_path(execution.namespace(), execution.name()),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Claim bound to the execution's volume, owned by the execution
pub fn claim(execution: &Execution, settings: &ReconcileSettings) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(naming::claim_name(execution.name())),
            namespace: Some(execution.namespace().to_string()),
            labels: Some(child_labels(execution)),
            owner_references: execution.owner_reference().map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            storage_class_name: Some(settings.storage_class.clone()),
            volume_name: Some(naming::volume_name(execution.namespace(), execution.name())),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage(settings)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ensures the execution's volume and claim exist
///
/// A no-op reporting [`Ensured::Existing`] when the status already records
/// the volume as provisioned. A volume owned by someone else stops before
/// the claim is created.
pub async fn ensure_volume(
    client: &dyn ClusterClient,
    execution: &Execution,
    settings: &ReconcileSettings,
) -> Result<Ensured, ClientError> {
    if execution.status().volume_provisioned {
        debug!(execution = %execution.key(), "Volume already provisioned");
        return Ok(Ensured::Existing);
    }

    let volume_name = naming::volume_name(execution.namespace(), execution.name());
    info!(
        execution = %execution.key(),
        "Provisioning volume {} at {}",
        volume_name,
        settings.host_path(execution.namespace(), execution.name())
    );
    let created = client.create_volume(&volume(execution, settings)).await;
    let volume_state =
        ensure_child(client, execution, ChildKind::Volume, &volume_name, created).await?;
    if let Ensured::Foreign(_) = volume_state {
        return Ok(volume_state);
    }

    let claim_name = naming::claim_name(execution.name());
    info!(execution = %execution.key(), "Provisioning claim {}", claim_name);
    let created = client.create_volume_claim(&claim(execution, settings)).await;
    let claim_state =
        ensure_child(client, execution, ChildKind::Claim, &claim_name, created).await?;

    Ok(volume_state.and(claim_state))
}
