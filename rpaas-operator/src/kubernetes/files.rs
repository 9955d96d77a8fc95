//! Extra files kept in a per instance ConfigMap

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use rpaas_models::{Result, RpaasError};
use tracing::info;

use super::{KubernetesManager, FIELD_MANAGER};
use crate::crd::{ExtraFilesRef, RpaasInstance};
use crate::k8s_client::{classify, optional};
use crate::names::{self, labels};

impl KubernetesManager {
    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    /// File name -> content, as referenced by the instance.
    pub(super) async fn read_extra_files(
        &self,
        rpaas: &RpaasInstance,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let Some(reference) = &rpaas.spec.extra_files else {
            return Ok(BTreeMap::new());
        };
        let Some(config_map) = optional(self.config_maps().get(&reference.name).await)? else {
            return Ok(BTreeMap::new());
        };
        let data = config_map.binary_data.unwrap_or_default();
        Ok(reference
            .files
            .iter()
            .filter_map(|(key, file_name)| {
                data.get(key)
                    .map(|content| (file_name.clone(), content.0.clone()))
            })
            .collect())
    }

    /// Replaces the whole file set. An empty set removes the ConfigMap.
    pub(super) async fn write_extra_files(
        &self,
        rpaas: &RpaasInstance,
        files: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let instance = rpaas.name_any();
        let config_map_name = names::extra_files_config_map(&instance);

        let mut keys = BTreeMap::new();
        let mut binary_data = BTreeMap::new();
        for (file_name, content) in files {
            let key = names::extra_file_key(&file_name);
            if let Some(other) = keys.get(&key) {
                return Err(RpaasError::conflict(format!(
                    "file \"{}\" collides with \"{}\"",
                    file_name, other
                )));
            }
            keys.insert(key.clone(), file_name);
            binary_data.insert(key, ByteString(content));
        }

        if keys.is_empty() {
            self.modify(&instance, |i| {
                i.spec.extra_files = None;
                Ok(())
            })
            .await?;
            optional(
                self.config_maps()
                    .delete(&config_map_name, &DeleteParams::default())
                    .await,
            )?;
            info!(instance = %instance, "Extra files removed");
            return Ok(());
        }

        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(config_map_name.clone()),
                namespace: Some(self.settings.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    labels::INSTANCE_NAME.to_string(),
                    instance.clone(),
                )])),
                owner_references: rpaas.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            binary_data: Some(binary_data),
            ..Default::default()
        };
        self.config_maps()
            .patch(
                &config_map_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&config_map),
            )
            .await
            .map_err(classify)?;

        let count = keys.len();
        self.modify(&instance, move |i| {
            i.spec.extra_files = Some(ExtraFilesRef {
                name: config_map_name,
                files: keys,
            });
            Ok(())
        })
        .await?;
        info!(instance = %instance, files = count, "Extra files updated");
        Ok(())
    }
}
