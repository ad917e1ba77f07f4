use core::time::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use wasmbus::{codec, Bus, Error, InprocBus};
use wasmbus_wadm::*;

/// Minimal in-memory model store backing the wadm API.
#[derive(Default)]
struct TestStore {
    models: Mutex<HashMap<String, Vec<Manifest>>>,
}

impl TestStore {
    fn version_of(manifest: &Manifest) -> String {
        manifest
            .metadata
            .annotations
            .get(VERSION_ANNOTATION)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Api for TestStore {
    async fn model_list(&self, _req: ModelListRequest) -> Result<ModelListResponse, Error> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let summaries = models
            .values()
            .filter_map(|versions| versions.last())
            .map(|manifest| ModelSummary {
                name: manifest.metadata.name.clone(),
                version: Self::version_of(manifest),
                detailed_status: Some(DetailedStatus {
                    info: StatusInfo {
                        status_type: StatusType::Undeployed,
                        message: String::new(),
                    },
                    scalers: vec![],
                }),
                ..Default::default()
            })
            .collect();
        Ok(ModelListResponse {
            base: BaseResponse::new(ResultKind::Success, ""),
            models: summaries,
        })
    }

    async fn model_get(&self, req: ModelGetRequest) -> Result<ModelGetResponse, Error> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        match models.get(&req.name).and_then(|versions| versions.last()) {
            Some(manifest) => Ok(ModelGetResponse {
                base: BaseResponse::new(ResultKind::Success, ""),
                manifest: Some(manifest.clone()),
            }),
            None => Ok(ModelGetResponse {
                base: BaseResponse::new(ResultKind::NotFound, "model not found"),
                manifest: None,
            }),
        }
    }

    async fn model_versions(
        &self,
        req: ModelVersionsRequest,
    ) -> Result<ModelVersionsResponse, Error> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let versions = models
            .get(&req.name)
            .map(|versions| {
                versions
                    .iter()
                    .map(|manifest| VersionInfo {
                        version: Self::version_of(manifest),
                        deployed: false,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ModelVersionsResponse {
            base: BaseResponse::new(ResultKind::Success, ""),
            versions,
        })
    }

    async fn model_status(&self, req: ModelStatusRequest) -> Result<ModelStatusResponse, Error> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        match models.get(&req.name) {
            Some(_) => Ok(ModelStatusResponse {
                base: BaseResponse::new(ResultKind::Success, ""),
                status: Some(Status {
                    status: StatusInfo {
                        status_type: StatusType::Undeployed,
                        message: String::new(),
                    },
                    scalers: vec![],
                }),
            }),
            None => Ok(ModelStatusResponse {
                base: BaseResponse::new(ResultKind::NotFound, "model not found"),
                status: None,
            }),
        }
    }

    async fn model_put(&self, req: ModelPutRequest) -> Result<ModelPutResponse, Error> {
        if let Some(err) = req.validate().into_iter().next() {
            return Ok(ModelPutResponse {
                base: BaseResponse::new(ResultKind::Error, err.to_string()),
                ..Default::default()
            });
        }

        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let name = req.metadata.name.clone();
        let versions = models.entry(name.clone()).or_default();
        let result = if versions.is_empty() {
            ResultKind::Created
        } else {
            ResultKind::NewVersion
        };
        let current_version = Self::version_of(&req);
        versions.push(req);

        Ok(ModelPutResponse {
            base: BaseResponse::new(result, ""),
            name,
            total_versions: versions.len() as u32,
            current_version,
        })
    }

    async fn model_delete(&self, req: ModelDeleteRequest) -> Result<ModelDeleteResponse, Error> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let result = if models.remove(&req.name).is_some() {
            ResultKind::Deleted
        } else {
            ResultKind::Noop
        };
        Ok(ModelDeleteResponse {
            base: BaseResponse::new(result, ""),
            undeploy: false,
        })
    }

    async fn model_deploy(&self, req: ModelDeployRequest) -> Result<ModelDeployResponse, Error> {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let result = if models.contains_key(&req.name) {
            ResultKind::Acknowledged
        } else {
            ResultKind::NotFound
        };
        Ok(ModelDeployResponse {
            base: BaseResponse::new(result, ""),
            name: req.name,
            version: req.version,
        })
    }

    async fn model_undeploy(
        &self,
        req: ModelUndeployRequest,
    ) -> Result<ModelUndeployResponse, Error> {
        Ok(ModelUndeployResponse {
            base: BaseResponse::new(ResultKind::Acknowledged, ""),
            name: req.name,
            version: String::new(),
        })
    }
}

fn hello_manifest() -> Manifest {
    Manifest {
        api_version: DEFAULT_MANIFEST_API_VERSION.to_string(),
        kind: DEFAULT_MANIFEST_KIND.to_string(),
        metadata: ManifestMetadata {
            name: "hello".to_string(),
            annotations: BTreeMap::from([("description".to_string(), "t".to_string())]),
            ..Default::default()
        },
        spec: ManifestSpec {
            components: vec![Component {
                name: "hello".to_string(),
                component_type: ComponentType::Component,
                properties: ComponentProperties {
                    image: "ghcr.io/wasmcloud/components/http-hello-world-rust:0.1.0".to_string(),
                    ..Default::default()
                },
                traits: vec![],
            }],
            policies: vec![],
        },
    }
}

async fn start_server(bus: &Arc<dyn Bus>) -> anyhow::Result<Server> {
    let server = Server::new(Arc::clone(bus), "default", Arc::new(TestStore::default()));
    server.serve().await?;
    Ok(server)
}

fn test_bus() -> Arc<dyn Bus> {
    Arc::new(InprocBus::new())
}

#[tokio::test]
async fn put_list_get_round_trip() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_server(&bus).await?;
    let client = Client::new(Arc::clone(&bus), "default");

    let manifest = hello_manifest();
    let put = client.model_put(&manifest).await?;
    assert!(!put.base.is_error());
    assert_eq!(put.base.result, ResultKind::Created);
    assert_eq!(put.name, "hello");

    let put_again = client.model_put(&manifest).await?;
    assert_eq!(put_again.base.result, ResultKind::NewVersion);
    assert_eq!(put_again.total_versions, 2);

    let list = client.model_list(&ModelListRequest {}).await?;
    assert!(!list.base.is_error());
    assert!(list.models.iter().any(|m| m.name == "hello"));

    let get = client
        .model_get(&ModelGetRequest {
            name: "hello".to_string(),
            version: String::new(),
        })
        .await?;
    assert!(!get.base.is_error());
    assert_eq!(get.manifest, Some(manifest));

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn get_missing_model_is_not_found() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_server(&bus).await?;
    let client = Client::new(Arc::clone(&bus), "default");

    let get = client
        .model_get(&ModelGetRequest {
            name: "missing".to_string(),
            version: String::new(),
        })
        .await?;
    assert!(get.base.is_error());
    assert_eq!(get.base.result, ResultKind::NotFound);

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn put_rejects_reserved_version() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_server(&bus).await?;
    let client = Client::new(Arc::clone(&bus), "default");

    let mut manifest = hello_manifest();
    manifest.metadata.annotations.insert(
        VERSION_ANNOTATION.to_string(),
        RESERVED_VERSION_LATEST.to_string(),
    );
    assert!(!manifest.is_valid());

    let put = client.model_put(&manifest).await?;
    assert!(put.base.is_error());
    assert!(put.base.message.contains("reserved"));

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn deploy_and_delete_lifecycle() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_server(&bus).await?;
    let client = Client::new(Arc::clone(&bus), "default");

    client.model_put(&hello_manifest()).await?;

    let deploy = client
        .model_deploy(&ModelDeployRequest {
            name: "hello".to_string(),
            version: String::new(),
        })
        .await?;
    assert_eq!(deploy.base.result, ResultKind::Acknowledged);
    assert_eq!(deploy.name, "hello");

    let missing = client
        .model_deploy(&ModelDeployRequest {
            name: "missing".to_string(),
            version: String::new(),
        })
        .await?;
    assert_eq!(missing.base.result, ResultKind::NotFound);

    let delete = client
        .model_delete(&ModelDeleteRequest {
            name: "hello".to_string(),
            version: String::new(),
        })
        .await?;
    assert_eq!(delete.base.result, ResultKind::Deleted);

    let delete_again = client
        .model_delete(&ModelDeleteRequest {
            name: "hello".to_string(),
            version: String::new(),
        })
        .await?;
    assert_eq!(delete_again.base.result, ResultKind::Noop);

    server.drain().await?;
    Ok(())
}

#[tokio::test]
async fn legacy_list_answers_bare_models_array() -> anyhow::Result<()> {
    let bus = test_bus();
    let server = start_server(&bus).await?;
    let client = Client::new(Arc::clone(&bus), "default");
    client.model_put(&hello_manifest()).await?;

    // The legacy subject has no typed client; drive it raw to pin the wire
    // shape: a bare array, no envelope, with the flat status backfilled.
    let req = codec::encode("wadm.api.default.model.list", &ModelListRequest {})?;
    let reply = tokio::time::timeout(Duration::from_secs(1), bus.request(req)).await??;

    let models: Vec<ModelSummary> = codec::decode(&reply)?;
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "hello");
    assert_eq!(models[0].status, Some(StatusType::Undeployed));
    Ok(())
}
