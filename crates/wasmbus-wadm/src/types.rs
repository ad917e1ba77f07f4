//! The wadm application manifest model and API shapes.
//!
//! Manifests follow the OAM shape: `apiVersion`/`kind`/`metadata`/`spec`,
//! with components carrying properties and polymorphic traits. The same
//! model round-trips through JSON and YAML.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use wasmbus::Error;

pub const DEFAULT_MANIFEST_API_VERSION: &str = "core.oam.dev/v1beta1";
pub const DEFAULT_MANIFEST_KIND: &str = "Manifest";

/// Metadata annotation key carrying the manifest version.
pub const VERSION_ANNOTATION: &str = "version";

/// The reserved version value; manifests may never claim it.
pub const RESERVED_VERSION_LATEST: &str = "latest";

/// Requesting this version selects whatever is deployed as latest.
pub const LATEST_VERSION: &str = "";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Component,
    Capability,
}

impl Default for ComponentType {
    fn default() -> Self {
        ComponentType::Component
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Waiting,
    Undeployed,
    Reconciling,
    Deployed,
    Failed,
}

impl Default for StatusType {
    fn default() -> Self {
        StatusType::Undeployed
    }
}

/// Outcome discriminator carried in every wadm response envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResultKind {
    #[serde(rename = "success", alias = "ok")]
    Success,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "not_found", alias = "notfound")]
    NotFound,
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "newversion")]
    NewVersion,
    #[serde(rename = "acknowledged")]
    Acknowledged,
    #[serde(rename = "noop")]
    Noop,
    #[serde(rename = "deleted")]
    Deleted,
}

impl Default for ResultKind {
    fn default() -> Self {
        ResultKind::Success
    }
}

/// Envelope fields shared by every wadm response.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BaseResponse {
    pub result: ResultKind,
    #[serde(default)]
    pub message: String,
}

impl BaseResponse {
    pub fn new(result: ResultKind, message: impl Into<String>) -> Self {
        BaseResponse {
            result,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, ResultKind::Error | ResultKind::NotFound)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ManifestMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Policy {
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SecretSourceProperty {
    pub policy: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SecretProperty {
    pub name: String,
    pub properties: SecretSourceProperty,
}

/// Reference to a component shared from another deployed application.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SharedApplicationComponentProperties {
    pub name: String,
    pub component: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentProperties {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<SharedApplicationComponentProperties>,
    /// Overrides the component name as the identity used for links and
    /// uniqueness checks.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretProperty>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigDefinition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretProperty>,
}

/// Target side of a link trait. Manifests may spell it as a bare string
/// (just the target name) or as the full mapping; both decode to the same
/// shape.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct TargetConfigDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretProperty>,
}

impl<'de> Deserialize<'de> for TargetConfigDefinition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full {
                name: String,
                #[serde(default)]
                config: Vec<ConfigProperty>,
                #[serde(default)]
                secrets: Vec<SecretProperty>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => TargetConfigDefinition {
                name,
                ..Default::default()
            },
            Repr::Full {
                name,
                config,
                secrets,
            } => TargetConfigDefinition {
                name,
                config,
                secrets,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkProperty {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub namespace: String,
    pub package: String,
    pub interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ConfigDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetConfigDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Spread {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requirements: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SpreadScalerProperty {
    pub instances: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spread: Vec<Spread>,
}

/// A component trait, polymorphic on the wire: `{type, properties}` where
/// `properties` is decoded according to `type`. The daemonscaler shares the
/// spreadscaler property shape. An unknown `type` fails to encode and to
/// decode, in JSON and YAML alike.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "properties", rename_all = "lowercase")]
pub enum Trait {
    Link(LinkProperty),
    Spreadscaler(SpreadScalerProperty),
    Daemonscaler(SpreadScalerProperty),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Component {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub properties: ComponentProperties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<Trait>,
}

impl Component {
    /// The identity used for uniqueness checks: the explicit property id
    /// when present, the component name otherwise.
    pub fn identity(&self) -> &str {
        if self.properties.id.is_empty() {
            &self.name
        } else {
            &self.properties.id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ManifestSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Manifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ManifestMetadata,
    pub spec: ManifestSpec,
}

impl Manifest {
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(Error::encode)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(Error::encode)
    }

    /// Check the manifest's domain rules, collecting every violation:
    /// component identities must be unique, and the version annotation may
    /// not claim `latest`.
    pub fn validate(&self) -> Vec<Error> {
        let mut errs = Vec::new();

        let mut identities = BTreeSet::new();
        for component in &self.spec.components {
            let identity = component.identity();
            if !identities.insert(identity) {
                errs.push(Error::Validation(format!(
                    "duplicate component name {identity}"
                )));
            }
        }

        if let Some(version) = self.metadata.annotations.get(VERSION_ANNOTATION) {
            if version == RESERVED_VERSION_LATEST {
                errs.push(Error::Validation(format!(
                    "'{version}' version is reserved"
                )));
            }
        }

        errs
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Parse a manifest, trying YAML first and falling back to JSON.
pub fn parse_manifest(data: &[u8]) -> Result<Manifest, Error> {
    match parse_yaml_manifest(data) {
        Ok(manifest) => Ok(manifest),
        Err(_) => parse_json_manifest(data),
    }
}

pub fn parse_json_manifest(data: &[u8]) -> Result<Manifest, Error> {
    serde_json::from_slice(data).map_err(Error::decode)
}

pub fn parse_yaml_manifest(data: &[u8]) -> Result<Manifest, Error> {
    serde_yaml::from_slice(data).map_err(Error::decode)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatusInfo {
    #[serde(rename = "type")]
    pub status_type: StatusType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScalerStatus {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub status: StatusInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DetailedStatus {
    #[serde(rename = "status")]
    pub info: StatusInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scalers: Vec<ScalerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Status {
    pub status: StatusInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scalers: Vec<ScalerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelSummary {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployed_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_status: Option<DetailedStatus>,
    /// Deprecated flat status, still emitted on the legacy list subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VersionInfo {
    pub version: String,
    pub deployed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelListRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelListResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelGetRequest {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelGetResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelStatusRequest {
    #[serde(skip)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelStatusResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelVersionsRequest {
    #[serde(skip)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelVersionsResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
}

/// The put body is the manifest itself, no envelope.
pub type ModelPutRequest = Manifest;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelPutResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_versions: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelDeleteRequest {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelDeleteResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default)]
    pub undeploy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelDeployRequest {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelDeployResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelUndeployRequest {
    #[serde(skip)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelUndeployResponse {
    #[serde(flatten)]
    pub base: BaseResponse,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_manifest() -> Manifest {
        Manifest {
            api_version: DEFAULT_MANIFEST_API_VERSION.to_string(),
            kind: DEFAULT_MANIFEST_KIND.to_string(),
            metadata: ManifestMetadata {
                name: "hello".to_string(),
                annotations: BTreeMap::from([(
                    "description".to_string(),
                    "t".to_string(),
                )]),
                ..Default::default()
            },
            spec: ManifestSpec {
                components: vec![Component {
                    name: "hello".to_string(),
                    component_type: ComponentType::Component,
                    properties: ComponentProperties {
                        image: "ghcr.io/wasmcloud/components/http-hello-world-rust:0.1.0"
                            .to_string(),
                        ..Default::default()
                    },
                    traits: vec![
                        Trait::Link(LinkProperty {
                            namespace: "wasi".to_string(),
                            package: "http".to_string(),
                            interfaces: vec!["incoming-handler".to_string()],
                            target: Some(TargetConfigDefinition {
                                name: "httpserver".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        Trait::Spreadscaler(SpreadScalerProperty {
                            instances: 4,
                            spread: vec![Spread {
                                name: "east".to_string(),
                                requirements: BTreeMap::from([(
                                    "zone".to_string(),
                                    "us-east-1".to_string(),
                                )]),
                                weight: Some(80),
                            }],
                        }),
                        Trait::Daemonscaler(SpreadScalerProperty {
                            instances: 1,
                            spread: vec![],
                        }),
                    ],
                }],
                policies: vec![],
            },
        }
    }

    #[test]
    fn trait_wire_shape() -> anyhow::Result<()> {
        let link = Trait::Link(LinkProperty {
            namespace: "wasi".to_string(),
            package: "http".to_string(),
            interfaces: vec!["incoming-handler".to_string()],
            ..Default::default()
        });
        let value = serde_json::to_value(&link)?;
        assert_eq!(value["type"], "link");
        assert_eq!(value["properties"]["namespace"], "wasi");

        let spread = Trait::Daemonscaler(SpreadScalerProperty {
            instances: 2,
            spread: vec![],
        });
        let value = serde_json::to_value(&spread)?;
        assert_eq!(value["type"], "daemonscaler");
        assert_eq!(value["properties"]["instances"], 2);
        Ok(())
    }

    #[test]
    fn unknown_trait_type_fails_decode() {
        let raw = r#"{"type":"autoscaler","properties":{"instances":2}}"#;
        let result: Result<Trait, _> = serde_json::from_str(raw);
        assert!(result.is_err());

        let result: Result<Trait, _> =
            serde_yaml::from_str("type: autoscaler\nproperties:\n  instances: 2\n");
        assert!(result.is_err());
    }

    #[test]
    fn manifest_survives_yaml_json_yaml() -> anyhow::Result<()> {
        let manifest = sample_manifest();

        let yaml = manifest.to_yaml()?;
        let from_yaml = parse_yaml_manifest(yaml.as_bytes())?;
        assert_eq!(from_yaml, manifest);

        let json = from_yaml.to_json()?;
        let from_json = parse_json_manifest(&json)?;
        assert_eq!(from_json, manifest);

        let yaml_again = from_json.to_yaml()?;
        let final_manifest = parse_yaml_manifest(yaml_again.as_bytes())?;
        assert_eq!(final_manifest, manifest);
        Ok(())
    }

    #[test]
    fn target_shorthand_decodes_as_name() -> anyhow::Result<()> {
        let raw = r#"
type: link
properties:
  namespace: wasi
  package: http
  interfaces: [incoming-handler]
  target: httpserver
"#;
        let decoded: Trait = serde_yaml::from_str(raw)?;
        let Trait::Link(link) = decoded else {
            panic!("expected a link trait");
        };
        assert_eq!(
            link.target.map(|t| t.name),
            Some("httpserver".to_string())
        );
        Ok(())
    }

    #[test]
    fn validation_rejects_latest_version() {
        let mut manifest = sample_manifest();
        manifest.metadata.annotations.insert(
            VERSION_ANNOTATION.to_string(),
            RESERVED_VERSION_LATEST.to_string(),
        );

        assert!(!manifest.is_valid());
        let errs = manifest.validate();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("reserved"));
    }

    #[test]
    fn validation_rejects_duplicate_identities() {
        let mut manifest = sample_manifest();
        let mut duplicate = manifest.spec.components[0].clone();
        duplicate.name = "other-name".to_string();
        // Same identity through the id property, despite the new name.
        duplicate.properties.id = "hello".to_string();
        manifest.spec.components.push(duplicate);

        let errs = manifest.validate();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("duplicate component name"));
    }

    #[test]
    fn validation_accepts_sample() {
        assert!(sample_manifest().is_valid());
    }

    #[test]
    fn base_response_error_detection() {
        for (result, is_error) in [
            (ResultKind::Success, false),
            (ResultKind::Created, false),
            (ResultKind::NewVersion, false),
            (ResultKind::Acknowledged, false),
            (ResultKind::Noop, false),
            (ResultKind::Deleted, false),
            (ResultKind::Error, true),
            (ResultKind::NotFound, true),
        ] {
            let base = BaseResponse::new(result, "");
            assert_eq!(base.is_error(), is_error, "{result:?}");
        }
    }

    #[test]
    fn result_kind_wire_values() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&ResultKind::NewVersion)?, r#""newversion""#);
        assert_eq!(serde_json::to_string(&ResultKind::NotFound)?, r#""not_found""#);
        // Legacy spellings are still accepted on decode.
        assert_eq!(
            serde_json::from_str::<ResultKind>(r#""ok""#)?,
            ResultKind::Success
        );
        assert_eq!(
            serde_json::from_str::<ResultKind>(r#""notfound""#)?,
            ResultKind::NotFound
        );
        Ok(())
    }
}
