//! Lattice events in CloudEvents 1.0 envelopes.
//!
//! Hosts publish every lifecycle change as a CloudEvent on
//! `wasmbus.evt.<lattice>.<event-type>`. This crate knows the full set of
//! lattice event types, parses the envelope together with a strongly typed
//! body, encodes events the same way hosts do, and offers subscriptions
//! plus a demultiplexing [`Router`] for consuming them.

use cloudevents::event::Data;
use cloudevents::{AttributesReader, EventBuilder, EventBuilderV10};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;
use uuid::Uuid;

mod router;
mod subscription;

pub use router::{route, Router};
pub use subscription::{subscribe, DiscardErrorsHandler, EventHandler, EventSubscription};

/// Subject prefix for lattice events.
pub const PREFIX_EVENTS: &str = "wasmbus.evt";

/// Type prefix shared by all known lattice events.
pub const EVENT_TYPE_PREFIX: &str = "com.wasmcloud.lattice";

/// Failures while parsing or encoding a lattice event.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("error parsing event: {0}")]
    Parse(String),
    #[error("error parsing event: unknown event type '{0}'")]
    UnknownType(String),
    #[error("error encoding event: {0}")]
    Encode(String),
}

/// A parsed lattice event: the CloudEvents envelope paired with the typed
/// body selected by the envelope's `type` attribute.
#[derive(Debug, Clone)]
pub struct Event {
    pub cloud_event: cloudevents::Event,
    pub bus_event: BusEvent,
}

/// Extraction of a concrete event body out of the [`BusEvent`] registry,
/// used by typed routes.
pub trait FromBusEvent: Sized {
    fn from_bus_event(event: &BusEvent) -> Option<&Self>;
}

macro_rules! bus_events {
    ($($name:literal => $variant:ident),+ $(,)?) => {
        /// Registry of all known lattice event bodies, keyed by the
        /// CloudEvent `type` attribute. Unknown types are a parse error.
        #[derive(Debug, Clone, PartialEq)]
        pub enum BusEvent {
            $($variant($variant),)+
        }

        impl BusEvent {
            /// The CloudEvent `type` attribute for this event.
            pub fn event_type(&self) -> &'static str {
                match self {
                    $(BusEvent::$variant(_) => concat!("com.wasmcloud.lattice.", $name),)+
                }
            }

            /// Short event name: the `type` attribute without the common
            /// prefix. This is also the final subject token.
            pub fn name(&self) -> &'static str {
                match self {
                    $(BusEvent::$variant(_) => $name,)+
                }
            }

            fn decode(event_type: &str, data: serde_json::Value) -> Result<Self, EventError> {
                $(
                    if event_type == concat!("com.wasmcloud.lattice.", $name) {
                        return serde_json::from_value(data)
                            .map(BusEvent::$variant)
                            .map_err(|e| EventError::Parse(e.to_string()));
                    }
                )+
                Err(EventError::UnknownType(event_type.to_string()))
            }

            fn to_value(&self) -> Result<serde_json::Value, EventError> {
                match self {
                    $(BusEvent::$variant(inner) => {
                        serde_json::to_value(inner).map_err(|e| EventError::Encode(e.to_string()))
                    })+
                }
            }
        }

        $(
            impl FromBusEvent for $variant {
                fn from_bus_event(event: &BusEvent) -> Option<&Self> {
                    match event {
                        BusEvent::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$variant> for BusEvent {
                fn from(inner: $variant) -> Self {
                    BusEvent::$variant(inner)
                }
            }
        )+
    };
}

bus_events! {
    "host_heartbeat" => HostHeartbeat,
    "host_started" => HostStarted,
    "host_stopped" => HostStopped,
    "component_scaled" => ComponentScaled,
    "component_scale_failed" => ComponentScaleFailed,
    "linkdef_set" => LinkdefSet,
    "linkdef_set_failed" => LinkdefSetFailed,
    "linkdef_deleted" => LinkdefDeleted,
    "provider_started" => ProviderStarted,
    "provider_start_failed" => ProviderStartFailed,
    "provider_stopped" => ProviderStopped,
    "health_check_passed" => HealthCheckPassed,
    "health_check_failed" => HealthCheckFailed,
    "health_check_status" => HealthCheckStatus,
    "config_set" => ConfigSet,
    "config_deleted" => ConfigDeleted,
    "labels_changed" => LabelsChanged,
}

/// Parse a JSON CloudEvents envelope plus its typed body.
///
/// The envelope must be valid CloudEvents 1.0 and carry a known lattice
/// event type; anything else is an [`EventError`].
pub fn parse_event(data: &[u8]) -> Result<Event, EventError> {
    let cloud_event: cloudevents::Event =
        serde_json::from_slice(data).map_err(|e| EventError::Parse(e.to_string()))?;

    if cloud_event.id().is_empty() {
        return Err(EventError::Parse("missing event id".to_string()));
    }

    let payload = match cloud_event.data() {
        Some(Data::Json(value)) => value.clone(),
        Some(Data::Binary(raw)) => {
            serde_json::from_slice(raw).map_err(|e| EventError::Parse(e.to_string()))?
        }
        Some(Data::String(raw)) => {
            serde_json::from_str(raw).map_err(|e| EventError::Parse(e.to_string()))?
        }
        None => json!({}),
    };

    let bus_event = BusEvent::decode(cloud_event.ty(), payload)?;
    Ok(Event {
        cloud_event,
        bus_event,
    })
}

/// Build the CloudEvents 1.0 envelope for a lattice event, the way hosts
/// publish them: JSON content type, ULID-derived id, RFC3339 timestamp.
pub fn encode_event(source: &str, event: &BusEvent) -> Result<Event, EventError> {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| EventError::Encode(e.to_string()))?;
    let cloud_event = EventBuilderV10::new()
        .ty(event.event_type())
        .id(Uuid::from_u128(Ulid::new().into()).to_string())
        .source(source)
        .time(now)
        .data("application/json", event.to_value()?)
        .build()
        .map_err(|e| EventError::Encode(e.to_string()))?;

    Ok(Event {
        cloud_event,
        bus_event: event.clone(),
    })
}

/// Event subject for a lattice: `wasmbus.evt.<lattice>.<event-name>`.
pub fn event_subject(lattice: &str, event_name: &str) -> String {
    format!("{PREFIX_EVENTS}.{lattice}.{event_name}")
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentDescription {
    pub id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub revision: i32,
    #[serde(default)]
    pub max_instances: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CapabilityDescription {
    pub id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub revision: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostHeartbeat {
    pub host_id: String,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub uptime_human: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub components: Vec<ComponentDescription>,
    #[serde(default)]
    pub providers: Vec<CapabilityDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostStarted {
    pub host_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub uptime_seconds: u64,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostStopped {
    pub host_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub reason: String,
}

/// Claims summary attached to component and provider lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentClaims {
    #[serde(default)]
    pub call_alias: String,
    #[serde(default)]
    pub expires_human: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub not_before_human: String,
    #[serde(default)]
    pub revision: i32,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentScaled {
    pub host_id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub claims: ComponentClaims,
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ComponentScaleFailed {
    pub host_id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub max_instances: u32,
    #[serde(default)]
    pub component_id: String,
    #[serde(default)]
    pub claims: ComponentClaims,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkdefSet {
    pub source_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub wit_namespace: String,
    #[serde(default)]
    pub wit_package: String,
    #[serde(default, rename = "interfaces")]
    pub wit_interfaces: Vec<String>,
    #[serde(default)]
    pub source_config: Vec<String>,
    #[serde(default)]
    pub target_config: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkdefSetFailed {
    pub source_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub wit_namespace: String,
    #[serde(default)]
    pub wit_package: String,
    #[serde(default, rename = "interfaces")]
    pub wit_interfaces: Vec<String>,
    #[serde(default)]
    pub source_config: Vec<String>,
    #[serde(default)]
    pub target_config: Vec<String>,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LinkdefDeleted {
    pub source_id: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub wit_namespace: String,
    #[serde(default)]
    pub wit_package: String,
    #[serde(default, rename = "interfaces")]
    pub wit_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderStarted {
    pub host_id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub claims: ComponentClaims,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderStartFailed {
    pub host_id: String,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub claims: ComponentClaims,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub provider_ref: String,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderStopped {
    pub host_id: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HealthCheckPassed {
    pub host_id: String,
    #[serde(default)]
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HealthCheckFailed {
    pub host_id: String,
    #[serde(default)]
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HealthCheckStatus {
    pub host_id: String,
    #[serde(default)]
    pub provider_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigSet {
    pub config_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigDeleted {
    pub config_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LabelsChanged {
    pub host_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Parse the CloudEvent data attribute into an arbitrary shape. Useful for
/// consumers that need fields beyond the typed body.
pub fn event_data<T: DeserializeOwned>(event: &cloudevents::Event) -> Result<T, EventError> {
    let payload = match event.data() {
        Some(Data::Json(value)) => value.clone(),
        Some(Data::Binary(raw)) => {
            serde_json::from_slice(raw).map_err(|e| EventError::Parse(e.to_string()))?
        }
        Some(Data::String(raw)) => {
            serde_json::from_str(raw).map_err(|e| EventError::Parse(e.to_string()))?
        }
        None => json!({}),
    };
    serde_json::from_value(payload).map_err(|e| EventError::Parse(e.to_string()))
}
