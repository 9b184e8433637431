//! Service start configuration and the registry's view of it.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Configuration needed to (re)start the background execution context.
///
/// Only `id` is interpreted by the core; everything else is passed through to
/// the host untouched (`extra` keeps unknown keys on a JSON round-trip).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Non-zero identifier of the context (notification id on mobile hosts).
    pub id: u32,
    /// Title shown by the host, if it shows anything.
    #[serde(default)]
    pub title: String,
    /// Body text shown by the host.
    #[serde(default)]
    pub message: String,
    /// Host-specific service category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Host-specific passthrough fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceConfig {
    /// Creates a config with the given id.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Sets the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Rejects configs the host could not start.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.id == 0 {
            return Err(ServiceError::InvalidConfig {
                reason: "service configuration must include a non-zero id".into(),
            });
        }
        Ok(())
    }

    /// Overlays `other` onto `self`: non-empty fields and all extra keys win.
    pub fn merge(&mut self, other: &ServiceConfig) {
        self.id = other.id;
        if !other.title.is_empty() {
            self.title.clone_from(&other.title);
        }
        if !other.message.is_empty() {
            self.message.clone_from(&other.message);
        }
        if other.service_type.is_some() {
            self.service_type.clone_from(&other.service_type);
        }
        for (k, v) in &other.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}

/// Whether the execution context is believed to be active, plus the config
/// needed to restart it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceState {
    /// Registry-level belief that the context runs.
    pub running: bool,
    /// Last known start configuration.
    pub config: Option<ServiceConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zero_id_is_rejected() {
        assert!(ServiceConfig::new(0).validate().is_err());
        assert!(ServiceConfig::new(7).validate().is_ok());
    }

    #[test]
    fn unknown_keys_survive_json() {
        let raw = r#"{"id":3,"title":"Sync","icon":"ic_sync","importance":4}"#;
        let cfg: ServiceConfig = serde_json::from_str(raw).expect("decode");
        assert_eq!(cfg.title, "Sync");
        assert_eq!(cfg.extra.get("icon"), Some(&serde_json::json!("ic_sync")));

        let back: serde_json::Value = serde_json::to_value(&cfg).expect("encode");
        assert_eq!(back["importance"], serde_json::json!(4));
    }

    #[test]
    fn merge_keeps_existing_fields_when_update_is_empty() {
        let mut base = ServiceConfig::new(1).with_title("A").with_message("first");
        let update = ServiceConfig::new(1).with_message("second");
        base.merge(&update);
        assert_eq!(base.title, "A");
        assert_eq!(base.message, "second");
    }
}
