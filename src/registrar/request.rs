/// Request and response shapes of the registrar contract
use crate::document::{KeyPurpose, Service};
use serde::{Deserialize, Deserializer, Serialize};

/// Keys and services a new DID starts with
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTemplate {
    #[serde(default)]
    pub public_keys: Vec<KeyTemplate>,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// A key the registrar generates on the caller's behalf
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyTemplate {
    pub id: String,
    #[serde(deserialize_with = "deserialize_purpose")]
    pub purpose: KeyPurpose,
}

impl KeyTemplate {
    pub fn new(id: impl Into<String>, purpose: KeyPurpose) -> Self {
        Self {
            id: id.into(),
            purpose,
        }
    }
}

/// Accepts `AUTHENTICATION`, `authentication` and `assertionMethod` style names
fn deserialize_purpose<'de, D>(deserializer: D) -> Result<KeyPurpose, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Reference to a key or service by id
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdReference {
    pub id: String,
}

/// New endpoints for an existing service; any type given is ignored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePatch {
    pub id: String,
    #[serde(rename = "type", default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub service_endpoint: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    AddKey,
    RemoveKey,
    AddService,
    RemoveService,
    UpdateService,
}

/// One requested update action; the field matching `action_type` is required
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActionRequest {
    pub action_type: ActionType,
    #[serde(default)]
    pub add_key: Option<KeyTemplate>,
    #[serde(default)]
    pub remove_key: Option<IdReference>,
    #[serde(default)]
    pub add_service: Option<Service>,
    #[serde(default)]
    pub remove_service: Option<IdReference>,
    #[serde(default)]
    pub update_service: Option<ServicePatch>,
}

impl UpdateActionRequest {
    fn empty(action_type: ActionType) -> Self {
        Self {
            action_type,
            add_key: None,
            remove_key: None,
            add_service: None,
            remove_service: None,
            update_service: None,
        }
    }

    pub fn add_key(id: impl Into<String>, purpose: KeyPurpose) -> Self {
        Self {
            add_key: Some(KeyTemplate::new(id, purpose)),
            ..Self::empty(ActionType::AddKey)
        }
    }

    pub fn remove_key(id: impl Into<String>) -> Self {
        Self {
            remove_key: Some(IdReference { id: id.into() }),
            ..Self::empty(ActionType::RemoveKey)
        }
    }

    pub fn add_service(service: Service) -> Self {
        Self {
            add_service: Some(service),
            ..Self::empty(ActionType::AddService)
        }
    }

    pub fn remove_service(id: impl Into<String>) -> Self {
        Self {
            remove_service: Some(IdReference { id: id.into() }),
            ..Self::empty(ActionType::RemoveService)
        }
    }

    pub fn update_service(id: impl Into<String>, service_endpoint: Vec<String>) -> Self {
        Self {
            update_service: Some(ServicePatch {
                id: id.into(),
                service_type: None,
                service_endpoint,
            }),
            ..Self::empty(ActionType::UpdateService)
        }
    }
}

/// Both forms of a freshly created DID
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDid {
    pub long_form_did: String,
    pub short_form_did: String,
}

/// Lifecycle of a managed DID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagedDidStatus {
    Created,
    PublicationPending,
    Published,
    Deactivated,
}

/// A DID whose keys the registrar holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDid {
    pub did: String,
    pub long_form_did: String,
    pub status: ManagedDidStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_accepts_camel_case_purposes() {
        let template: DocumentTemplate = serde_json::from_value(serde_json::json!({
            "publicKeys": [
                {"id": "auth-1", "purpose": "authentication"},
                {"id": "assertion-1", "purpose": "assertionMethod"}
            ],
            "services": [
                {"id": "svc-1", "type": "LinkedDomains", "serviceEndpoint": ["https://example.com"]}
            ]
        }))
        .unwrap();

        assert_eq!(template.public_keys[1].purpose, KeyPurpose::AssertionMethod);
        assert_eq!(template.services[0].service_type, "LinkedDomains");
    }

    #[test]
    fn test_update_request_shape() {
        let request: UpdateActionRequest = serde_json::from_value(serde_json::json!({
            "actionType": "REMOVE_KEY",
            "removeKey": {"id": "auth-1", "purpose": "authentication"}
        }))
        .unwrap();
        assert_eq!(request, UpdateActionRequest::remove_key("auth-1"));

        let request: UpdateActionRequest = serde_json::from_value(serde_json::json!({
            "actionType": "UPDATE_SERVICE",
            "updateService": {
                "id": "svc-1",
                "type": "LinkedDomains",
                "serviceEndpoint": ["https://new.example.com"]
            }
        }))
        .unwrap();
        assert_eq!(request.action_type, ActionType::UpdateService);
        assert_eq!(
            request.update_service.unwrap().service_endpoint,
            vec!["https://new.example.com".to_string()]
        );
    }
}
