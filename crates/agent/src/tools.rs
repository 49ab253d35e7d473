//! Fixed tool surface offered to the model.
//!
//! Model-produced arguments are parsed once into a [`ToolCall`] and every tool
//! answers with text. Validation problems, unknown operations and store
//! failures all come back as sentences the router can hand to the user.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;

use foodlink_core::records::{Collection, Record, RecordStore, RecordStoreError};

use crate::llm::{ToolRequest, ToolSpec};

pub const CRUD_TOOL: &str = "crud_tool";
pub const NAVIGATION_TOOL: &str = "navigation_tool";
pub const SYNTHESIS_TOOL: &str = "synthesis_tool";

#[derive(Clone, Debug, PartialEq)]
pub enum CrudOperation {
    GetUser { user_id: String },
    UpdateUser { user_id: String, user_data: Record },
    DeleteUser { user_id: String },
    GetPartners,
}

impl CrudOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetUser { .. } => "get_user",
            Self::UpdateUser { .. } => "update_user",
            Self::DeleteUser { .. } => "delete_user",
            Self::GetPartners => "get_partners",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolCall {
    Crud(CrudOperation),
    Navigation { page: String },
    Synthesis { data: Record },
}

impl ToolCall {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Crud(_) => CRUD_TOOL,
            Self::Navigation { .. } => NAVIGATION_TOOL,
            Self::Synthesis { .. } => SYNTHESIS_TOOL,
        }
    }

    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolValidationError> {
        match name.trim() {
            CRUD_TOOL => parse_crud(arguments).map(Self::Crud),
            NAVIGATION_TOOL => {
                let args = object_arguments(NAVIGATION_TOOL, arguments)?;
                let page = required_string(NAVIGATION_TOOL, args, "page")?;
                Ok(Self::Navigation { page })
            }
            SYNTHESIS_TOOL => {
                let args = object_arguments(SYNTHESIS_TOOL, arguments)?;
                match args.get("data") {
                    Some(Value::Object(data)) => Ok(Self::Synthesis { data: data.clone() }),
                    None | Some(Value::Null) => Err(ToolValidationError::MissingField {
                        tool: SYNTHESIS_TOOL,
                        field: "data",
                    }),
                    Some(_) => Err(ToolValidationError::Malformed {
                        tool: SYNTHESIS_TOOL,
                        field: "data",
                        expected: "an object",
                    }),
                }
            }
            other => Err(ToolValidationError::UnknownTool(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolValidationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Arguments for {tool} must be a JSON object.")]
    NotAnObject { tool: &'static str },
    #[error("Missing '{field}' for {tool}.")]
    MissingField { tool: &'static str, field: &'static str },
    #[error("Field '{field}' for {tool} must be {expected}.")]
    Malformed { tool: &'static str, field: &'static str, expected: &'static str },
    #[error("Missing {} for {operation} operation.", quoted_keys(.keys))]
    MissingKeys { operation: &'static str, keys: Vec<&'static str> },
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

fn quoted_keys(keys: &[&'static str]) -> String {
    keys.iter().map(|key| format!("'{key}'")).collect::<Vec<_>>().join(" and ")
}

/// A model tool request paired with the outcome of validating its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: Value,
    pub validated: Result<ToolCall, ToolValidationError>,
}

impl ToolInvocation {
    pub fn from_request(request: &ToolRequest) -> Self {
        Self {
            tool: request.name.clone(),
            arguments: request.arguments.clone(),
            validated: ToolCall::parse(&request.name, &request.arguments),
        }
    }
}

fn object_arguments<'a>(
    tool: &'static str,
    arguments: &'a Value,
) -> Result<&'a Map<String, Value>, ToolValidationError> {
    arguments.as_object().ok_or(ToolValidationError::NotAnObject { tool })
}

fn required_string(
    tool: &'static str,
    args: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ToolValidationError> {
    match args.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ToolValidationError::MissingField { tool, field })
        }
        Some(_) => Err(ToolValidationError::Malformed { tool, field, expected: "a string" }),
    }
}

fn canonical_operation(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "get_user" | "read_user" | "get" => Some("get_user"),
        "update_user" | "update" => Some("update_user"),
        "delete_user" | "delete" => Some("delete_user"),
        "get_partners" | "partners" => Some("get_partners"),
        _ => None,
    }
}

fn user_id(data: &Map<String, Value>) -> Result<Option<String>, ToolValidationError> {
    match data.get("user_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(Some(id.trim().to_string())),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(Value::String(_)) | Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ToolValidationError::Malformed {
            tool: CRUD_TOOL,
            field: "user_id",
            expected: "a string",
        }),
    }
}

fn parse_crud(arguments: &Value) -> Result<CrudOperation, ToolValidationError> {
    let args = object_arguments(CRUD_TOOL, arguments)?;
    let raw_operation = match args.get("operation") {
        Some(Value::String(operation)) if !operation.trim().is_empty() => operation.as_str(),
        Some(Value::String(_)) | Some(Value::Null) | None => {
            return Err(ToolValidationError::MissingField { tool: CRUD_TOOL, field: "operation" })
        }
        Some(_) => {
            return Err(ToolValidationError::Malformed {
                tool: CRUD_TOOL,
                field: "operation",
                expected: "a string",
            })
        }
    };

    let empty = Map::new();
    let data = match args.get("data") {
        Some(Value::Object(data)) => data,
        None | Some(Value::Null) => &empty,
        Some(_) => {
            return Err(ToolValidationError::Malformed {
                tool: CRUD_TOOL,
                field: "data",
                expected: "an object",
            })
        }
    };

    let operation = canonical_operation(raw_operation)
        .ok_or_else(|| ToolValidationError::UnsupportedOperation(raw_operation.to_string()))?;

    match operation {
        "get_user" | "delete_user" => {
            let user_id = user_id(data)?.ok_or(ToolValidationError::MissingKeys {
                operation,
                keys: vec!["user_id"],
            })?;
            if operation == "get_user" {
                Ok(CrudOperation::GetUser { user_id })
            } else {
                Ok(CrudOperation::DeleteUser { user_id })
            }
        }
        "update_user" => {
            let user_id = user_id(data)?;
            let user_data = match data.get("user_data") {
                Some(Value::Object(fields)) if !fields.is_empty() => Some(fields.clone()),
                Some(Value::Object(_)) | Some(Value::Null) | None => None,
                Some(_) => {
                    return Err(ToolValidationError::Malformed {
                        tool: CRUD_TOOL,
                        field: "user_data",
                        expected: "an object",
                    })
                }
            };

            match (user_id, user_data) {
                (Some(user_id), Some(user_data)) => {
                    Ok(CrudOperation::UpdateUser { user_id, user_data })
                }
                (user_id, user_data) => {
                    let mut keys = Vec::new();
                    if user_id.is_none() {
                        keys.push("user_id");
                    }
                    if user_data.is_none() {
                        keys.push("user_data");
                    }
                    Err(ToolValidationError::MissingKeys { operation, keys })
                }
            }
        }
        _ => Ok(CrudOperation::GetPartners),
    }
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: CRUD_TOOL.to_string(),
            description: "Reads and changes food-rescue records. Supported operations: get_user, \
                          update_user, delete_user, get_partners."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "operation": {
                        "type": "string",
                        "enum": ["get_user", "update_user", "delete_user", "get_partners"],
                    },
                    "data": {
                        "type": "object",
                        "properties": {
                            "user_id": {"type": "string"},
                            "user_data": {"type": "object"},
                        },
                    },
                },
                "required": ["operation"],
            }),
        },
        ToolSpec {
            name: NAVIGATION_TOOL.to_string(),
            description: "Helps users navigate the website by naming the page to open.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"page": {"type": "string"}},
                "required": ["page"],
            }),
        },
        ToolSpec {
            name: SYNTHESIS_TOOL.to_string(),
            description: "Summarizes structured data gathered from several sources.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"data": {"type": "object"}},
                "required": ["data"],
            }),
        },
    ]
}

pub struct ToolRegistry {
    store: Arc<dyn RecordStore>,
    persistence_timeout: Duration,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn RecordStore>, persistence_timeout: Duration) -> Self {
        Self { store, persistence_timeout, specs: tool_specs() }
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Specs restricted to `enabled`, or all of them when no restriction is given.
    pub fn specs_for(&self, enabled: Option<&[String]>) -> Vec<ToolSpec> {
        match enabled {
            Some(names) => self
                .specs
                .iter()
                .filter(|spec| names.iter().any(|name| name.trim() == spec.name))
                .cloned()
                .collect(),
            None => self.specs.clone(),
        }
    }

    pub async fn invoke(&self, invocation: &ToolInvocation) -> String {
        match &invocation.validated {
            Ok(call) => self.execute(call).await,
            Err(error) => {
                tracing::info!(
                    event_name = "agent.tools.validation_failed",
                    tool = %invocation.tool,
                    error = %error,
                    "tool arguments failed validation"
                );
                error.to_string()
            }
        }
    }

    pub async fn execute(&self, call: &ToolCall) -> String {
        match call {
            ToolCall::Crud(operation) => self.execute_crud(operation).await,
            ToolCall::Navigation { page } => format!("Navigating to page: {page}"),
            ToolCall::Synthesis { data } => format!("Synthesized data from: {}", summarize(data)),
        }
    }

    async fn execute_crud(&self, operation: &CrudOperation) -> String {
        let store = self.store.as_ref();
        match operation {
            CrudOperation::GetUser { user_id } => {
                match self.bounded(store.get(Collection::Users, user_id)).await {
                    Ok(Some(user)) => format!("Retrieved user: {}", render_record(&user)),
                    Ok(None) => missing_user(user_id),
                    Err(error) => store_failure("retrieve user", Some(user_id), &error),
                }
            }
            CrudOperation::UpdateUser { user_id, user_data } => {
                let patch = user_data.clone();
                match self.bounded(store.update(Collection::Users, user_id, patch)).await {
                    Ok(user) => format!("Updated user: {}", render_record(&user)),
                    Err(RecordStoreError::NotFound { .. }) => missing_user(user_id),
                    Err(error) => store_failure("update user", Some(user_id), &error),
                }
            }
            CrudOperation::DeleteUser { user_id } => {
                match self.bounded(store.delete(Collection::Users, user_id)).await {
                    Ok(user) => format!("Deleted user: {}", render_record(&user)),
                    Err(RecordStoreError::NotFound { .. }) => missing_user(user_id),
                    Err(error) => store_failure("delete user", Some(user_id), &error),
                }
            }
            CrudOperation::GetPartners => {
                match self.bounded(store.list(Collection::Partners)).await {
                    Ok(partners) => {
                        let partners = Value::Array(partners.into_iter().map(Value::Object).collect());
                        format!("Partner organizations: {partners}")
                    }
                    Err(error) => store_failure("list partner organizations", None, &error),
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, RecordStoreError>>,
    ) -> Result<T, RecordStoreError> {
        tokio::time::timeout(self.persistence_timeout, call)
            .await
            .unwrap_or(Err(RecordStoreError::Timeout(self.persistence_timeout)))
    }
}

fn render_record(record: &Record) -> String {
    Value::Object(record.clone()).to_string()
}

fn missing_user(user_id: &str) -> String {
    format!("No user found with id '{user_id}'.")
}

fn store_failure(action: &str, user_id: Option<&str>, error: &RecordStoreError) -> String {
    tracing::warn!(
        event_name = "agent.tools.store_failed",
        action,
        error = %error,
        "record store call failed"
    );
    match user_id {
        Some(id) => format!("Could not {action} '{id}': {error}"),
        None => format!("Could not {action}: {error}"),
    }
}

fn summarize(data: &Record) -> String {
    if data.is_empty() {
        return "(no fields)".to_string();
    }
    let mut fields: Vec<_> = data.iter().collect();
    fields.sort_by(|(left, _), (right, _)| left.cmp(right));
    fields
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => format!("{key}={text}"),
            other => format!("{key}={other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use foodlink_core::records::{Collection, Record, RecordStore, RecordStoreError};
    use foodlink_db::InMemoryRecordStore;

    use super::{
        CrudOperation, ToolCall, ToolInvocation, ToolRegistry, ToolValidationError, CRUD_TOOL,
    };
    use crate::llm::ToolRequest;

    fn object(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry() -> ToolRegistry {
        let store = InMemoryRecordStore::with_records([
            (Collection::Users, object(json!({"id": "u-1", "display_name": "Ada", "role": "Donor"}))),
            (Collection::Partners, object(json!({"id": "p-1", "name": "Eastside Pantry"}))),
        ]);
        ToolRegistry::new(Arc::new(store), Duration::from_secs(1))
    }

    async fn run(registry: &ToolRegistry, name: &str, arguments: Value) -> String {
        let invocation = ToolInvocation::from_request(&ToolRequest {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        });
        registry.invoke(&invocation).await
    }

    #[tokio::test]
    async fn missing_crud_keys_are_reported_as_text() {
        let registry = registry();
        let cases = [
            (json!({"operation": "get_user", "data": {}}), "'user_id'"),
            (json!({"operation": "delete_user"}), "'user_id'"),
            (json!({"operation": "update_user", "data": {"user_id": "u-1"}}), "'user_data'"),
            (json!({"operation": "update_user", "data": {"user_data": {"role": "Admin"}}}), "'user_id'"),
            (json!({"operation": "update_user", "data": {"user_id": "u-1", "user_data": {}}}), "'user_data'"),
        ];

        for (arguments, missing_key) in cases {
            let reply = run(&registry, CRUD_TOOL, arguments.clone()).await;
            assert!(reply.starts_with("Missing "), "{arguments} produced {reply}");
            assert!(reply.contains(missing_key), "{arguments} produced {reply}");
        }
    }

    #[tokio::test]
    async fn update_without_id_or_data_names_both_keys() {
        let reply = run(&registry(), CRUD_TOOL, json!({"operation": "update_user"})).await;
        assert_eq!(reply, "Missing 'user_id' and 'user_data' for update_user operation.");
    }

    #[tokio::test]
    async fn operation_aliases_are_case_insensitive() {
        let registry = registry();
        let reply = run(&registry, CRUD_TOOL, json!({"operation": "READ_USER", "data": {"user_id": "u-1"}})).await;
        assert!(reply.starts_with("Retrieved user: "));
        assert!(reply.contains("\"display_name\":\"Ada\""));

        let reply = run(&registry, CRUD_TOOL, json!({"operation": "partners"})).await;
        assert!(reply.starts_with("Partner organizations: "));
        assert!(reply.contains("Eastside Pantry"));
    }

    #[tokio::test]
    async fn unsupported_operation_is_reported_as_text() {
        let reply = run(&registry(), CRUD_TOOL, json!({"operation": "drop_table"})).await;
        assert_eq!(reply, "Unsupported operation: drop_table");
    }

    #[tokio::test]
    async fn update_and_delete_flow_through_the_store() {
        let registry = registry();
        let reply = run(
            &registry,
            CRUD_TOOL,
            json!({"operation": "update", "data": {"user_id": "u-1", "user_data": {"role": "Volunteer"}}}),
        )
        .await;
        assert!(reply.starts_with("Updated user: "));
        assert!(reply.contains("Volunteer"));

        let reply = run(&registry, CRUD_TOOL, json!({"operation": "delete", "data": {"user_id": "u-1"}})).await;
        assert!(reply.starts_with("Deleted user: "));

        let reply = run(&registry, CRUD_TOOL, json!({"operation": "get_user", "data": {"user_id": "u-1"}})).await;
        assert_eq!(reply, "No user found with id 'u-1'.");
    }

    #[tokio::test]
    async fn navigation_and_synthesis_always_answer() {
        let registry = registry();
        assert_eq!(
            run(&registry, "navigation_tool", json!({"page": "donations"})).await,
            "Navigating to page: donations"
        );
        assert_eq!(
            run(&registry, "synthesis_tool", json!({"data": {"pounds": 40, "donor": "Corner Bakery"}})).await,
            "Synthesized data from: donor=Corner Bakery, pounds=40"
        );
        assert_eq!(
            run(&registry, "navigation_tool", json!({})).await,
            "Missing 'page' for navigation_tool."
        );
        assert_eq!(
            run(&registry, "synthesis_tool", json!({"data": "all of it"})).await,
            "Field 'data' for synthesis_tool must be an object."
        );
    }

    #[test]
    fn parse_resolves_tagged_variants() {
        assert_eq!(
            ToolCall::parse(CRUD_TOOL, &json!({"operation": "get_user", "data": {"user_id": 42}})),
            Ok(ToolCall::Crud(CrudOperation::GetUser { user_id: "42".to_string() }))
        );
        assert_eq!(
            ToolCall::parse("weather_tool", &json!({})),
            Err(ToolValidationError::UnknownTool("weather_tool".to_string()))
        );
        assert_eq!(
            ToolCall::parse(CRUD_TOOL, &Value::String("{bad json".to_string())),
            Err(ToolValidationError::NotAnObject { tool: CRUD_TOOL })
        );
    }

    #[test]
    fn specs_can_be_restricted() {
        let registry = registry();
        assert_eq!(registry.specs().len(), 3);
        let only_nav = registry.specs_for(Some(&["navigation_tool".to_string()]));
        assert_eq!(only_nav.len(), 1);
        assert_eq!(only_nav[0].name, "navigation_tool");
    }

    struct StalledStore;

    #[async_trait]
    impl RecordStore for StalledStore {
        async fn get(&self, _: Collection, _: &str) -> Result<Option<Record>, RecordStoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }

        async fn update(&self, _: Collection, _: &str, _: Record) -> Result<Record, RecordStoreError> {
            Err(RecordStoreError::Unavailable("database is locked".to_string()))
        }

        async fn delete(&self, _: Collection, _: &str) -> Result<Record, RecordStoreError> {
            Err(RecordStoreError::Unavailable("database is locked".to_string()))
        }

        async fn list(&self, _: Collection) -> Result<Vec<Record>, RecordStoreError> {
            Err(RecordStoreError::Unavailable("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failures_and_timeouts_become_text() {
        let registry = ToolRegistry::new(Arc::new(StalledStore), Duration::from_millis(20));

        let reply = run(&registry, CRUD_TOOL, json!({"operation": "get_user", "data": {"user_id": "u-1"}})).await;
        assert!(reply.starts_with("Could not retrieve user 'u-1': "), "{reply}");
        assert!(reply.contains("timed out"));

        let reply = run(&registry, CRUD_TOOL, json!({"operation": "get_partners"})).await;
        assert_eq!(
            reply,
            "Could not list partner organizations: record store unavailable: database is locked"
        );
    }
}
