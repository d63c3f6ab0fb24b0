//! Operation catalog reader.
//!
//! Flattens an OpenAPI 3 document into a list of callable operations. The
//! catalog is a pure function of the document: it holds no connection state
//! and never changes after it is built.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

const HTTP_METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Maximum `$ref` hops followed before the document is declared cyclic.
const MAX_REF_DEPTH: usize = 16;

/// Pseudo-field exposed by `application/octet-stream` request bodies.
pub const BINARY_BODY_FIELD: &str = "binary data";

/// Where an operation parameter is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }
}

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request body shape, reduced to what binding and invocation need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBodySpec {
    pub content_type: String,
    /// Original `$ref` of the body schema, if it was a reference.
    #[serde(default)]
    pub schema_ref: Option<String>,
    /// Top-level field names (or `items` fields for array bodies).
    pub fields: Vec<String>,
    pub required_fields: Vec<String>,
    pub required: bool,
}

/// One callable endpoint of the target API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: String,
    /// Lowercase HTTP method.
    pub method: String,
    pub path: String,
    pub summary: String,
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub request_body: Option<RequestBodySpec>,
    /// JSON schema of the first 2xx `application/json` response.
    #[serde(default)]
    pub response_schema: Option<Value>,
}

impl OperationSummary {
    /// Build a summary by hand (no request body, no response schema).
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into().to_lowercase(),
            path: path.into(),
            summary: summary.into(),
            parameters: Vec::new(),
            request_body: None,
            response_schema: None,
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        location: ParamLocation,
        required: bool,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            location,
            required: required || location == ParamLocation::Path,
            description: None,
        });
        self
    }

    pub fn with_json_body(mut self, fields: &[&str], required_fields: &[&str]) -> Self {
        self.request_body = Some(RequestBodySpec {
            content_type: "application/json".to_string(),
            schema_ref: None,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            required: !required_fields.is_empty(),
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn body_fields(&self) -> &[String] {
        self.request_body
            .as_ref()
            .map(|b| b.fields.as_slice())
            .unwrap_or(&[])
    }

    /// Every input the caller may bind: parameters first, then body fields.
    pub fn input_names(&self) -> Vec<&str> {
        let mut names = self.parameter_names();
        for field in self.body_fields() {
            if !names.contains(&field.as_str()) {
                names.push(field.as_str());
            }
        }
        names
    }

    /// Inputs that must be bound before the operation can be called.
    pub fn required_inputs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        if let Some(body) = &self.request_body {
            for field in &body.required_fields {
                if !names.contains(&field.as_str()) {
                    names.push(field.as_str());
                }
            }
        }
        names
    }
}

/// Flat, id-indexed list of operations read from one API specification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    servers: Vec<String>,
    operations: Vec<OperationSummary>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog from already-extracted operations.
    pub fn new(servers: Vec<String>, operations: Vec<OperationSummary>) -> Result<Self> {
        let mut index = HashMap::with_capacity(operations.len());
        for (pos, op) in operations.iter().enumerate() {
            if index.insert(op.id.clone(), pos).is_some() {
                return Err(CopilotError::Catalog(format!(
                    "duplicate operationId '{}'",
                    op.id
                )));
            }
        }
        Ok(Self {
            servers,
            operations,
            index,
        })
    }

    /// Read a JSON or YAML document.
    pub fn from_text(text: &str) -> Result<Self> {
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(_) => serde_yaml::from_str(text)?,
        };
        Self::from_value(&doc)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_text(&text)
    }

    /// Extract every operation that carries an `operationId`.
    pub fn from_value(doc: &Value) -> Result<Self> {
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| CopilotError::Catalog("document has no 'paths' object".to_string()))?;

        let servers = doc
            .get("servers")
            .and_then(Value::as_array)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|s| s.get("url").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut operations = Vec::new();
        for (path, item) in paths {
            let item = resolve_ref(doc, item)?;
            let Some(item) = item.as_object() else {
                continue;
            };

            let shared_params = match item.get("parameters") {
                Some(params) => read_parameters(doc, params)?,
                None => Vec::new(),
            };

            for (method, op) in item {
                if !HTTP_METHODS.contains(&method.as_str()) {
                    continue;
                }
                let Some(id) = op.get("operationId").and_then(Value::as_str) else {
                    debug!(path = %path, method = %method, "Skipping operation without operationId");
                    continue;
                };
                operations.push(read_operation(doc, id, method, path, op, &shared_params)?);
            }
        }

        Self::new(servers, operations)
    }

    pub fn get(&self, id: &str) -> Option<&OperationSummary> {
        self.index.get(id).map(|&pos| &self.operations[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationSummary> {
        self.operations.iter()
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// Default invocation base URL (the first declared server).
    pub fn default_server(&self) -> Option<&str> {
        self.servers.first().map(String::as_str)
    }

    /// Ids from `ids` that this catalog does not define, in input order.
    pub fn unknown_ids<'a>(&self, ids: &'a [String]) -> Vec<&'a str> {
        ids.iter()
            .filter(|id| !self.contains(id))
            .map(String::as_str)
            .collect()
    }

    /// Compact text listing every operation, used in classification prompts.
    pub fn summaries_text(&self) -> String {
        let mut out = format!("servers:{}\n", self.servers.join(", "));
        for op in &self.operations {
            let _ = writeln!(out, "- {} - {}", op.id, op.summary);
            if let Some(body) = &op.request_body {
                let fields: Vec<String> = body
                    .fields
                    .iter()
                    .map(|f| {
                        if body.required_fields.contains(f) {
                            format!("{} (required)", f)
                        } else {
                            f.clone()
                        }
                    })
                    .collect();
                let _ = writeln!(out, "  - Body Parameters: {}", fields.join(", "));
            }
            let _ = writeln!(out, "  - Method: {}", op.method);
            if !op.parameters.is_empty() {
                let params: Vec<String> = op
                    .parameters
                    .iter()
                    .map(|p| {
                        if p.required {
                            format!("{} (required)", p.name)
                        } else {
                            p.name.clone()
                        }
                    })
                    .collect();
                let _ = writeln!(out, "  - Parameters: {}", params.join(", "));
            }
            out.push('\n');
        }
        out
    }
}

/// Follow local `#/...` references until a concrete node is reached.
fn resolve_ref<'a>(doc: &'a Value, node: &'a Value) -> Result<&'a Value> {
    let mut current = node;
    for _ in 0..MAX_REF_DEPTH {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Ok(current);
        };
        let pointer = reference.strip_prefix('#').ok_or_else(|| {
            CopilotError::Catalog(format!("external reference not supported: {}", reference))
        })?;
        current = doc.pointer(pointer).ok_or_else(|| {
            CopilotError::Catalog(format!("unresolvable reference: {}", reference))
        })?;
    }
    Err(CopilotError::Catalog(format!(
        "reference chain deeper than {} hops",
        MAX_REF_DEPTH
    )))
}

fn read_parameters(doc: &Value, params: &Value) -> Result<Vec<ParameterSpec>> {
    let Some(params) = params.as_array() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(params.len());
    for param in params {
        let param = resolve_ref(doc, param)?;
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(location) = param
            .get("in")
            .and_then(Value::as_str)
            .and_then(ParamLocation::parse)
        else {
            continue;
        };
        let required = location == ParamLocation::Path
            || param.get("required").and_then(Value::as_bool).unwrap_or(false);
        out.push(ParameterSpec {
            name: name.to_string(),
            location,
            required,
            description: param
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    Ok(out)
}

fn read_request_body(doc: &Value, body: &Value) -> Result<Option<RequestBodySpec>> {
    let body = resolve_ref(doc, body)?;
    let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };

    if let Some(media) = content.get("application/json") {
        let raw_schema = media.get("schema").unwrap_or(&Value::Null);
        let schema_ref = raw_schema
            .get("$ref")
            .and_then(Value::as_str)
            .map(str::to_string);
        let schema = resolve_ref(doc, raw_schema)?;

        let object_schema = if schema.get("properties").is_some() {
            schema
        } else if let Some(items) = schema.get("items") {
            resolve_ref(doc, items)?
        } else {
            schema
        };

        let fields = object_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();
        let required_fields = object_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|req| {
                req.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        return Ok(Some(RequestBodySpec {
            content_type: "application/json".to_string(),
            schema_ref,
            fields,
            required_fields,
            required,
        }));
    }

    if content.contains_key("application/octet-stream") {
        return Ok(Some(RequestBodySpec {
            content_type: "application/octet-stream".to_string(),
            schema_ref: None,
            fields: vec![BINARY_BODY_FIELD.to_string()],
            required_fields: if required {
                vec![BINARY_BODY_FIELD.to_string()]
            } else {
                Vec::new()
            },
            required,
        }));
    }

    Ok(None)
}

fn read_response_schema(doc: &Value, op: &Value) -> Result<Option<Value>> {
    let Some(responses) = op.get("responses").and_then(Value::as_object) else {
        return Ok(None);
    };
    let success = responses
        .iter()
        .find(|(code, _)| code.starts_with('2'))
        .map(|(_, response)| response);
    let Some(response) = success else {
        return Ok(None);
    };
    let response = resolve_ref(doc, response)?;
    match response.pointer("/content/application~1json/schema") {
        Some(schema) => Ok(Some(resolve_ref(doc, schema)?.clone())),
        None => Ok(None),
    }
}

fn read_operation(
    doc: &Value,
    id: &str,
    method: &str,
    path: &str,
    op: &Value,
    shared_params: &[ParameterSpec],
) -> Result<OperationSummary> {
    let mut parameters: Vec<ParameterSpec> = match op.get("parameters") {
        Some(params) => read_parameters(doc, params)?,
        None => Vec::new(),
    };
    // Path-level parameters apply unless the operation overrides them.
    for shared in shared_params {
        let overridden = parameters
            .iter()
            .any(|p| p.name == shared.name && p.location == shared.location);
        if !overridden {
            parameters.push(shared.clone());
        }
    }

    let request_body = match op.get("requestBody") {
        Some(body) => read_request_body(doc, body)?,
        None => None,
    };

    let summary = op
        .get("summary")
        .or_else(|| op.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(OperationSummary {
        id: id.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        summary,
        parameters,
        request_body,
        response_schema: read_response_schema(doc, op)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trello_doc() -> Value {
        json!({
            "openapi": "3.0.0",
            "servers": [{"url": "https://api.trello.com/1"}],
            "paths": {
                "/cards": {
                    "post": {
                        "operationId": "createCard",
                        "summary": "Create a new card",
                        "parameters": [
                            {"name": "listId", "in": "query", "required": true}
                        ],
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/NewCard"}
                                }
                            }
                        },
                        "responses": {
                            "200": {
                                "description": "ok",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Card"}}}
                            }
                        }
                    }
                },
                "/boards/{id}": {
                    "parameters": [{"$ref": "#/components/parameters/BoardId"}],
                    "get": {"operationId": "getBoard", "summary": "Get a board"},
                    "delete": {"summary": "no id, skipped"}
                }
            },
            "components": {
                "parameters": {
                    "BoardId": {"name": "id", "in": "path"}
                },
                "schemas": {
                    "NewCard": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {"name": {"type": "string"}, "desc": {"type": "string"}}
                    },
                    "Card": {"type": "object", "properties": {"id": {"type": "string"}}}
                }
            }
        })
    }

    #[test]
    fn test_reads_operations_and_resolves_refs() {
        let catalog = Catalog::from_value(&trello_doc()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.default_server(), Some("https://api.trello.com/1"));

        let create = catalog.get("createCard").unwrap();
        assert_eq!(create.method, "post");
        assert_eq!(create.body_fields(), &["desc".to_string(), "name".to_string()]);
        let body = create.request_body.as_ref().unwrap();
        assert_eq!(body.schema_ref.as_deref(), Some("#/components/schemas/NewCard"));
        assert_eq!(create.required_inputs(), vec!["listId", "name"]);
        assert!(create.response_schema.is_some());

        let board = catalog.get("getBoard").unwrap();
        let id = board.parameter("id").unwrap();
        assert_eq!(id.location, ParamLocation::Path);
        assert!(id.required);
    }

    #[test]
    fn test_operation_without_id_is_skipped() {
        let catalog = Catalog::from_value(&trello_doc()).unwrap();
        assert!(catalog.iter().all(|op| op.method != "delete"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let ops = vec![
            OperationSummary::new("a", "get", "/a", "A"),
            OperationSummary::new("a", "get", "/b", "B"),
        ];
        assert!(matches!(
            Catalog::new(vec![], ops),
            Err(CopilotError::Catalog(_))
        ));
    }

    #[test]
    fn test_cyclic_reference_is_error() {
        let doc = json!({
            "paths": {"/x": {"$ref": "#/components/loop"}},
            "components": {"loop": {"$ref": "#/components/loop"}}
        });
        assert!(Catalog::from_value(&doc).is_err());
    }

    #[test]
    fn test_octet_stream_body() {
        let doc = json!({
            "paths": {"/upload": {"put": {
                "operationId": "upload",
                "requestBody": {"required": true, "content": {"application/octet-stream": {}}}
            }}}
        });
        let catalog = Catalog::from_value(&doc).unwrap();
        let op = catalog.get("upload").unwrap();
        assert_eq!(op.body_fields(), &[BINARY_BODY_FIELD.to_string()]);
        assert_eq!(op.required_inputs(), vec![BINARY_BODY_FIELD]);
    }

    #[test]
    fn test_yaml_input() {
        let yaml = r#"
servers:
  - url: http://localhost:8080
paths:
  /pets:
    get:
      operationId: listPets
      summary: List pets
      parameters:
        - name: limit
          in: query
"#;
        let catalog = Catalog::from_text(yaml).unwrap();
        assert!(catalog.contains("listPets"));
        assert!(!catalog.get("listPets").unwrap().parameters[0].required);
    }

    #[test]
    fn test_summaries_text_format() {
        let catalog = Catalog::from_value(&trello_doc()).unwrap();
        let text = catalog.summaries_text();
        assert!(text.starts_with("servers:https://api.trello.com/1\n"));
        assert!(text.contains("- createCard - Create a new card\n"));
        assert!(text.contains("  - Body Parameters: desc, name (required)\n"));
        assert!(text.contains("  - Method: post\n"));
        assert!(text.contains("  - Parameters: listId (required)\n"));
    }

    #[test]
    fn test_missing_paths_is_error() {
        assert!(Catalog::from_value(&json!({"openapi": "3.0.0"})).is_err());
    }
}
