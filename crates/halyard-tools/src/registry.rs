use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

use crate::executor::{Tool, ToolDeclaration, ToolError, ToolInvocation};

/// Name-keyed set of tools the model may call.
#[derive(Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolCatalog").field("tools", &names).finish()
    }
}

impl ToolCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; a tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.declaration().name.clone();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "replaced previously registered tool");
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tools, sorted by display name.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| {
            let (a, b) = (a.declaration(), b.declaration());
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.name.cmp(&b.name))
        });
        tools
    }

    /// Tools discovered from one MCP server, sorted by name.
    #[must_use]
    pub fn by_server(&self, server: &str) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self
            .tools
            .values()
            .filter(|t| t.server_name() == Some(server))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.declaration().name.cmp(&b.declaration().name));
        tools
    }

    /// Drop every tool discovered from `server`. Returns how many were removed.
    pub fn remove_server(&mut self, server: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|_, t| t.server_name() != Some(server));
        before - self.tools.len()
    }

    /// Declarations for a function-calling payload, sorted by name.
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> = self
            .tools
            .values()
            .map(|t| t.declaration().clone())
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Validate `params` and bind them to the named tool.
    ///
    /// # Errors
    ///
    /// `ToolError::NotFound` for an unknown name, `ToolError::InvalidParams`
    /// when the parameters violate the declared schema or the tool's own checks.
    pub fn build(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<Box<dyn ToolInvocation>, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_owned(),
        })?;
        crate::schema::validate(&tool.declaration().parameters, &params)
            .map_err(|message| ToolError::InvalidParams { message })?;
        tool.build(params)
    }

    /// Render a plain-text listing of every tool and its parameters.
    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::from("<tools>\n");
        for tool in self.all() {
            format_tool(&mut out, tool.declaration());
        }
        out.push_str("</tools>");
        out
    }
}

fn format_tool(out: &mut String, decl: &ToolDeclaration) {
    let _ = writeln!(out, "## {}", decl.name);
    let _ = writeln!(out, "{}", decl.description);
    format_schema_params(out, &decl.parameters);
    out.push('\n');
}

/// Extract the primary type when a schema renders `Option<T>` as `"type": ["T", "null"]`
/// or `"anyOf": [{"type": "T"}, {"type": "null"}]`.
fn extract_non_null_type(obj: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    if let Some(arr) = obj.get("type").and_then(|v| v.as_array()) {
        return arr.iter().filter_map(|v| v.as_str()).find(|t| *t != "null");
    }
    obj.get("anyOf")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(|o| o.get("type")?.as_str())
        .find(|t| *t != "null")
}

fn format_schema_params(out: &mut String, schema: &serde_json::Value) {
    let Some(obj) = schema.as_object() else {
        return;
    };
    let Some(serde_json::Value::Object(props)) = obj.get("properties") else {
        return;
    };
    if props.is_empty() {
        return;
    }

    let required: Vec<&str> = obj
        .get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let _ = writeln!(out, "Parameters:");
    for (name, prop) in props {
        let prop_obj = prop.as_object();
        let ty = prop_obj
            .and_then(|o| {
                o.get("type")
                    .and_then(|v| v.as_str())
                    .or_else(|| extract_non_null_type(o))
            })
            .unwrap_or("string");
        let desc = prop_obj
            .and_then(|o| o.get("description"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let req = if required.contains(&name.as_str()) {
            "required"
        } else {
            "optional"
        };
        let _ = writeln!(out, "  - {name}: {desc} ({ty}, {req})");
    }
}
