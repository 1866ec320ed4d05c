use std::sync::Arc;
use std::time::Instant;

use arclio_core::{
    store::DEFAULT_SEARCH_LIMIT, InhouseRules, RuleError, RuleIndex, RuleProfile, RuleResult,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, Implementation, ListResourceTemplatesResult,
        ListResourcesResult, PaginatedRequestParams, RawResource, ReadResourceRequestParams,
        ReadResourceResult, Resource, ResourceContents, ResourceTemplate, ServerCapabilities,
        ServerInfo,
    },
    schemars,
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::{SessionStore, SESSION_HEADER};

pub const APP_NAME: &str = "arclio-rules";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const VERSION_URI: &str = "config://version";
pub const APP_STATUS_URI: &str = "data://app-status";
pub const PROFILE_TEMPLATE: &str = "rules://{rule_id}/profile";

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AddRequest {
    /// First addend
    pub a: i64,
    /// Second addend
    pub b: i64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetRuleRequest {
    /// Client whose rule tree is searched first
    pub client_id: String,
    /// Path of the rule relative to the client tree, e.g. "backend/errors.mdc". Falls back to the shared core tree.
    pub rule_path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SaveRuleRequest {
    /// Client whose rule tree receives the rule
    pub client_id: String,
    /// Path of the rule relative to the client tree. Parent directories are created.
    pub rule_path: String,
    /// Full rule text, optionally starting with a `---` YAML frontmatter block
    pub content: String,
    /// Message describing the change. Defaults to "Update <rule_path>".
    pub commit_message: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListRulesRequest {
    /// Client whose rule tree is listed
    pub client_id: String,
    /// Directory relative to the client tree. Omit for the root.
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchRulesRequest {
    /// Client whose rules (plus the core rules) are searched
    pub client_id: String,
    /// Case-insensitive text to look for
    pub q: String,
    /// Maximum number of results, 1-100. Default: 10
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CompanyRequest {
    /// Company name
    pub company: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CategoryRequest {
    /// Company name
    pub company: String,
    /// Category name within the company
    pub category: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CompanyRuleRequest {
    /// Company name
    pub company: String,
    /// Category name within the company
    pub category: String,
    /// Rule name without the .mdc extension. Ignored when is_main_rule is true.
    pub rule: String,
    /// Read the category's main rule (index.mdc) instead
    #[serde(default)]
    pub is_main_rule: bool,
}

// --- Server ---

/// MCP handler for rule access. In session mode every connected session gets
/// a clone sharing one [`SessionStore`]; in stateless mode there is none.
#[derive(Clone)]
pub struct RulesServer {
    index: Arc<RuleIndex>,
    inhouse: Arc<InhouseRules>,
    sessions: Option<Arc<SessionStore>>,
    started: Instant,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl RulesServer {
    pub fn new(
        index: Arc<RuleIndex>,
        inhouse: Arc<InhouseRules>,
        sessions: Option<Arc<SessionStore>>,
    ) -> Self {
        Self {
            index,
            inhouse,
            sessions,
            started: Instant::now(),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Add two numbers. Returns {result, sessionId, usage_count}; usage_count counts calls in the current session.")]
    fn add(
        &self,
        Parameters(req): Parameters<AddRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let session = session_id(&context);
        let payload = self.add_numbers(session.as_deref(), req.a, req.b);
        Ok(CallToolResult::success(vec![Content::text(payload.to_string())]))
    }

    #[tool(
        description = "Get a rule by path. Looks in the client's tree first and falls back to the shared core rules. Returns {name, path, content, metadata, source}; content has the frontmatter removed and metadata holds the parsed frontmatter."
    )]
    fn get_rule(
        &self,
        Parameters(req): Parameters<GetRuleRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(self.index.get_rule_content(&req.client_id, &req.rule_path))
    }

    #[tool(description = "Create or overwrite a rule in the client's tree")]
    fn save_rule(
        &self,
        Parameters(req): Parameters<SaveRuleRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.index.save_rule(
            &req.client_id,
            &req.rule_path,
            &req.content,
            req.commit_message.as_deref(),
        ) {
            Ok(path) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Saved '{}' for client '{}'",
                path, req.client_id
            ))])),
            Err(e) => Ok(tool_error(&e)),
        }
    }

    #[tool(
        description = "List one directory of the client's rule tree. Returns [{name, path, type: \"dir\"|\"file\", sha?}]; only directories and .mdc files are listed."
    )]
    fn list_rules(
        &self,
        Parameters(req): Parameters<ListRulesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let directory = req.directory.as_deref().unwrap_or("");
        json_result(self.index.list_rules(&req.client_id, directory))
    }

    #[tool(
        description = "Search the client's rules and the core rules for text. Returns [{path, name, score, snippet, source}] ordered by number of matches."
    )]
    fn search_rules(
        &self,
        Parameters(req): Parameters<SearchRulesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        json_result(self.index.search(&req.client_id, &req.q, limit))
    }

    #[tool(description = "List all companies that have rules")]
    fn list_companies(&self) -> Result<CallToolResult, McpError> {
        lines_result(self.index.list_companies(), "No companies found.")
    }

    #[tool(description = "List the rule categories of a company")]
    fn list_categories(
        &self,
        Parameters(req): Parameters<CompanyRequest>,
    ) -> Result<CallToolResult, McpError> {
        lines_result(
            self.index.list_categories(&req.company),
            "No categories found.",
        )
    }

    #[tool(description = "List the rule names (without .mdc) in a company category")]
    fn list_category_rules(
        &self,
        Parameters(req): Parameters<CategoryRequest>,
    ) -> Result<CallToolResult, McpError> {
        lines_result(
            self.index.list_category_rules(&req.company, &req.category),
            "No rules found.",
        )
    }

    #[tool(
        description = "Get one rule of a company category, or the category's main rule when is_main_rule is true"
    )]
    fn get_company_rule(
        &self,
        Parameters(req): Parameters<CompanyRuleRequest>,
    ) -> Result<CallToolResult, McpError> {
        json_result(self.index.get_rule(
            &req.company,
            &req.category,
            &req.rule,
            req.is_main_rule,
        ))
    }
}

impl RulesServer {
    pub fn keeps_sessions(&self) -> bool {
        self.sessions.is_some()
    }

    pub fn index(&self) -> &Arc<RuleIndex> {
        &self.index
    }

    pub fn sessions(&self) -> Option<&Arc<SessionStore>> {
        self.sessions.as_ref()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect()
    }

    fn count(&self, session: Option<&str>, key: &str) -> u64 {
        match &self.sessions {
            Some(store) => store.increment(session, key),
            None => 1,
        }
    }

    /// Sum two numbers and count the call against the session.
    pub fn add_numbers(&self, session: Option<&str>, a: i64, b: i64) -> Value {
        let usage = self.count(session, "add_usage_count");
        json!({
            "result": a.wrapping_add(b),
            "sessionId": session,
            "usage_count": usage,
        })
    }

    pub fn version_payload(&self, session: Option<&str>) -> Value {
        let access = self.count(session, "version_access_count");
        json!({
            "version": APP_VERSION,
            "sessionId": session,
            "access_count": access,
        })
    }

    pub fn app_status(&self) -> Value {
        json!({
            "status": "ok",
            "uptime": self.started.elapsed().as_secs(),
            "version": APP_VERSION,
        })
    }

    /// Build the profile of an in-house rule. In session mode the rule text
    /// is kept per session so repeated reads skip the disk.
    pub fn rule_profile(&self, session: Option<&str>, rule_id: u32) -> RuleResult<RuleProfile> {
        let cache_key = format!("rule_{}", rule_id);
        let cached = self
            .sessions
            .as_ref()
            .and_then(|s| s.get(session, &cache_key))
            .and_then(|v| v.as_str().map(str::to_string));

        let content = match cached {
            Some(content) => content,
            None => {
                let content = self.inhouse.read(rule_id)?;
                if let Some(store) = &self.sessions {
                    store.store(session, &cache_key, Value::String(content.clone()));
                }
                content
            }
        };
        Ok(RuleProfile::active(
            rule_id,
            content,
            session.map(str::to_string),
        ))
    }

    /// Resolve a resource URI to its JSON text.
    pub fn read_uri(&self, uri: &str, session: Option<&str>) -> Result<String, McpError> {
        let payload = match uri {
            VERSION_URI => self.version_payload(session),
            APP_STATUS_URI => self.app_status(),
            _ => {
                let Some(raw_id) = parse_profile_uri(uri) else {
                    return Err(McpError::resource_not_found(
                        format!("Unknown resource '{}'", uri),
                        Some(json!({ "uri": uri })),
                    ));
                };
                let rule_id: u32 = raw_id.parse().map_err(|_| {
                    McpError::invalid_params(
                        format!("rule_id must be a non-negative integer, got '{}'", raw_id),
                        Some(json!({ "uri": uri })),
                    )
                })?;
                let profile = self
                    .rule_profile(session, rule_id)
                    .map_err(|e| resource_error(&e, uri))?;
                serde_json::to_value(&profile)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?
            }
        };
        serde_json::to_string_pretty(&payload)
            .map_err(|e| McpError::internal_error(e.to_string(), None))
    }

    /// Log what this server exposes.
    pub fn log_inventory(&self) {
        let tools = self.tool_names();
        let resources: Vec<String> = static_resources()
            .into_iter()
            .map(|r| r.raw.name.clone())
            .collect();
        tracing::info!("{} Tool(s): {}", tools.len(), tools.join(", "));
        tracing::info!("{} Resource(s): {}", resources.len(), resources.join(", "));
        tracing::info!("1 Resource Template(s): {}", PROFILE_TEMPLATE);
    }
}

#[tool_handler]
impl ServerHandler for RulesServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            server_info: Implementation {
                name: APP_NAME.to_string(),
                title: Some("Arclio rules".to_string()),
                version: APP_VERSION.to_string(),
                ..Implementation::default()
            },
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult::with_all_items(static_resources()))
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult::with_all_items(vec![
            profile_template()?,
        ]))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let session = session_id(&context);
        let text = self.read_uri(&request.uri, session.as_deref())?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

// --- Helpers ---

/// Session id of the HTTP request behind this call, if any. Stdio requests
/// carry no HTTP parts and therefore no session.
fn session_id(context: &RequestContext<RoleServer>) -> Option<String> {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .and_then(|parts| parts.headers.get(SESSION_HEADER))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn static_resources() -> Vec<Resource> {
    let mut version = RawResource::new(VERSION_URI, "Version");
    version.description = Some("Application version with per-session access count".into());
    version.mime_type = Some("application/json".into());

    let mut status = RawResource::new(APP_STATUS_URI, "ApplicationStatus");
    status.description = Some("Provides the current status of the application.".into());
    status.mime_type = Some("application/json".into());

    vec![version.no_annotation(), status.no_annotation()]
}

fn profile_template() -> Result<ResourceTemplate, McpError> {
    serde_json::from_value(json!({
        "uriTemplate": PROFILE_TEMPLATE,
        "name": "RuleProfile",
        "description": "In-house rule by numeric id, as {name, content, status, sessionId}",
        "mimeType": "application/json",
    }))
    .map_err(|e| McpError::internal_error(e.to_string(), None))
}

/// Extract `{rule_id}` from `rules://{rule_id}/profile`.
fn parse_profile_uri(uri: &str) -> Option<&str> {
    let id = uri.strip_prefix("rules://")?.strip_suffix("/profile")?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}

fn tool_error(e: &RuleError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(e.to_string())])
}

fn json_result<T: serde::Serialize>(result: RuleResult<T>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => {
            let json = serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("Serialization error: {}", e));
            Ok(CallToolResult::success(vec![Content::text(json)]))
        }
        Err(e) => Ok(tool_error(&e)),
    }
}

fn lines_result(result: RuleResult<Vec<String>>, empty: &str) -> Result<CallToolResult, McpError> {
    match result {
        Ok(names) => {
            let text = if names.is_empty() {
                empty.to_string()
            } else {
                names.join("\n")
            };
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(e) => Ok(tool_error(&e)),
    }
}

fn resource_error(e: &RuleError, uri: &str) -> McpError {
    let data = Some(json!({ "uri": uri }));
    match e {
        RuleError::NotFound(_) => McpError::resource_not_found(e.to_string(), data),
        e if e.is_client_error() => McpError::invalid_params(e.to_string(), data),
        _ => McpError::internal_error(e.to_string(), data),
    }
}

const INSTRUCTIONS: &str = r#"Arclio rules server. Rules are markdown documents (.mdc) with optional YAML frontmatter, organised per client and category, with a shared core tree every client falls back to.

## Reading rules
- `list_companies`, `list_categories`, `list_category_rules` browse the catalog; `get_company_rule` reads one rule (set `is_main_rule` for a category's index).
- `get_rule` reads any path in a client's tree, falling back to core.
- `search_rules` finds rules by text when you do not know the path.

## Writing rules
- `save_rule` creates or overwrites a rule in the client's tree. Include a short `commit_message`.

## Resources
- `config://version`, `data://app-status`, and `rules://{rule_id}/profile` for numbered in-house rules."#;

#[cfg(test)]
mod tests {
    use super::*;
    use arclio_core::{CacheConfig, RuleStore};
    use std::fs;
    use tempfile::TempDir;

    fn server(with_sessions: bool) -> (TempDir, RulesServer) {
        let dir = TempDir::new().unwrap();
        let inhouse = dir.path().join("inhouse");
        fs::create_dir_all(&inhouse).unwrap();
        fs::write(inhouse.join("rule_1.md"), "Rule one").unwrap();
        let index = Arc::new(RuleIndex::new(
            RuleStore::new(dir.path().join("rules")),
            CacheConfig::default(),
        ));
        let sessions = with_sessions.then(|| Arc::new(SessionStore::new()));
        let server = RulesServer::new(index, Arc::new(InhouseRules::new(inhouse)), sessions);
        (dir, server)
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("")
    }

    #[test]
    fn registers_every_tool() {
        let (_dir, server) = server(true);
        let mut names = server.tool_names();
        names.sort();
        assert_eq!(
            names,
            vec![
                "add",
                "get_company_rule",
                "get_rule",
                "list_categories",
                "list_category_rules",
                "list_companies",
                "list_rules",
                "save_rule",
                "search_rules",
            ]
        );
    }

    #[test]
    fn server_info_names_the_rules_server() {
        let (_dir, server) = server(true);
        let info = server.get_info();
        assert_eq!(info.server_info.name, "arclio-rules");
        assert_eq!(info.server_info.version, APP_VERSION);
    }

    #[test]
    fn add_counts_per_session() {
        let (_dir, server) = server(true);
        assert_eq!(server.add_numbers(Some("s1"), 2, 3)["usage_count"], 1);
        let second = server.add_numbers(Some("s1"), 2, 3);
        assert_eq!(second["result"], 5);
        assert_eq!(second["usage_count"], 2);
        assert_eq!(second["sessionId"], "s1");
        assert_eq!(server.add_numbers(Some("s2"), 0, 0)["usage_count"], 1);
    }

    #[test]
    fn stateless_server_never_counts() {
        let (_dir, server) = server(false);
        assert!(!server.keeps_sessions());
        server.add_numbers(Some("s1"), 1, 1);
        let again = server.add_numbers(Some("s1"), 1, 1);
        assert_eq!(again["usage_count"], 1);
        assert_eq!(server.version_payload(None)["sessionId"], Value::Null);
    }

    #[test]
    fn profile_is_cached_per_session() {
        let (dir, server) = server(true);
        let first = server.rule_profile(Some("s1"), 1).unwrap();
        assert_eq!(first.name, "Rule:1");
        assert_eq!(first.status, "active");
        fs::write(dir.path().join("inhouse/rule_1.md"), "edited").unwrap();
        assert_eq!(server.rule_profile(Some("s1"), 1).unwrap().content, "Rule one");
        assert_eq!(server.rule_profile(Some("s2"), 1).unwrap().content, "edited");
    }

    #[test]
    fn read_uri_dispatches() {
        let (_dir, server) = server(true);
        let version: Value = serde_json::from_str(&server.read_uri(VERSION_URI, Some("s")).unwrap()).unwrap();
        assert_eq!(version["version"], APP_VERSION);
        assert_eq!(version["access_count"], 1);

        let status: Value = serde_json::from_str(&server.read_uri(APP_STATUS_URI, None).unwrap()).unwrap();
        assert_eq!(status["status"], "ok");

        let profile: Value =
            serde_json::from_str(&server.read_uri("rules://1/profile", None).unwrap()).unwrap();
        assert_eq!(profile["content"], "Rule one");

        assert!(server.read_uri("rules://abc/profile", None).is_err());
        assert!(server.read_uri("rules://2/profile", None).is_err());
        assert!(server.read_uri("config://nope", None).is_err());
    }

    #[test]
    fn profile_uri_parsing() {
        assert_eq!(parse_profile_uri("rules://42/profile"), Some("42"));
        assert_eq!(parse_profile_uri("rules:///profile"), None);
        assert_eq!(parse_profile_uri("rules://1/2/profile"), None);
        assert_eq!(parse_profile_uri("users://1/profile"), None);
    }

    #[test]
    fn tools_report_domain_errors_as_results() {
        let (_dir, server) = server(true);
        let missing = server
            .get_rule(Parameters(GetRuleRequest {
                client_id: "acme".into(),
                rule_path: "nope.mdc".into(),
            }))
            .unwrap();
        assert_eq!(missing.is_error, Some(true));

        let saved = server
            .save_rule(Parameters(SaveRuleRequest {
                client_id: "acme".into(),
                rule_path: "backend/errors.mdc".into(),
                content: "---\nowner: platform\n---\nPropagate errors.".into(),
                commit_message: Some("Add error rule".into()),
            }))
            .unwrap();
        assert_ne!(saved.is_error, Some(true));

        let read = server
            .get_company_rule(Parameters(CompanyRuleRequest {
                company: "acme".into(),
                category: "backend".into(),
                rule: "errors".into(),
                is_main_rule: false,
            }))
            .unwrap();
        let doc: Value = serde_json::from_str(&text_of(&read)).unwrap();
        assert_eq!(doc["content"], "Propagate errors.");
        assert_eq!(doc["metadata"]["owner"], "platform");

        let companies = server.list_companies().unwrap();
        assert_eq!(text_of(&companies), "acme");
    }

    #[test]
    fn search_defaults_limit() {
        let (_dir, server) = server(false);
        for i in 0..12 {
            server
                .index()
                .save_rule("acme", &format!("r/{}.mdc", i), "needle", None)
                .unwrap();
        }
        let result = server
            .search_rules(Parameters(SearchRulesRequest {
                client_id: "acme".into(),
                q: "needle".into(),
                limit: None,
            }))
            .unwrap();
        let hits: Vec<Value> = serde_json::from_str(&text_of(&result)).unwrap();
        assert_eq!(hits.len(), DEFAULT_SEARCH_LIMIT);
    }
}
