//! Paginated listing of tools, resources, resource templates and prompts.
//!
//! The registry behind these lists lives outside this crate; it only has to
//! implement [`Catalog`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::dispatch::{paginate, RequestContext, Route};
use crate::protocol::{Request, RpcError};

/// The four listable capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        Self::Tools,
        Self::Resources,
        Self::ResourceTemplates,
        Self::Prompts,
    ];

    pub fn method(self) -> &'static str {
        match self {
            Self::Tools => "tools/list",
            Self::Resources => "resources/list",
            Self::ResourceTemplates => "resources/templates/list",
            Self::Prompts => "prompts/list",
        }
    }

    /// Key of the item array in the list result.
    pub fn result_key(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::ResourceTemplates => "resourceTemplates",
            Self::Prompts => "prompts",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.method() == method)
    }
}

/// Capability registry.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Every item of `kind`, in a stable order.
    async fn list(&self, kind: CatalogKind) -> Vec<Value>;
}

/// Catalog held in memory.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    items: RwLock<HashMap<CatalogKind, Vec<Value>>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: CatalogKind, item: Value) -> Self {
        self.add(kind, item);
        self
    }

    pub fn add(&self, kind: CatalogKind, item: Value) {
        if let Ok(mut items) = self.items.write() {
            items.entry(kind).or_default().push(item);
        }
    }

    pub fn count(&self, kind: CatalogKind) -> usize {
        self.items
            .read()
            .map(|items| items.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn list(&self, kind: CatalogKind) -> Vec<Value> {
        self.items
            .read()
            .map(|items| items.get(&kind).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Serves the `*/list` methods with cursor pagination.
#[derive(Clone)]
pub struct CatalogRoute {
    catalog: Arc<dyn Catalog>,
    page_limit: usize,
}

impl CatalogRoute {
    pub fn new(catalog: Arc<dyn Catalog>, page_limit: usize) -> Self {
        Self {
            catalog,
            page_limit: page_limit.max(1),
        }
    }
}

#[async_trait]
impl Route for CatalogRoute {
    fn methods(&self) -> &'static [&'static str] {
        &[
            "tools/list",
            "resources/list",
            "resources/templates/list",
            "prompts/list",
        ]
    }

    async fn handle_request(
        &self,
        request: &Request,
        _ctx: &mut RequestContext,
    ) -> Result<Value, RpcError> {
        let kind = CatalogKind::from_method(&request.method)
            .ok_or_else(|| RpcError::method_not_found(&request.method))?;
        let cursor = request.param("cursor").and_then(Value::as_str);

        let items = self.catalog.list(kind).await;
        let page = paginate(&items, cursor, self.page_limit);

        let mut result = Map::new();
        result.insert(kind.result_key().to_string(), Value::Array(page.items));
        if let Some(next) = page.next_cursor {
            result.insert("nextCursor".to_string(), Value::String(next));
        }
        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionHandler, Session, SessionId};
    use serde_json::json;

    fn ctx() -> RequestContext {
        let session = Session::new(SessionId::new(), Arc::new(MemorySessionHandler::new(60)));
        RequestContext::new(session, None)
    }

    fn catalog(tools: usize) -> Arc<StaticCatalog> {
        let catalog = StaticCatalog::new();
        for i in 0..tools {
            catalog.add(CatalogKind::Tools, json!({"name": format!("tool-{i}")}));
        }
        Arc::new(catalog)
    }

    #[test]
    fn test_kind_from_method() {
        for kind in CatalogKind::ALL {
            assert_eq!(CatalogKind::from_method(kind.method()), Some(kind));
        }
        assert_eq!(CatalogKind::from_method("tools/call"), None);
    }

    #[tokio::test]
    async fn test_pages_through_tools() {
        let route = CatalogRoute::new(catalog(3), 2);
        let mut ctx = ctx();

        let first = route
            .handle_request(&Request::new(1, "tools/list", None), &mut ctx)
            .await
            .unwrap();
        assert_eq!(first["tools"].as_array().unwrap().len(), 2);
        let cursor = first["nextCursor"].as_str().unwrap().to_string();

        let second = route
            .handle_request(
                &Request::new(2, "tools/list", Some(json!({"cursor": cursor}))),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(second["tools"], json!([{"name": "tool-2"}]));
        assert!(second.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn test_empty_kind() {
        let route = CatalogRoute::new(catalog(1), 10);
        let result = route
            .handle_request(&Request::new(1, "resources/templates/list", None), &mut ctx())
            .await
            .unwrap();
        assert_eq!(result, json!({"resourceTemplates": []}));
    }
}
