//! Generic endpoint: one handler for every route, method and option layout.

use crate::error::AppError;
use crate::query::compiler::{compile_delete, compile_select, Page, ResultShape};
use crate::query::parser::decode_query;
use crate::registry::SchemaRegistry;
use crate::response::EndpointResponse;
use crate::serialize::{serialize_records, serialize_tuples};
use crate::service::write::{build_items, WriteItems};
use crate::service::{CrudService, WriteMode};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::Method,
};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything the dispatcher needs from an HTTP request.
#[derive(Debug)]
pub struct EndpointRequest {
    pub method: Method,
    pub route: Option<String>,
    /// Path segments after the route, at most three.
    pub options: Vec<String>,
    /// Raw query string, still percent-encoded.
    pub query: Option<String>,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct Endpoint {
    pool: PgPool,
    registry: Arc<SchemaRegistry>,
}

impl Endpoint {
    pub fn new(pool: PgPool, registry: Arc<SchemaRegistry>) -> Self {
        Endpoint { pool, registry }
    }

    pub async fn handle(&self, req: EndpointRequest) -> Result<EndpointResponse, AppError> {
        let route = req.route.as_deref().unwrap_or("").to_lowercase();
        tracing::info!(
            method = %req.method,
            route = %route,
            query = %req.query.as_deref().map(decode_query).unwrap_or_default(),
            "request"
        );
        if route.is_empty() {
            return Err(AppError::Routing("Route is not determined.".into()));
        }
        let resource = self
            .registry
            .resolve(&route)
            .ok_or_else(|| AppError::Routing(format!("Route '{}' is not determined.", route)))?;
        let catalog = self.registry.catalog();
        let query = req.query.as_deref().filter(|q| !q.is_empty());

        match req.method {
            Method::DELETE => {
                let q = compile_delete(catalog, &resource, query.unwrap_or(""))?;
                let removed = CrudService::delete(&self.pool, &q).await?;
                tracing::debug!(route = %route, removed, "deleted");
                Ok(EndpointResponse::NoContent)
            }
            Method::POST | Method::PUT => {
                let body: Value = serde_json::from_slice(&req.body)
                    .map_err(|_| AppError::MalformedBody("Body is invalid.".into()))?;
                let nodes = match build_items(catalog, &resource, &body)? {
                    WriteItems::Empty => return Ok(EndpointResponse::NotModified),
                    WriteItems::Nodes(nodes) => nodes,
                };
                let mode = if req.method == Method::PUT {
                    WriteMode::Upsert
                } else {
                    WriteMode::Insert
                };
                CrudService::persist(&self.pool, nodes, mode).await?;
                Ok(EndpointResponse::NoContent)
            }
            _ => {
                let page = parse_page(&req.options)?;
                let compiled = compile_select(catalog, &resource, query.unwrap_or(""), page)?;
                match compiled.shape {
                    ResultShape::Count => {
                        let n = CrudService::count(&self.pool, &compiled.query).await?;
                        Ok(EndpointResponse::Count(n))
                    }
                    ResultShape::Tuples(slots) => {
                        let rows = CrudService::fetch_tuples(&self.pool, &compiled.query, &slots).await?;
                        Ok(EndpointResponse::Rows(serialize_tuples(&rows)?))
                    }
                    ResultShape::Entities {
                        resource,
                        eager,
                        dedupe,
                    } => {
                        let records = CrudService::fetch_entities(
                            &self.pool,
                            &compiled.query,
                            &resource,
                            &eager,
                            dedupe,
                        )
                        .await?;
                        Ok(EndpointResponse::Rows(serialize_records(&records)?))
                    }
                }
            }
        }
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `/{limit}/{offset}/count`, where `count` may stand in any position.
/// An unrecognised third option is ignored.
pub fn parse_page(options: &[String]) -> Result<Page, AppError> {
    let mut page = Page::default();
    let slots = [
        (&mut page.limit, "Limit"),
        (&mut page.offset, "Offset"),
    ];
    let mut count = false;
    for (i, (target, label)) in slots.into_iter().enumerate() {
        let Some(option) = options.get(i) else {
            break;
        };
        let invalid = || AppError::Routing(format!("{} '{}' is invalid.", label, option));
        if is_decimal(option) {
            *target = option.parse().map_err(|_| invalid())?;
        } else if option.eq_ignore_ascii_case("count") {
            count = true;
        } else if !option.is_empty() {
            return Err(invalid());
        }
    }
    if options
        .get(2)
        .map(|o| o.eq_ignore_ascii_case("count"))
        .unwrap_or(false)
    {
        count = true;
    }
    page.count = count;
    Ok(page)
}

/// Axum entry point for every `/{route}[/{option}...]` path.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(params): Path<HashMap<String, String>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<EndpointResponse, AppError> {
    let options = ["option1", "option2", "option3"]
        .iter()
        .map_while(|k| params.get(*k).cloned())
        .collect();
    let req = EndpointRequest {
        method,
        route: params.get("route").cloned(),
        options,
        query,
        body,
    };
    let endpoint = Endpoint::new(state.pool.clone(), state.registry.clone());
    endpoint.handle(req).await.map_err(|e| {
        if e.is_client_fault() {
            tracing::warn!(error = %e, "request rejected");
        }
        e
    })
}
