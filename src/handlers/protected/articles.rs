use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::audit::Actor;
use crate::database::ListQuery;
use crate::error::ApiError;
use crate::filter::SortDirection;
use crate::inventory::Article;
use crate::middleware::{ApiResponse, ApiResult};
use crate::service::{Page, Pagination};
use crate::state::AppState;

/// Columns clients may filter articles on by equality.
const FILTER_COLUMNS: &[&str] = &[
    "folio",
    "model",
    "serial_number",
    "location",
    "id_article_type",
    "id_brand",
    "id_material",
    "id_color",
    "id_supplier",
    "id_condition",
];

const RESERVED_PARAMS: &[&str] = &["page", "per_page", "include_inactive", "q", "order"];

/// GET /api/articles?page=&per_page=&include_inactive=&q=&order=folio:desc&id_brand=3
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Page<Article>> {
    let (query, pagination) = list_query(&params)?;
    let page = state.orchestrator.articles().list(query, pagination).await?;
    Ok(ApiResponse::success(page))
}

#[derive(Debug, Default, Deserialize)]
pub struct ShowQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// GET /api/articles/:id
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ShowQuery>,
) -> ApiResult<Article> {
    let article = state.orchestrator.articles().get(id, query.include_inactive).await?;
    Ok(ApiResponse::success(article))
}

/// POST /api/articles - single audited create; folio allocated when omitted
pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(input): Json<Value>,
) -> ApiResult<Article> {
    let article = state.orchestrator.articles().create(input, &actor).await?;
    Ok(ApiResponse::created(article))
}

/// PATCH /api/articles/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<i64>,
    Json(input): Json<Value>,
) -> ApiResult<Article> {
    let article = state.orchestrator.articles().update(id, input, &actor).await?;
    Ok(ApiResponse::success(article))
}

/// DELETE /api/articles/:id - soft delete
pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.orchestrator.articles().delete(id, &actor).await?;
    Ok(ApiResponse::<()>::no_content())
}

fn list_query(params: &HashMap<String, String>) -> Result<(ListQuery, Pagination), ApiError> {
    let number = |name: &str| -> Result<Option<i64>, ApiError> {
        params
            .get(name)
            .map(|v| v.parse::<i64>().map_err(|_| ApiError::bad_request(format!("'{}' must be an integer", name))))
            .transpose()
    };

    let defaults = Pagination::default();
    let pagination = Pagination {
        page: number("page")?.unwrap_or(defaults.page),
        per_page: number("per_page")?.unwrap_or(0),
    };

    let include_inactive = params.get("include_inactive").map_or(false, |v| v == "true" || v == "1");
    let mut query = ListQuery::new().include_inactive(include_inactive);

    if let Some(q) = params.get("q").map(|q| q.trim()).filter(|q| !q.is_empty()) {
        query = query.contains("description", q);
    }

    if let Some(order) = params.get("order") {
        for part in order.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (column, direction) = match part.split_once(':') {
                None => (part, SortDirection::Asc),
                Some((column, "asc")) => (column, SortDirection::Asc),
                Some((column, "desc")) => (column, SortDirection::Desc),
                Some(_) => return Err(ApiError::bad_request(format!("Invalid order '{}'", part))),
            };
            query = query.order_by(column, direction);
        }
    }

    let mut filters: Vec<_> = params
        .iter()
        .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
        .collect();
    filters.sort();
    for (name, raw) in filters {
        if !FILTER_COLUMNS.contains(&name.as_str()) {
            return Err(ApiError::bad_request(format!("Cannot filter on '{}'", name)));
        }
        // `id_` columns are integers; the rest bind as text.
        let value = if name.starts_with("id_") {
            raw.parse::<i64>()
                .map(Value::from)
                .map_err(|_| ApiError::bad_request(format!("'{}' must be an integer", name)))?
        } else {
            Value::from(raw.clone())
        };
        query = query.eq(name.clone(), value);
    }

    query.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok((query, pagination))
}
