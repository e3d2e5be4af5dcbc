use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::request::Parts,
    Form, Json,
};

use common::types::{Entry, KeyListing, MessageBody};

use crate::errors::ApiError;
use crate::routes::ServerState;

/// Urlencoded name/value pairs. A repeated name resolves to its first value.
#[derive(Debug, Default, Clone)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Query string extractor whose rejection is rendered as an [`ApiError`].
#[async_trait]
impl<S> FromRequestParts<S> for Params
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state).await?;
        Ok(Self(pairs))
    }
}

// body fields take precedence over the query string
fn merge(query: &Params, form: Option<&Params>, name: &str) -> String {
    form.and_then(|f| f.first(name))
        .or_else(|| query.first(name))
        .unwrap_or_default()
        .to_string()
}

pub async fn get_value(
    State(state): State<ServerState>,
    query: Params,
) -> Result<Json<Entry>, ApiError> {
    let key = query.first("key").unwrap_or_default().to_string();
    let value = state.cache.get(&key).await?;
    Ok(Json(Entry { key, value }))
}

/// `key`/`value` may arrive in an urlencoded body, the query string, or both.
pub async fn set_value(
    State(state): State<ServerState>,
    query: Params,
    form: Option<Form<Vec<(String, String)>>>,
) -> Result<Json<MessageBody>, ApiError> {
    let form = form.map(|Form(pairs)| Params(pairs));
    let key = merge(&query, form.as_ref(), "key");
    let value = merge(&query, form.as_ref(), "value");
    state.cache.set(key, value).await?;
    Ok(Json(MessageBody::new("Value stored")))
}

pub async fn delete_value(
    State(state): State<ServerState>,
    query: Params,
) -> Result<Json<MessageBody>, ApiError> {
    state.cache.delete(query.first("key").unwrap_or_default()).await?;
    Ok(Json(MessageBody::new("Key deleted")))
}

pub async fn list_keys(State(state): State<ServerState>) -> Json<KeyListing> {
    Json(state.cache.list_keys().await)
}
