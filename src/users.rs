use actix_web::{web, HttpResponse};
use log::debug;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::integrity::USER_NOT_FOUND;
use crate::models::{Collection, UserPayload};
use crate::query::{ListParams, ListQuery};
use crate::response::{self, document_to_json, entity_json};
use crate::tasks::parse_id;

/// GET /users
pub async fn list_users(
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> ApiResult<HttpResponse> {
    let query = ListQuery::parse(&params, Collection::Users, None)?;
    debug!("Listing users with {:?}", query);

    if query.count {
        let count = data.store.count(Collection::Users, &query).await?;
        return Ok(response::ok("User count retrieved successfully", count));
    }

    let users: Vec<_> = data
        .store
        .find(Collection::Users, &query)
        .await?
        .into_iter()
        .map(document_to_json)
        .collect();
    Ok(response::ok("Users retrieved successfully", users))
}

/// GET /users/{id}
pub async fn get_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<ListParams>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "user")?;
    let query = ListQuery::parse(&params, Collection::Users, None)?.with_id(id);

    if query.count {
        let count = data.store.count(Collection::Users, &query).await?;
        return Ok(response::ok("User count retrieved successfully", count));
    }

    match data.store.find(Collection::Users, &query).await?.into_iter().next() {
        Some(user) => Ok(response::ok("User retrieved successfully", document_to_json(user))),
        None => Err(ApiError::not_found(USER_NOT_FOUND)),
    }
}

/// POST /users
pub async fn create_user(
    data: web::Data<AppState>,
    payload: web::Json<UserPayload>,
) -> ApiResult<HttpResponse> {
    let user = data.coordinator.create_user(payload.into_inner()).await?;
    Ok(response::created("New user created successfully", entity_json(&user)?))
}

/// PUT /users/{id}
pub async fn update_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UserPayload>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "user")?;
    let user = data.coordinator.update_user(id, payload.into_inner()).await?;
    Ok(response::ok("User updated successfully", entity_json(&user)?))
}

/// DELETE /users/{id}
pub async fn delete_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "user")?;
    data.coordinator.delete_user(id).await?;
    Ok(response::ok_empty("User deleted successfully"))
}
