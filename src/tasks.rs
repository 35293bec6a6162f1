use actix_web::{web, HttpResponse};
use log::debug;
use mongodb::bson::oid::ObjectId;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::integrity::TASK_NOT_FOUND;
use crate::models::{Collection, TaskPayload};
use crate::query::{ListParams, ListQuery};
use crate::response::{self, document_to_json, entity_json};

pub(crate) fn parse_id(raw: &str, what: &str) -> ApiResult<ObjectId> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::bad_request(format!("Invalid {} id", what)))
}

/// GET /tasks
pub async fn list_tasks(
    data: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> ApiResult<HttpResponse> {
    let query = ListQuery::parse(&params, Collection::Tasks, Some(data.config.task_list_limit))?;
    debug!("Listing tasks with {:?}", query);

    if query.count {
        let count = data.store.count(Collection::Tasks, &query).await?;
        return Ok(response::ok("task count retrieved successfully", count));
    }

    let tasks: Vec<_> = data
        .store
        .find(Collection::Tasks, &query)
        .await?
        .into_iter()
        .map(document_to_json)
        .collect();
    Ok(response::ok("tasks retrieved successfully", tasks))
}

/// GET /tasks/{id}
pub async fn get_task(
    data: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<ListParams>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "task")?;
    let query = ListQuery::parse(&params, Collection::Tasks, None)?.with_id(id);

    if query.count {
        let count = data.store.count(Collection::Tasks, &query).await?;
        return Ok(response::ok("task count retrieved successfully", count));
    }

    match data.store.find(Collection::Tasks, &query).await?.into_iter().next() {
        Some(task) => Ok(response::ok("task retrieved successfully", document_to_json(task))),
        None => Err(ApiError::not_found(TASK_NOT_FOUND)),
    }
}

/// POST /tasks
pub async fn create_task(
    data: web::Data<AppState>,
    payload: web::Json<TaskPayload>,
) -> ApiResult<HttpResponse> {
    let task = data.coordinator.create_task(payload.into_inner()).await?;
    Ok(response::created("New task created successfully", entity_json(&task)?))
}

/// PUT /tasks/{id}
pub async fn update_task(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<TaskPayload>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "task")?;
    let task = data.coordinator.update_task(id, payload.into_inner()).await?;
    Ok(response::ok("task updated successfully", entity_json(&task)?))
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = parse_id(&path, "task")?;
    data.coordinator.delete_task(id).await?;
    Ok(response::ok_empty("task deleted successfully"))
}
