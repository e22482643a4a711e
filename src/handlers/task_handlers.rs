use crate::auth_utils::AuthenticatedUser;
use crate::db::DbPool;
use crate::error_handler::ServiceError;
use crate::handlers::membership::{ensure_due_within_project, next_position};
use crate::models::{
    non_blank, CreateTaskPayload, NewTask, Project, Task, TaskApiResponse, TaskQueryParams,
    UpdateTaskChangeset, UpdateTaskPayload, WorkflowStatus,
};
use crate::schema::{projects, tasks};
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use uuid::Uuid;

/// Where a task sits after a create or update, with the fields it inherits.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub project_id: Option<Uuid>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub order: Option<i32>,
}

impl Placement {
    /// Places a task inside `project`, which dictates status and area.
    pub fn in_project(
        project: &Project,
        due_date: Option<NaiveDate>,
        order: Option<i32>,
    ) -> Result<Self, ServiceError> {
        ensure_due_within_project(due_date, project)?;
        Ok(Placement {
            project_id: Some(project.id),
            status: project.status.clone(),
            area_of_responsibility: project.area_of_responsibility.clone(),
            order,
        })
    }

    pub fn standalone(status: String, area_of_responsibility: Option<String>) -> Self {
        Placement {
            project_id: None,
            status,
            area_of_responsibility,
            order: None,
        }
    }
}

pub fn validate_priority(priority: i32) -> Result<i32, ServiceError> {
    if (1..=5).contains(&priority) {
        Ok(priority)
    } else {
        Err(ServiceError::BadRequest(
            "Priority must be an integer between 1 and 5.".to_string(),
        ))
    }
}

async fn find_owned_project(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    owner_id: Uuid,
) -> Result<Project, ServiceError> {
    projects::table
        .filter(projects::id.eq(project_id))
        .filter(projects::user_id.eq(owner_id))
        .select(Project::as_select())
        .first::<Project>(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Project not found".to_string()))
}

async fn title_taken(
    conn: &mut AsyncPgConnection,
    owner_id: Uuid,
    candidate: &str,
    except: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let mut query = tasks::table
        .filter(tasks::user_id.eq(owner_id))
        .filter(tasks::title.eq(candidate))
        .into_boxed();
    if let Some(task_id) = except {
        query = query.filter(tasks::id.ne(task_id));
    }
    let existing = query
        .select(tasks::id)
        .first::<Uuid>(conn)
        .await
        .optional()?;
    Ok(existing.is_some())
}

#[post("")]
pub async fn create_task_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    payload: web::Json<CreateTaskPayload>,
) -> Result<HttpResponse, ServiceError> {
    let payload = payload.into_inner();
    let user_uuid = authenticated_user.id;

    let (Some(title), Some(description)) = (non_blank(payload.title), non_blank(payload.description))
    else {
        return Err(ServiceError::BadRequest(
            "Title and description are required.".to_string(),
        ));
    };
    let priority = payload
        .priority
        .ok_or_else(|| ServiceError::BadRequest("Priority is required.".to_string()))
        .and_then(validate_priority)?;

    let mut conn = pool.get().await?;

    if title_taken(&mut conn, user_uuid, &title, None).await? {
        return Err(ServiceError::Conflict(
            "A task with this title already exists.".to_string(),
        ));
    }

    // Les champs hérités du projet sont fixés avant la construction de la tâche.
    let placement = match payload.project {
        Some(project_id) => {
            let project = find_owned_project(&mut conn, project_id, user_uuid).await?;
            let position = next_position(&mut conn, project.id).await?;
            Placement::in_project(&project, payload.due_date, Some(position))?
        }
        None => Placement::standalone(
            payload.status.unwrap_or_default().as_str().to_string(),
            non_blank(payload.area_of_responsibility),
        ),
    };

    let new_task_data = NewTask {
        user_id: user_uuid,
        project_id: placement.project_id,
        title,
        description,
        completed: payload.completed.unwrap_or(false),
        frequency: payload.frequency.map(|f| f.as_str().to_string()),
        status: placement.status,
        area_of_responsibility: placement.area_of_responsibility,
        due_date: payload.due_date,
        priority,
        order: placement.order,
    };

    let task = diesel::insert_into(tasks::table)
        .values(&new_task_data)
        .returning(Task::as_returning())
        .get_result::<Task>(&mut conn)
        .await?;

    log::info!("Task {} created by user {}", task.id, user_uuid);

    Ok(HttpResponse::Created().json(json!({
        "message": "Task created",
        "task": TaskApiResponse::from(task)
    })))
}

#[get("")]
pub async fn list_tasks_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    query: web::Query<TaskQueryParams>,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;

    let mut conn = pool.get().await?;

    let mut query_builder = tasks::table
        .filter(tasks::user_id.eq(user_uuid))
        .into_boxed();

    if let Some(project_uuid) = query.project {
        query_builder = query_builder.filter(tasks::project_id.eq(project_uuid));
    }
    if let Some(task_status) = query.status {
        query_builder = query_builder.filter(tasks::status.eq(task_status.as_str()));
    }
    if let Some(is_completed) = query.completed {
        query_builder = query_builder.filter(tasks::completed.eq(is_completed));
    }

    let task_list = query_builder
        .order(tasks::created_at.asc())
        .select(Task::as_select())
        .load::<Task>(&mut conn)
        .await?;

    if task_list.is_empty() {
        return Err(ServiceError::NotFound("There are no tasks".to_string()));
    }

    let response: Vec<TaskApiResponse> = task_list.into_iter().map(TaskApiResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

#[get("/{task_id_path}")]
pub async fn get_task_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    task_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;
    let task_to_find_id = task_id_path.into_inner();

    let mut conn = pool.get().await?;

    let task = tasks::table
        .filter(tasks::user_id.eq(user_uuid))
        .filter(tasks::id.eq(task_to_find_id))
        .select(Task::as_select())
        .first::<Task>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Task not found".to_string()))?;

    Ok(HttpResponse::Ok().json(TaskApiResponse::from(task)))
}

#[put("/{task_id_path}")]
pub async fn update_task_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    task_id_path: web::Path<Uuid>,
    payload: web::Json<UpdateTaskPayload>,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;
    let task_to_update_id = task_id_path.into_inner();
    let payload = payload.into_inner();

    let mut conn = pool.get().await?;

    let task = tasks::table
        .filter(tasks::user_id.eq(user_uuid))
        .filter(tasks::id.eq(task_to_update_id))
        .select(Task::as_select())
        .first::<Task>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Task not found".to_string()))?;

    let title = match non_blank(payload.title) {
        Some(candidate) => {
            if title_taken(&mut conn, user_uuid, &candidate, Some(task.id)).await? {
                return Err(ServiceError::Conflict(
                    "A task with this title already exists.".to_string(),
                ));
            }
            candidate
        }
        None => task.title.clone(),
    };
    let priority = match payload.priority {
        Some(value) => validate_priority(value)?,
        None => task.priority,
    };
    let due_date = payload.due_date.unwrap_or(task.due_date);

    let target_project = payload.project.unwrap_or(task.project_id);
    let placement = match target_project {
        Some(project_id) => {
            let project = find_owned_project(&mut conn, project_id, user_uuid).await?;
            let order = if task.project_id == Some(project.id) {
                task.order
            } else {
                Some(next_position(&mut conn, project.id).await?)
            };
            Placement::in_project(&project, due_date, order)?
        }
        // Retirée explicitement de son projet : retour dans la boîte de réception.
        None if task.project_id.is_some() => {
            Placement::standalone(WorkflowStatus::MainInbox.as_str().to_string(), None)
        }
        None => Placement::standalone(
            payload
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| task.status.clone()),
            match payload.area_of_responsibility {
                Some(area) => non_blank(area),
                None => task.area_of_responsibility.clone(),
            },
        ),
    };

    let task_changes = UpdateTaskChangeset {
        project_id: placement.project_id,
        title,
        description: non_blank(payload.description).unwrap_or_else(|| task.description.clone()),
        completed: payload.completed.unwrap_or(task.completed),
        frequency: match payload.frequency {
            Some(frequency) => frequency.map(|f| f.as_str().to_string()),
            None => task.frequency.clone(),
        },
        status: placement.status,
        area_of_responsibility: placement.area_of_responsibility,
        due_date,
        priority,
        order: placement.order,
        updated_at: Utc::now().naive_utc(),
    };

    let updated_task = diesel::update(
        tasks::table
            .filter(tasks::id.eq(task_to_update_id))
            .filter(tasks::user_id.eq(user_uuid)),
    )
    .set(&task_changes)
    .returning(Task::as_returning())
    .get_result::<Task>(&mut conn)
    .await?;

    if task.project_id != updated_task.project_id {
        log::info!(
            "Task {} moved from project {:?} to {:?}",
            updated_task.id,
            task.project_id,
            updated_task.project_id
        );
    }

    Ok(HttpResponse::Accepted().json(TaskApiResponse::from(updated_task)))
}

#[delete("/{task_id_path}")]
pub async fn delete_task_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    task_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;
    let task_to_delete_id = task_id_path.into_inner();

    let mut conn = pool.get().await?;

    // La liste des tâches du projet est dérivée de tasks.project_id : supprimer la ligne suffit.
    let num_deleted = diesel::delete(
        tasks::table
            .filter(tasks::user_id.eq(user_uuid))
            .filter(tasks::id.eq(task_to_delete_id)),
    )
    .execute(&mut conn)
    .await?;

    if num_deleted > 0 {
        Ok(HttpResponse::Ok().json(json!({ "message": "Task deleted successfully" })))
    } else {
        Err(ServiceError::NotFound("Task not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with(status: WorkflowStatus, area: Option<&str>, due: Option<NaiveDate>) -> Project {
        let created = NaiveDate::from_ymd_opt(2025, 1, 15)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap();
        Project {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "P1".to_string(),
            description: None,
            status: status.as_str().to_string(),
            area_of_responsibility: area.map(str::to_string),
            due_date: due,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn task_in_project_inherits_status_and_area() {
        let project = project_with(WorkflowStatus::WaitingFor, Some("Work"), None);
        let placement = Placement::in_project(&project, None, Some(4)).unwrap();
        assert_eq!(placement.project_id, Some(project.id));
        assert_eq!(placement.status, "Waiting For");
        assert_eq!(placement.area_of_responsibility.as_deref(), Some("Work"));
        assert_eq!(placement.order, Some(4));
    }

    #[test]
    fn task_due_after_project_cannot_be_placed() {
        let project = project_with(
            WorkflowStatus::MainInbox,
            None,
            NaiveDate::from_ymd_opt(2025, 6, 1),
        );
        let result = Placement::in_project(&project, NaiveDate::from_ymd_opt(2025, 7, 1), Some(0));
        assert_eq!(
            result,
            Err(ServiceError::BadRequest(
                "Task due date cannot be later than project due date.".to_string()
            ))
        );
    }

    #[test]
    fn standalone_task_has_no_position() {
        let placement = Placement::standalone("Scheduled".to_string(), Some("Health".to_string()));
        assert_eq!(placement.project_id, None);
        assert_eq!(placement.order, None);
        assert_eq!(placement.status, "Scheduled");
    }

    #[test]
    fn priority_must_stay_between_one_and_five() {
        assert_eq!(validate_priority(1), Ok(1));
        assert_eq!(validate_priority(5), Ok(5));
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(6).is_err());
    }
}
