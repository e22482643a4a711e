use crate::auth_utils::AuthenticatedUser;
use crate::db::DbPool;
use crate::error_handler::ServiceError;
use crate::handlers::membership::{
    attach_tasks, dedup_preserving_order, detach_tasks, ensure_requested_due_within,
    member_task_ids, member_tasks, removed_ids, task_ids_by_project,
};
use crate::models::{
    non_blank, CreateProjectPayload, NewProject, Project, ProjectApiResponse, Task,
    TaskApiResponse, UpdateProjectChangeset, UpdateProjectPayload,
};
use crate::schema::{projects, tasks};
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use uuid::Uuid;

/// Merges an update payload into the stored project. Omitted fields keep
/// their current value; an explicit null clears the optional ones. The name
/// is required and is never cleared.
pub fn merge_project_changes(
    current: &Project,
    payload: &UpdateProjectPayload,
) -> UpdateProjectChangeset {
    UpdateProjectChangeset {
        name: non_blank(payload.name.clone()).unwrap_or_else(|| current.name.clone()),
        description: match &payload.description {
            Some(description) => non_blank(description.clone()),
            None => current.description.clone(),
        },
        status: payload
            .status
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| current.status.clone()),
        area_of_responsibility: match &payload.area_of_responsibility {
            Some(area) => non_blank(area.clone()),
            None => current.area_of_responsibility.clone(),
        },
        due_date: payload.due_date.unwrap_or(current.due_date),
        updated_at: Utc::now().naive_utc(),
    }
}

// Le projet existe-t-il, et appartient-il à l'appelant ?
async fn owned_project(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
    owner_id: Uuid,
) -> Result<Project, ServiceError> {
    let project = projects::table
        .find(project_id)
        .select(Project::as_select())
        .first::<Project>(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Project not found".to_string()))?;

    if project.user_id != owner_id {
        log::warn!(
            "User {} attempted to modify project {} owned by {}",
            owner_id,
            project_id,
            project.user_id
        );
        return Err(ServiceError::Unauthorized(
            "Unauthorized: project belongs to another user.".to_string(),
        ));
    }
    Ok(project)
}

#[post("")]
pub async fn create_project_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    payload: web::Json<CreateProjectPayload>,
) -> Result<HttpResponse, ServiceError> {
    let payload = payload.into_inner();
    let name = non_blank(payload.name)
        .ok_or_else(|| ServiceError::BadRequest("Name is required".to_string()))?;

    let new_project_data = NewProject {
        user_id: authenticated_user.id,
        name,
        description: non_blank(payload.description),
        status: payload.status.unwrap_or_default().as_str().to_string(),
        area_of_responsibility: non_blank(payload.area_of_responsibility),
        due_date: payload.due_date,
    };

    let requested = dedup_preserving_order(&payload.tasks.unwrap_or_default());

    let mut conn = pool.get().await?;

    ensure_requested_due_within(
        &mut conn,
        authenticated_user.id,
        &requested,
        new_project_data.due_date,
    )
    .await?;

    let project = diesel::insert_into(projects::table)
        .values(&new_project_data)
        .returning(Project::as_returning())
        .get_result::<Project>(&mut conn)
        .await?;

    if !requested.is_empty() {
        // Un rattachement vole la tâche à son projet précédent : project_id est unique par tâche.
        attach_tasks(&mut conn, &project, &requested, project.created_at).await?;
    }

    let member_ids = member_task_ids(&mut conn, project.id).await?;
    log::info!(
        "Project {} created by {} with {} task(s)",
        project.id,
        authenticated_user.username,
        member_ids.len()
    );

    Ok(HttpResponse::Created().json(json!({
        "message": "Project created",
        "project": ProjectApiResponse::with_tasks(project, member_ids)
    })))
}

#[get("")]
pub async fn list_projects_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;

    let mut conn = pool.get().await?;

    let project_list = projects::table
        .filter(projects::user_id.eq(user_uuid))
        .order(projects::created_at.asc())
        .select(Project::as_select())
        .load::<Project>(&mut conn)
        .await?;

    if project_list.is_empty() {
        return Err(ServiceError::NotFound("There are no projects".to_string()));
    }

    let member_list = tasks::table
        .filter(tasks::user_id.eq(user_uuid))
        .filter(tasks::project_id.is_not_null())
        .select(Task::as_select())
        .load::<Task>(&mut conn)
        .await?;
    let mut ids_by_project = task_ids_by_project(&member_list);

    let response: Vec<ProjectApiResponse> = project_list
        .into_iter()
        .map(|project| {
            let member_ids = ids_by_project.remove(&project.id).unwrap_or_default();
            ProjectApiResponse::with_tasks(project, member_ids)
        })
        .collect();

    Ok(HttpResponse::Ok().json(response))
}

#[get("/{project_id_path}")]
pub async fn get_project_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    project_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_uuid = authenticated_user.id;
    let project_to_find_id = project_id_path.into_inner();

    let mut conn = pool.get().await?;

    let project = projects::table
        .filter(projects::user_id.eq(user_uuid))
        .filter(projects::id.eq(project_to_find_id))
        .select(Project::as_select())
        .first::<Project>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("Project not found".to_string()))?;

    let members: Vec<TaskApiResponse> = member_tasks(&mut conn, project.id)
        .await?
        .into_iter()
        .map(TaskApiResponse::from)
        .collect();

    Ok(HttpResponse::Ok().json(ProjectApiResponse::with_tasks(project, members)))
}

#[put("/{project_id_path}")]
pub async fn update_project_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    project_id_path: web::Path<Uuid>,
    payload: web::Json<UpdateProjectPayload>,
) -> Result<HttpResponse, ServiceError> {
    let project_to_update_id = project_id_path.into_inner();
    let payload = payload.into_inner();

    let mut conn = pool.get().await?;

    let current = owned_project(&mut conn, project_to_update_id, authenticated_user.id).await?;
    let project_changes = merge_project_changes(&current, &payload);

    // Sans liste `tasks`, le projet perd toutes ses tâches.
    let requested = dedup_preserving_order(payload.tasks.as_deref().unwrap_or_default());
    // Les tâches conservées figurent dans `requested` : elles sont vérifiées elles aussi.
    ensure_requested_due_within(
        &mut conn,
        current.user_id,
        &requested,
        project_changes.due_date,
    )
    .await?;

    let updated_project = diesel::update(projects::table.find(project_to_update_id))
        .set(&project_changes)
        .returning(Project::as_returning())
        .get_result::<Project>(&mut conn)
        .await?;

    let current_ids = member_task_ids(&mut conn, updated_project.id).await?;
    let dropped = removed_ids(&current_ids, &requested);

    detach_tasks(&mut conn, &dropped).await?;
    attach_tasks(&mut conn, &updated_project, &requested, updated_project.updated_at).await?;

    log::info!(
        "Project {} updated: {} task(s) detached, {} requested",
        updated_project.id,
        dropped.len(),
        requested.len()
    );

    // Relecture pour renvoyer l'état effectivement persisté.
    let reloaded = projects::table
        .find(updated_project.id)
        .select(Project::as_select())
        .first::<Project>(&mut conn)
        .await?;
    let members: Vec<TaskApiResponse> = member_tasks(&mut conn, reloaded.id)
        .await?
        .into_iter()
        .map(TaskApiResponse::from)
        .collect();

    Ok(HttpResponse::Ok().json(ProjectApiResponse::with_tasks(reloaded, members)))
}

#[delete("/{project_id_path}")]
pub async fn delete_project_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    project_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let project_to_delete_id = project_id_path.into_inner();

    let mut conn = pool.get().await?;

    owned_project(&mut conn, project_to_delete_id, authenticated_user.id).await?;

    // La clé étrangère fait déjà ON DELETE SET NULL ; on efface aussi la position.
    let released = diesel::update(tasks::table.filter(tasks::project_id.eq(project_to_delete_id)))
        .set((
            tasks::project_id.eq(None::<Uuid>),
            tasks::task_order.eq(None::<i32>),
            tasks::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .await?;

    diesel::delete(projects::table.find(project_to_delete_id))
        .execute(&mut conn)
        .await?;

    log::info!(
        "Project {} deleted, {} task(s) released",
        project_to_delete_id,
        released
    );

    Ok(HttpResponse::Ok().json(json!({ "message": "Project deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowStatus;
    use chrono::NaiveDate;

    fn stored_project() -> Project {
        let created = NaiveDate::from_ymd_opt(2025, 2, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        Project {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Move house".to_string(),
            description: Some("Before summer".to_string()),
            status: WorkflowStatus::Scheduled.as_str().to_string(),
            area_of_responsibility: Some("Home".to_string()),
            due_date: NaiveDate::from_ymd_opt(2025, 6, 1),
            created_at: created,
            updated_at: created,
        }
    }

    fn empty_update() -> UpdateProjectPayload {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn omitted_fields_keep_current_values() {
        let current = stored_project();
        let changes = merge_project_changes(&current, &empty_update());
        assert_eq!(changes.name, "Move house");
        assert_eq!(changes.description.as_deref(), Some("Before summer"));
        assert_eq!(changes.status, "Scheduled");
        assert_eq!(changes.area_of_responsibility.as_deref(), Some("Home"));
        assert_eq!(changes.due_date, current.due_date);
    }

    #[test]
    fn provided_fields_replace_current_values() {
        let current = stored_project();
        let payload: UpdateProjectPayload = serde_json::from_str(
            r#"{"name":"Move flat","status":"Someday/Maybe","areaOfResponsibility":"Family","dueDate":"2025-09-30"}"#,
        )
        .unwrap();
        let changes = merge_project_changes(&current, &payload);
        assert_eq!(changes.name, "Move flat");
        assert_eq!(changes.status, "Someday/Maybe");
        assert_eq!(changes.area_of_responsibility.as_deref(), Some("Family"));
        assert_eq!(changes.due_date, NaiveDate::from_ymd_opt(2025, 9, 30));
    }

    #[test]
    fn explicit_null_clears_optional_fields() {
        let current = stored_project();
        let payload: UpdateProjectPayload = serde_json::from_str(
            r#"{"description":null,"areaOfResponsibility":null,"dueDate":null}"#,
        )
        .unwrap();
        let changes = merge_project_changes(&current, &payload);
        assert_eq!(changes.description, None);
        assert_eq!(changes.area_of_responsibility, None);
        assert_eq!(changes.due_date, None);
        assert_eq!(changes.name, "Move house");
    }

    #[test]
    fn blank_name_does_not_erase_project_name() {
        let current = stored_project();
        let payload: UpdateProjectPayload = serde_json::from_str(r#"{"name":"   "}"#).unwrap();
        assert_eq!(merge_project_changes(&current, &payload).name, "Move house");
    }
}
