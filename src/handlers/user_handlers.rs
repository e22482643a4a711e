use crate::auth_utils::{
    hash_password_blocking, issue_token, verify_password_blocking, AuthenticatedUser, Claims,
};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error_handler::ServiceError;
use crate::handlers::membership::task_ids_by_project;
use crate::models::{
    non_blank, LoginPayload, NewUser, Project, ProjectApiResponse, RegisterPayload, Task,
    TaskApiResponse, UpdateUserChangeset, UpdateUserPayload, User, UserApiResponse,
};
use crate::schema::{projects, tasks, users};
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Builds full profiles: each user with the projects and tasks they own.
pub fn assemble_profiles(
    user_list: Vec<User>,
    project_list: Vec<Project>,
    task_list: Vec<Task>,
) -> Vec<UserApiResponse> {
    let mut ids_by_project = task_ids_by_project(&task_list);

    let mut projects_by_owner: HashMap<Uuid, Vec<ProjectApiResponse>> = HashMap::new();
    for project in project_list {
        let member_ids = ids_by_project.remove(&project.id).unwrap_or_default();
        projects_by_owner
            .entry(project.user_id)
            .or_default()
            .push(ProjectApiResponse::with_tasks(project, member_ids));
    }

    let mut tasks_by_owner: HashMap<Uuid, Vec<TaskApiResponse>> = HashMap::new();
    for task in task_list {
        tasks_by_owner
            .entry(task.user_id)
            .or_default()
            .push(TaskApiResponse::from(task));
    }

    user_list
        .into_iter()
        .map(|user| {
            let user_id = user.id;
            let mut profile = UserApiResponse::from(user);
            profile.projects = projects_by_owner.remove(&user_id).unwrap_or_default();
            profile.tasks = tasks_by_owner.remove(&user_id).unwrap_or_default();
            profile
        })
        .collect()
}

async fn load_profiles(
    conn: &mut AsyncPgConnection,
    user_list: Vec<User>,
) -> Result<Vec<UserApiResponse>, ServiceError> {
    let owner_ids: Vec<Uuid> = user_list.iter().map(|u| u.id).collect();

    let project_list = projects::table
        .filter(projects::user_id.eq_any(owner_ids.clone()))
        .order(projects::created_at.asc())
        .select(Project::as_select())
        .load::<Project>(conn)
        .await?;

    let task_list = tasks::table
        .filter(tasks::user_id.eq_any(owner_ids))
        .order(tasks::created_at.asc())
        .select(Task::as_select())
        .load::<Task>(conn)
        .await?;

    Ok(assemble_profiles(user_list, project_list, task_list))
}

async fn username_taken_by_other(
    conn: &mut AsyncPgConnection,
    candidate: &str,
    except: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let owner = users::table
        .filter(users::username.eq(candidate))
        .select(users::id)
        .first::<Uuid>(conn)
        .await
        .optional()?;
    Ok(matches!(owner, Some(owner_id) if Some(owner_id) != except))
}

async fn email_taken_by_other(
    conn: &mut AsyncPgConnection,
    candidate: &str,
    except: Option<Uuid>,
) -> Result<bool, ServiceError> {
    let owner = users::table
        .filter(users::email.eq(candidate))
        .select(users::id)
        .first::<Uuid>(conn)
        .await
        .optional()?;
    Ok(matches!(owner, Some(owner_id) if Some(owner_id) != except))
}

#[post("/register")]
pub async fn register_user_handler(
    pool: web::Data<DbPool>,
    payload: web::Json<RegisterPayload>,
) -> Result<HttpResponse, ServiceError> {
    let payload = payload.into_inner();
    let (Some(username), Some(email), Some(password)) = (
        non_blank(payload.username),
        non_blank(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        log::warn!("Registration rejected: missing fields");
        return Err(ServiceError::BadRequest("All fields are required".to_string()));
    };

    let mut conn = pool.get().await?;

    if username_taken_by_other(&mut conn, &username, None).await? {
        return Err(ServiceError::Conflict("Username already taken".to_string()));
    }
    if email_taken_by_other(&mut conn, &email, None).await? {
        return Err(ServiceError::Conflict("Email already registered".to_string()));
    }

    let new_user = NewUser {
        username,
        email,
        password_hash: hash_password_blocking(password).await?,
    };

    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result::<User>(&mut conn)
        .await?;

    log::info!("User {} registered", user.id);

    Ok(HttpResponse::Created().json(json!({
        "message": "User created",
        "user": UserApiResponse::from(user)
    })))
}

#[post("/login")]
pub async fn login_user_handler(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    payload: web::Json<LoginPayload>,
) -> Result<HttpResponse, ServiceError> {
    let payload = payload.into_inner();
    let (Some(email), Some(password)) = (non_blank(payload.email), payload.password) else {
        return Err(ServiceError::BadRequest(
            "Email and password are required".to_string(),
        ));
    };

    let mut conn = pool.get().await?;

    let user = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

    if !verify_password_blocking(password, user.password_hash.clone()).await? {
        log::warn!("Failed login attempt for user {}", user.id);
        return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
    }

    let claims = Claims::new(user.id, user.email.clone(), config.token_ttl_days)?;
    let token = issue_token(&claims, &config.jwt_secret)?;

    Ok(HttpResponse::Ok().json(json!({ "token": token })))
}

#[get("")]
pub async fn list_users_handler(
    pool: web::Data<DbPool>,
    _authenticated_user: AuthenticatedUser,
) -> Result<HttpResponse, ServiceError> {
    let mut conn = pool.get().await?;

    let user_list = users::table
        .order(users::created_at.asc())
        .select(User::as_select())
        .load::<User>(&mut conn)
        .await?;

    let profiles = load_profiles(&mut conn, user_list).await?;

    Ok(HttpResponse::Ok().json(profiles))
}

#[get("/{user_id_path}")]
pub async fn get_user_handler(
    pool: web::Data<DbPool>,
    _authenticated_user: AuthenticatedUser,
    user_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_to_find_id = user_id_path.into_inner();

    let mut conn = pool.get().await?;

    let user = users::table
        .find(user_to_find_id)
        .select(User::as_select())
        .first::<User>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

    let profile = load_profiles(&mut conn, vec![user])
        .await?
        .pop()
        .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

    Ok(HttpResponse::Ok().json(profile))
}

#[put("/{user_id_path}")]
pub async fn update_user_handler(
    pool: web::Data<DbPool>,
    _authenticated_user: AuthenticatedUser,
    user_id_path: web::Path<Uuid>,
    payload: web::Json<UpdateUserPayload>,
) -> Result<HttpResponse, ServiceError> {
    let user_to_update_id = user_id_path.into_inner();
    let payload = payload.into_inner();

    let username = non_blank(payload.username);
    let email = non_blank(payload.email);

    let mut conn = pool.get().await?;

    if let Some(candidate) = &username {
        if username_taken_by_other(&mut conn, candidate, Some(user_to_update_id)).await? {
            return Err(ServiceError::Conflict("Username already taken.".to_string()));
        }
    }
    if let Some(candidate) = &email {
        if email_taken_by_other(&mut conn, candidate, Some(user_to_update_id)).await? {
            return Err(ServiceError::Conflict("Email already registered.".to_string()));
        }
    }

    let password_hash = match payload.password.filter(|p| !p.is_empty()) {
        Some(password) => Some(hash_password_blocking(password).await?),
        None => None,
    };

    let user_changes = UpdateUserChangeset {
        username,
        email,
        password_hash,
        updated_at: Some(Utc::now().naive_utc()),
    };

    let updated_user = diesel::update(users::table.find(user_to_update_id))
        .set(&user_changes)
        .returning(User::as_returning())
        .get_result::<User>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))?;

    let profile = load_profiles(&mut conn, vec![updated_user])
        .await?
        .pop()
        .ok_or_else(|| ServiceError::NotFound("User not found.".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "User updated",
        "user": profile
    })))
}

// Supprime uniquement l'utilisateur : ses projets et tâches restent en base.
#[delete("/{user_id_path}")]
pub async fn delete_user_handler(
    pool: web::Data<DbPool>,
    authenticated_user: AuthenticatedUser,
    user_id_path: web::Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let user_to_delete_id = user_id_path.into_inner();

    let mut conn = pool.get().await?;

    let num_deleted = diesel::delete(users::table.find(user_to_delete_id))
        .execute(&mut conn)
        .await?;

    if num_deleted > 0 {
        log::info!(
            "User {} deleted by {}",
            user_to_delete_id,
            authenticated_user.email
        );
        Ok(HttpResponse::Ok().json(json!({ "message": "User deleted successfully" })))
    } else {
        Err(ServiceError::NotFound("User not found.".to_string()))
    }
}
