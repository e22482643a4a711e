use crate::schema::{projects, tasks, users};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// --- Helpers de désérialisation ---

// Distingue un champ absent (None) d'un champ explicitement null (Some(None)).
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims a text field and treats blank input as missing.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// --- Énumérations GTD ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowStatus {
    #[default]
    #[serde(rename = "Main Inbox")]
    MainInbox,
    #[serde(rename = "Waiting For")]
    WaitingFor,
    #[serde(rename = "Scheduled")]
    Scheduled,
    #[serde(rename = "Someday/Maybe")]
    SomedayMaybe,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::MainInbox => "Main Inbox",
            WorkflowStatus::WaitingFor => "Waiting For",
            WorkflowStatus::Scheduled => "Scheduled",
            WorkflowStatus::SomedayMaybe => "Someday/Maybe",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
            Frequency::Yearly => "Yearly",
        }
    }
}

// --- User Model ---
// Pas de Serialize ici : le hash du mot de passe ne doit jamais sortir de l'API.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = users)]
pub struct UpdateUserChangeset {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserApiResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub projects: Vec<ProjectApiResponse>,
    pub tasks: Vec<TaskApiResponse>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserApiResponse {
    fn from(user: User) -> Self {
        UserApiResponse {
            id: user.id,
            username: user.username,
            email: user.email,
            projects: Vec::new(),
            tasks: Vec::new(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

// --- Project Model ---
#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = projects)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
}

// Le handler fusionne déjà les valeurs courantes : chaque champ est écrit tel quel.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = projects)]
#[diesel(treat_none_as_null = true)]
pub struct UpdateProjectChangeset {
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub updated_at: NaiveDateTime,
}

/// Project as sent over the wire. `T` is the task representation: ids in
/// listings, full tasks when a single project is read.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectApiResponse<T = Uuid> {
    pub id: Uuid,
    pub user: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tasks: Vec<T>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl<T> ProjectApiResponse<T> {
    pub fn with_tasks(project: Project, tasks: Vec<T>) -> Self {
        ProjectApiResponse {
            id: project.id,
            user: project.user_id,
            name: project.name,
            description: project.description,
            tasks,
            status: project.status,
            area_of_responsibility: project.area_of_responsibility,
            due_date: project.due_date,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

// --- Task Model ---
#[derive(
    Queryable, Selectable, Identifiable, Associations, Debug, Clone, PartialEq,
)]
#[diesel(table_name = tasks)]
#[diesel(belongs_to(Project, foreign_key = project_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub frequency: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: i32,
    #[diesel(column_name = task_order)]
    pub order: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Sorts tasks the way a project lists them: by position, unpositioned last,
/// then by creation time.
pub fn sort_by_position(task_list: &mut [Task]) {
    task_list.sort_by_key(|task| (task.order.is_none(), task.order, task.created_at));
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskApiResponse {
    pub id: Uuid,
    pub user: Uuid,
    pub project: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub frequency: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: i32,
    pub order: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Task> for TaskApiResponse {
    fn from(task_db: Task) -> Self {
        TaskApiResponse {
            id: task_db.id,
            user: task_db.user_id,
            project: task_db.project_id,
            title: task_db.title,
            description: task_db.description,
            completed: task_db.completed,
            frequency: task_db.frequency,
            status: task_db.status,
            area_of_responsibility: task_db.area_of_responsibility,
            due_date: task_db.due_date,
            priority: task_db.priority,
            order: task_db.order,
            created_at: task_db.created_at,
            updated_at: task_db.updated_at,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub frequency: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: i32,
    #[diesel(column_name = task_order)]
    pub order: Option<i32>,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct UpdateTaskChangeset {
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub frequency: Option<String>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: i32,
    #[diesel(column_name = task_order)]
    pub order: Option<i32>,
    pub updated_at: NaiveDateTime,
}

// Rattachement / détachement d'une tâche : appartenance et champs hérités changent ensemble.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct TaskMembershipChangeset {
    pub project_id: Option<Uuid>,
    pub status: String,
    pub area_of_responsibility: Option<String>,
    #[diesel(column_name = task_order)]
    pub order: Option<i32>,
    pub updated_at: NaiveDateTime,
}

impl TaskMembershipChangeset {
    pub fn attached(project: &Project, position: i32, now: NaiveDateTime) -> Self {
        TaskMembershipChangeset {
            project_id: Some(project.id),
            status: project.status.clone(),
            area_of_responsibility: project.area_of_responsibility.clone(),
            order: Some(position),
            updated_at: now,
        }
    }

    pub fn detached(now: NaiveDateTime) -> Self {
        TaskMembershipChangeset {
            project_id: None,
            status: WorkflowStatus::MainInbox.as_str().to_string(),
            area_of_responsibility: None,
            order: None,
            updated_at: now,
        }
    }
}

// --- PAYLOAD DTOs ---
// Les champs obligatoires restent optionnels ici : leur absence est signalée
// par le handler avec un message métier plutôt qu'une erreur serde.

#[derive(Deserialize, Debug)]
pub struct RegisterPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct LoginPayload {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UpdateUserPayload {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tasks: Option<Vec<Uuid>>,
    pub status: Option<WorkflowStatus>,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectPayload {
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub description: Option<Option<String>>,
    pub tasks: Option<Vec<Uuid>>,
    pub status: Option<WorkflowStatus>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub area_of_responsibility: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub due_date: Option<Option<NaiveDate>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    pub project: Option<Uuid>,
    pub frequency: Option<Frequency>,
    pub status: Option<WorkflowStatus>,
    pub area_of_responsibility: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<i32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub completed: Option<bool>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub project: Option<Option<Uuid>>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub frequency: Option<Option<Frequency>>,
    pub status: Option<WorkflowStatus>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub area_of_responsibility: Option<Option<String>>,
    #[serde(deserialize_with = "deserialize_present", default)]
    pub due_date: Option<Option<NaiveDate>>,
    pub priority: Option<i32>,
}

#[derive(Deserialize, Debug)]
pub struct TaskQueryParams {
    pub project: Option<Uuid>,
    pub status: Option<WorkflowStatus>,
    pub completed: Option<bool>,
}
