// Appartenance tâche ↔ projet.
//
// tasks.project_id est l'unique source de vérité : la liste `tasks` d'un projet
// est dérivée par requête, et une tâche rattachée recopie le statut et l'aire de
// responsabilité de son projet.
use crate::error_handler::ServiceError;
use crate::models::{sort_by_position, Project, Task, TaskMembershipChangeset};
use crate::schema::tasks;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const DUE_DATE_AFTER_PROJECT: &str = "Task due date cannot be later than project due date.";

fn due_exceeds(task_due: Option<NaiveDate>, project_due: Option<NaiveDate>) -> bool {
    matches!((task_due, project_due), (Some(task_due), Some(project_due)) if task_due > project_due)
}

pub fn ensure_due_within_project(
    task_due: Option<NaiveDate>,
    project: &Project,
) -> Result<(), ServiceError> {
    if due_exceeds(task_due, project.due_date) {
        return Err(ServiceError::BadRequest(DUE_DATE_AFTER_PROJECT.to_string()));
    }
    Ok(())
}

/// Fails if any of `members` is due after `project_due`.
pub fn ensure_members_due_within(
    project_due: Option<NaiveDate>,
    members: &[Task],
) -> Result<(), ServiceError> {
    match members.iter().find(|t| due_exceeds(t.due_date, project_due)) {
        Some(late) => {
            log::warn!(
                "Task {} is due {:?}, after the project due date {:?}",
                late.id,
                late.due_date,
                project_due
            );
            Err(ServiceError::BadRequest(DUE_DATE_AFTER_PROJECT.to_string()))
        }
        None => Ok(()),
    }
}

/// Removes repeated ids while keeping the first occurrence's position.
pub fn dedup_preserving_order(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Ids present in `current` but absent from `requested`.
pub fn removed_ids(current: &[Uuid], requested: &[Uuid]) -> Vec<Uuid> {
    let keep: HashSet<&Uuid> = requested.iter().collect();
    current.iter().copied().filter(|id| !keep.contains(id)).collect()
}

/// Groups already-loaded tasks by project, each group in project order.
pub fn task_ids_by_project(task_list: &[Task]) -> HashMap<Uuid, Vec<Uuid>> {
    let mut grouped: HashMap<Uuid, Vec<Task>> = HashMap::new();
    for task in task_list {
        if let Some(project_id) = task.project_id {
            grouped.entry(project_id).or_default().push(task.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(project_id, mut members)| {
            sort_by_position(&mut members);
            (project_id, members.into_iter().map(|t| t.id).collect())
        })
        .collect()
}

pub async fn member_tasks(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
) -> Result<Vec<Task>, ServiceError> {
    let mut members = tasks::table
        .filter(tasks::project_id.eq(project_id))
        .order(tasks::created_at.asc())
        .select(Task::as_select())
        .load::<Task>(conn)
        .await?;
    sort_by_position(&mut members);
    Ok(members)
}

pub async fn member_task_ids(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
) -> Result<Vec<Uuid>, ServiceError> {
    Ok(member_tasks(conn, project_id)
        .await?
        .into_iter()
        .map(|t| t.id)
        .collect())
}

pub async fn next_position(
    conn: &mut AsyncPgConnection,
    project_id: Uuid,
) -> Result<i32, ServiceError> {
    let current_max = tasks::table
        .filter(tasks::project_id.eq(project_id))
        .select(diesel::dsl::max(tasks::task_order))
        .first::<Option<i32>>(conn)
        .await?;
    Ok(current_max.map_or(0, |max| max + 1))
}

/// Checks the owner's requested tasks against the due date the project will
/// have once written. Runs before any write so a rejected request changes nothing.
pub async fn ensure_requested_due_within(
    conn: &mut AsyncPgConnection,
    owner_id: Uuid,
    task_ids: &[Uuid],
    project_due: Option<NaiveDate>,
) -> Result<(), ServiceError> {
    if task_ids.is_empty() || project_due.is_none() {
        return Ok(());
    }
    let requested = tasks::table
        .filter(tasks::user_id.eq(owner_id))
        .filter(tasks::id.eq_any(task_ids.to_vec()))
        .select(Task::as_select())
        .load::<Task>(conn)
        .await?;
    ensure_members_due_within(project_due, &requested)
}

/// Attaches the owner's tasks to `project` in the given order. Ids that do not
/// name one of the owner's tasks are skipped. Due dates are checked beforehand
/// with `ensure_requested_due_within`.
pub async fn attach_tasks(
    conn: &mut AsyncPgConnection,
    project: &Project,
    task_ids: &[Uuid],
    now: NaiveDateTime,
) -> Result<usize, ServiceError> {
    let mut attached = 0;
    for (position, task_id) in task_ids.iter().copied().enumerate() {
        let changes = TaskMembershipChangeset::attached(project, position as i32, now);
        attached += diesel::update(
            tasks::table
                .filter(tasks::id.eq(task_id))
                .filter(tasks::user_id.eq(project.user_id)),
        )
        .set(&changes)
        .execute(conn)
        .await?;
    }
    if attached < task_ids.len() {
        log::warn!(
            "Project {}: {} of {} requested tasks were not found for its owner",
            project.id,
            task_ids.len() - attached,
            task_ids.len()
        );
    }
    Ok(attached)
}

pub async fn detach_tasks(
    conn: &mut AsyncPgConnection,
    task_ids: &[Uuid],
) -> Result<usize, ServiceError> {
    if task_ids.is_empty() {
        return Ok(0);
    }
    let detached = diesel::update(tasks::table.filter(tasks::id.eq_any(task_ids.to_vec())))
        .set(&TaskMembershipChangeset::detached(Utc::now().naive_utc()))
        .execute(conn)
        .await?;
    Ok(detached)
}
