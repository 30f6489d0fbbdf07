use chrono::{NaiveDate, Utc};
use entity::{
    deal::Priority,
    deal_task::{self, Status},
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    prelude::DateTimeWithTimeZone,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::{
    deals::owned_deal,
    error::{CrmError, CrmResult, validation},
};

const MAX_TITLE_LEN: usize = 200;

#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
}

/// Partial update. `Some(None)` clears an optional column.
#[derive(Clone, Debug, Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub due_date: Option<Option<NaiveDate>>,
}

fn clean_title(title: &str) -> CrmResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(validation("title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(validation(format!(
            "title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

/// Accepts the board spellings (todo/doing/done) and the workflow ones
/// (pending/in_progress/completed/skipped).
pub fn parse_status(raw: &str) -> CrmResult<Status> {
    Status::parse(raw).ok_or_else(|| {
        validation(format!(
            "status must be one of todo, in_progress, done or skipped, got {:?}",
            raw.trim()
        ))
    })
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn owned_task<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    task_id: Uuid,
) -> CrmResult<deal_task::Model> {
    deal_task::Entity::find_by_id(task_id)
        .filter(deal_task::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or(CrmError::NotFound("Task not found"))
}

/// Board order: column, then position within the column.
pub async fn list_deal_tasks(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_task::Model>> {
    owned_deal(db, user_id, deal_id).await?;
    let mut tasks = deal_task::Entity::find()
        .filter(deal_task::Column::DealId.eq(deal_id))
        .order_by_asc(deal_task::Column::SortOrder)
        .order_by_asc(deal_task::Column::CreatedAt)
        .all(db)
        .await?;
    // stable, so sort_order/created_at survive within a column
    tasks.sort_by_key(|task| task.status.column_rank());
    Ok(tasks)
}

async fn next_sort_order<C: ConnectionTrait>(
    conn: &C,
    deal_id: Uuid,
    status: Status,
) -> CrmResult<i32> {
    let last = deal_task::Entity::find()
        .filter(deal_task::Column::DealId.eq(deal_id))
        .filter(deal_task::Column::Status.eq(status))
        .order_by_desc(deal_task::Column::SortOrder)
        .limit(1)
        .one(conn)
        .await?;
    Ok(last.map(|task| task.sort_order + 1).unwrap_or(0))
}

/// Appends the task to the end of its status column.
pub async fn create_deal_task(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
    input: NewTask,
) -> CrmResult<deal_task::Model> {
    let title = clean_title(&input.title)?;
    let status = input.status.unwrap_or(Status::Todo);
    let span = info_span!("crm.createDealTask", %user_id, %deal_id, status = status.as_str());
    async move {
        let txn = db.begin().await?;
        owned_deal(&txn, user_id, deal_id).await?;
        let sort_order = next_sort_order(&txn, deal_id, status).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let created = deal_task::ActiveModel {
            id: Set(Uuid::new_v4()),
            deal_id: Set(deal_id),
            user_id: Set(user_id),
            title: Set(title),
            description: Set(clean_text(input.description)),
            status: Set(status),
            priority: Set(input.priority.unwrap_or(Priority::Medium)),
            due_date: Set(input.due_date),
            sort_order: Set(sort_order),
            completed_at: Set(status.is_finished().then_some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok::<_, CrmError>(created)
    }
    .instrument(span)
    .await
}

pub async fn update_deal_task(
    db: &DatabaseConnection,
    user_id: Uuid,
    task_id: Uuid,
    changes: TaskChanges,
) -> CrmResult<deal_task::Model> {
    let title = changes.title.as_deref().map(clean_title).transpose()?;
    let existing = owned_task(db, user_id, task_id).await?;
    let mut active: deal_task::ActiveModel = existing.into();
    if let Some(title) = title {
        active.title = Set(title);
    }
    if let Some(description) = changes.description {
        active.description = Set(clean_text(description));
    }
    if let Some(priority) = changes.priority {
        active.priority = Set(priority);
    }
    if let Some(due_date) = changes.due_date {
        active.due_date = Set(due_date);
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active
        .update(db)
        .instrument(info_span!("crm.updateDealTask", %user_id, %task_id))
        .await?;
    Ok(updated)
}

/// Moves a task to `status` at `position` (clamped to the column length) and
/// renumbers the affected columns from zero.
pub async fn move_deal_task(
    db: &DatabaseConnection,
    user_id: Uuid,
    task_id: Uuid,
    status: Status,
    position: Option<i32>,
) -> CrmResult<deal_task::Model> {
    if position.is_some_and(|p| p < 0) {
        return Err(validation("sortOrder must be non-negative"));
    }
    let span = info_span!("crm.moveDealTask", %user_id, %task_id, to = status.as_str());
    async move {
        let txn = db.begin().await?;
        let task = owned_task(&txn, user_id, task_id).await?;
        let from_status = task.status;
        let now: DateTimeWithTimeZone = Utc::now().into();

        let mut column: Vec<deal_task::Model> = deal_task::Entity::find()
            .filter(deal_task::Column::DealId.eq(task.deal_id))
            .filter(deal_task::Column::Status.eq(status))
            .filter(deal_task::Column::Id.ne(task_id))
            .order_by_asc(deal_task::Column::SortOrder)
            .order_by_asc(deal_task::Column::CreatedAt)
            .all(&txn)
            .await?;
        let index = position
            .map(|p| (p as usize).min(column.len()))
            .unwrap_or(column.len());

        let completed_at = match (status.is_finished(), task.completed_at) {
            (true, Some(existing)) if from_status.is_finished() => Some(existing),
            (true, _) => Some(now),
            (false, _) => None,
        };
        let mut moved: deal_task::ActiveModel = task.into();
        moved.status = Set(status);
        moved.completed_at = Set(completed_at);
        moved.updated_at = Set(now);
        moved.sort_order = Set(index as i32);
        let moved = moved.update(&txn).await?;

        column.insert(index, moved.clone());
        renumber(&txn, &column, task_id, now).await?;

        if from_status != status {
            let source: Vec<deal_task::Model> = deal_task::Entity::find()
                .filter(deal_task::Column::DealId.eq(moved.deal_id))
                .filter(deal_task::Column::Status.eq(from_status))
                .order_by_asc(deal_task::Column::SortOrder)
                .order_by_asc(deal_task::Column::CreatedAt)
                .all(&txn)
                .await?;
            renumber(&txn, &source, task_id, now).await?;
        }
        txn.commit().await?;
        Ok::<_, CrmError>(moved)
    }
    .instrument(span)
    .await
}

async fn renumber<C: ConnectionTrait>(
    conn: &C,
    ordered: &[deal_task::Model],
    skip: Uuid,
    now: DateTimeWithTimeZone,
) -> CrmResult<()> {
    for (index, task) in ordered.iter().enumerate() {
        let index = index as i32;
        if task.id == skip || task.sort_order == index {
            continue;
        }
        let mut active: deal_task::ActiveModel = task.clone().into();
        active.sort_order = Set(index);
        active.updated_at = Set(now);
        active.update(conn).await?;
    }
    Ok(())
}

pub async fn delete_deal_task(
    db: &DatabaseConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> CrmResult<bool> {
    let result = deal_task::Entity::delete_many()
        .filter(deal_task::Column::Id.eq(task_id))
        .filter(deal_task::Column::UserId.eq(user_id))
        .exec(db)
        .instrument(info_span!("crm.deleteDealTask", %user_id, %task_id))
        .await?;
    Ok(result.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_trimmed_and_bounded() {
        assert_eq!(clean_title("  Call broker ").unwrap(), "Call broker");
        assert!(clean_title("   ").is_err());
        assert!(clean_title(&"x".repeat(MAX_TITLE_LEN + 1)).is_err());
        assert!(clean_title(&"x".repeat(MAX_TITLE_LEN)).is_ok());
    }
}
