use chrono::{DateTime, Utc};
use entity::deal_communication::{self, Channel, Direction};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::{
    deals::owned_deal,
    error::{CrmError, CrmResult, validation},
};

const MAX_SUBJECT_LEN: usize = 300;

#[derive(Clone, Debug)]
pub struct NewCommunication {
    pub channel: Channel,
    pub direction: Direction,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub counterparty: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    /// Parent communication on the same deal.
    pub reply_to: Option<Uuid>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn log_communication(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
    input: NewCommunication,
) -> CrmResult<deal_communication::Model> {
    let subject = trimmed(input.subject);
    let body = trimmed(input.body);
    if subject.is_none() && body.is_none() {
        return Err(validation("subject or body is required"));
    }
    if subject
        .as_ref()
        .is_some_and(|s| s.chars().count() > MAX_SUBJECT_LEN)
    {
        return Err(validation(format!(
            "subject cannot exceed {MAX_SUBJECT_LEN} characters"
        )));
    }
    let span = info_span!(
        "crm.logCommunication",
        %user_id,
        %deal_id,
        is_reply = input.reply_to.is_some()
    );
    async move {
        owned_deal(db, user_id, deal_id).await?;
        let id = Uuid::new_v4();
        let thread_id = match input.reply_to {
            Some(parent_id) => {
                let parent = deal_communication::Entity::find_by_id(parent_id)
                    .filter(deal_communication::Column::DealId.eq(deal_id))
                    .filter(deal_communication::Column::UserId.eq(user_id))
                    .one(db)
                    .await?
                    .ok_or(CrmError::NotFound("Parent communication not found"))?;
                Some(parent.thread_id.unwrap_or(parent.id))
            }
            None => None,
        };
        let now = Utc::now();
        let created = deal_communication::ActiveModel {
            id: Set(id),
            deal_id: Set(deal_id),
            user_id: Set(user_id),
            channel: Set(input.channel),
            direction: Set(input.direction),
            subject: Set(subject),
            body: Set(body),
            counterparty: Set(trimmed(input.counterparty)),
            thread_id: Set(thread_id),
            occurred_at: Set(input.occurred_at.unwrap_or(now).into()),
            created_at: Set(now.into()),
        }
        .insert(db)
        .await?;
        Ok::<_, CrmError>(created)
    }
    .instrument(span)
    .await
}

/// Newest first. With `thread_id`, only that thread including its root.
pub async fn list_communications(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
    thread_id: Option<Uuid>,
) -> CrmResult<Vec<deal_communication::Model>> {
    owned_deal(db, user_id, deal_id).await?;
    let mut query =
        deal_communication::Entity::find().filter(deal_communication::Column::DealId.eq(deal_id));
    if let Some(thread_id) = thread_id {
        query = query.filter(
            Condition::any()
                .add(deal_communication::Column::ThreadId.eq(thread_id))
                .add(deal_communication::Column::Id.eq(thread_id)),
        );
    }
    let rows = query
        .order_by_desc(deal_communication::Column::OccurredAt)
        .order_by_desc(deal_communication::Column::CreatedAt)
        .all(db)
        .await?;
    Ok(rows)
}

pub async fn delete_communication(
    db: &DatabaseConnection,
    user_id: Uuid,
    communication_id: Uuid,
) -> CrmResult<bool> {
    let result = deal_communication::Entity::delete_many()
        .filter(deal_communication::Column::Id.eq(communication_id))
        .filter(deal_communication::Column::UserId.eq(user_id))
        .exec(db)
        .instrument(info_span!("crm.deleteCommunication", %user_id, %communication_id))
        .await?;
    Ok(result.rows_affected > 0)
}
