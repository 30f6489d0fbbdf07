use chrono::Utc;
use entity::{
    deal, deal_communication, deal_document, deal_stage_history, deal_task,
    deal::{Priority, Stage},
};
use platform_storage::ObjectStore;
use products_listings::{Listing, ListingSource};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, SqlErr, TransactionTrait,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Func, LikeExpr},
};
use serde_json::{Value, json};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::{
    error::{CrmError, CrmResult, validation},
    fields::{DealView, JsonObject, dollars_to_cents, parse_deal_input},
};

pub const MAX_DEALS_PAGE: u64 = 100;
const DEFAULT_DEALS_PAGE: u64 = 50;

/// Result of a create or update: the stored deal plus the input keys the
/// adapter could not map.
#[derive(Clone, Debug)]
pub struct DealPayload {
    pub deal: DealView,
    pub ignored_fields: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DealFilter {
    pub stage: Option<Stage>,
    pub priority: Option<Priority>,
    pub q: Option<String>,
    pub first: Option<u64>,
    pub offset: u64,
}

/// Loads a deal owned by `user_id`. Someone else's deal is reported as missing.
pub(crate) async fn owned_deal<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<deal::Model> {
    deal::Entity::find_by_id(deal_id)
        .filter(deal::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or(CrmError::NotFound("Deal not found"))
}

/// A user tracks each listing at most once; `except` skips the deal being edited.
async fn ensure_listing_untracked<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    listing_id: &str,
    except: Option<Uuid>,
) -> CrmResult<()> {
    let mut query = deal::Entity::find()
        .filter(deal::Column::UserId.eq(user_id))
        .filter(deal::Column::ListingId.eq(listing_id));
    if let Some(deal_id) = except {
        query = query.filter(deal::Column::Id.ne(deal_id));
    }
    if query.count(conn).await? > 0 {
        return Err(listing_conflict());
    }
    Ok(())
}

fn listing_conflict() -> CrmError {
    CrmError::Conflict("Listing is already in the pipeline".into())
}

// The only unique index on deals besides the key is (user_id, listing_id).
fn deal_write_error(err: DbErr) -> CrmError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => listing_conflict(),
        _ => CrmError::Database(err),
    }
}

/// `%term%` in lower case with LIKE wildcards escaped, or `None` for a blank term.
pub(crate) fn like_pattern(term: Option<&str>) -> Option<String> {
    let term = term?.trim();
    if term.is_empty() {
        return None;
    }
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

/// Case-insensitive match of `pattern` against the deal's searchable text.
pub(crate) fn deal_text_condition(pattern: &str) -> Condition {
    [
        deal::Column::BusinessName,
        deal::Column::Industry,
        deal::Column::Location,
        deal::Column::Notes,
    ]
    .into_iter()
    .fold(Condition::any(), |cond, column| {
        cond.add(
            Expr::expr(Func::lower(Expr::col((deal::Entity, column))))
                .like(LikeExpr::new(pattern).escape('\\')),
        )
    })
}

fn stage_history_row(
    deal_id: Uuid,
    from_stage: Option<Stage>,
    to_stage: Stage,
    note: Option<String>,
    changed_by: Uuid,
    changed_at: DateTimeWithTimeZone,
) -> deal_stage_history::ActiveModel {
    deal_stage_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(deal_id),
        from_stage: Set(from_stage),
        to_stage: Set(to_stage),
        changed_at: Set(changed_at),
        note: Set(note),
        changed_by: Set(Some(changed_by)),
    }
}

pub async fn create_deal(
    db: &DatabaseConnection,
    user_id: Uuid,
    input: &JsonObject,
) -> CrmResult<DealPayload> {
    let changes = parse_deal_input(input)?;
    let Some(business_name) = changes.business_name.clone() else {
        return Err(validation("business_name is required"));
    };
    let span = info_span!("crm.createDeal", %user_id, ignored = changes.ignored_fields.len());
    async move {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let stage = changes.stage.unwrap_or(Stage::Prospecting);
        let mut active = deal::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            business_name: Set(business_name),
            stage: Set(stage),
            priority: Set(Priority::Medium),
            custom_fields: Set(json!({})),
            stage_changed_at: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        changes.apply(&mut active, &json!({}));

        let txn = db.begin().await?;
        if let Some(Some(listing_id)) = &changes.listing_id {
            ensure_listing_untracked(&txn, user_id, listing_id, None).await?;
        }
        let created = active.insert(&txn).await.map_err(deal_write_error)?;
        deal_stage_history::Entity::insert(stage_history_row(
            created.id,
            None,
            stage,
            Some("Deal created".into()),
            user_id,
            now,
        ))
        .exec_without_returning(&txn)
        .await?;
        txn.commit().await?;
        tracing::info!(deal_id = %created.id, stage = stage.as_str(), "deal created");
        Ok::<_, CrmError>(DealPayload {
            deal: created.into(),
            ignored_fields: changes.ignored_fields,
        })
    }
    .instrument(span)
    .await
}

pub async fn update_deal(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
    input: &JsonObject,
) -> CrmResult<DealPayload> {
    let changes = parse_deal_input(input)?;
    let span = info_span!("crm.updateDeal", %user_id, %deal_id);
    async move {
        let txn = db.begin().await?;
        let existing = owned_deal(&txn, user_id, deal_id).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let stage_change = changes.stage.filter(|stage| *stage != existing.stage);
        let from_stage = existing.stage;
        let current_custom = existing.custom_fields.clone();
        if let Some(Some(listing_id)) = &changes.listing_id {
            if existing.listing_id.as_deref() != Some(listing_id.as_str()) {
                ensure_listing_untracked(&txn, user_id, listing_id, Some(deal_id)).await?;
            }
        }

        let mut active: deal::ActiveModel = existing.into();
        changes.apply(&mut active, &current_custom);
        if let Some(stage) = stage_change {
            active.stage = Set(stage);
            active.stage_changed_at = Set(now);
        }
        active.updated_at = Set(now);
        let updated = active.update(&txn).await.map_err(deal_write_error)?;

        if let Some(stage) = stage_change {
            deal_stage_history::Entity::insert(stage_history_row(
                deal_id,
                Some(from_stage),
                stage,
                None,
                user_id,
                now,
            ))
            .exec_without_returning(&txn)
            .await?;
        }
        txn.commit().await?;
        Ok::<_, CrmError>(DealPayload {
            deal: updated.into(),
            ignored_fields: changes.ignored_fields,
        })
    }
    .instrument(span)
    .await
}

pub async fn get_deal(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<Option<DealView>> {
    let found = deal::Entity::find_by_id(deal_id)
        .filter(deal::Column::UserId.eq(user_id))
        .one(db)
        .await?;
    Ok(found.map(DealView::from))
}

/// Most recently updated first.
pub async fn list_deals(
    db: &DatabaseConnection,
    user_id: Uuid,
    filter: &DealFilter,
) -> CrmResult<Vec<DealView>> {
    let first = filter.first.unwrap_or(DEFAULT_DEALS_PAGE);
    if first > MAX_DEALS_PAGE {
        return Err(validation(format!("first cannot exceed {MAX_DEALS_PAGE}")));
    }
    let mut query = deal::Entity::find().filter(deal::Column::UserId.eq(user_id));
    if let Some(stage) = filter.stage {
        query = query.filter(deal::Column::Stage.eq(stage));
    }
    if let Some(priority) = filter.priority {
        query = query.filter(deal::Column::Priority.eq(priority));
    }
    if let Some(pattern) = like_pattern(filter.q.as_deref()) {
        query = query.filter(deal_text_condition(&pattern));
    }
    let deals = query
        .order_by_desc(deal::Column::UpdatedAt)
        .order_by_asc(deal::Column::Id)
        .offset(filter.offset)
        .limit(first)
        .all(db)
        .instrument(info_span!("crm.deals", %user_id, first, offset = filter.offset))
        .await?;
    Ok(deals.into_iter().map(DealView::from).collect())
}

/// Deletes the deal with its tasks, documents, communications and history.
///
/// Document objects go first. If one cannot be removed, only the rows of the
/// objects already gone are deleted and the deal stays, so no row is left
/// pointing at a missing object.
pub async fn delete_deal(
    db: &DatabaseConnection,
    store: &dyn ObjectStore,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<()> {
    let span = info_span!("crm.deleteDeal", %user_id, %deal_id);
    async move {
        owned_deal(db, user_id, deal_id).await?;
        let documents = deal_document::Entity::find()
            .filter(deal_document::Column::DealId.eq(deal_id))
            .all(db)
            .await?;

        let mut removed = Vec::with_capacity(documents.len());
        for doc in &documents {
            if let Err(err) = store.delete(&doc.storage_path).await {
                tracing::warn!(
                    error = %err,
                    path = %doc.storage_path,
                    removed = removed.len(),
                    "document removal failed, keeping deal"
                );
                if !removed.is_empty() {
                    let txn = db.begin().await?;
                    deal_document::Entity::delete_many()
                        .filter(deal_document::Column::Id.is_in(removed))
                        .exec(&txn)
                        .await?;
                    txn.commit().await?;
                }
                return Err(err.into());
            }
            removed.push(doc.id);
        }

        let txn = db.begin().await?;
        deal_task::Entity::delete_many()
            .filter(deal_task::Column::DealId.eq(deal_id))
            .exec(&txn)
            .await?;
        deal_document::Entity::delete_many()
            .filter(deal_document::Column::DealId.eq(deal_id))
            .exec(&txn)
            .await?;
        deal_communication::Entity::delete_many()
            .filter(deal_communication::Column::DealId.eq(deal_id))
            .exec(&txn)
            .await?;
        deal_stage_history::Entity::delete_many()
            .filter(deal_stage_history::Column::DealId.eq(deal_id))
            .exec(&txn)
            .await?;
        deal::Entity::delete_by_id(deal_id).exec(&txn).await?;
        txn.commit().await?;
        tracing::info!(documents = documents.len(), "deal deleted");
        Ok::<_, CrmError>(())
    }
    .instrument(span)
    .await
}

/// Copies a scraped listing into a new `prospecting` deal.
pub async fn add_listing_to_pipeline(
    db: &DatabaseConnection,
    listings: &dyn ListingSource,
    user_id: Uuid,
    listing_id: &str,
) -> CrmResult<DealView> {
    let listing_id = listing_id.trim();
    if listing_id.is_empty() {
        return Err(validation("listingId is required"));
    }
    let span = info_span!(
        "crm.addListingToPipeline",
        %user_id,
        listing_id,
        backend = listings.backend()
    );
    async move {
        ensure_listing_untracked(db, user_id, listing_id, None).await?;
        let listing = listings
            .get(listing_id)
            .await?
            .ok_or(CrmError::NotFound("Listing not found"))?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let active = deal_from_listing(user_id, listing, now);
        let txn = db.begin().await?;
        ensure_listing_untracked(&txn, user_id, listing_id, None).await?;
        let created = active.insert(&txn).await.map_err(deal_write_error)?;
        deal_stage_history::Entity::insert(stage_history_row(
            created.id,
            None,
            Stage::Prospecting,
            Some("Added from listings".into()),
            user_id,
            now,
        ))
        .exec_without_returning(&txn)
        .await?;
        txn.commit().await?;
        Ok::<_, CrmError>(DealView::from(created))
    }
    .instrument(span)
    .await
}

fn deal_from_listing(
    user_id: Uuid,
    listing: Listing,
    now: DateTimeWithTimeZone,
) -> deal::ActiveModel {
    let business_name = if listing.title.trim().is_empty() {
        format!("Listing {}", listing.id)
    } else {
        listing.title
    };
    let mut custom = JsonObject::new();
    if let Some(scraped_at) = listing.scraped_at {
        custom.insert("scraped_at".into(), Value::String(scraped_at.to_rfc3339()));
    }
    deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        listing_id: Set(Some(listing.id)),
        business_name: Set(business_name),
        stage: Set(Stage::Prospecting),
        priority: Set(Priority::Medium),
        asking_price_cents: Set(listing.price.map(dollars_to_cents)),
        annual_revenue_cents: Set(listing.revenue.map(dollars_to_cents)),
        cash_flow_cents: Set(listing.cash_flow.map(dollars_to_cents)),
        multiple: Set(listing.multiple),
        industry: Set(listing.industry),
        location: Set(listing.location),
        source: Set(listing.source),
        broker_name: Set(None),
        broker_email: Set(None),
        broker_phone: Set(None),
        listing_url: Set(listing.url),
        notes: Set(listing.description),
        expected_close_date: Set(None),
        custom_fields: Set(Value::Object(custom)),
        stage_changed_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Moves a deal and records the change. Moving to the current stage only
/// touches `updated_at`.
pub async fn move_deal_stage(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
    stage: Stage,
    note: Option<String>,
) -> CrmResult<DealView> {
    let note = note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let span = info_span!("crm.moveDealStage", %user_id, %deal_id, to = stage.as_str());
    async move {
        let txn = db.begin().await?;
        let existing = owned_deal(&txn, user_id, deal_id).await?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        if existing.stage == stage {
            let mut active: deal::ActiveModel = existing.into();
            active.updated_at = Set(now);
            let updated = active.update(&txn).await?;
            txn.commit().await?;
            return Ok(DealView::from(updated));
        }

        let from_stage = existing.stage;
        let mut active: deal::ActiveModel = existing.into();
        active.stage = Set(stage);
        active.stage_changed_at = Set(now);
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;
        deal_stage_history::Entity::insert(stage_history_row(
            deal_id,
            Some(from_stage),
            stage,
            note,
            user_id,
            now,
        ))
        .exec_without_returning(&txn)
        .await?;
        txn.commit().await?;
        tracing::info!(from = from_stage.as_str(), "deal stage changed");
        Ok::<_, CrmError>(DealView::from(updated))
    }
    .instrument(span)
    .await
}

/// Oldest change first.
pub async fn deal_stage_history(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_stage_history::Model>> {
    owned_deal(db, user_id, deal_id).await?;
    let rows = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(deal_id))
        .order_by_asc(deal_stage_history::Column::ChangedAt)
        .order_by_asc(deal_stage_history::Column::Id)
        .all(db)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern(Some("  SaaS ")), Some("%saas%".into()));
        assert_eq!(like_pattern(Some("50%_off")), Some("%50\\%\\_off%".into()));
        assert_eq!(like_pattern(Some("   ")), None);
        assert_eq!(like_pattern(None), None);
    }
}
