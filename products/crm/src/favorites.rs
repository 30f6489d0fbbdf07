use chrono::Utc;
use entity::favorite;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    sea_query::OnConflict,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult, validation};

const MAX_LISTING_ID_LEN: usize = 128;

fn listing_key(listing_id: &str) -> CrmResult<&str> {
    let listing_id = listing_id.trim();
    if listing_id.is_empty() {
        return Err(validation("listingId is required"));
    }
    if listing_id.len() > MAX_LISTING_ID_LEN {
        return Err(validation(format!(
            "listingId cannot exceed {MAX_LISTING_ID_LEN} characters"
        )));
    }
    Ok(listing_id)
}

/// Idempotent; favoriting twice keeps the original timestamp.
pub async fn add_favorite(
    db: &DatabaseConnection,
    user_id: Uuid,
    listing_id: &str,
) -> CrmResult<favorite::Model> {
    let listing_id = listing_key(listing_id)?;
    let span = info_span!("crm.addFavorite", %user_id, listing_id);
    async move {
        let row = favorite::ActiveModel {
            user_id: Set(user_id),
            listing_id: Set(listing_id.to_string()),
            created_at: Set(Utc::now().into()),
        };
        favorite::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([favorite::Column::UserId, favorite::Column::ListingId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        favorite::Entity::find_by_id((user_id, listing_id.to_string()))
            .one(db)
            .await?
            .ok_or(CrmError::NotFound("Favorite not found"))
    }
    .instrument(span)
    .await
}

pub async fn remove_favorite(
    db: &DatabaseConnection,
    user_id: Uuid,
    listing_id: &str,
) -> CrmResult<bool> {
    let listing_id = listing_key(listing_id)?;
    let result = favorite::Entity::delete_many()
        .filter(favorite::Column::UserId.eq(user_id))
        .filter(favorite::Column::ListingId.eq(listing_id))
        .exec(db)
        .instrument(info_span!("crm.removeFavorite", %user_id, listing_id))
        .await?;
    Ok(result.rows_affected > 0)
}

/// Newest first.
pub async fn list_favorites(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> CrmResult<Vec<favorite::Model>> {
    let rows = favorite::Entity::find()
        .filter(favorite::Column::UserId.eq(user_id))
        .order_by_desc(favorite::Column::CreatedAt)
        .order_by_asc(favorite::Column::ListingId)
        .all(db)
        .await?;
    Ok(rows)
}
