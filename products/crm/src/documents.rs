//! Deal documents: object bytes in an [`ObjectStore`], metadata in
//! `deal_documents`.
//!
//! Upload writes the object first and the row second, removing the object
//! again if the row cannot be written. Delete removes the row inside a
//! transaction and only commits once the object is gone, so a row never
//! points at a removed object.

use std::time::Duration;

use chrono::Utc;
use entity::deal_document;
use platform_storage::{ObjectStore, sanitize_file_name};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::{
    deals::owned_deal,
    error::{CrmError, CrmResult, validation},
};

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);
pub const MAX_DOWNLOAD_URL_TTL: Duration = Duration::from_secs(24 * 3600);

pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/csv",
    "text/plain",
    "image/png",
    "image/jpeg",
    "image/webp",
    "application/zip",
];

#[derive(Clone, Debug)]
pub struct NewDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// `text/csv; charset=utf-8` -> `text/csv`, if allowed.
pub fn normalize_content_type(raw: &str) -> CrmResult<String> {
    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
        Ok(essence)
    } else {
        Err(validation(format!("content type {raw:?} is not allowed")))
    }
}

pub fn object_path(user_id: Uuid, deal_id: Uuid, file_name: &str) -> String {
    format!(
        "{user_id}/{deal_id}/{}-{}",
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

pub async fn upload_deal_document(
    db: &DatabaseConnection,
    store: &dyn ObjectStore,
    max_bytes: usize,
    user_id: Uuid,
    deal_id: Uuid,
    document: NewDocument,
) -> CrmResult<deal_document::Model> {
    let NewDocument {
        file_name,
        content_type,
        bytes,
        category,
        description,
    } = document;
    let content_type = normalize_content_type(&content_type)?;
    if bytes.is_empty() {
        return Err(validation("file is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(validation(format!(
            "file exceeds the {max_bytes} byte limit"
        )));
    }
    let file_name = file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(validation("fileName is required"));
    }
    let size = bytes.len();
    let span = info_span!(
        "crm.uploadDealDocument",
        %user_id,
        %deal_id,
        size,
        content_type = %content_type
    );
    async move {
        owned_deal(db, user_id, deal_id).await?;
        let path = object_path(user_id, deal_id, &file_name);
        store.put(&path, bytes, &content_type).await?;

        let row = deal_document::ActiveModel {
            id: Set(Uuid::new_v4()),
            deal_id: Set(deal_id),
            user_id: Set(user_id),
            file_name: Set(file_name),
            content_type: Set(content_type),
            size_bytes: Set(size as i64),
            category: Set(trimmed(category)),
            description: Set(trimmed(description)),
            storage_path: Set(path.clone()),
            uploaded_at: Set(Utc::now().into()),
        };
        match row.insert(db).await {
            Ok(model) => Ok::<_, CrmError>(model),
            Err(err) => {
                if let Err(cleanup) = store.delete(&path).await {
                    tracing::warn!(error = %cleanup, path = %path, "orphaned document object");
                }
                Err(CrmError::from(err))
            }
        }
    }
    .instrument(span)
    .await
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Newest first.
pub async fn list_deal_documents(
    db: &DatabaseConnection,
    user_id: Uuid,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_document::Model>> {
    owned_deal(db, user_id, deal_id).await?;
    let docs = deal_document::Entity::find()
        .filter(deal_document::Column::DealId.eq(deal_id))
        .order_by_desc(deal_document::Column::UploadedAt)
        .order_by_asc(deal_document::Column::Id)
        .all(db)
        .await?;
    Ok(docs)
}

async fn owned_document(
    db: &impl sea_orm::ConnectionTrait,
    user_id: Uuid,
    document_id: Uuid,
) -> CrmResult<deal_document::Model> {
    deal_document::Entity::find_by_id(document_id)
        .filter(deal_document::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or(CrmError::NotFound("Document not found"))
}

/// Short-lived signed URL; `ttl` defaults to an hour and is capped at a day.
pub async fn document_download_url(
    db: &DatabaseConnection,
    store: &dyn ObjectStore,
    user_id: Uuid,
    document_id: Uuid,
    ttl: Option<Duration>,
) -> CrmResult<String> {
    let ttl = ttl.unwrap_or(DEFAULT_DOWNLOAD_URL_TTL);
    if ttl.is_zero() || ttl > MAX_DOWNLOAD_URL_TTL {
        return Err(validation(format!(
            "expiresIn must be between 1 and {} seconds",
            MAX_DOWNLOAD_URL_TTL.as_secs()
        )));
    }
    let doc = owned_document(db, user_id, document_id).await?;
    let url = store.signed_url(&doc.storage_path, ttl).await?;
    Ok(url)
}

pub async fn delete_deal_document(
    db: &DatabaseConnection,
    store: &dyn ObjectStore,
    user_id: Uuid,
    document_id: Uuid,
) -> CrmResult<()> {
    let span = info_span!("crm.deleteDealDocument", %user_id, %document_id);
    async move {
        let txn = db.begin().await?;
        let doc = owned_document(&txn, user_id, document_id).await?;
        deal_document::Entity::delete_by_id(doc.id).exec(&txn).await?;
        if let Err(err) = store.delete(&doc.storage_path).await {
            tracing::warn!(
                error = %err,
                path = %doc.storage_path,
                "object delete failed, keeping row"
            );
            txn.rollback().await?;
            return Err(err.into());
        }
        txn.commit().await?;
        Ok::<_, CrmError>(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_are_normalised() {
        assert_eq!(
            normalize_content_type("Text/CSV; charset=utf-8").unwrap(),
            "text/csv"
        );
        assert_eq!(
            normalize_content_type("application/pdf").unwrap(),
            "application/pdf"
        );
        assert!(normalize_content_type("application/x-msdownload").is_err());
        assert!(normalize_content_type("").is_err());
    }

    #[test]
    fn object_paths_are_scoped_and_sanitised() {
        let user = Uuid::new_v4();
        let deal = Uuid::new_v4();
        let path = object_path(user, deal, "../CIM (v2).pdf");
        let prefix = format!("{user}/{deal}/");
        assert!(path.starts_with(&prefix));
        assert!(path.ends_with("-CIM__v2_.pdf"));
        assert!(platform_storage::validate_path(&path).is_ok());
    }
}
