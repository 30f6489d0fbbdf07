use std::{sync::Arc, time::Duration};

use async_graphql::{
    Context, EmptySubscription, Enum, Error, ErrorExtensions, InputObject, Json, MaybeUndefined,
    Object, Schema, SimpleObject, ID,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, Utc};
use entity::{deal, deal_communication, deal_document, deal_stage_history, deal_task, favorite};
use platform_api::ApiError;
use platform_storage::ObjectStore;
use products_listings::ListingSource;
use sea_orm::DatabaseConnection;
use uuid::Uuid;

use crate::{
    communications::{self, NewCommunication},
    deals::{self, DealFilter, DealPayload},
    documents::{self, DEFAULT_DOWNLOAD_URL_TTL, DEFAULT_MAX_DOCUMENT_BYTES, NewDocument},
    error::CrmError,
    favorites,
    fields::{DealView, JsonObject},
    pipeline::{self, DashboardSummary, PipelineBoard, PipelineStage},
    tasks::{self, NewTask, TaskChanges},
};

pub type CrmSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub struct AppSchema(pub CrmSchema);

/// The authenticated caller, attached to each GraphQL request by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct CrmSettings {
    pub document_max_bytes: usize,
    pub download_url_ttl: Duration,
}

impl Default for CrmSettings {
    fn default() -> Self {
        Self {
            document_max_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            download_url_ttl: DEFAULT_DOWNLOAD_URL_TTL,
        }
    }
}

pub fn build_schema(
    db: Arc<DatabaseConnection>,
    store: Arc<dyn ObjectStore>,
    listings: Arc<dyn ListingSource>,
    settings: CrmSettings,
) -> AppSchema {
    let schema = Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(db)
        .data(store)
        .data(listings)
        .data(settings)
        .finish();
    AppSchema(schema)
}

pub struct QueryRoot;
pub struct MutationRoot;

#[Object]
impl QueryRoot {
    async fn crm(&self) -> CrmQuery {
        CrmQuery
    }
}

#[Object]
impl MutationRoot {
    async fn crm(&self) -> CrmMutation {
        CrmMutation
    }
}

#[derive(Default)]
pub struct CrmQuery;

#[derive(Default)]
pub struct CrmMutation;

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum DealStage {
    Prospecting,
    InitialContact,
    NdaSigned,
    DueDiligence,
    LoiSubmitted,
    UnderContract,
    ClosedWon,
    ClosedLost,
}

impl From<deal::Stage> for DealStage {
    fn from(value: deal::Stage) -> Self {
        match value {
            deal::Stage::Prospecting => DealStage::Prospecting,
            deal::Stage::InitialContact => DealStage::InitialContact,
            deal::Stage::NdaSigned => DealStage::NdaSigned,
            deal::Stage::DueDiligence => DealStage::DueDiligence,
            deal::Stage::LoiSubmitted => DealStage::LoiSubmitted,
            deal::Stage::UnderContract => DealStage::UnderContract,
            deal::Stage::ClosedWon => DealStage::ClosedWon,
            deal::Stage::ClosedLost => DealStage::ClosedLost,
        }
    }
}

impl From<DealStage> for deal::Stage {
    fn from(value: DealStage) -> Self {
        match value {
            DealStage::Prospecting => deal::Stage::Prospecting,
            DealStage::InitialContact => deal::Stage::InitialContact,
            DealStage::NdaSigned => deal::Stage::NdaSigned,
            DealStage::DueDiligence => deal::Stage::DueDiligence,
            DealStage::LoiSubmitted => deal::Stage::LoiSubmitted,
            DealStage::UnderContract => deal::Stage::UnderContract,
            DealStage::ClosedWon => deal::Stage::ClosedWon,
            DealStage::ClosedLost => deal::Stage::ClosedLost,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum DealPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl From<deal::Priority> for DealPriority {
    fn from(value: deal::Priority) -> Self {
        match value {
            deal::Priority::Low => DealPriority::Low,
            deal::Priority::Medium => DealPriority::Medium,
            deal::Priority::High => DealPriority::High,
            deal::Priority::Urgent => DealPriority::Urgent,
        }
    }
}

impl From<DealPriority> for deal::Priority {
    fn from(value: DealPriority) -> Self {
        match value {
            DealPriority::Low => deal::Priority::Low,
            DealPriority::Medium => deal::Priority::Medium,
            DealPriority::High => deal::Priority::High,
            DealPriority::Urgent => deal::Priority::Urgent,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Skipped,
}

impl From<deal_task::Status> for TaskStatus {
    fn from(value: deal_task::Status) -> Self {
        match value {
            deal_task::Status::Todo => TaskStatus::Todo,
            deal_task::Status::InProgress => TaskStatus::InProgress,
            deal_task::Status::Done => TaskStatus::Done,
            deal_task::Status::Skipped => TaskStatus::Skipped,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommunicationChannel {
    Email,
    Call,
    Meeting,
    Note,
    Message,
}

impl From<deal_communication::Channel> for CommunicationChannel {
    fn from(value: deal_communication::Channel) -> Self {
        match value {
            deal_communication::Channel::Email => CommunicationChannel::Email,
            deal_communication::Channel::Call => CommunicationChannel::Call,
            deal_communication::Channel::Meeting => CommunicationChannel::Meeting,
            deal_communication::Channel::Note => CommunicationChannel::Note,
            deal_communication::Channel::Message => CommunicationChannel::Message,
        }
    }
}

impl From<CommunicationChannel> for deal_communication::Channel {
    fn from(value: CommunicationChannel) -> Self {
        match value {
            CommunicationChannel::Email => deal_communication::Channel::Email,
            CommunicationChannel::Call => deal_communication::Channel::Call,
            CommunicationChannel::Meeting => deal_communication::Channel::Meeting,
            CommunicationChannel::Note => deal_communication::Channel::Note,
            CommunicationChannel::Message => deal_communication::Channel::Message,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommunicationDirection {
    Inbound,
    Outbound,
}

impl From<deal_communication::Direction> for CommunicationDirection {
    fn from(value: deal_communication::Direction) -> Self {
        match value {
            deal_communication::Direction::Inbound => CommunicationDirection::Inbound,
            deal_communication::Direction::Outbound => CommunicationDirection::Outbound,
        }
    }
}

impl From<CommunicationDirection> for deal_communication::Direction {
    fn from(value: CommunicationDirection) -> Self {
        match value {
            CommunicationDirection::Inbound => deal_communication::Direction::Inbound,
            CommunicationDirection::Outbound => deal_communication::Direction::Outbound,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct MeNode {
    pub user_id: ID,
    pub email: Option<String>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct DealPayloadNode {
    pub deal: DealView,
    /// Input keys that matched no deal column or custom field.
    pub ignored_fields: Vec<String>,
}

impl From<DealPayload> for DealPayloadNode {
    fn from(payload: DealPayload) -> Self {
        Self {
            deal: payload.deal,
            ignored_fields: payload.ignored_fields,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct StageChangeNode {
    pub id: ID,
    pub deal_id: ID,
    pub from_stage: Option<DealStage>,
    pub to_stage: DealStage,
    pub changed_at: DateTime<Utc>,
    pub note: Option<String>,
    pub changed_by: Option<ID>,
}

impl From<deal_stage_history::Model> for StageChangeNode {
    fn from(model: deal_stage_history::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            from_stage: model.from_stage.map(DealStage::from),
            to_stage: model.to_stage.into(),
            changed_at: model.changed_at.into(),
            note: model.note,
            changed_by: model.changed_by.map(|id| ID::from(id.to_string())),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct TaskNode {
    pub id: ID,
    pub deal_id: ID,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: DealPriority,
    pub due_date: Option<NaiveDate>,
    pub sort_order: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<deal_task::Model> for TaskNode {
    fn from(model: deal_task::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            title: model.title,
            description: model.description,
            status: model.status.into(),
            priority: model.priority.into(),
            due_date: model.due_date,
            sort_order: model.sort_order,
            completed_at: model.completed_at.map(Into::into),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct DocumentNode {
    pub id: ID,
    pub deal_id: ID,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub category: Option<String>,
    pub description: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<deal_document::Model> for DocumentNode {
    fn from(model: deal_document::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            file_name: model.file_name,
            content_type: model.content_type,
            size_bytes: model.size_bytes,
            category: model.category,
            description: model.description,
            uploaded_at: model.uploaded_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct CommunicationNode {
    pub id: ID,
    pub deal_id: ID,
    pub channel: CommunicationChannel,
    pub direction: CommunicationDirection,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub counterparty: Option<String>,
    pub thread_id: Option<ID>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<deal_communication::Model> for CommunicationNode {
    fn from(model: deal_communication::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            deal_id: ID::from(model.deal_id.to_string()),
            channel: model.channel.into(),
            direction: model.direction.into(),
            subject: model.subject,
            body: model.body,
            counterparty: model.counterparty,
            thread_id: model.thread_id.map(|id| ID::from(id.to_string())),
            occurred_at: model.occurred_at.into(),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct FavoriteNode {
    pub listing_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<favorite::Model> for FavoriteNode {
    fn from(model: favorite::Model) -> Self {
        Self {
            listing_id: model.listing_id,
            created_at: model.created_at.into(),
        }
    }
}

#[derive(InputObject, Clone, Debug)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: Option<String>,
    /// `todo`, `in_progress`, `done` or `skipped`; `pending`, `doing` and
    /// `completed` are accepted too.
    pub status: Option<String>,
    pub priority: Option<DealPriority>,
    pub due_date: Option<NaiveDate>,
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: MaybeUndefined<String>,
    pub priority: Option<DealPriority>,
    pub due_date: MaybeUndefined<NaiveDate>,
}

#[derive(InputObject, Clone, Debug)]
pub struct UploadDocumentInput {
    pub deal_id: ID,
    pub file_name: String,
    pub content_type: String,
    /// File bytes, standard base64.
    pub data_base64: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(InputObject, Clone, Debug)]
pub struct LogCommunicationInput {
    pub deal_id: ID,
    pub channel: CommunicationChannel,
    pub direction: CommunicationDirection,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub counterparty: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub reply_to: Option<ID>,
}

#[Object]
impl CrmQuery {
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<MeNode> {
        let user = current_user(ctx)?;
        Ok(MeNode {
            user_id: ID::from(user.user_id.to_string()),
            email: user.email,
        })
    }

    async fn deals(
        &self,
        ctx: &Context<'_>,
        stage: Option<DealStage>,
        priority: Option<DealPriority>,
        q: Option<String>,
        first: Option<i32>,
        offset: Option<i32>,
    ) -> async_graphql::Result<Vec<DealView>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let filter = DealFilter {
            stage: stage.map(Into::into),
            priority: priority.map(Into::into),
            q,
            first: first.map(|n| non_negative("first", n)).transpose()?,
            offset: offset
                .map(|n| non_negative("offset", n))
                .transpose()?
                .unwrap_or(0),
        };
        deals::list_deals(db.as_ref(), user.user_id, &filter)
            .await
            .map_err(crm_error)
    }

    async fn deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<Option<DealView>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        deals::get_deal(db.as_ref(), user.user_id, id)
            .await
            .map_err(crm_error)
    }

    async fn deal_stage_history(
        &self,
        ctx: &Context<'_>,
        deal_id: ID,
    ) -> async_graphql::Result<Vec<StageChangeNode>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let rows = deals::deal_stage_history(db.as_ref(), user.user_id, deal_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(StageChangeNode::from).collect())
    }

    async fn pipeline_stages(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Vec<PipelineStage>> {
        current_user(ctx)?;
        let db = database(ctx)?;
        pipeline::pipeline_stages(db.as_ref())
            .await
            .map_err(crm_error)
    }

    async fn pipeline_board(
        &self,
        ctx: &Context<'_>,
        first_per_stage: Option<i32>,
        q: Option<String>,
    ) -> async_graphql::Result<PipelineBoard> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        pipeline::pipeline_board(db.as_ref(), user.user_id, first_per_stage, q.as_deref())
            .await
            .map_err(crm_error)
    }

    async fn dashboard_summary(&self, ctx: &Context<'_>) -> async_graphql::Result<DashboardSummary> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        pipeline::dashboard_summary(db.as_ref(), user.user_id)
            .await
            .map_err(crm_error)
    }

    async fn deal_tasks(
        &self,
        ctx: &Context<'_>,
        deal_id: ID,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let rows = tasks::list_deal_tasks(db.as_ref(), user.user_id, deal_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(TaskNode::from).collect())
    }

    async fn deal_documents(
        &self,
        ctx: &Context<'_>,
        deal_id: ID,
    ) -> async_graphql::Result<Vec<DocumentNode>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let rows = documents::list_deal_documents(db.as_ref(), user.user_id, deal_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(DocumentNode::from).collect())
    }

    async fn document_download_url(
        &self,
        ctx: &Context<'_>,
        id: ID,
        expires_in: Option<i32>,
    ) -> async_graphql::Result<String> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let store = object_store(ctx)?;
        let settings = settings(ctx);
        let id = parse_uuid(&id)?;
        let ttl = match expires_in {
            Some(secs) => Duration::from_secs(non_negative("expiresIn", secs)?),
            None => settings.download_url_ttl,
        };
        documents::document_download_url(db.as_ref(), store.as_ref(), user.user_id, id, Some(ttl))
            .await
            .map_err(crm_error)
    }

    async fn communications(
        &self,
        ctx: &Context<'_>,
        deal_id: ID,
        thread_id: Option<ID>,
    ) -> async_graphql::Result<Vec<CommunicationNode>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let thread_id = thread_id.as_ref().map(parse_uuid).transpose()?;
        let rows = communications::list_communications(db.as_ref(), user.user_id, deal_id, thread_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(CommunicationNode::from).collect())
    }

    async fn favorites(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<FavoriteNode>> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let rows = favorites::list_favorites(db.as_ref(), user.user_id)
            .await
            .map_err(crm_error)?;
        Ok(rows.into_iter().map(FavoriteNode::from).collect())
    }
}

#[Object]
impl CrmMutation {
    /// `input` is a loose JSON object; see `ignoredFields` for keys that were dropped.
    async fn create_deal(
        &self,
        ctx: &Context<'_>,
        input: Json<JsonObject>,
    ) -> async_graphql::Result<DealPayloadNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let payload = deals::create_deal(db.as_ref(), user.user_id, &input.0)
            .await
            .map_err(crm_error)?;
        Ok(payload.into())
    }

    async fn update_deal(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: Json<JsonObject>,
    ) -> async_graphql::Result<DealPayloadNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        let payload = deals::update_deal(db.as_ref(), user.user_id, id, &input.0)
            .await
            .map_err(crm_error)?;
        Ok(payload.into())
    }

    async fn delete_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let store = object_store(ctx)?;
        let id = parse_uuid(&id)?;
        deals::delete_deal(db.as_ref(), store.as_ref(), user.user_id, id)
            .await
            .map_err(crm_error)?;
        Ok(true)
    }

    async fn add_listing_to_pipeline(
        &self,
        ctx: &Context<'_>,
        listing_id: String,
    ) -> async_graphql::Result<DealView> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let listings = listing_source(ctx)?;
        deals::add_listing_to_pipeline(db.as_ref(), listings.as_ref(), user.user_id, &listing_id)
            .await
            .map_err(crm_error)
    }

    async fn move_deal_stage(
        &self,
        ctx: &Context<'_>,
        id: ID,
        stage: DealStage,
        note: Option<String>,
    ) -> async_graphql::Result<DealView> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        deals::move_deal_stage(db.as_ref(), user.user_id, id, stage.into(), note)
            .await
            .map_err(crm_error)
    }

    async fn create_deal_task(
        &self,
        ctx: &Context<'_>,
        deal_id: ID,
        input: CreateTaskInput,
    ) -> async_graphql::Result<TaskNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&deal_id)?;
        let status = input
            .status
            .as_deref()
            .map(tasks::parse_status)
            .transpose()
            .map_err(crm_error)?;
        let task = NewTask {
            title: input.title,
            description: input.description,
            status,
            priority: input.priority.map(Into::into),
            due_date: input.due_date,
        };
        let created = tasks::create_deal_task(db.as_ref(), user.user_id, deal_id, task)
            .await
            .map_err(crm_error)?;
        Ok(created.into())
    }

    async fn update_deal_task(
        &self,
        ctx: &Context<'_>,
        id: ID,
        input: UpdateTaskInput,
    ) -> async_graphql::Result<TaskNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        let changes = TaskChanges {
            title: input.title,
            description: patch(input.description),
            priority: input.priority.map(Into::into),
            due_date: patch(input.due_date),
        };
        let updated = tasks::update_deal_task(db.as_ref(), user.user_id, id, changes)
            .await
            .map_err(crm_error)?;
        Ok(updated.into())
    }

    async fn move_deal_task(
        &self,
        ctx: &Context<'_>,
        id: ID,
        status: String,
        sort_order: Option<i32>,
    ) -> async_graphql::Result<TaskNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        let status = tasks::parse_status(&status).map_err(crm_error)?;
        let moved = tasks::move_deal_task(db.as_ref(), user.user_id, id, status, sort_order)
            .await
            .map_err(crm_error)?;
        Ok(moved.into())
    }

    async fn delete_deal_task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        tasks::delete_deal_task(db.as_ref(), user.user_id, id)
            .await
            .map_err(crm_error)
    }

    async fn upload_deal_document(
        &self,
        ctx: &Context<'_>,
        input: UploadDocumentInput,
    ) -> async_graphql::Result<DocumentNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let store = object_store(ctx)?;
        let settings = settings(ctx);
        let deal_id = parse_uuid(&input.deal_id)?;
        // base64 expands by 4/3; refuse before decoding anything oversized
        if input.data_base64.len() / 4 * 3 > settings.document_max_bytes + 3 {
            return Err(validation_error(format!(
                "file exceeds the {} byte limit",
                settings.document_max_bytes
            )));
        }
        let bytes = STANDARD
            .decode(input.data_base64.trim())
            .map_err(|_| validation_error("dataBase64 is not valid base64"))?;
        let document = NewDocument {
            file_name: input.file_name,
            content_type: input.content_type,
            bytes,
            category: input.category,
            description: input.description,
        };
        let created = documents::upload_deal_document(
            db.as_ref(),
            store.as_ref(),
            settings.document_max_bytes,
            user.user_id,
            deal_id,
            document,
        )
        .await
        .map_err(crm_error)?;
        Ok(created.into())
    }

    async fn delete_deal_document(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let store = object_store(ctx)?;
        let id = parse_uuid(&id)?;
        documents::delete_deal_document(db.as_ref(), store.as_ref(), user.user_id, id)
            .await
            .map_err(crm_error)?;
        Ok(true)
    }

    async fn log_communication(
        &self,
        ctx: &Context<'_>,
        input: LogCommunicationInput,
    ) -> async_graphql::Result<CommunicationNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let deal_id = parse_uuid(&input.deal_id)?;
        let reply_to = input.reply_to.as_ref().map(parse_uuid).transpose()?;
        let communication = NewCommunication {
            channel: input.channel.into(),
            direction: input.direction.into(),
            subject: input.subject,
            body: input.body,
            counterparty: input.counterparty,
            occurred_at: input.occurred_at,
            reply_to,
        };
        let created =
            communications::log_communication(db.as_ref(), user.user_id, deal_id, communication)
                .await
                .map_err(crm_error)?;
        Ok(created.into())
    }

    async fn delete_communication(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let id = parse_uuid(&id)?;
        communications::delete_communication(db.as_ref(), user.user_id, id)
            .await
            .map_err(crm_error)
    }

    async fn add_favorite(
        &self,
        ctx: &Context<'_>,
        listing_id: String,
    ) -> async_graphql::Result<FavoriteNode> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        let favorite = favorites::add_favorite(db.as_ref(), user.user_id, &listing_id)
            .await
            .map_err(crm_error)?;
        Ok(favorite.into())
    }

    async fn remove_favorite(
        &self,
        ctx: &Context<'_>,
        listing_id: String,
    ) -> async_graphql::Result<bool> {
        let user = current_user(ctx)?;
        let db = database(ctx)?;
        favorites::remove_favorite(db.as_ref(), user.user_id, &listing_id)
            .await
            .map_err(crm_error)
    }
}

fn patch<T>(value: MaybeUndefined<T>) -> Option<Option<T>> {
    match value {
        MaybeUndefined::Undefined => None,
        MaybeUndefined::Null => Some(None),
        MaybeUndefined::Value(v) => Some(Some(v)),
    }
}

fn non_negative(field: &str, value: i32) -> async_graphql::Result<u64> {
    u64::try_from(value).map_err(|_| validation_error(format!("{field} must be non-negative")))
}

fn database(ctx: &Context<'_>) -> async_graphql::Result<Arc<DatabaseConnection>> {
    ctx.data::<Arc<DatabaseConnection>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing database connection"))
}

fn object_store(ctx: &Context<'_>) -> async_graphql::Result<Arc<dyn ObjectStore>> {
    ctx.data::<Arc<dyn ObjectStore>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing document storage"))
}

fn listing_source(ctx: &Context<'_>) -> async_graphql::Result<Arc<dyn ListingSource>> {
    ctx.data::<Arc<dyn ListingSource>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing listing source"))
}

fn settings(ctx: &Context<'_>) -> CrmSettings {
    ctx.data::<CrmSettings>().copied().unwrap_or_default()
}

fn current_user(ctx: &Context<'_>) -> async_graphql::Result<CurrentUser> {
    ctx.data::<CurrentUser>()
        .cloned()
        .map_err(|_| ApiError::Unauthorized.extend())
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| validation_error("Invalid ID"))
}

fn crm_error(err: CrmError) -> Error {
    ApiError::from(err).extend()
}

fn validation_error(message: impl Into<String>) -> Error {
    ApiError::invalid(message).extend()
}

fn error_with_code(code: &'static str, message: impl Into<String>) -> Error {
    Error::new(message).extend_with(|_, e| e.set("code", code))
}
