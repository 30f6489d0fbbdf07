use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub user_id: Uuid,
    #[sea_orm(indexed)]
    pub listing_id: Option<String>,
    pub business_name: String,
    pub stage: Stage,
    pub priority: Priority,
    pub asking_price_cents: Option<i64>,
    pub annual_revenue_cents: Option<i64>,
    pub cash_flow_cents: Option<i64>,
    pub multiple: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
    pub broker_name: Option<String>,
    pub broker_email: Option<String>,
    pub broker_phone: Option<String>,
    pub listing_url: Option<String>,
    pub notes: Option<String>,
    pub expected_close_date: Option<Date>,
    pub custom_fields: Json,
    pub stage_changed_at: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::deal_task::Entity")]
    Task,
    #[sea_orm(has_many = "super::deal_document::Entity")]
    Document,
    #[sea_orm(has_many = "super::deal_communication::Entity")]
    Communication,
    #[sea_orm(has_many = "super::deal_stage_history::Entity")]
    StageHistory,
}

impl Related<super::deal_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Task.def()
    }
}

impl Related<super::deal_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl Related<super::deal_communication::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Communication.def()
    }
}

impl Related<super::deal_stage_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StageHistory.def()
    }
}

/// Pipeline position of a deal. Keys match `stage_meta.key`.
#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[sea_orm(string_value = "prospecting")]
    Prospecting,
    #[sea_orm(string_value = "initial_contact")]
    InitialContact,
    #[sea_orm(string_value = "nda_signed")]
    NdaSigned,
    #[sea_orm(string_value = "due_diligence")]
    DueDiligence,
    #[sea_orm(string_value = "loi_submitted")]
    LoiSubmitted,
    #[sea_orm(string_value = "under_contract")]
    UnderContract,
    #[sea_orm(string_value = "closed_won")]
    ClosedWon,
    #[sea_orm(string_value = "closed_lost")]
    ClosedLost,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Prospecting,
        Stage::InitialContact,
        Stage::NdaSigned,
        Stage::DueDiligence,
        Stage::LoiSubmitted,
        Stage::UnderContract,
        Stage::ClosedWon,
        Stage::ClosedLost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prospecting => "prospecting",
            Stage::InitialContact => "initial_contact",
            Stage::NdaSigned => "nda_signed",
            Stage::DueDiligence => "due_diligence",
            Stage::LoiSubmitted => "loi_submitted",
            Stage::UnderContract => "under_contract",
            Stage::ClosedWon => "closed_won",
            Stage::ClosedLost => "closed_lost",
        }
    }

    /// Accepts the stored key plus the loose labels older clients send
    /// (`"Due Diligence"`, `"won"`, `"LOI"`).
    pub fn parse(value: &str) -> Option<Self> {
        let key = value
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        let stage = match key.as_str() {
            "prospecting" | "lead" | "new" => Stage::Prospecting,
            "initial_contact" | "contacted" => Stage::InitialContact,
            "nda_signed" | "nda" => Stage::NdaSigned,
            "due_diligence" | "diligence" => Stage::DueDiligence,
            "loi_submitted" | "loi" => Stage::LoiSubmitted,
            "under_contract" | "contract" => Stage::UnderContract,
            "closed_won" | "won" => Stage::ClosedWon,
            "closed_lost" | "lost" => Stage::ClosedLost,
            _ => return None,
        };
        Some(stage)
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Stage::ClosedWon | Stage::ClosedLost)
    }
}

#[derive(
    Copy, Clone, Debug, EnumIter, DeriveActiveEnum, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
    #[sea_orm(string_value = "urgent")]
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" | "normal" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" | "critical" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

impl ActiveModelBehavior for ActiveModel {}
