use std::collections::{BTreeMap, HashMap};

use async_graphql::SimpleObject;
use entity::{
    deal::{self, Stage},
    stage_meta,
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::{
    deals::{deal_text_condition, like_pattern},
    error::{CrmError, CrmResult, validation},
    fields::DealView,
};

pub const MAX_FIRST_PER_STAGE: i32 = 100;
pub const DEFAULT_FIRST_PER_STAGE: i32 = 25;
const UNSPECIFIED_INDUSTRY: &str = "Unspecified";

#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
pub struct PipelineStage {
    pub key: String,
    pub display_name: String,
    pub sort_order: i32,
    /// Win probability in percent.
    pub probability: i32,
    pub is_won: bool,
    pub is_lost: bool,
}

impl From<&stage_meta::Model> for PipelineStage {
    fn from(model: &stage_meta::Model) -> Self {
        Self {
            key: model.key.clone(),
            display_name: model.display_name.clone(),
            sort_order: i32::from(model.sort_order),
            probability: i32::from(model.probability),
            is_won: model.is_won,
            is_lost: model.is_lost,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineColumn {
    pub stage: PipelineStage,
    pub total_count: i32,
    pub total_asking_cents: i64,
    pub expected_value_cents: i64,
    pub deals: Vec<DealView>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineBoard {
    pub columns: Vec<PipelineColumn>,
    pub total_count: i32,
    pub total_asking_cents: i64,
    pub total_expected_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
pub struct IndustryCount {
    pub industry: String,
    pub count: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, SimpleObject)]
pub struct StageCount {
    pub stage: String,
    pub count: i32,
}

#[derive(Clone, Debug, PartialEq, SimpleObject)]
pub struct DashboardSummary {
    pub total_deals: i32,
    pub open_deals: i32,
    pub won_deals: i32,
    pub lost_deals: i32,
    /// Sum of asking prices over deals that are not closed.
    pub open_asking_cents: i64,
    pub average_multiple: Option<f64>,
    pub median_multiple: Option<f64>,
    /// Asking price over annual revenue, for deals with revenue.
    pub average_revenue_multiple: Option<f64>,
    pub industries: Vec<IndustryCount>,
    pub stage_counts: Vec<StageCount>,
    pub total_asins: i64,
}

pub async fn pipeline_stages(db: &DatabaseConnection) -> CrmResult<Vec<PipelineStage>> {
    let stages = load_stage_meta(db).await?;
    Ok(stages.iter().map(PipelineStage::from).collect())
}

async fn load_stage_meta(db: &DatabaseConnection) -> CrmResult<Vec<stage_meta::Model>> {
    let stages = stage_meta::Entity::find()
        .order_by_asc(stage_meta::Column::SortOrder)
        .all(db)
        .await?;
    Ok(stages)
}

pub async fn pipeline_board(
    db: &DatabaseConnection,
    user_id: Uuid,
    first_per_stage: Option<i32>,
    q: Option<&str>,
) -> CrmResult<PipelineBoard> {
    let requested = first_per_stage.unwrap_or(DEFAULT_FIRST_PER_STAGE);
    if requested < 0 {
        return Err(validation("firstPerStage must be non-negative"));
    }
    if requested > MAX_FIRST_PER_STAGE {
        return Err(validation(format!(
            "firstPerStage cannot exceed {MAX_FIRST_PER_STAGE}"
        )));
    }
    let pattern = like_pattern(q);
    let span = info_span!(
        "crm.pipelineBoard",
        %user_id,
        first = requested,
        has_q = pattern.is_some()
    );
    async move {
        let stages = load_stage_meta(db).await?;
        let mut query = deal::Entity::find().filter(deal::Column::UserId.eq(user_id));
        if let Some(pattern) = &pattern {
            query = query.filter(deal_text_condition(pattern));
        }
        let deals = query
            .order_by_desc(deal::Column::UpdatedAt)
            .order_by_asc(deal::Column::Id)
            .all(db)
            .await?;
        Ok::<_, CrmError>(build_board(&stages, deals, requested as usize))
    }
    .instrument(span)
    .await
}

/// `deals` must already be in display order.
fn build_board(
    stages: &[stage_meta::Model],
    deals: Vec<deal::Model>,
    first_per_stage: usize,
) -> PipelineBoard {
    let mut by_stage: HashMap<&'static str, Vec<deal::Model>> = HashMap::new();
    for deal in deals {
        by_stage.entry(deal.stage.as_str()).or_default().push(deal);
    }

    let columns: Vec<PipelineColumn> = stages
        .iter()
        .map(|meta| {
            let stage_deals = by_stage
                .remove(meta.key.as_str())
                .unwrap_or_default();
            let total_asking_cents =
                sum_cents(stage_deals.iter().filter_map(|d| d.asking_price_cents));
            PipelineColumn {
                stage: PipelineStage::from(meta),
                total_count: stage_deals.len() as i32,
                total_asking_cents,
                expected_value_cents: expected_value(total_asking_cents, meta.probability),
                deals: stage_deals
                    .into_iter()
                    .take(first_per_stage)
                    .map(DealView::from)
                    .collect(),
            }
        })
        .collect();

    PipelineBoard {
        total_count: columns.iter().map(|c| c.total_count).sum(),
        total_asking_cents: sum_cents(columns.iter().map(|c| c.total_asking_cents)),
        total_expected_cents: sum_cents(columns.iter().map(|c| c.expected_value_cents)),
        columns,
    }
}

/// Sums in i128 and clamps to the i64 range.
fn sum_cents(values: impl Iterator<Item = i64>) -> i64 {
    let total: i128 = values.map(i128::from).sum();
    total.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

fn expected_value(asking_cents: i64, probability: i16) -> i64 {
    (i128::from(asking_cents) * i128::from(probability) / 100) as i64
}

pub async fn dashboard_summary(
    db: &DatabaseConnection,
    user_id: Uuid,
) -> CrmResult<DashboardSummary> {
    let deals = deal::Entity::find()
        .filter(deal::Column::UserId.eq(user_id))
        .all(db)
        .instrument(info_span!("crm.dashboardSummary", %user_id))
        .await?;
    Ok(summarize(&deals))
}

fn summarize(deals: &[deal::Model]) -> DashboardSummary {
    let won = deals.iter().filter(|d| d.stage == Stage::ClosedWon).count();
    let lost = deals.iter().filter(|d| d.stage == Stage::ClosedLost).count();
    let open: Vec<&deal::Model> = deals.iter().filter(|d| !d.stage.is_closed()).collect();

    let mut multiples: Vec<f64> = deals
        .iter()
        .filter_map(|d| d.multiple)
        .filter(|m| m.is_finite())
        .collect();
    multiples.sort_by(f64::total_cmp);

    let revenue_multiples: Vec<f64> = deals
        .iter()
        .filter_map(|d| match (d.asking_price_cents, d.annual_revenue_cents) {
            (Some(asking), Some(revenue)) if revenue > 0 => Some(asking as f64 / revenue as f64),
            _ => None,
        })
        .collect();

    let mut industries: BTreeMap<String, i32> = BTreeMap::new();
    for deal in deals {
        let name = deal
            .industry
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNSPECIFIED_INDUSTRY);
        *industries.entry(name.to_string()).or_default() += 1;
    }
    let mut industries: Vec<IndustryCount> = industries
        .into_iter()
        .map(|(industry, count)| IndustryCount { industry, count })
        .collect();
    industries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.industry.cmp(&b.industry)));

    let stage_counts = Stage::ALL
        .iter()
        .map(|stage| StageCount {
            stage: stage.as_str().to_string(),
            count: deals.iter().filter(|d| d.stage == *stage).count() as i32,
        })
        .collect();

    DashboardSummary {
        total_deals: deals.len() as i32,
        open_deals: open.len() as i32,
        won_deals: won as i32,
        lost_deals: lost as i32,
        open_asking_cents: sum_cents(open.iter().filter_map(|d| d.asking_price_cents)),
        average_multiple: round2(mean(&multiples)),
        median_multiple: round2(median(&multiples)),
        average_revenue_multiple: round2(mean(&revenue_multiples)),
        industries,
        stage_counts,
        total_asins: deals
            .iter()
            .filter_map(|d| asin_count(&d.custom_fields))
            .fold(0, i64::saturating_add),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `sorted` must be ascending.
fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

fn round2(value: Option<f64>) -> Option<f64> {
    value.map(|v| (v * 100.0).round() / 100.0)
}

// asin_count is free-form: 42, "42" and "1,200" all occur.
fn asin_count(custom: &Value) -> Option<i64> {
    match custom.get("asin_count")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().replace(',', "").parse::<i64>().ok(),
        _ => None,
    }
    .filter(|n| *n >= 0)
}
