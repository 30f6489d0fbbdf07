//! Translation between CRM field names and `deals` columns.
//!
//! Clients send deals as loose JSON objects using whichever name their screen
//! grew up with (`price`, `asking_price`, `askingPrice`). Keys are normalised
//! to snake_case and resolved through [`ALIASES`]. Attributes without a
//! dedicated column go to the `custom_fields` JSON object. Anything else is
//! dropped with a warning and echoed back as `ignored_fields`.

use async_graphql::{Json, SimpleObject};
use chrono::{DateTime, NaiveDate, Utc};
use entity::deal::{self, Priority, Stage};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CrmResult, validation};

pub type JsonObject = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Column {
    BusinessName,
    Stage,
    Priority,
    AskingPrice,
    AnnualRevenue,
    CashFlow,
    Multiple,
    Industry,
    Location,
    Source,
    BrokerName,
    BrokerEmail,
    BrokerPhone,
    ListingUrl,
    ListingId,
    Notes,
    ExpectedCloseDate,
    CustomFields,
}

/// Normalised input key to column.
const ALIASES: &[(&str, Column)] = &[
    ("business_name", Column::BusinessName),
    ("name", Column::BusinessName),
    ("title", Column::BusinessName),
    ("company_name", Column::BusinessName),
    ("stage", Column::Stage),
    ("status", Column::Stage),
    ("pipeline_stage", Column::Stage),
    ("priority", Column::Priority),
    ("asking_price", Column::AskingPrice),
    ("price", Column::AskingPrice),
    ("annual_revenue", Column::AnnualRevenue),
    ("revenue", Column::AnnualRevenue),
    ("gross_revenue", Column::AnnualRevenue),
    ("cash_flow", Column::CashFlow),
    ("cashflow", Column::CashFlow),
    ("sde", Column::CashFlow),
    ("multiple", Column::Multiple),
    ("valuation_multiple", Column::Multiple),
    ("industry", Column::Industry),
    ("niche", Column::Industry),
    ("location", Column::Location),
    ("source", Column::Source),
    ("broker_company", Column::Source),
    ("source_site", Column::Source),
    ("broker_name", Column::BrokerName),
    ("broker", Column::BrokerName),
    ("broker_contact", Column::BrokerName),
    ("broker_email", Column::BrokerEmail),
    ("broker_phone", Column::BrokerPhone),
    ("listing_url", Column::ListingUrl),
    ("url", Column::ListingUrl),
    ("listing_id", Column::ListingId),
    ("notes", Column::Notes),
    ("description", Column::Notes),
    ("expected_close_date", Column::ExpectedCloseDate),
    ("close_date", Column::ExpectedCloseDate),
    ("target_close_date", Column::ExpectedCloseDate),
    ("custom_fields", Column::CustomFields),
];

/// Attributes stored in `custom_fields` under their own name.
pub const CUSTOM_FIELD_KEYS: &[&str] = &[
    "employees",
    "year_established",
    "website",
    "seller_financing",
    "reason_for_selling",
    "inventory_value",
    "ttm_revenue",
    "ttm_profit",
    "asin_count",
    "marketplaces",
    "tags",
    "financials",
    "monthly_traffic",
    "email_subscribers",
    "sku_count",
    "fulfillment",
    "brand_registry",
    "platform",
];

const CUSTOM_PREFIXES: &[&str] = &["custom.", "custom_fields."];
const MAX_TEXT_LEN: usize = 4000;
/// Largest accepted money amount, in dollars.
pub const MAX_MONEY_DOLLARS: f64 = 1e12;

/// Parsed create/update payload. Outer `None` leaves a column untouched,
/// `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DealChanges {
    pub business_name: Option<String>,
    pub stage: Option<Stage>,
    pub priority: Option<Priority>,
    pub asking_price_cents: Option<Option<i64>>,
    pub annual_revenue_cents: Option<Option<i64>>,
    pub cash_flow_cents: Option<Option<i64>>,
    pub multiple: Option<Option<f64>>,
    pub industry: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub source: Option<Option<String>>,
    pub broker_name: Option<Option<String>>,
    pub broker_email: Option<Option<String>>,
    pub broker_phone: Option<Option<String>>,
    pub listing_url: Option<Option<String>>,
    pub listing_id: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub expected_close_date: Option<Option<NaiveDate>>,
    /// Merged into `custom_fields`; a `null` value removes the key.
    pub custom: JsonObject,
    pub ignored_fields: Vec<String>,
}

impl DealChanges {
    pub fn is_empty(&self) -> bool {
        *self
            == DealChanges {
                ignored_fields: self.ignored_fields.clone(),
                ..DealChanges::default()
            }
    }

    /// Writes every touched column onto `active`.
    pub fn apply(&self, active: &mut deal::ActiveModel, current_custom: &Value) {
        use sea_orm::ActiveValue::Set;

        if let Some(name) = &self.business_name {
            active.business_name = Set(name.clone());
        }
        if let Some(priority) = self.priority {
            active.priority = Set(priority);
        }
        if let Some(value) = self.asking_price_cents {
            active.asking_price_cents = Set(value);
        }
        if let Some(value) = self.annual_revenue_cents {
            active.annual_revenue_cents = Set(value);
        }
        if let Some(value) = self.cash_flow_cents {
            active.cash_flow_cents = Set(value);
        }
        if let Some(value) = self.multiple {
            active.multiple = Set(value);
        }
        if let Some(value) = &self.industry {
            active.industry = Set(value.clone());
        }
        if let Some(value) = &self.location {
            active.location = Set(value.clone());
        }
        if let Some(value) = &self.source {
            active.source = Set(value.clone());
        }
        if let Some(value) = &self.broker_name {
            active.broker_name = Set(value.clone());
        }
        if let Some(value) = &self.broker_email {
            active.broker_email = Set(value.clone());
        }
        if let Some(value) = &self.broker_phone {
            active.broker_phone = Set(value.clone());
        }
        if let Some(value) = &self.listing_url {
            active.listing_url = Set(value.clone());
        }
        if let Some(value) = &self.listing_id {
            active.listing_id = Set(value.clone());
        }
        if let Some(value) = &self.notes {
            active.notes = Set(value.clone());
        }
        if let Some(value) = self.expected_close_date {
            active.expected_close_date = Set(value);
        }
        if !self.custom.is_empty() {
            active.custom_fields = Set(merge_custom(current_custom, &self.custom));
        }
    }
}

/// Parses a create/update payload. Type errors are validation errors; unknown
/// keys are collected in `ignored_fields`.
pub fn parse_deal_input(input: &JsonObject) -> CrmResult<DealChanges> {
    let mut changes = DealChanges::default();
    for (raw_key, value) in input {
        let key = normalize_key(raw_key);
        if let Some(custom_key) = custom_key(&key) {
            changes.custom.insert(custom_key, value.clone());
            continue;
        }
        let Some(column) = ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, column)| *column)
        else {
            tracing::warn!(field = %raw_key, "ignoring unknown deal field");
            changes.ignored_fields.push(raw_key.clone());
            continue;
        };
        apply_column(&mut changes, column, raw_key, value)?;
    }
    changes.ignored_fields.sort();
    Ok(changes)
}

fn apply_column(
    changes: &mut DealChanges,
    column: Column,
    field: &str,
    value: &Value,
) -> CrmResult<()> {
    match column {
        Column::BusinessName => {
            let name = text(field, value)?
                .ok_or_else(|| validation("business_name cannot be empty"))?;
            changes.business_name = Some(name);
        }
        Column::Stage => {
            let raw = text(field, value)?.ok_or_else(|| validation("stage cannot be empty"))?;
            let stage =
                Stage::parse(&raw).ok_or_else(|| validation(format!("unknown stage {raw:?}")))?;
            changes.stage = Some(stage);
        }
        Column::Priority => {
            let raw =
                text(field, value)?.ok_or_else(|| validation("priority cannot be empty"))?;
            let priority = Priority::parse(&raw)
                .ok_or_else(|| validation(format!("unknown priority {raw:?}")))?;
            changes.priority = Some(priority);
        }
        Column::AskingPrice => changes.asking_price_cents = Some(money_cents(field, value)?),
        Column::AnnualRevenue => changes.annual_revenue_cents = Some(money_cents(field, value)?),
        Column::CashFlow => changes.cash_flow_cents = Some(money_cents(field, value)?),
        Column::Multiple => changes.multiple = Some(multiple(field, value)?),
        Column::Industry => changes.industry = Some(text(field, value)?),
        Column::Location => changes.location = Some(text(field, value)?),
        Column::Source => changes.source = Some(text(field, value)?),
        Column::BrokerName => changes.broker_name = Some(text(field, value)?),
        Column::BrokerEmail => {
            let email = text(field, value)?;
            if let Some(email) = &email {
                if !email.contains('@') {
                    return Err(validation(format!("{field} must be an email address")));
                }
            }
            changes.broker_email = Some(email);
        }
        Column::BrokerPhone => changes.broker_phone = Some(text(field, value)?),
        Column::ListingUrl => changes.listing_url = Some(text(field, value)?),
        Column::ListingId => changes.listing_id = Some(text(field, value)?),
        Column::Notes => changes.notes = Some(text(field, value)?),
        Column::ExpectedCloseDate => changes.expected_close_date = Some(date(field, value)?),
        Column::CustomFields => match value {
            Value::Object(map) => changes
                .custom
                .extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
            Value::Null => {}
            _ => return Err(validation(format!("{field} must be an object"))),
        },
    }
    Ok(())
}

/// `askingPrice` -> `asking_price`, `Broker Company` -> `broker_company`.
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.trim().chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

fn custom_key(key: &str) -> Option<String> {
    for prefix in CUSTOM_PREFIXES {
        if let Some(rest) = key.strip_prefix(prefix) {
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    CUSTOM_FIELD_KEYS
        .contains(&key)
        .then(|| key.to_string())
}

fn text(field: &str, value: &Value) -> CrmResult<Option<String>> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(validation(format!("{field} must be a string"))),
    };
    if raw.len() > MAX_TEXT_LEN {
        return Err(validation(format!(
            "{field} cannot exceed {MAX_TEXT_LEN} characters"
        )));
    }
    Ok((!raw.is_empty()).then_some(raw))
}

fn number(field: &str, value: &Value, suffixes: bool) -> CrmResult<Option<f64>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .trim_start_matches("USD")
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | ' '))
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            parse_scaled(&cleaned, suffixes)
        }
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(v)),
        Some(_) => Err(validation(format!("{field} cannot be negative"))),
        None => Err(validation(format!("{field} must be a number"))),
    }
}

// "1.2M" and "850k" are common in broker listings; multiples are written "3.2x".
fn parse_scaled(raw: &str, suffixes: bool) -> Option<f64> {
    let lower = raw.to_ascii_lowercase();
    if suffixes {
        if let Some(n) = lower.strip_suffix('k') {
            return n.parse::<f64>().ok().map(|v| v * 1_000.0);
        }
        if let Some(n) = lower.strip_suffix('m') {
            return n.parse::<f64>().ok().map(|v| v * 1_000_000.0);
        }
    } else if let Some(n) = lower.strip_suffix('x') {
        return n.parse::<f64>().ok();
    }
    lower.parse::<f64>().ok()
}

fn money_cents(field: &str, value: &Value) -> CrmResult<Option<i64>> {
    match number(field, value, true)? {
        Some(dollars) if dollars > MAX_MONEY_DOLLARS => Err(validation(format!(
            "{field} cannot exceed {MAX_MONEY_DOLLARS:.0}"
        ))),
        parsed => Ok(parsed.map(dollars_to_cents)),
    }
}

fn multiple(field: &str, value: &Value) -> CrmResult<Option<f64>> {
    number(field, value, false)
}

fn date(field: &str, value: &Value) -> CrmResult<Option<NaiveDate>> {
    let Some(raw) = text(field, value)? else {
        return Ok(None);
    };
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| Some(ts.date_naive()))
        .map_err(|_| validation(format!("{field} must be a YYYY-MM-DD date")))
}

pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Shallow merge; `null` in `patch` deletes the key.
pub fn merge_custom(base: &Value, patch: &JsonObject) -> Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    for (key, value) in patch {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// A deal as the CRM screens name its fields.
#[derive(Clone, Debug, PartialEq, SimpleObject)]
#[graphql(name = "Deal")]
pub struct DealView {
    pub id: Uuid,
    pub listing_id: Option<String>,
    pub business_name: String,
    pub stage: String,
    pub priority: String,
    /// Dollars.
    pub asking_price: Option<f64>,
    pub annual_revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub valuation_multiple: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub broker_company: Option<String>,
    pub broker_name: Option<String>,
    pub broker_email: Option<String>,
    pub broker_phone: Option<String>,
    pub listing_url: Option<String>,
    pub notes: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    pub custom_fields: Json<JsonObject>,
    pub stage_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<deal::Model> for DealView {
    fn from(model: deal::Model) -> Self {
        Self {
            id: model.id,
            listing_id: model.listing_id,
            business_name: model.business_name,
            stage: model.stage.as_str().to_string(),
            priority: model.priority.as_str().to_string(),
            asking_price: model.asking_price_cents.map(cents_to_dollars),
            annual_revenue: model.annual_revenue_cents.map(cents_to_dollars),
            cash_flow: model.cash_flow_cents.map(cents_to_dollars),
            valuation_multiple: model.multiple,
            industry: model.industry,
            location: model.location,
            broker_company: model.source,
            broker_name: model.broker_name,
            broker_email: model.broker_email,
            broker_phone: model.broker_phone,
            listing_url: model.listing_url,
            notes: model.notes,
            expected_close_date: model.expected_close_date,
            custom_fields: Json(match model.custom_fields {
                Value::Object(map) => map,
                _ => JsonObject::new(),
            }),
            stage_changed_at: model.stage_changed_at.into(),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}
