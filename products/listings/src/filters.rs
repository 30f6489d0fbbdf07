use serde::Deserialize;

use crate::{ListingError, ListingResult};

pub const DEFAULT_LIMIT: u64 = 20;
pub const MAX_LIMIT: u64 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(raw: &str) -> ListingResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(ListingError::invalid(format!(
                "sortDirection must be asc or desc, got {other:?}"
            ))),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Validated listing search. Every `None` field is left out of the query.
#[derive(Clone, Debug, PartialEq)]
pub struct ListingFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_revenue: Option<f64>,
    pub max_revenue: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
    pub search_term: Option<String>,
    pub is_amazon_fba: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
    pub limit: u64,
    pub offset: u64,
}

impl Default for ListingFilters {
    fn default() -> Self {
        Self {
            min_price: None,
            max_price: None,
            min_revenue: None,
            max_revenue: None,
            industry: None,
            location: None,
            source: None,
            search_term: None,
            is_amazon_fba: None,
            sort_by: None,
            sort_direction: SortDirection::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListingFilters {
    /// Clamps pagination into range and rejects inverted or negative bounds.
    pub fn normalized(mut self) -> ListingResult<Self> {
        self.limit = self.limit.clamp(1, MAX_LIMIT);
        check_range("price", self.min_price, self.max_price)?;
        check_range("revenue", self.min_revenue, self.max_revenue)?;
        self.industry = non_blank(self.industry);
        self.location = non_blank(self.location);
        self.source = non_blank(self.source);
        self.search_term = non_blank(self.search_term);
        self.sort_by = non_blank(self.sort_by);
        Ok(self)
    }
}

/// Raw query-string form of a listing search, as received over HTTP.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQueryParams {
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub min_revenue: Option<String>,
    pub max_revenue: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub source: Option<String>,
    pub search_term: Option<String>,
    pub is_amazon_fba: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl TryFrom<ListingQueryParams> for ListingFilters {
    type Error = ListingError;

    fn try_from(params: ListingQueryParams) -> ListingResult<Self> {
        let sort_direction = match non_blank(params.sort_direction) {
            Some(raw) => SortDirection::parse(&raw)?,
            None => SortDirection::default(),
        };
        let limit = match parse_int("limit", params.limit)? {
            Some(value) => value.clamp(1, MAX_LIMIT as i64) as u64,
            None => DEFAULT_LIMIT,
        };
        let offset = parse_int("offset", params.offset)?
            .map(|value| value.max(0) as u64)
            .unwrap_or(0);

        ListingFilters {
            min_price: parse_amount("minPrice", params.min_price)?,
            max_price: parse_amount("maxPrice", params.max_price)?,
            min_revenue: parse_amount("minRevenue", params.min_revenue)?,
            max_revenue: parse_amount("maxRevenue", params.max_revenue)?,
            industry: params.industry,
            location: params.location,
            source: params.source,
            search_term: params.search_term,
            is_amazon_fba: parse_flag("isAmazonFba", params.is_amazon_fba)?,
            sort_by: params.sort_by,
            sort_direction,
            limit,
            offset,
        }
        .normalized()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_amount(name: &str, raw: Option<String>) -> ListingResult<Option<f64>> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '$' | ',')).collect();
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(Some(value)),
        Ok(_) => Err(ListingError::invalid(format!(
            "{name} must be a non-negative number"
        ))),
        Err(_) => Err(ListingError::invalid(format!(
            "{name} must be a number, got {raw:?}"
        ))),
    }
}

fn parse_int(name: &str, raw: Option<String>) -> ListingResult<Option<i64>> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };
    raw.parse::<i64>()
        .map(Some)
        .map_err(|_| ListingError::invalid(format!("{name} must be an integer, got {raw:?}")))
}

fn parse_flag(name: &str, raw: Option<String>) -> ListingResult<Option<bool>> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ListingError::invalid(format!(
            "{name} must be true or false, got {raw:?}"
        ))),
    }
}

fn check_range(name: &str, min: Option<f64>, max: Option<f64>) -> ListingResult<()> {
    for bound in [min, max].into_iter().flatten() {
        if !bound.is_finite() || bound < 0.0 {
            return Err(ListingError::invalid(format!(
                "{name} bounds must be non-negative numbers"
            )));
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ListingError::invalid(format!(
                "min {name} cannot exceed max {name}"
            )));
        }
    }
    Ok(())
}
