//! Serde models for the Hansard and Members APIs.
//!
//! The Hansard debates API serializes fields in PascalCase; the Members API
//! uses camelCase. Both occasionally return date-only strings where a
//! datetime is documented, so timestamps go through a lenient parser.

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Overview block of a Hansard debate section.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebateOverview {
    pub id: i64,
    pub ext_id: String,
    pub title: String,
    #[serde(deserialize_with = "hansard_datetime")]
    pub date: NaiveDateTime,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub house: Option<String>,
    #[serde(default, deserialize_with = "opt_hansard_datetime")]
    pub content_last_updated: Option<NaiveDateTime>,
}

/// A single item within a debate: a speech, intervention, question, etc.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebateItem {
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub attributed_to: Option<String>,
    /// Raw contribution text; may contain HTML markup.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub order_in_section: Option<i64>,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Complete debate record. Child debates nest recursively and carry their
/// own items.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Debate {
    #[serde(default)]
    pub overview: Option<DebateOverview>,
    #[serde(default)]
    pub items: Vec<DebateItem>,
    #[serde(default)]
    pub child_debates: Vec<Debate>,
}

/// One debate a member contributed to, from the Members API
/// `ContributionSummary` endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSummary {
    #[serde(default)]
    pub debate_title: Option<String>,
    /// Hansard section external id; the key `trigger` and `populate` accept.
    #[serde(default)]
    pub debate_website_id: Option<String>,
    #[serde(default, deserialize_with = "opt_hansard_datetime")]
    pub sitting_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub house: Option<String>,
    #[serde(default)]
    pub total_contributions: i64,
}

/// Members API search results wrap each record in a `value` envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct ContributionItem {
    #[serde(default)]
    pub value: Option<ContributionSummary>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSearchResult {
    #[serde(default)]
    pub items: Vec<ContributionItem>,
    #[serde(default)]
    pub total_results: i64,
    #[serde(default)]
    pub skip: i64,
    #[serde(default)]
    pub take: i64,
}

impl ContributionSearchResult {
    /// Distinct debate external ids named by this result page, in order of
    /// first appearance.
    pub fn debate_ext_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for item in &self.items {
            let Some(summary) = &item.value else { continue };
            let Some(ext_id) = &summary.debate_website_id else {
                continue;
            };
            if !ids.iter().any(|existing| existing == ext_id) {
                ids.push(ext_id.clone());
            }
        }
        ids
    }
}

/// Parses Hansard timestamps, accepting both full datetimes and the
/// date-only strings the API returns for some records.
pub(crate) fn parse_hansard_datetime(raw: &str) -> Result<NaiveDateTime, String> {
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(value);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| format!("invalid date {raw}"));
    }
    Err(format!("unrecognized datetime '{raw}'"))
}

fn hansard_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_hansard_datetime(&raw).map_err(de::Error::custom)
}

fn opt_hansard_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) => parse_hansard_datetime(&value)
            .map(Some)
            .map_err(de::Error::custom),
    }
}
