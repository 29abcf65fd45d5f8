//! Agent listing records as read from the per-zipcode CSV files.

use serde::{Deserialize, Serialize};

use crate::batch::Identified;

/// One agent row.
///
/// Column names follow the enriched listing files (`id`, `Name`, `Company`,
/// `City`, `Zipcode`, `County`). Every column except `id` is optional and
/// extra columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Company", default)]
    pub company: Option<String>,
    #[serde(rename = "City", default)]
    pub city: Option<String>,
    #[serde(rename = "Zipcode", default)]
    pub zipcode: Option<String>,
    #[serde(rename = "County", default)]
    pub county: Option<String>,
}

impl AgentRecord {
    pub fn name(&self) -> Option<&str> {
        non_empty(&self.name)
    }

    pub fn company(&self) -> Option<&str> {
        non_empty(&self.company)
    }

    pub fn city(&self) -> Option<&str> {
        non_empty(&self.city)
    }

    pub fn zipcode(&self) -> Option<&str> {
        non_empty(&self.zipcode)
    }

    pub fn county(&self) -> Option<&str> {
        non_empty(&self.county)
    }
}

impl Identified for AgentRecord {
    fn identifier(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Trimmed value of a field, `None` when absent or blank.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
