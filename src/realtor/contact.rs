//! Contact details extracted for one agent.

use serde::{Deserialize, Serialize};

use crate::batch::Schema;

/// Structured contact information produced by the extraction stage.
///
/// Every field is optional: the model fills only what the search results
/// actually show.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentContact {
    /// Most relevant professional email.
    pub email: Option<String>,
    /// Other emails of the agent or their brokerage.
    pub other_emails: Option<Vec<String>>,
    /// Most likely email when no explicit one was found.
    pub possible_email: Option<String>,
    pub phone: Option<String>,
    pub other_phones: Option<Vec<String>>,
    /// City where the agent mainly operates.
    pub city: Option<String>,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub website: Option<String>,
    pub social_media: Option<Vec<String>>,
    /// Google review rating of the agent or brokerage, 0 to 5.
    pub google_review_star_rating: Option<f64>,
    pub most_recent_reviews: Option<Vec<String>>,
    /// Anything useful for a personalised first contact.
    pub additional_info: Option<String>,
}

/// Field guide embedded in the extraction prompt.
pub const CONTACT_FIELDS: &str = r#"{
  "email": "most relevant professional email address of the agent, or null",
  "other_emails": ["other email addresses of the agent or their brokerage"],
  "possible_email": "most likely email address when no explicit one is shown, or null",
  "phone": "most relevant professional phone number of the agent or brokerage, or null",
  "other_phones": ["other contact phone numbers"],
  "city": "city where the agent primarily operates, or null",
  "age": "age in years as an integer, or null",
  "gender": "gender, or null",
  "website": "professional website or listing page, or null",
  "social_media": ["social media profiles related to the agent's business"],
  "google_review_star_rating": "Google review rating between 0 and 5, or null",
  "most_recent_reviews": ["most recent reviews"],
  "additional_info": "anything worth knowing before writing a personalised message, or null"
}"#;

impl AgentContact {
    /// Returns true if no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == AgentContact::default()
    }

    fn emails(&self) -> impl Iterator<Item = &str> {
        self.email
            .iter()
            .chain(self.possible_email.iter())
            .chain(self.other_emails.iter().flatten())
            .map(String::as_str)
    }
}

impl Schema for AgentContact {
    fn validate(&self) -> Result<(), String> {
        if let Some(bad) = self.emails().find(|email| !email.contains('@')) {
            return Err(format!("'{}' is not an email address", bad));
        }
        if let Some(rating) = self.google_review_star_rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(format!("star rating {} is outside 0..=5", rating));
            }
        }
        if let Some(age) = self.age {
            if !(0..=120).contains(&age) {
                return Err(format!("age {} is outside 0..=120", age));
            }
        }
        Ok(())
    }
}
