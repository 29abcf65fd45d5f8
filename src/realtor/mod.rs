//! Real-estate agent domain: input records, query building and the contact
//! schema produced by extraction.

pub mod contact;
pub mod query;
pub mod record;

pub use contact::AgentContact;
pub use query::{extraction_query, search_query, DEFAULT_STATE};
pub use record::AgentRecord;
