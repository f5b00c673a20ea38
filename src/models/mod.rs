mod collection;
mod envelope;
mod fields;
mod query;
mod record;
mod session;

pub use collection::{is_valid_collection_name, Collection};
pub use envelope::Envelope;
pub use fields::{format_timestamp, parse_timestamp, FieldValue, Fields, CREATED_AT, UPDATED_AT};
pub use query::{apply as apply_query, Condition, Operator};
pub use record::Record;
pub use session::{ProfileUpdate, ProviderKind, Session, SessionEvent};
