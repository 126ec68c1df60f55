pub mod field;
pub mod merge;
pub mod node;
pub mod profile;
pub mod store;

pub use node::{MergedNode, NodeRecord, ProvenanceMap};
pub use profile::ProfileRecord;
pub use store::{ConfigDocument, ConfigStore};
