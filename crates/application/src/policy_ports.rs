mod decision_cache;
mod records;
mod rule_store;

pub use decision_cache::{CacheStamp, DecisionCache, DecisionKey};
pub use records::{RoleMetadata, WriteOutcome};
pub use rule_store::{RuleStore, RuleTransaction};
