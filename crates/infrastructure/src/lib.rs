//! Storage and cache adapters for the policy engine ports.

#![forbid(unsafe_code)]

mod in_memory_decision_cache;
mod in_memory_rule_store;
mod postgres_rule_store;
mod redis_decision_cache;

#[cfg(test)]
mod engine_scenarios;

pub use in_memory_decision_cache::InMemoryDecisionCache;
pub use in_memory_rule_store::InMemoryRuleStore;
pub use postgres_rule_store::PostgresRuleStore;
pub use redis_decision_cache::RedisDecisionCache;
