//! Role-override resolution for conversation limits and model choice.
//!
//! When any of an actor's roles has an override, the override replaces the
//! scope default. Several matching numeric overrides resolve to the largest;
//! several matching models resolve to the one with the largest context window,
//! ties going to the lexicographically smallest name.

use convoke_core::host::RoleId;
use convoke_core::token;
use std::collections::HashMap;

use crate::db::ScopeConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimits {
    pub max_tokens: usize,
    pub max_retention: usize,
    pub max_retention_time: u64,
    pub model: String,
}

impl ResolvedLimits {
    /// Scope defaults with no role overrides applied.
    pub fn defaults(conf: &ScopeConfig) -> Self {
        Self {
            max_tokens: conf.max_tokens,
            max_retention: conf.max_retention,
            max_retention_time: conf.max_retention_time,
            model: conf.model.clone(),
        }
    }
}

fn max_override<T: Copy + Ord>(overrides: &HashMap<RoleId, T>, roles: &[RoleId]) -> Option<T> {
    roles.iter().filter_map(|r| overrides.get(r).copied()).max()
}

fn best_model<'a>(overrides: &'a HashMap<RoleId, String>, roles: &[RoleId]) -> Option<&'a str> {
    roles
        .iter()
        .filter_map(|r| overrides.get(r).map(String::as_str))
        .min_by(|a, b| {
            token::context_window(b)
                .cmp(&token::context_window(a))
                .then_with(|| a.cmp(b))
        })
}

pub fn resolve_limits(conf: &ScopeConfig, roles: &[RoleId]) -> ResolvedLimits {
    ResolvedLimits {
        max_tokens: max_override(&conf.max_token_role_override, roles).unwrap_or(conf.max_tokens),
        max_retention: max_override(&conf.max_retention_role_override, roles)
            .unwrap_or(conf.max_retention),
        max_retention_time: max_override(&conf.max_time_role_override, roles)
            .unwrap_or(conf.max_retention_time),
        model: best_model(&conf.model_role_overrides, roles)
            .map(str::to_string)
            .unwrap_or_else(|| conf.model.clone()),
    }
}
