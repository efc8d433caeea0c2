//! Ordered permission rules.

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use patchwright_config::PermissionDefault as Decision;

const PERMISSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::permission");

/// Matches one attribute of an invocation; `*` matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
    /// Matches every value.
    Any,
    /// Matches exactly this value.
    Exact(String),
}

impl Selector {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
        }
    }
}

impl From<String> for Selector {
    fn from(value: String) -> Self {
        if value == "*" {
            Self::Any
        } else {
            Self::Exact(value)
        }
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        match selector {
            Selector::Any => "*".to_owned(),
            Selector::Exact(value) => value,
        }
    }
}

/// One row of the permission table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PermissionRule {
    /// Which principals the rule covers.
    pub principal: Selector,
    /// Which tools the rule covers.
    pub tool: Selector,
    /// Which resource classes the rule covers, e.g. `filesystem`.
    pub resource: Selector,
    /// Outcome when the rule matches.
    pub decision: Decision,
}

impl PermissionRule {
    /// Builds a rule from three selectors and a decision.
    #[must_use]
    pub fn new(
        principal: impl Into<Selector>,
        tool: impl Into<Selector>,
        resource: impl Into<Selector>,
        decision: Decision,
    ) -> Self {
        Self {
            principal: principal.into(),
            tool: tool.into(),
            resource: resource.into(),
            decision,
        }
    }

    fn matches(&self, request: &PermissionRequest<'_>) -> bool {
        self.principal.matches(request.principal)
            && self.tool.matches(request.tool)
            && self.resource.matches(request.resource_class)
    }
}

/// Attributes of an invocation checked against the rules.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PermissionRequest<'a> {
    /// Requesting principal.
    pub principal: &'a str,
    /// Requested tool name.
    pub tool: &'a str,
    /// Class of resource the tool touches.
    pub resource_class: &'a str,
}

/// First-match rule table with a fallback decision.
#[derive(Debug)]
pub struct PermissionGate {
    rules: RwLock<Vec<PermissionRule>>,
    fallback: Decision,
}

impl PermissionGate {
    /// Creates an empty table answering `fallback` for every request.
    #[must_use]
    pub fn new(fallback: Decision) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            fallback,
        }
    }

    /// Decision for `request`: the first matching rule, else the fallback.
    #[must_use]
    pub fn evaluate(&self, request: &PermissionRequest<'_>) -> Decision {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let decision = rules
            .iter()
            .find(|rule| rule.matches(request))
            .map_or(self.fallback, |rule| rule.decision);
        debug!(
            target: PERMISSION_TARGET,
            principal = request.principal,
            tool = request.tool,
            resource = request.resource_class,
            %decision,
            "permission evaluated"
        );
        decision
    }

    /// Appends a rule after the existing ones.
    pub fn push_rule(&self, rule: PermissionRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    /// Replaces the whole table.
    pub fn replace_rules(&self, rules: Vec<PermissionRule>) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    /// Copy of the current table.
    #[must_use]
    pub fn rules(&self) -> Vec<PermissionRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn request<'a>(principal: &'a str, tool: &'a str, resource: &'a str) -> PermissionRequest<'a> {
        PermissionRequest {
            principal,
            tool,
            resource_class: resource,
        }
    }

    #[rstest]
    #[case(Decision::Allow)]
    #[case(Decision::Deny)]
    #[case(Decision::RequireConfirmation)]
    fn empty_table_uses_fallback(#[case] fallback: Decision) {
        let gate = PermissionGate::new(fallback);
        assert_eq!(gate.evaluate(&request("a", "b", "c")), fallback);
    }

    #[test]
    fn first_matching_rule_wins() {
        let gate = PermissionGate::new(Decision::Allow);
        gate.push_rule(PermissionRule::new("mallory", "*", "*", Decision::Deny));
        gate.push_rule(PermissionRule::new(
            "*",
            "execute_command",
            "process",
            Decision::RequireConfirmation,
        ));
        gate.push_rule(PermissionRule::new("mallory", "edit_file", "*", Decision::Allow));

        assert_eq!(
            gate.evaluate(&request("mallory", "edit_file", "filesystem")),
            Decision::Deny
        );
        assert_eq!(
            gate.evaluate(&request("alice", "execute_command", "process")),
            Decision::RequireConfirmation
        );
        assert_eq!(
            gate.evaluate(&request("alice", "edit_file", "filesystem")),
            Decision::Allow
        );
    }

    #[test]
    fn rules_deserialise_with_wildcards() {
        let rule: PermissionRule = serde_json::from_str(
            r#"{"principal": "*", "tool": "write_file", "resource": "*", "decision": "deny"}"#,
        )
        .expect("rule parses");
        assert_eq!(
            rule,
            PermissionRule::new(Selector::Any, "write_file", Selector::Any, Decision::Deny)
        );
    }

    #[test]
    fn replacing_rules_discards_old_ones() {
        let gate = PermissionGate::new(Decision::Allow);
        gate.push_rule(PermissionRule::new("*", "*", "*", Decision::Deny));
        gate.replace_rules(Vec::new());
        assert!(gate.rules().is_empty());
        assert_eq!(gate.evaluate(&request("a", "b", "c")), Decision::Allow);
    }
}
