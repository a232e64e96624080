//! Structural matching of capability patterns against envelopes. Patterns
//! are precompiled once per capability-set change into a [`MatcherNode`]
//! tree rather than re-parsed on every envelope.

use globset::{Glob, GlobMatcher};
use mew_core::{CapabilityPattern, CapabilitySet, Envelope};
use regex::Regex;
use serde_json::Value;

/// Outcome of checking a sender's capability set against an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// At least one positive pattern matched and no negative pattern matched.
    Allowed,
    /// No positive pattern matched, or a negative pattern matched.
    Denied,
}

impl MatchDecision {
    /// Convenience predicate.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Whether a compiled capability entry grants or forbids a match.
///
/// A top-level string pattern prefixed with `!` is a negative capability:
/// if the envelope matches the un-prefixed pattern, the capability set as a
/// whole denies the envelope regardless of any positive match: denial
/// always takes precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Allow,
    Deny,
}

/// What a compiled pattern is matched against: the bare `kind` string (for
/// string/array-shorthand capabilities like `"chat"` or `["chat", "mcp/*"]`)
/// or the full envelope view (for structured object patterns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Kind,
    Envelope,
}

/// A single compiled capability entry.
struct CompiledEntry {
    polarity: Polarity,
    target: Target,
    node: MatcherNode,
}

/// Structural matcher tree mirroring a capability pattern's JSON shape, with
/// string leaves precompiled into glob/regex/literal/negated matchers.
enum MatcherNode {
    Str(StringMatcher),
    Scalar(Value),
    Array(Vec<MatcherNode>),
    Object(Vec<(String, MatcherNode)>),
}

enum StringMatcher {
    Literal(String),
    Glob(GlobMatcher),
    Regex(Regex),
    Negated(Box<StringMatcher>),
}

fn compile_string(pattern: &str) -> StringMatcher {
    if let Some(rest) = pattern.strip_prefix('!') {
        return StringMatcher::Negated(Box::new(compile_string(rest)));
    }
    if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let body = &pattern[1..pattern.len() - 1];
        return match Regex::new(body) {
            Ok(re) => StringMatcher::Regex(re),
            // An invalid regex pattern matches nothing rather than panicking
            // or silently allowing everything.
            Err(_) => StringMatcher::Regex(Regex::new("$^").expect("static pattern is valid")),
        };
    }
    if pattern.contains('*') || pattern.contains('?') {
        return match Glob::new(pattern).map(|g| g.compile_matcher()) {
            Ok(matcher) => StringMatcher::Glob(matcher),
            Err(_) => StringMatcher::Literal(pattern.to_string()),
        };
    }
    StringMatcher::Literal(pattern.to_string())
}

fn eval_string(matcher: &StringMatcher, target: &str) -> bool {
    match matcher {
        StringMatcher::Literal(lit) => lit == target,
        StringMatcher::Glob(g) => g.is_match(target),
        StringMatcher::Regex(re) => re.is_match(target),
        StringMatcher::Negated(inner) => !eval_string(inner, target),
    }
}

fn compile_node(value: &Value) -> MatcherNode {
    match value {
        Value::String(s) => MatcherNode::Str(compile_string(s)),
        Value::Array(items) => MatcherNode::Array(items.iter().map(compile_node).collect()),
        Value::Object(map) => {
            MatcherNode::Object(map.iter().map(|(k, v)| (k.clone(), compile_node(v))).collect())
        }
        other => MatcherNode::Scalar(other.clone()),
    }
}

/// Evaluate a single `$.foo.bar`-style dotted JSONPath key against the root
/// envelope view. Only the plain-key subset is supported; no array indices
/// or filters.
fn jsonpath_lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.strip_prefix('.').unwrap_or(path);
    if trimmed.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in trimmed.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn eval_node(node: &MatcherNode, target: &Value, root: &Value) -> bool {
    match node {
        MatcherNode::Str(sm) => target.as_str().is_some_and(|t| eval_string(sm, t)),
        MatcherNode::Scalar(v) => v == target,
        MatcherNode::Array(items) => items.iter().any(|n| eval_node(n, target, root)),
        MatcherNode::Object(fields) => fields.iter().all(|(key, node)| {
            if key == "**" {
                return deep_contains(node, target, root);
            }
            if let Some(path) = key.strip_prefix('$') {
                let resolved = jsonpath_lookup(root, path);
                return eval_node(node, resolved.unwrap_or(&Value::Null), root);
            }
            let field = target.get(key).unwrap_or(&Value::Null);
            eval_node(node, field, root)
        }),
    }
}

/// Search `target` and every value nested within it for a match: the
/// `**`-key "deep match" rule.
fn deep_contains(node: &MatcherNode, target: &Value, root: &Value) -> bool {
    if eval_node(node, target, root) {
        return true;
    }
    match target {
        Value::Object(map) => map.values().any(|v| deep_contains(node, v, root)),
        Value::Array(items) => items.iter().any(|v| deep_contains(node, v, root)),
        _ => false,
    }
}

fn polarity_and_value(pattern: &CapabilityPattern) -> (Polarity, Value) {
    match pattern.as_value() {
        Value::String(s) => match s.strip_prefix('!') {
            Some(rest) => (Polarity::Deny, Value::String(rest.to_string())),
            None => (Polarity::Allow, Value::String(s.clone())),
        },
        other => (Polarity::Allow, other.clone()),
    }
}

/// A capability set precompiled into matcher trees, reusable across many
/// envelopes without recompiling globs/regexes.
pub struct CompiledCapabilitySet {
    entries: Vec<CompiledEntry>,
}

impl CompiledCapabilitySet {
    /// Precompile every pattern in `capabilities`.
    #[must_use]
    pub fn compile(capabilities: &CapabilitySet) -> Self {
        let entries = capabilities
            .iter()
            .map(|pattern| {
                let (polarity, value) = polarity_and_value(pattern);
                let target = if value.is_object() { Target::Envelope } else { Target::Kind };
                CompiledEntry {
                    polarity,
                    target,
                    node: compile_node(&value),
                }
            })
            .collect();
        Self { entries }
    }

    /// Decide whether `envelope` is authorized under this compiled set.
    #[must_use]
    pub fn evaluate(&self, envelope: &Envelope) -> MatchDecision {
        let root = serde_json::to_value(envelope).unwrap_or(Value::Null);
        let kind_value = Value::String(envelope.kind.clone());
        let mut allowed = false;
        for entry in &self.entries {
            let target = match entry.target {
                Target::Kind => &kind_value,
                Target::Envelope => &root,
            };
            let matched = eval_node(&entry.node, target, &root);
            if matched {
                match entry.polarity {
                    Polarity::Deny => return MatchDecision::Denied,
                    Polarity::Allow => allowed = true,
                }
            }
        }
        if allowed {
            MatchDecision::Allowed
        } else {
            MatchDecision::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_core::Envelope;
    use serde_json::json;

    fn caps(values: &[&str]) -> CapabilitySet {
        values.iter().map(|s| CapabilityPattern::simple(*s)).collect()
    }

    fn chat(from: &str) -> Envelope {
        Envelope::originate(from, "chat", json!({"text": "hi"}))
    }

    fn mcp_request(from: &str) -> Envelope {
        Envelope::originate(from, "mcp/request", json!({"method": "tools/call"}))
    }

    #[test]
    fn simple_kind_match_allows() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["chat"]));
        assert_eq!(compiled.evaluate(&chat("alice")), MatchDecision::Allowed);
    }

    #[test]
    fn simple_kind_mismatch_denies() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["chat"]));
        assert_eq!(
            compiled.evaluate(&mcp_request("alice")),
            MatchDecision::Denied
        );
    }

    #[test]
    fn glob_wildcard_matches_subtree() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["mcp/*"]));
        assert_eq!(
            compiled.evaluate(&mcp_request("alice")),
            MatchDecision::Allowed
        );
    }

    #[test]
    fn regex_pattern_matches() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["/^mcp\\/(request|response)$/"]));
        assert_eq!(
            compiled.evaluate(&mcp_request("alice")),
            MatchDecision::Allowed
        );
        let reasoning = Envelope::originate("alice", "reasoning/start", json!({}));
        assert_eq!(compiled.evaluate(&reasoning), MatchDecision::Denied);
    }

    #[test]
    fn negation_at_top_level_denies_even_with_other_allow() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["mcp/*", "!mcp/request"]));
        assert_eq!(
            compiled.evaluate(&mcp_request("alice")),
            MatchDecision::Denied
        );
        let response = Envelope::originate("alice", "mcp/response", json!({}));
        assert_eq!(compiled.evaluate(&response), MatchDecision::Allowed);
    }

    #[test]
    fn object_pattern_matches_structured_payload() {
        let pattern = CapabilityPattern::structured(json!({
            "kind": "mcp/request",
            "payload": {"method": "tools/call"}
        }));
        let compiled = CompiledCapabilitySet::compile(&vec![pattern]);
        assert_eq!(
            compiled.evaluate(&mcp_request("alice")),
            MatchDecision::Allowed
        );

        let other = Envelope::originate("alice", "mcp/request", json!({"method": "tools/list"}));
        assert_eq!(compiled.evaluate(&other), MatchDecision::Denied);
    }

    #[test]
    fn array_pattern_is_one_of() {
        let pattern = CapabilityPattern::structured(json!({
            "kind": "mcp/request",
            "payload": {"method": ["tools/call", "tools/list"]}
        }));
        let compiled = CompiledCapabilitySet::compile(&vec![pattern]);
        let call = Envelope::originate("a", "mcp/request", json!({"method": "tools/call"}));
        let list = Envelope::originate("a", "mcp/request", json!({"method": "tools/list"}));
        let other = Envelope::originate("a", "mcp/request", json!({"method": "tools/delete"}));
        assert_eq!(compiled.evaluate(&call), MatchDecision::Allowed);
        assert_eq!(compiled.evaluate(&list), MatchDecision::Allowed);
        assert_eq!(compiled.evaluate(&other), MatchDecision::Denied);
    }

    #[test]
    fn deep_match_key_searches_subtree() {
        let pattern = CapabilityPattern::structured(json!({
            "payload": {"**": "rm"}
        }));
        let compiled = CompiledCapabilitySet::compile(&vec![pattern]);
        let nested = Envelope::originate(
            "a",
            "mcp/request",
            json!({"params": {"name": "rm", "args": []}}),
        );
        assert_eq!(compiled.evaluate(&nested), MatchDecision::Allowed);

        let absent = Envelope::originate("a", "mcp/request", json!({"params": {"name": "ls"}}));
        assert_eq!(compiled.evaluate(&absent), MatchDecision::Denied);
    }

    #[test]
    fn jsonpath_key_resolves_against_envelope_root() {
        let pattern = CapabilityPattern::structured(json!({
            "$.from": "alice"
        }));
        let compiled = CompiledCapabilitySet::compile(&vec![pattern]);
        assert_eq!(compiled.evaluate(&chat("alice")), MatchDecision::Allowed);
        assert_eq!(compiled.evaluate(&chat("bob")), MatchDecision::Denied);
    }

    #[test]
    fn no_capabilities_denies_everything() {
        let compiled = CompiledCapabilitySet::compile(&vec![]);
        assert_eq!(compiled.evaluate(&chat("alice")), MatchDecision::Denied);
    }

    #[test]
    fn multiple_positive_patterns_any_match_allows() {
        let compiled = CompiledCapabilitySet::compile(&caps(&["chat", "reasoning/*"]));
        assert_eq!(compiled.evaluate(&chat("a")), MatchDecision::Allowed);
        let reasoning = Envelope::originate("a", "reasoning/thought", json!({}));
        assert_eq!(compiled.evaluate(&reasoning), MatchDecision::Allowed);
    }

    #[test]
    fn nested_string_negation_scopes_an_allow_pattern() {
        let pattern = CapabilityPattern::structured(json!({
            "kind": "mcp/request",
            "payload": {"name": "!rm"}
        }));
        let compiled = CompiledCapabilitySet::compile(&vec![pattern]);
        let safe = Envelope::originate("a", "mcp/request", json!({"name": "ls"}));
        let unsafe_call = Envelope::originate("a", "mcp/request", json!({"name": "rm"}));
        assert_eq!(compiled.evaluate(&safe), MatchDecision::Allowed);
        assert_eq!(compiled.evaluate(&unsafe_call), MatchDecision::Denied);
    }
}
