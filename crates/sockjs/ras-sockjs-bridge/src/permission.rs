//! Allow-list permission matching for bus addresses and message bodies
//!
//! Rules are evaluated in declaration order and the first rule that matches
//! decides. Nothing matches unless a rule says so.

use crate::{BridgeError, BridgeResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One allow-list entry as written in configuration
///
/// ```json
/// { "address": "news.*", "match": { "priority": "re:high|urgent" }, "requires_auth": true }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Exact address, or a dotted pattern where `*` stands for one segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Regular expression the whole address must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_re: Option<String>,

    /// Fields the message body must carry; string values starting with
    /// `re:` are regular expressions over string fields
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matches: Option<Map<String, Value>>,

    #[serde(default)]
    pub requires_auth: bool,
}

impl PermissionRule {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub fn address_re(pattern: impl Into<String>) -> Self {
        Self {
            address_re: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn with_match(mut self, field: impl Into<String>, value: Value) -> Self {
        self.matches
            .get_or_insert_with(Map::new)
            .insert(field.into(), value);
        self
    }

    pub fn requiring_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }
}

#[derive(Debug, Clone)]
enum AddressPattern {
    Any,
    Exact(String),
    Segments(Vec<Option<String>>),
    Regex(Regex),
}

impl AddressPattern {
    fn matches(&self, address: &str) -> bool {
        match self {
            AddressPattern::Any => true,
            AddressPattern::Exact(expected) => expected == address,
            AddressPattern::Segments(segments) => {
                let parts: Vec<&str> = address.split('.').collect();
                parts.len() == segments.len()
                    && segments.iter().zip(parts).all(|(segment, part)| match segment {
                        Some(literal) => literal == part,
                        None => !part.is_empty(),
                    })
            }
            AddressPattern::Regex(re) => re.is_match(address),
        }
    }
}

#[derive(Debug, Clone)]
enum FieldMatcher {
    Equals(Value),
    Regex(Regex),
}

impl FieldMatcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldMatcher::Equals(expected) => expected == value,
            FieldMatcher::Regex(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
        }
    }
}

/// A rule ready for evaluation
#[derive(Debug, Clone)]
pub struct CompiledRule {
    address: AddressPattern,
    fields: Vec<(String, FieldMatcher)>,
    requires_auth: bool,
}

impl CompiledRule {
    fn compile(rule: &PermissionRule) -> BridgeResult<Self> {
        let address = match (&rule.address, &rule.address_re) {
            (Some(_), Some(_)) => {
                return Err(BridgeError::InvalidRule(
                    "a rule may not set both address and address_re".to_string(),
                ));
            }
            (Some(address), None) if address.split('.').any(|segment| segment == "*") => {
                AddressPattern::Segments(
                    address
                        .split('.')
                        .map(|segment| (segment != "*").then(|| segment.to_string()))
                        .collect(),
                )
            }
            (Some(address), None) => AddressPattern::Exact(address.clone()),
            (None, Some(pattern)) => AddressPattern::Regex(anchored(pattern)?),
            (None, None) => AddressPattern::Any,
        };

        let mut fields = Vec::new();
        for (name, value) in rule.matches.iter().flatten() {
            let matcher = match value.as_str().and_then(|s| s.strip_prefix("re:")) {
                Some(pattern) => FieldMatcher::Regex(anchored(pattern)?),
                None => FieldMatcher::Equals(value.clone()),
            };
            fields.push((name.clone(), matcher));
        }

        Ok(Self {
            address,
            fields,
            requires_auth: rule.requires_auth,
        })
    }

    fn matches(&self, address: &str, body: &Value) -> bool {
        if !self.address.matches(address) {
            return false;
        }
        if self.fields.is_empty() {
            return true;
        }
        let Some(object) = body.as_object() else {
            return false;
        };
        self.fields.iter().all(|(name, matcher)| {
            object
                .get(name)
                .map(|value| matcher.matches(value))
                .unwrap_or(false)
        })
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

fn anchored(pattern: &str) -> BridgeResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|err| BridgeError::InvalidRule(format!("bad regex '{}': {}", pattern, err)))
}

/// An ordered allow-list for one direction of traffic
#[derive(Debug, Clone, Default)]
pub struct PermissionMatcher {
    rules: Vec<CompiledRule>,
}

impl PermissionMatcher {
    pub fn new(rules: &[PermissionRule]) -> BridgeResult<Self> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<BridgeResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// A matcher that permits nothing
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// The first rule permitting `body` on `address`, if any
    pub fn check(&self, address: &str, body: &Value) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(address, body))
    }

    pub fn permits(&self, address: &str, body: &Value) -> bool {
        self.check(address, body).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
