//! Matcher - Decide whether an existing resource is the one being ensured

use std::collections::HashMap;

use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{Resource, State, Tags, Value};

/// How strictly an existing resource must agree with the desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrength {
    /// Same CIDR block and exactly the same tag set
    CidrAndTags,
    /// Every desired tag present, extra tags ignored
    TagSubset,
    /// Same `name` attribute
    Name,
    /// Same values for the kind's identity attributes
    Attributes,
    /// Never looked up
    Unchecked,
}

/// Predicate over existing resources of one kind
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCriteria {
    CidrAndTags { cidr_block: String, tags: Tags },
    TagSubset(Tags),
    Name(String),
    Attributes(HashMap<String, Value>),
}

impl MatchCriteria {
    /// Build the criteria for a resource from its kind's match strength
    ///
    /// Returns `None` for kinds that are never looked up.
    pub fn for_resource(resource: &Resource) -> ProviderResult<Option<Self>> {
        let kind = resource.kind();
        let criteria = match kind.match_strength() {
            MatchStrength::CidrAndTags => MatchCriteria::CidrAndTags {
                cidr_block: resource.require_str("cidr_block")?.to_string(),
                tags: resource.tags.clone(),
            },
            MatchStrength::TagSubset => {
                if resource.tags.is_empty() {
                    return Err(ProviderError::invalid_input(
                        "Tag-matched resources need at least one tag",
                    )
                    .for_resource(resource.id.clone()));
                }
                MatchCriteria::TagSubset(resource.tags.clone())
            }
            MatchStrength::Name => MatchCriteria::Name(resource.require_str("name")?.to_string()),
            MatchStrength::Attributes => {
                let mut expected = HashMap::new();
                for attr in kind.identity_attributes() {
                    let value = resource.attributes.get(*attr).ok_or_else(|| {
                        ProviderError::invalid_input(format!(
                            "Missing identity attribute: {}",
                            attr
                        ))
                        .for_resource(resource.id.clone())
                    })?;
                    expected.insert(attr.to_string(), value.clone());
                }
                MatchCriteria::Attributes(expected)
            }
            MatchStrength::Unchecked => return Ok(None),
        };
        Ok(Some(criteria))
    }

    /// Check whether an existing resource satisfies this criteria
    pub fn matches(&self, state: &State) -> bool {
        match self {
            MatchCriteria::CidrAndTags { cidr_block, tags } => {
                state.get_str("cidr_block") == Some(cidr_block.as_str()) && state.tags == *tags
            }
            MatchCriteria::TagSubset(tags) => state.tags.contains_all(tags),
            MatchCriteria::Name(name) => state.get_str("name") == Some(name.as_str()),
            MatchCriteria::Attributes(expected) => expected
                .iter()
                .all(|(k, v)| state.attributes.get(k) == Some(v)),
        }
    }
}
