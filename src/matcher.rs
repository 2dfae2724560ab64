//! Domain matcher.
//!
//! Decides whether a post references the target domain. Matching is a
//! case-sensitive substring test against link URIs, not a host comparison:
//! `example.com` also matches `notexample.com` and
//! `https://other.org/?ref=example.com`.

use std::fmt;

use crate::types::ContentItem;

/// Where the target domain was found. Sources are checked in declaration
/// order and the first hit wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvidence {
    /// A rich-text link annotation.
    LinkFacet { uri: String },
    /// The attached external link card.
    ExternalEmbed { uri: String },
    /// A legacy `entities` link.
    LegacyEntity { value: String },
}

impl MatchEvidence {
    pub fn source(&self) -> &'static str {
        match self {
            MatchEvidence::LinkFacet { .. } => "link facet",
            MatchEvidence::ExternalEmbed { .. } => "external embed",
            MatchEvidence::LegacyEntity { .. } => "legacy entity",
        }
    }

    pub fn link(&self) -> &str {
        match self {
            MatchEvidence::LinkFacet { uri } | MatchEvidence::ExternalEmbed { uri } => uri,
            MatchEvidence::LegacyEntity { value } => value,
        }
    }
}

impl fmt::Display for MatchEvidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source(), self.link())
    }
}

/// First piece of evidence that `item` references `target_domain`.
pub fn find_evidence(item: &ContentItem, target_domain: &str) -> Option<MatchEvidence> {
    if let Some(uri) = item
        .link_facet_uris()
        .find(|uri| uri.contains(target_domain))
    {
        return Some(MatchEvidence::LinkFacet {
            uri: uri.to_string(),
        });
    }

    if let Some(uri) = item
        .external_embed_uri()
        .filter(|uri| uri.contains(target_domain))
    {
        return Some(MatchEvidence::ExternalEmbed {
            uri: uri.to_string(),
        });
    }

    item.legacy_link_values()
        .find(|value| value.contains(target_domain))
        .map(|value| MatchEvidence::LegacyEntity {
            value: value.to_string(),
        })
}

pub fn matches(item: &ContentItem, target_domain: &str) -> bool {
    find_evidence(item, target_domain).is_some()
}
