use std::collections::HashSet;

use proven_xmq::{FilterExpression, FilterKind};

use crate::Error;

/// A parsed tag filter: `*` or `tag-a || tag-b`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagFilter {
    /// Matches every message.
    All,

    /// Matches messages whose tag is one of these.
    Tags(HashSet<String>),
}

impl TagFilter {
    /// Parses a subscription filter.
    ///
    /// # Errors
    /// SQL92 expressions other than the match-all default are not supported.
    pub fn parse(filter: &FilterExpression) -> Result<Self, Error> {
        if filter.is_match_all() {
            return Ok(Self::All);
        }

        if filter.kind == FilterKind::Sql92 {
            return Err(Error::UnsupportedFilter(filter.expression.clone()));
        }

        let tags: HashSet<String> = filter
            .expression
            .split("||")
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() || tags.contains("*") {
            Ok(Self::All)
        } else {
            Ok(Self::Tags(tags))
        }
    }

    /// Whether a message with `tag` passes the filter.
    #[must_use]
    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Tags(tags) => tag.is_some_and(|tag| tags.contains(tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_all() {
        let filter = TagFilter::parse(&FilterExpression::default()).unwrap();
        assert!(filter.matches(None));
        assert!(filter.matches(Some("anything")));
    }

    #[test]
    fn test_tag_list() {
        let filter = TagFilter::parse(&FilterExpression::tag("created || paid")).unwrap();
        assert!(filter.matches(Some("created")));
        assert!(filter.matches(Some("paid")));
        assert!(!filter.matches(Some("refunded")));
        assert!(!filter.matches(None));
    }

    #[test]
    fn test_sql92_unsupported() {
        let err = TagFilter::parse(&FilterExpression::sql92("amount > 10")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter(_)));
        assert_eq!(
            TagFilter::parse(&FilterExpression::sql92("")).unwrap(),
            TagFilter::All
        );
    }
}
