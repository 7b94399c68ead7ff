use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::constants::REGEX_PREFIX;
use crate::error::MetsError;

/// A filter value: exact string equality or an anchored regular expression.
#[derive(Debug, Clone)]
pub enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    /// Parses a raw filter value. Values starting with `//` become full-string
    /// regular expressions with the marker stripped; anything else is literal.
    pub fn parse(raw: &str) -> Result<Self, MetsError> {
        let Some(pattern) = raw.strip_prefix(REGEX_PREFIX) else {
            return Ok(Self::Literal(raw.to_string()));
        };
        let anchored = format!("^(?:{pattern})$");
        Regex::new(&anchored)
            .map(Self::Pattern)
            .map_err(|err| MetsError::InvalidPattern {
                pattern: pattern.to_string(),
                message: err.to_string(),
            })
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == candidate,
            Self::Pattern(regex) => regex.is_match(candidate),
        }
    }

    /// Absent attributes never match.
    pub(crate) fn matches_opt(&self, candidate: Option<&str>) -> bool {
        candidate.is_some_and(|value| self.matches(value))
    }
}

impl FromStr for Matcher {
    type Err = MetsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.write_str(value),
            Self::Pattern(regex) => {
                let inner = regex
                    .as_str()
                    .strip_prefix("^(?:")
                    .and_then(|rest| rest.strip_suffix(")$"))
                    .unwrap_or(regex.as_str());
                write!(f, "{REGEX_PREFIX}{inner}")
            }
        }
    }
}

/// Criteria for [`MetsDocument::find_files`](crate::MetsDocument::find_files).
///
/// Every criterion that is set must match. An empty filter matches all files.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub id: Option<Matcher>,
    pub file_grp: Option<Matcher>,
    pub page_ids: Option<Vec<String>>,
    pub mimetype: Option<Matcher>,
    pub url: Option<Matcher>,
    pub local_only: bool,
}

impl FileFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a literal ID lookup.
    #[must_use]
    pub fn by_id(id: &str) -> Self {
        Self::new().id(Matcher::literal(id))
    }

    #[must_use]
    pub fn id(mut self, matcher: Matcher) -> Self {
        self.id = Some(matcher);
        self
    }

    #[must_use]
    pub fn file_grp(mut self, matcher: Matcher) -> Self {
        self.file_grp = Some(matcher);
        self
    }

    #[must_use]
    pub fn mimetype(mut self, matcher: Matcher) -> Self {
        self.mimetype = Some(matcher);
        self
    }

    #[must_use]
    pub fn url(mut self, matcher: Matcher) -> Self {
        self.url = Some(matcher);
        self
    }

    #[must_use]
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Restricts results to files manifesting any of the comma-separated page IDs.
    ///
    /// Page IDs are matched literally; a regex marker is rejected.
    pub fn page_id(mut self, raw: &str) -> Result<Self, MetsError> {
        if raw.starts_with(REGEX_PREFIX) {
            return Err(MetsError::InvalidArgument(
                "pageId does not support regular expressions".to_string(),
            ));
        }
        let ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        // nothing named means no page restriction
        self.page_ids = (!ids.is_empty()).then_some(ids);
        Ok(self)
    }
}
