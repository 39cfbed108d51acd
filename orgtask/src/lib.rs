//! Org outlines turned into GTD tasks and projects.
//!
//! The pipeline is line-oriented and never fails on content:
//! - [`lexer`] classifies every line into a [`lexer::Token`].
//! - [`parser`] recognizes headlines, property drawers and timestamps, and walks the token
//!   stream once, grouping body lines under their headline.
//! - [`transform`] maps the grouped entries onto [`core::Task`] and [`core::Project`].
//!
//! Anything odd in the text ends up in [`core::ParseResult::errors`], next to whatever could
//! still be parsed.

pub mod core {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use uuid::Uuid;

    /* ------------------------------- IDs ------------------------------- */

    /// Identifier shared by tasks and projects.
    ///
    /// Derived from content rather than generated, so parsing an unchanged file twice
    /// yields the same identifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntityId(pub Uuid);

    impl EntityId {
        const NAMESPACE: Uuid = Uuid::from_u128(0x3c1f_52d6_8a0e_4b7f_9d21_6e4a_0f83_b7c5);

        /// `anchor` tells apart entries sharing a title within one file.
        pub fn derive(title: &str, source_path: &str, anchor: usize) -> Self {
            let name = format!("{source_path}\u{1f}{title}\u{1f}{anchor}");
            Self(Uuid::new_v5(&Self::NAMESPACE, name.as_bytes()))
        }
    }

    impl fmt::Display for EntityId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Headline tag, kept as written.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Tag(pub String);

    impl From<&str> for Tag {
        fn from(s: &str) -> Self {
            Self(s.to_string())
        }
    }

    /// Priority cookie rank; `[#A]` is the most urgent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub enum Priority {
        A,
        B,
        C,
    }

    impl Priority {
        pub const ALL: [Priority; 3] = [Priority::A, Priority::B, Priority::C];

        pub fn from_char(c: char) -> Option<Self> {
            match c {
                'A' => Some(Self::A),
                'B' => Some(Self::B),
                'C' => Some(Self::C),
                _ => None,
            }
        }

        pub fn as_char(self) -> char {
            match self {
                Self::A => 'A',
                Self::B => 'B',
                Self::C => 'C',
            }
        }
    }

    /// Lifecycle of a task.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum TaskState {
        #[default]
        NotStarted,
        Actionable,
        Blocked,
        Deferred,
        Completed,
        Abandoned,
    }

    impl TaskState {
        pub const ALL: [TaskState; 6] = [
            TaskState::NotStarted,
            TaskState::Actionable,
            TaskState::Blocked,
            TaskState::Deferred,
            TaskState::Completed,
            TaskState::Abandoned,
        ];

        /// Maps a headline keyword to a state. Org keywords (`TODO`, `NEXT`, ...) match
        /// exactly, and so do the lowercase state names (`actionable`, ...).
        pub fn from_keyword(word: &str) -> Option<Self> {
            match word {
                "TODO" => Some(Self::NotStarted),
                "NEXT" => Some(Self::Actionable),
                "WAITING" | "WAIT" => Some(Self::Blocked),
                "SOMEDAY" | "MAYBE" => Some(Self::Deferred),
                "DONE" => Some(Self::Completed),
                "CANCELLED" | "CANCELED" => Some(Self::Abandoned),
                _ => Self::ALL.into_iter().find(|state| state.name() == word),
            }
        }

        pub fn name(self) -> &'static str {
            match self {
                Self::NotStarted => "not-started",
                Self::Actionable => "actionable",
                Self::Blocked => "blocked",
                Self::Deferred => "deferred",
                Self::Completed => "completed",
                Self::Abandoned => "abandoned",
            }
        }

        /// The conventional org keyword for this state.
        pub fn keyword(self) -> &'static str {
            match self {
                Self::NotStarted => "TODO",
                Self::Actionable => "NEXT",
                Self::Blocked => "WAITING",
                Self::Deferred => "SOMEDAY",
                Self::Completed => "DONE",
                Self::Abandoned => "CANCELLED",
            }
        }
    }

    impl fmt::Display for TaskState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum ProjectStatus {
        #[default]
        Active,
        Deferred,
        Completed,
        Archived,
    }

    impl ProjectStatus {
        pub fn from_name(name: &str) -> Option<Self> {
            match name.trim().to_ascii_lowercase().as_str() {
                "active" => Some(Self::Active),
                "deferred" => Some(Self::Deferred),
                "completed" => Some(Self::Completed),
                "archived" => Some(Self::Archived),
                _ => None,
            }
        }
    }

    impl fmt::Display for ProjectStatus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Active => "active",
                Self::Deferred => "deferred",
                Self::Completed => "completed",
                Self::Archived => "archived",
            })
        }
    }

    /// Work/home style partition of tasks and projects. Always trimmed and lowercase.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Context(String);

    impl Context {
        pub fn new(name: &str) -> Self {
            Self(name.trim().to_lowercase())
        }

        pub fn work() -> Self {
            Self("work".to_string())
        }

        pub fn home() -> Self {
            Self("home".to_string())
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for Context {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// A date with optional time of day and repeater, as written in `<...>` or `[...]`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Timestamp {
        /// Whether the timestamp is "active" (`<...>`) or inactive (`[...]`).
        pub active: bool,

        /// If `time` is None, it's an all-day date.
        pub date: NaiveDate,
        pub time: Option<NaiveTime>,

        /// Optional repeater cookie (`+1w`, `++1m`, `.+2d`).
        pub repeater: Option<Repeater>,
    }

    impl Timestamp {
        /// Active, all-day, non-repeating.
        pub fn on(date: NaiveDate) -> Self {
            Self {
                active: true,
                date,
                time: None,
                repeater: None,
            }
        }

        pub fn at(mut self, time: NaiveTime) -> Self {
            self.time = Some(time);
            self
        }

        pub fn every(mut self, repeater: Repeater) -> Self {
            self.repeater = Some(repeater);
            self
        }

        /// Start of the timestamp; all-day timestamps start at midnight.
        pub fn naive(&self) -> NaiveDateTime {
            self.date.and_time(self.time.unwrap_or(NaiveTime::MIN))
        }

        /// Timestamps carry no zone; they are read as UTC.
        pub fn instant(&self) -> DateTime<Utc> {
            self.naive().and_utc()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Repeater {
        pub kind: RepeaterKind,
        pub count: i32,
        pub unit: RepeatUnit,
    }

    /// `+` (from last closed), `++` (from base), `.+` (from now).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum RepeaterKind {
        FromLast, // `+`
        FromBase, // `++`
        FromNow,  // `.+`
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum RepeatUnit {
        Day,
        Week,
        Month,
        Year,
    }

    impl RepeatUnit {
        pub fn from_char(c: char) -> Option<Self> {
            match c {
                'd' => Some(Self::Day),
                'w' => Some(Self::Week),
                'm' => Some(Self::Month),
                'y' => Some(Self::Year),
                _ => None,
            }
        }

        pub fn as_char(self) -> char {
            match self {
                Self::Day => 'd',
                Self::Week => 'w',
                Self::Month => 'm',
                Self::Year => 'y',
            }
        }
    }

    /// A property drawer value after coercion. Effort and cost are numbers, the rest text.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum PropertyValue {
        Number(f64),
        Text(String),
    }

    impl PropertyValue {
        pub fn as_number(&self) -> Option<f64> {
            match self {
                Self::Number(n) => Some(*n),
                Self::Text(_) => None,
            }
        }

        pub fn as_text(&self) -> Option<&str> {
            match self {
                Self::Text(t) => Some(t),
                Self::Number(_) => None,
            }
        }
    }

    /// Property drawer contents keyed by lowercase name, in first-seen order.
    pub type Properties = IndexMap<String, PropertyValue>;

    /* ------------------------------ Entities ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Task {
        pub id: EntityId,
        pub title: String,
        pub state: TaskState,
        pub priority: Option<Priority>,

        /// Title of the project this task belongs to; consumers match it against projects.
        pub project: Option<String>,
        pub context: Context,

        pub scheduled: Option<Timestamp>,
        /// End of a `<start>--<end>` scheduled range.
        pub scheduled_end: Option<Timestamp>,
        pub deadline: Option<Timestamp>,

        /// Estimated effort in hours.
        pub effort: f64,
        pub cost: f64,
        pub area: Option<String>,

        #[serde(default)]
        pub tags: Vec<Tag>,
        #[serde(default)]
        pub properties: Properties,
        /// Active timestamps mentioned in the body text.
        #[serde(default)]
        pub timestamps: Vec<Timestamp>,
        #[serde(default)]
        pub description: String,

        pub depth: usize,
        /// 1-based line of the headline.
        pub line: usize,

        pub created_at: DateTime<Utc>,
        pub modified_at: DateTime<Utc>,
        pub completed_at: Option<DateTime<Utc>>,
    }

    /// Projects do not own their tasks; tasks point back through [`Task::project`].
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Project {
        pub id: EntityId,
        pub title: String,
        pub status: ProjectStatus,
        pub context: Context,
        pub priority: Option<Priority>,
        pub area: Option<String>,

        #[serde(default)]
        pub tags: Vec<Tag>,
        #[serde(default)]
        pub properties: Properties,
        #[serde(default)]
        pub description: String,
        pub line: usize,

        pub created_at: DateTime<Utc>,
        pub modified_at: DateTime<Utc>,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Warning,
        Error,
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Self::Warning => "warning",
                Self::Error => "error",
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
    #[serde(rename_all = "snake_case")]
    pub enum ParseErrorKind {
        #[error("unknown priority `{0}`, expected A, B or C")]
        UnknownPriority(char),
        #[error("unknown state keyword `{0}` kept in the title")]
        UnknownKeyword(String),
        #[error("headline has no title")]
        EmptyTitle,
        #[error("invalid timestamp `{0}` ignored")]
        InvalidTimestamp(String),
        #[error("duplicate property `{0}`, last value wins")]
        DuplicateProperty(String),
        #[error("{0} before the first headline belongs to no entry")]
        Unattached(String),
        #[error("input is not valid UTF-8: {0}")]
        InvalidEncoding(String),
    }

    impl ParseErrorKind {
        pub fn severity(&self) -> Severity {
            match self {
                Self::Unattached(_) | Self::InvalidEncoding(_) => Severity::Error,
                Self::UnknownPriority(_)
                | Self::UnknownKeyword(_)
                | Self::EmptyTitle
                | Self::InvalidTimestamp(_)
                | Self::DuplicateProperty(_) => Severity::Warning,
            }
        }
    }

    /// A problem found while parsing, positioned at a 1-based line and column.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
    #[error("{line}:{column}: {severity}: {message}")]
    pub struct ParseError {
        pub kind: ParseErrorKind,
        pub severity: Severity,
        pub message: String,
        pub line: usize,
        pub column: usize,
        /// Start of the offending line.
        pub snippet: String,
    }

    impl ParseError {
        const SNIPPET_CHARS: usize = 40;

        pub fn new(kind: ParseErrorKind, line: usize, column: usize, line_text: &str) -> Self {
            let text = line_text.trim();
            let snippet = if text.chars().count() > Self::SNIPPET_CHARS {
                let mut cut: String = text.chars().take(Self::SNIPPET_CHARS).collect();
                cut.push('…');
                cut
            } else {
                text.to_string()
            };
            Self {
                severity: kind.severity(),
                message: kind.to_string(),
                kind,
                line,
                column,
                snippet,
            }
        }

        pub fn is_error(&self) -> bool {
            self.severity == Severity::Error
        }
    }

    /* ------------------------------ Results ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Metadata {
        pub source_path: String,
        pub line_count: usize,
        /// Context given to entries without a `:CONTEXT:` property.
        pub default_context: Context,
        pub observed_at: DateTime<Utc>,
    }

    /// Everything one parse produced. Entities keep file order.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ParseResult {
        pub tasks: Vec<Task>,
        pub projects: Vec<Project>,
        pub errors: Vec<ParseError>,
        pub metadata: Metadata,
    }

    impl ParseResult {
        /// Result of an input that could not be read at all: no entities, one error.
        pub fn fatal(metadata: Metadata, error: ParseError) -> Self {
            Self {
                tasks: vec![],
                projects: vec![],
                errors: vec![error],
                metadata,
            }
        }

        pub fn has_errors(&self) -> bool {
            self.errors.iter().any(ParseError::is_error)
        }

        pub fn warnings(&self) -> impl Iterator<Item = &ParseError> {
            self.errors.iter().filter(|e| e.severity == Severity::Warning)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn keywords_map_to_states() {
            assert_eq!(TaskState::from_keyword("TODO"), Some(TaskState::NotStarted));
            assert_eq!(TaskState::from_keyword("WAIT"), Some(TaskState::Blocked));
            assert_eq!(TaskState::from_keyword("actionable"), Some(TaskState::Actionable));
            assert_eq!(TaskState::from_keyword("not-started"), Some(TaskState::NotStarted));
            assert_eq!(TaskState::from_keyword("todo"), None);
            assert_eq!(TaskState::from_keyword("Actionable"), None);
            for state in TaskState::ALL {
                assert_eq!(TaskState::from_keyword(state.keyword()), Some(state));
                assert_eq!(TaskState::from_keyword(state.name()), Some(state));
            }
        }

        #[test]
        fn ids_are_stable_and_distinct() {
            let a = EntityId::derive("Ship", "/notes/work.org", 0);
            assert_eq!(a, EntityId::derive("Ship", "/notes/work.org", 0));
            assert_ne!(a, EntityId::derive("Ship", "/notes/work.org", 1));
            assert_ne!(a, EntityId::derive("Ship", "/notes/home.org", 0));
            assert_ne!(a, EntityId::derive("Ship it", "/notes/work.org", 0));
        }

        #[test]
        fn parse_error_snippet_is_shortened() {
            let long = "x".repeat(100);
            let err = ParseError::new(ParseErrorKind::EmptyTitle, 3, 1, &long);
            assert_eq!(err.snippet.chars().count(), 41);
            assert_eq!(err.severity, Severity::Warning);
            assert_eq!(err.to_string(), "3:1: warning: headline has no title");
        }

        #[test]
        fn context_is_normalized() {
            assert_eq!(Context::new("  Work "), Context::work());
            assert_eq!(Context::new("HOME").as_str(), "home");
        }
    }
}

pub mod lexer {
    //! Line classifier. Every line becomes exactly one token, so nothing here can fail.

    /// Shape of a single line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TokenKind {
        Headline,
        PropertyDrawerStart,
        PropertyDrawerEnd,
        PropertyLine,
        Scheduled,
        Deadline,
        Closed,
        PlainText,
        BlankLine,
        EndOfInput,
    }

    /// One classified line. `text` is the raw line without its line ending.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Token<'a> {
        pub kind: TokenKind,
        pub text: &'a str,
        /// 1-based.
        pub line: usize,
    }

    /// Classifies `input` line by line; the last token is always `EndOfInput`.
    pub fn tokenize(input: &str) -> Vec<Token<'_>> {
        let mut tokens: Vec<Token<'_>> = input
            .lines()
            .enumerate()
            .map(|(idx, text)| Token {
                kind: classify(text),
                text,
                line: idx + 1,
            })
            .collect();
        let line = tokens.len() + 1;
        tokens.push(Token {
            kind: TokenKind::EndOfInput,
            text: "",
            line,
        });
        tokens
    }

    /// Ordered match over the line shapes; the first shape that fits wins.
    pub fn classify(line: &str) -> TokenKind {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            TokenKind::BlankLine
        } else if is_headline(line) {
            TokenKind::Headline
        } else if trimmed.eq_ignore_ascii_case(":PROPERTIES:") {
            TokenKind::PropertyDrawerStart
        } else if trimmed.eq_ignore_ascii_case(":END:") {
            TokenKind::PropertyDrawerEnd
        } else if is_property_line(trimmed) {
            TokenKind::PropertyLine
        } else if let Some(kind) = planning_kind(trimmed) {
            kind
        } else {
            TokenKind::PlainText
        }
    }

    /// Headline when the line starts with one or more '*' then whitespace.
    pub fn is_headline(line: &str) -> bool {
        let rest = line.trim_start_matches('*');
        rest.len() < line.len() && rest.starts_with([' ', '\t'])
    }

    fn is_property_line(trimmed: &str) -> bool {
        let Some(rest) = trimmed.strip_prefix(':') else {
            return false;
        };
        match rest.find(':') {
            Some(end) => end > 0 && !rest[..end].contains(char::is_whitespace),
            None => false,
        }
    }

    fn planning_kind(trimmed: &str) -> Option<TokenKind> {
        if trimmed.starts_with("SCHEDULED:") {
            Some(TokenKind::Scheduled)
        } else if trimmed.starts_with("DEADLINE:") {
            Some(TokenKind::Deadline)
        } else if trimmed.starts_with("CLOSED:") {
            Some(TokenKind::Closed)
        } else {
            None
        }
    }

}

pub mod parser {
    //! Recognizers for headline, property and timestamp syntax, plus the single pass that
    //! groups body lines under their headline.
    //!
    //! The recognizers are small `nom` parsers over one line at a time. None of them treat
    //! a mismatch as an error: they either produce a value or leave the text to be read as
    //! plain content, noting anything odd as an [`Issue`].

    use crate::core::*;
    use crate::lexer::{self, Token, TokenKind};
    use crate::transform;
    use chrono::{DateTime, Utc};
    use nom::{IResult, error::VerboseError};
    use std::path::Path;
    use tracing::{debug, trace, warn};

    pub(crate) type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// Something odd noticed by a recognizer, positioned within its line.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Issue {
        /// 1-based, in characters.
        pub column: usize,
        pub kind: ParseErrorKind,
    }

    impl Issue {
        fn at(self, token: &Token<'_>) -> ParseError {
            ParseError::new(self.kind, token.line, self.column, token.text)
        }
    }

    /// 1-based character column at which `rest` starts inside `line`.
    fn column_of(line: &str, rest: &str) -> usize {
        line[..line.len() - rest.len()].chars().count() + 1
    }

    fn indent_column(line: &str) -> usize {
        column_of(line, line.trim_start())
    }

    /* ------------------------------ Headlines ------------------------------ */

    pub mod headline {
        use super::{Issue, PResult, column_of};
        use crate::core::{ParseErrorKind, Priority, Tag, TaskState};
        use nom::{
            branch::alt,
            bytes::complete::{tag, take_till1, take_while1},
            character::complete::{anychar, char, space0, space1},
            combinator::eof,
            sequence::{delimited, terminated},
        };

        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct Headline {
            /// Number of leading `*`, at least 1.
            pub depth: usize,
            pub keyword: Option<TaskState>,
            pub priority: Option<Priority>,
            pub title: String,
            pub tags: Vec<Tag>,
            pub issues: Vec<Issue>,
        }

        /// `* KEYWORD [#P] Title :tag1:tag2:`, every part but the stars optional.
        ///
        /// Returns `None` only when the line has no leading stars followed by whitespace.
        /// A first word that is not a known keyword stays part of the title; when it is
        /// shaped like one (`WIP`, `HOLD`) that is noted as an issue.
        pub fn recognize(line: &str) -> Option<Headline> {
            let line = line.trim_end();
            let (rest, depth) = markers(line).ok()?;
            let mut issues = Vec::new();

            let (rest, keyword) = match keyword_word(rest) {
                Ok((after, word)) => match TaskState::from_keyword(word) {
                    Some(state) => (after, Some(state)),
                    None => {
                        if looks_like_keyword(word) {
                            issues.push(Issue {
                                column: column_of(line, rest),
                                kind: ParseErrorKind::UnknownKeyword(word.to_string()),
                            });
                        }
                        (rest, None)
                    }
                },
                Err(_) => (rest, None),
            };

            let (rest, priority) = match cookie(rest) {
                Ok((after, letter)) => match Priority::from_char(letter) {
                    Some(priority) => (after, Some(priority)),
                    None => {
                        issues.push(Issue {
                            column: column_of(line, rest),
                            kind: ParseErrorKind::UnknownPriority(letter),
                        });
                        (rest, None)
                    }
                },
                Err(_) => (rest, None),
            };

            let (title, tags) = split_tags(rest.trim());
            if title.is_empty() {
                issues.push(Issue {
                    column: column_of(line, rest),
                    kind: ParseErrorKind::EmptyTitle,
                });
            }

            Some(Headline {
                depth,
                keyword,
                priority,
                title: title.to_string(),
                tags,
                issues,
            })
        }

        fn markers(i: &str) -> PResult<'_, usize> {
            let (i, stars) = take_while1(|c: char| c == '*')(i)?;
            let (i, _) = alt((space1, eof))(i)?;
            Ok((i, stars.len()))
        }

        /// All-uppercase ASCII, two letters or more.
        fn looks_like_keyword(word: &str) -> bool {
            word.len() >= 2 && word.chars().all(|c| c.is_ascii_uppercase())
        }

        fn keyword_word(i: &str) -> PResult<'_, &str> {
            terminated(take_till1(|c: char| c.is_whitespace()), alt((space1, eof)))(i)
        }

        fn cookie(i: &str) -> PResult<'_, char> {
            terminated(delimited(tag("[#"), anychar, char(']')), space0)(i)
        }

        /// Splits a trailing `:tag1:tag2:` word off the title.
        fn split_tags(text: &str) -> (&str, Vec<Tag>) {
            let (head, last) = match text.rsplit_once(char::is_whitespace) {
                Some((head, last)) => (head.trim_end(), last),
                None => ("", text),
            };
            let is_tag_list = last.len() >= 2
                && last.starts_with(':')
                && last.ends_with(':')
                && last.split(':').all(|seg| seg.chars().all(is_tag_char));
            if !is_tag_list {
                return (text, Vec::new());
            }
            let tags = last
                .split(':')
                .filter(|seg| !seg.is_empty())
                .map(Tag::from)
                .collect();
            (head, tags)
        }

        fn is_tag_char(c: char) -> bool {
            // letters, digits and `_-@+#`; any other character keeps the word in the title.
            c.is_alphanumeric() || c == '_' || c == '-' || c == '@' || c == '+' || c == '#'
        }

    }

    /* --------------------------- Property drawers --------------------------- */

    pub mod properties {
        use super::{PResult, indent_column};
        use crate::core::{ParseError, ParseErrorKind, Properties, PropertyValue};
        use crate::lexer::Token;
        use nom::{
            bytes::complete::take_till1,
            character::complete::{char, space0},
            combinator::rest,
            sequence::delimited,
        };

        pub const EFFORT: &str = "effort";
        pub const COST: &str = "cost";
        pub const CONTEXT: &str = "context";
        pub const PROJECT: &str = "project";
        pub const AREA: &str = "area";
        pub const STATUS: &str = "status";

        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct PropertyBlock {
            pub properties: Properties,
            pub errors: Vec<ParseError>,
        }

        /// Reads the buffered property lines of one section, coercing known keys and
        /// merging repeated keys with [`merge`].
        pub fn recognize_block(lines: &[Token<'_>]) -> PropertyBlock {
            let mut block = PropertyBlock::default();
            for token in lines {
                let Some((key, raw)) = split_line(token.text) else {
                    continue;
                };
                let key = key.to_lowercase();
                let value = coerce(&key, raw);
                if merge(&mut block.properties, key.clone(), value).is_some() {
                    block.errors.push(ParseError::new(
                        ParseErrorKind::DuplicateProperty(key),
                        token.line,
                        indent_column(token.text),
                        token.text,
                    ));
                }
            }
            block
        }

        /// Last write wins: a repeated key takes the new value but keeps its original
        /// position. Returns the value that was replaced.
        pub fn merge(
            properties: &mut Properties,
            key: String,
            value: PropertyValue,
        ) -> Option<PropertyValue> {
            properties.insert(key, value)
        }

        /// `:KEY: value` → (`KEY`, `value`). Only the first two colons delimit, so the
        /// value may contain more.
        pub fn split_line(line: &str) -> Option<(&str, &str)> {
            property_line(line).ok().map(|(_, kv)| kv)
        }

        fn property_line(i: &str) -> PResult<'_, (&str, &str)> {
            let (i, _) = space0(i)?;
            let (i, key) = delimited(
                char(':'),
                take_till1(|c: char| c == ':' || c.is_whitespace()),
                char(':'),
            )(i)?;
            let (i, value) = rest(i)?;
            Ok((i, (key, value.trim())))
        }

        pub fn coerce(key: &str, raw: &str) -> PropertyValue {
            let raw = raw.trim();
            match key {
                EFFORT => PropertyValue::Number(parse_effort(raw)),
                COST => PropertyValue::Number(parse_cost(raw)),
                CONTEXT => PropertyValue::Text(raw.to_lowercase()),
                _ => PropertyValue::Text(raw.to_string()),
            }
        }

        /// Hours from `2h`, `30m`, `1.5` or org's `1:30`. Anything else is zero.
        pub fn parse_effort(raw: &str) -> f64 {
            let raw = raw.trim().to_lowercase();
            if let Some((hours, minutes)) = raw.split_once(':') {
                return match (hours.trim().parse::<u32>(), minutes.trim().parse::<u32>()) {
                    (Ok(h), Ok(m)) => f64::from(h) + f64::from(m) / 60.0,
                    _ => 0.0,
                };
            }
            let split = raw.find(char::is_alphabetic).unwrap_or(raw.len());
            let (amount, unit) = raw.split_at(split);
            let Ok(amount) = amount.trim().parse::<f64>() else {
                return 0.0;
            };
            let hours = match unit.trim() {
                "" | "h" | "hr" | "hrs" | "hour" | "hours" => amount,
                "m" | "min" | "mins" | "minute" | "minutes" => amount / 60.0,
                _ => return 0.0,
            };
            if hours.is_finite() && hours >= 0.0 {
                hours
            } else {
                0.0
            }
        }

        /// Amount with an optional leading currency symbol. Anything else is zero.
        pub fn parse_cost(raw: &str) -> f64 {
            let amount = raw.trim().trim_start_matches(['$', '€', '£']).trim();
            match amount.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => 0.0,
            }
        }

    }

    /* ----------------------------- Timestamps ----------------------------- */

    pub mod timestamp {
        use super::{PResult, column_of};
        use crate::core::{RepeatUnit, Repeater, RepeaterKind, Timestamp};
        use chrono::{NaiveDate, NaiveTime};
        use nom::{
            branch::alt,
            bytes::complete::{tag, take_while_m_n, take_while1},
            character::complete::{char, digit1, one_of, space0, space1},
            combinator::{map_res, opt, value},
            sequence::{preceded, tuple},
        };

        /// `<YYYY-MM-DD [Day] [HH:MM[-HH:MM]] [+1w] [-2d]>`, or the same in `[...]`.
        ///
        /// Fails when the date is not a real calendar date. A time range end and a warning
        /// delay are accepted but not kept.
        pub fn timestamp(i: &str) -> PResult<'_, Timestamp> {
            let (i, open) = one_of("<[")(i)?;
            let (i, date) = date_part(i)?;
            let (i, _weekday) = opt(preceded(
                space1,
                take_while1(|c: char| c.is_alphabetic() || c == '.'),
            ))(i)?;
            let (i, time) = opt(preceded(space1, time_part))(i)?;
            let (i, _until) = opt(preceded(char('-'), time_part))(i)?;
            let (i, repeater) = opt(preceded(space1, repeater))(i)?;
            let (i, _) = opt(preceded(space1, warning_delay))(i)?;
            let (i, _) = space0(i)?;
            let (i, _) = char(if open == '<' { '>' } else { ']' })(i)?;
            Ok((
                i,
                Timestamp {
                    active: open == '<',
                    date,
                    time,
                    repeater,
                },
            ))
        }

        /// One bracketed timestamp making up all of `text` (surrounding blanks aside).
        pub fn recognize(text: &str) -> Option<Timestamp> {
            match timestamp(text.trim()) {
                Ok(("", ts)) => Some(ts),
                _ => None,
            }
        }

        /// A timestamp, optionally followed by `--` and a second one. The two are returned
        /// as they are; what the span means is up to the caller.
        pub fn recognize_range(text: &str) -> Option<(Timestamp, Option<Timestamp>)> {
            match tuple((timestamp, opt(preceded(tag("--"), timestamp))))(text.trim()) {
                Ok(("", range)) => Some(range),
                _ => None,
            }
        }

        /// Active timestamps embedded anywhere in `text`.
        pub fn find_inline(text: &str) -> Vec<Timestamp> {
            text.match_indices('<')
                .filter_map(|(idx, _)| timestamp(&text[idx..]).ok())
                .map(|(_, ts)| ts)
                .collect()
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum PlanningKeyword {
            Scheduled,
            Deadline,
            Closed,
        }

        impl PlanningKeyword {
            pub const ALL: [PlanningKeyword; 3] = [
                PlanningKeyword::Scheduled,
                PlanningKeyword::Deadline,
                PlanningKeyword::Closed,
            ];

            pub fn label(self) -> &'static str {
                match self {
                    Self::Scheduled => "SCHEDULED:",
                    Self::Deadline => "DEADLINE:",
                    Self::Closed => "CLOSED:",
                }
            }
        }

        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct PlanningItem<'a> {
            pub keyword: PlanningKeyword,
            /// 1-based character column where `raw` starts.
            pub column: usize,
            pub raw: &'a str,
            /// `None` when `raw` is not a valid timestamp (range).
            pub value: Option<(Timestamp, Option<Timestamp>)>,
        }

        /// Every `KEYWORD: <timestamp>` pair on a planning line, e.g.
        /// `SCHEDULED: <2025-11-15 12:00> DEADLINE: <2025-11-20>`.
        pub fn recognize_planning(line: &str) -> Vec<PlanningItem<'_>> {
            let mut items = Vec::new();
            let mut rest = line.trim_start();
            while let Some(keyword) = PlanningKeyword::ALL
                .into_iter()
                .find(|k| rest.starts_with(k.label()))
            {
                let after = rest[keyword.label().len()..].trim_start();
                let end = next_keyword(after).unwrap_or(after.len());
                let raw = after[..end].trim_end();
                items.push(PlanningItem {
                    keyword,
                    column: column_of(line, after),
                    raw,
                    value: recognize_range(raw),
                });
                rest = &after[end..];
            }
            items
        }

        fn next_keyword(text: &str) -> Option<usize> {
            PlanningKeyword::ALL
                .iter()
                .filter_map(|k| text.find(k.label()))
                .min()
        }

        fn repeater(i: &str) -> PResult<'_, Repeater> {
            let (i, kind) = alt((
                value(RepeaterKind::FromNow, tag(".+")),
                value(RepeaterKind::FromBase, tag("++")),
                value(RepeaterKind::FromLast, tag("+")),
            ))(i)?;
            let (i, count) = map_res(digit1, str::parse::<i32>)(i)?;
            let (i, unit) = map_res(one_of("dwmy"), |c: char| {
                RepeatUnit::from_char(c).ok_or("unknown repeat unit")
            })(i)?;
            Ok((i, Repeater { kind, count, unit }))
        }

        fn warning_delay(i: &str) -> PResult<'_, ()> {
            value((), tuple((alt((tag("--"), tag("-"))), digit1, one_of("hdwmy"))))(i)
        }

        fn date_part(i: &str) -> PResult<'_, NaiveDate> {
            map_res(
                tuple((number(4, 4), char('-'), number(2, 2), char('-'), number(2, 2))),
                |(y, _, m, _, d): (u32, char, u32, char, u32)| {
                    NaiveDate::from_ymd_opt(y as i32, m, d).ok_or("invalid date")
                },
            )(i)
        }

        fn time_part(i: &str) -> PResult<'_, NaiveTime> {
            map_res(
                tuple((number(1, 2), char(':'), number(2, 2))),
                |(h, _, m): (u32, char, u32)| NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time"),
            )(i)
        }

        fn number(min: usize, max: usize) -> impl Fn(&str) -> PResult<'_, u32> {
            move |i: &str| {
                map_res(
                    take_while_m_n(min, max, |c: char| c.is_ascii_digit()),
                    str::parse::<u32>,
                )(i)
            }
        }

    }

    /* --------------------------- Parsed entries --------------------------- */

    /// A headline together with everything its body contributed. Lives for one parse.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct ParsedEntry {
        pub depth: usize,
        pub keyword: Option<TaskState>,
        pub priority: Option<Priority>,
        pub title: String,
        pub tags: Vec<Tag>,
        pub properties: Properties,
        pub scheduled: Option<Timestamp>,
        pub scheduled_end: Option<Timestamp>,
        pub deadline: Option<Timestamp>,
        pub closed: Option<Timestamp>,
        pub timestamps: Vec<Timestamp>,
        pub description: String,
        pub context: Context,
        pub line: usize,
    }

    impl ParsedEntry {
        fn from_headline(headline: headline::Headline, line: usize, context: Context) -> Self {
            Self {
                depth: headline.depth,
                keyword: headline.keyword,
                priority: headline.priority,
                title: headline.title,
                tags: headline.tags,
                properties: Properties::new(),
                scheduled: None,
                scheduled_end: None,
                deadline: None,
                closed: None,
                timestamps: vec![],
                description: String::new(),
                context,
                line,
            }
        }
    }

    /* ----------------------------- Body scan ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ScanState {
        /// Just read the headline; nothing of its body seen yet.
        AtHeadline,
        /// Reading the lines that belong to the current headline.
        InBody,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Drawer {
        Outside,
        Properties,
        /// `:LOGBOOK:` and friends; skipped up to `:END:`.
        Other,
    }

    /// The headline being assembled plus its scan state.
    struct Section<'a> {
        entry: ParsedEntry,
        state: ScanState,
        drawer: Drawer,
        property_lines: Vec<Token<'a>>,
        paragraph_break: bool,
    }

    impl<'a> Section<'a> {
        fn new(entry: ParsedEntry) -> Self {
            Self {
                entry,
                state: ScanState::AtHeadline,
                drawer: Drawer::Outside,
                property_lines: vec![],
                paragraph_break: false,
            }
        }

        fn accept(&mut self, token: &Token<'a>, errors: &mut Vec<ParseError>) {
            match (token.kind, self.drawer) {
                (TokenKind::PropertyDrawerStart, Drawer::Outside) => {
                    self.drawer = Drawer::Properties
                }
                (TokenKind::PropertyDrawerEnd, _) => self.drawer = Drawer::Outside,
                (_, Drawer::Other) => {}
                (TokenKind::PropertyLine, Drawer::Properties) => self.property_lines.push(*token),
                (_, Drawer::Properties) => {}
                (TokenKind::PropertyLine, Drawer::Outside) if opens_drawer(token.text) => {
                    self.drawer = Drawer::Other
                }
                (
                    TokenKind::Scheduled | TokenKind::Deadline | TokenKind::Closed,
                    Drawer::Outside,
                ) => self.plan(token, errors),
                (TokenKind::BlankLine, Drawer::Outside) => {
                    if self.state == ScanState::InBody && !self.entry.description.is_empty() {
                        self.paragraph_break = true;
                    }
                }
                (TokenKind::PlainText | TokenKind::PropertyLine, Drawer::Outside) => {
                    self.append_text(token.text)
                }
                (TokenKind::Headline | TokenKind::EndOfInput, Drawer::Outside) => {}
            }
            self.state = ScanState::InBody;
        }

        /// Last one of each keyword wins.
        fn plan(&mut self, token: &Token<'_>, errors: &mut Vec<ParseError>) {
            use timestamp::PlanningKeyword;

            for item in timestamp::recognize_planning(token.text) {
                let Some((start, end)) = item.value else {
                    errors.push(ParseError::new(
                        ParseErrorKind::InvalidTimestamp(item.raw.to_string()),
                        token.line,
                        item.column,
                        token.text,
                    ));
                    continue;
                };
                match item.keyword {
                    PlanningKeyword::Scheduled => {
                        self.entry.scheduled = Some(start);
                        self.entry.scheduled_end = end;
                    }
                    PlanningKeyword::Deadline => self.entry.deadline = Some(start),
                    PlanningKeyword::Closed => self.entry.closed = Some(start),
                }
            }
        }

        fn append_text(&mut self, text: &str) {
            let line = text.trim();
            let entry = &mut self.entry;
            entry.timestamps.extend(timestamp::find_inline(line));
            if !entry.description.is_empty() {
                entry
                    .description
                    .push_str(if self.paragraph_break { "\n\n" } else { "\n" });
            }
            entry.description.push_str(line);
            self.paragraph_break = false;
        }

        fn finish(self, errors: &mut Vec<ParseError>) -> ParsedEntry {
            let mut entry = self.entry;
            let block = properties::recognize_block(&self.property_lines);
            errors.extend(block.errors);
            entry.properties = block.properties;
            if let Some(context) = entry
                .properties
                .get(properties::CONTEXT)
                .and_then(PropertyValue::as_text)
            {
                entry.context = Context::new(context);
            }
            entry
        }
    }

    /// A `:NAME:` line with nothing after it starts a drawer other than `:PROPERTIES:`.
    fn opens_drawer(line: &str) -> bool {
        matches!(properties::split_line(line), Some((_, "")))
    }

    /// Single pass over the token stream: each headline opens a section that collects
    /// body lines until the next headline or the end of input.
    struct Scanner<'a> {
        default_context: Context,
        current: Option<Section<'a>>,
        preamble_drawer: bool,
        entries: Vec<ParsedEntry>,
        errors: Vec<ParseError>,
    }

    impl<'a> Scanner<'a> {
        fn new(default_context: Context) -> Self {
            Self {
                default_context,
                current: None,
                preamble_drawer: false,
                entries: vec![],
                errors: vec![],
            }
        }

        fn run(mut self, tokens: &[Token<'a>]) -> (Vec<ParsedEntry>, Vec<ParseError>) {
            for token in tokens {
                match token.kind {
                    TokenKind::Headline => self.headline(token),
                    TokenKind::EndOfInput => break,
                    _ => match self.current.as_mut() {
                        Some(section) => section.accept(token, &mut self.errors),
                        None => self.preamble(token),
                    },
                }
            }
            self.flush();
            (self.entries, self.errors)
        }

        fn headline(&mut self, token: &Token<'a>) {
            let Some(headline) = headline::recognize(token.text) else {
                // Not a headline after all: body text of whatever came before.
                if let Some(section) = self.current.as_mut() {
                    section.append_text(token.text);
                }
                return;
            };
            self.flush();
            self.errors
                .extend(headline.issues.iter().cloned().map(|issue| issue.at(token)));
            let entry =
                ParsedEntry::from_headline(headline, token.line, self.default_context.clone());
            self.current = Some(Section::new(entry));
        }

        /// Lines before the first headline. Prose is dropped silently; structure that
        /// needs a headline is reported.
        fn preamble(&mut self, token: &Token<'a>) {
            let what = match token.kind {
                TokenKind::PropertyDrawerStart => {
                    let first = !self.preamble_drawer;
                    self.preamble_drawer = true;
                    if !first {
                        return;
                    }
                    "property drawer"
                }
                TokenKind::PropertyDrawerEnd => {
                    self.preamble_drawer = false;
                    return;
                }
                TokenKind::Scheduled | TokenKind::Deadline | TokenKind::Closed => "planning line",
                _ => return,
            };
            self.errors.push(ParseError::new(
                ParseErrorKind::Unattached(what.to_string()),
                token.line,
                indent_column(token.text),
                token.text,
            ));
        }

        fn flush(&mut self) {
            if let Some(section) = self.current.take() {
                let entry = section.finish(&mut self.errors);
                trace!(line = entry.line, title = %entry.title, "entry complete");
                self.entries.push(entry);
            }
        }
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Knobs for a parse. The defaults derive everything from the inputs and the clock.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ParseOptions {
        /// Context for entries without a `:CONTEXT:` property; derived from the path when
        /// unset.
        pub default_context: Option<Context>,
        /// Instant stamped on created entities; the wall clock when unset.
        pub now: Option<DateTime<Utc>>,
    }

    /// `work` or `home` from the path's segments (file stems included), the deepest
    /// match winning. `home` when neither appears.
    pub fn context_from_path(source_path: &str) -> Context {
        Path::new(source_path)
            .components()
            .rev()
            .filter_map(|c| c.as_os_str().to_str())
            .map(|segment| {
                segment
                    .split('.')
                    .next()
                    .unwrap_or(segment)
                    .to_ascii_lowercase()
            })
            .find(|segment| segment == "work" || segment == "home")
            .map(|segment| Context::new(&segment))
            .unwrap_or_else(Context::home)
    }

    /// Parse an org document from a string.
    pub fn parse(text: &str, source_path: &str) -> ParseResult {
        parse_with_options(text, source_path, &ParseOptions::default())
    }

    pub fn parse_with_options(
        text: &str,
        source_path: &str,
        options: &ParseOptions,
    ) -> ParseResult {
        let observed_at = options.now.unwrap_or_else(Utc::now);
        let default_context = options
            .default_context
            .clone()
            .unwrap_or_else(|| context_from_path(source_path));

        let tokens = lexer::tokenize(text);
        let (entries, mut errors) = Scanner::new(default_context.clone()).run(&tokens);
        errors.sort_by_key(|e| (e.line, e.column));
        let (tasks, projects) = transform::transform(entries, source_path, observed_at);

        debug!(
            path = source_path,
            tasks = tasks.len(),
            projects = projects.len(),
            errors = errors.len(),
            "parsed outline"
        );

        ParseResult {
            tasks,
            projects,
            errors,
            metadata: Metadata {
                source_path: source_path.to_string(),
                line_count: tokens.len().saturating_sub(1),
                default_context,
                observed_at,
            },
        }
    }

    /// Parse raw file bytes. Bytes that are not UTF-8 give a result with no entities and a
    /// single error pointing at the first bad byte.
    pub fn parse_bytes(bytes: &[u8], source_path: &str) -> ParseResult {
        parse_bytes_with_options(bytes, source_path, &ParseOptions::default())
    }

    pub fn parse_bytes_with_options(
        bytes: &[u8],
        source_path: &str,
        options: &ParseOptions,
    ) -> ParseResult {
        let err = match std::str::from_utf8(bytes) {
            Ok(text) => return parse_with_options(text, source_path, options),
            Err(err) => err,
        };

        let valid = &bytes[..err.valid_up_to()];
        let line = valid.iter().filter(|b| **b == b'\n').count() + 1;
        let line_start = valid.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
        let column = err.valid_up_to() - line_start + 1;
        let snippet = String::from_utf8_lossy(&bytes[line_start..])
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        warn!(path = source_path, line, column, "input is not valid UTF-8");

        let line_count = bytes.iter().filter(|b| **b == b'\n').count()
            + usize::from(!bytes.is_empty() && !bytes.ends_with(b"\n"));
        let metadata = Metadata {
            source_path: source_path.to_string(),
            line_count,
            default_context: options
                .default_context
                .clone()
                .unwrap_or_else(|| context_from_path(source_path)),
            observed_at: options.now.unwrap_or_else(Utc::now),
        };
        ParseResult::fatal(
            metadata,
            ParseError::new(
                ParseErrorKind::InvalidEncoding(err.to_string()),
                line,
                column,
                &snippet,
            ),
        )
    }

}

pub mod transform {
    //! Parsed entries to tasks and projects.

    use crate::core::*;
    use crate::parser::{ParsedEntry, properties};
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;

    /// An entry at the shallowest depth of the file that carries no state keyword.
    ///
    /// Inherited heuristic: a top-level entry with a keyword is a task even when it has
    /// children of its own.
    pub(crate) fn is_project(entry: &ParsedEntry, top_depth: usize) -> bool {
        entry.depth == top_depth && entry.keyword.is_none()
    }

    pub(crate) fn transform(
        entries: Vec<ParsedEntry>,
        source_path: &str,
        now: DateTime<Utc>,
    ) -> (Vec<Task>, Vec<Project>) {
        let top_depth = entries.iter().map(|e| e.depth).min().unwrap_or(1);
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut enclosing_project: Option<String> = None;
        let mut tasks = Vec::new();
        let mut projects = Vec::new();

        for parsed in entries {
            let occurrence = seen.entry(parsed.title.clone()).or_default();
            let id = EntityId::derive(&parsed.title, source_path, *occurrence);
            *occurrence += 1;

            if is_project(&parsed, top_depth) {
                enclosing_project = Some(parsed.title.clone());
                projects.push(to_project(parsed, id, now));
            } else {
                if parsed.depth == top_depth {
                    enclosing_project = None;
                }
                tasks.push(to_task(parsed, id, enclosing_project.as_deref(), now));
            }
        }
        (tasks, projects)
    }

    fn to_task(
        parsed: ParsedEntry,
        id: EntityId,
        enclosing_project: Option<&str>,
        now: DateTime<Utc>,
    ) -> Task {
        let state = parsed.keyword.unwrap_or_default();
        let completed_at = (state == TaskState::Completed)
            .then(|| parsed.closed.as_ref().map_or(now, Timestamp::instant));
        let project = text_property(&parsed.properties, properties::PROJECT)
            .or_else(|| enclosing_project.map(str::to_string));
        let area = text_property(&parsed.properties, properties::AREA);
        let effort = number_property(&parsed.properties, properties::EFFORT);
        let cost = number_property(&parsed.properties, properties::COST);

        Task {
            id,
            title: parsed.title,
            state,
            priority: parsed.priority,
            project,
            context: parsed.context,
            scheduled: parsed.scheduled,
            scheduled_end: parsed.scheduled_end,
            deadline: parsed.deadline,
            effort,
            cost,
            area,
            tags: parsed.tags,
            properties: parsed.properties,
            timestamps: parsed.timestamps,
            description: parsed.description,
            depth: parsed.depth,
            line: parsed.line,
            created_at: now,
            modified_at: now,
            completed_at,
        }
    }

    fn to_project(parsed: ParsedEntry, id: EntityId, now: DateTime<Utc>) -> Project {
        let status = text_property(&parsed.properties, properties::STATUS)
            .and_then(|s| ProjectStatus::from_name(&s))
            .unwrap_or_default();
        let area = text_property(&parsed.properties, properties::AREA);

        Project {
            id,
            title: parsed.title,
            status,
            context: parsed.context,
            priority: parsed.priority,
            area,
            tags: parsed.tags,
            properties: parsed.properties,
            description: parsed.description,
            line: parsed.line,
            created_at: now,
            modified_at: now,
        }
    }

    fn text_property(properties: &Properties, key: &str) -> Option<String> {
        properties
            .get(key)
            .and_then(PropertyValue::as_text)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn number_property(properties: &Properties, key: &str) -> f64 {
        properties
            .get(key)
            .and_then(PropertyValue::as_number)
            .unwrap_or(0.0)
    }

}

pub mod format {
    //! Writes parsed values back out as org text.

    use crate::core::{Repeater, RepeaterKind, Task, Timestamp};

    pub fn render_timestamp(ts: &Timestamp) -> String {
        let mut buf = String::new();
        buf.push(if ts.active { '<' } else { '[' });
        buf.push_str(&ts.date.format("%Y-%m-%d %a").to_string());
        if let Some(time) = ts.time {
            buf.push(' ');
            buf.push_str(&time.format("%H:%M").to_string());
        }
        if let Some(repeater) = &ts.repeater {
            buf.push(' ');
            buf.push_str(&render_repeater(repeater));
        }
        buf.push(if ts.active { '>' } else { ']' });
        buf
    }

    pub fn render_repeater(repeater: &Repeater) -> String {
        let mark = match repeater.kind {
            RepeaterKind::FromLast => "+",
            RepeaterKind::FromBase => "++",
            RepeaterKind::FromNow => ".+",
        };
        format!("{mark}{}{}", repeater.count, repeater.unit.as_char())
    }

    /// The task's planning line, or an empty string when it has no dates.
    pub fn render_planning(task: &Task) -> String {
        let mut parts = Vec::new();
        if let Some(scheduled) = &task.scheduled {
            let mut part = format!("SCHEDULED: {}", render_timestamp(scheduled));
            if let Some(end) = &task.scheduled_end {
                part.push_str("--");
                part.push_str(&render_timestamp(end));
            }
            parts.push(part);
        }
        if let Some(deadline) = &task.deadline {
            parts.push(format!("DEADLINE: {}", render_timestamp(deadline)));
        }
        parts.join(" ")
    }

}

pub use core::{ParseError, ParseResult, Project, Task};
pub use parser::{
    ParseOptions, context_from_path, parse, parse_bytes, parse_bytes_with_options,
    parse_with_options,
};
