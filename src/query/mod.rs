//! Transaction query engine.
//!
//! A search request is turned into a [`Pipeline`] of stages (lookups, match,
//! sort, skip, limit) which a store executes. Filters are evaluated against
//! joined [`TransactionView`]s, so the same pipeline can run over any backend;
//! the direct store pushes id and day filters into SQL and evaluates text
//! filters itself.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveTime};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use utoipa::IntoParams;

use crate::monitor::records::TransactionView;

pub const DEFAULT_COUNT: u64 = 10;
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

static DAY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{2}\.\d{2}\.\d{4}$").expect("day pattern is a valid regex")
});

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid search pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),
}

/// Query-string parameters of `GET /transactions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    /// Search text, or a day as `DD.MM.YYYY`
    pub q: Option<String>,
    /// Page size (default 10)
    pub count: Option<u64>,
    /// Number of matches to skip (default 0)
    pub offset: Option<u64>,
    /// `"true"` enables advanced search over snapshot contents
    pub a: Option<String>,
}

/// A normalized transaction search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSearch {
    pub query: String,
    pub count: u64,
    pub offset: u64,
    pub advanced: bool,
}

impl Default for TransactionSearch {
    fn default() -> Self {
        Self {
            query: String::new(),
            count: DEFAULT_COUNT,
            offset: 0,
            advanced: false,
        }
    }
}

impl From<SearchParams> for TransactionSearch {
    fn from(params: SearchParams) -> Self {
        Self {
            query: params.q.unwrap_or_default().trim().to_string(),
            count: params.count.unwrap_or(DEFAULT_COUNT),
            offset: params.offset.unwrap_or(0),
            advanced: params.a.as_deref() == Some("true"),
        }
    }
}

impl From<&TransactionSearch> for SearchParams {
    fn from(search: &TransactionSearch) -> Self {
        Self {
            q: Some(search.query.clone()),
            count: Some(search.count),
            offset: Some(search.offset),
            a: Some(search.advanced.to_string()),
        }
    }
}

/// How a search string is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    /// Transactions started within one UTC calendar day, `[from, until)`.
    Day { from: i64, until: i64 },
    /// Regex over transaction id, step and log fields.
    Text,
    /// `Text` plus snapshot message fields.
    Advanced,
}

impl TransactionSearch {
    pub fn mode(&self) -> SearchMode {
        if let Some((from, until)) = day_range(&self.query) {
            return SearchMode::Day { from, until };
        }
        if self.advanced {
            SearchMode::Advanced
        } else {
            SearchMode::Text
        }
    }
}

/// Parses `DD.MM.YYYY` into the half-open millisecond range of that UTC day.
///
/// Strings that look like a date but name no calendar day return `None`.
pub fn day_range(query: &str) -> Option<(i64, i64)> {
    if !DAY_PATTERN.is_match(query) {
        return None;
    }
    let day = NaiveDate::parse_from_str(query, "%d.%m.%Y").ok()?;
    let from = day.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
    Some((from, from + DAY_MILLIS))
}

/// Joinable record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Steps,
    Logs,
    Snapshots,
}

/// Searchable field paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    StepNodeId,
    StepNodeName,
    StepNodeType,
    StepTopic,
    LogText,
    SnapshotPayload,
    SnapshotReceiver,
    SnapshotSender,
    SnapshotLog,
    SnapshotTopic,
}

impl Field {
    pub const DEFAULT: [Field; 6] = [
        Field::Id,
        Field::StepNodeId,
        Field::StepNodeName,
        Field::StepNodeType,
        Field::StepTopic,
        Field::LogText,
    ];

    pub const ADVANCED: [Field; 11] = [
        Field::Id,
        Field::StepNodeId,
        Field::StepNodeName,
        Field::StepNodeType,
        Field::StepTopic,
        Field::LogText,
        Field::SnapshotPayload,
        Field::SnapshotReceiver,
        Field::SnapshotSender,
        Field::SnapshotLog,
        Field::SnapshotTopic,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::StepNodeId => "steps.node.id",
            Field::StepNodeName => "steps.node.name",
            Field::StepNodeType => "steps.node.type",
            Field::StepTopic => "steps.topic",
            Field::LogText => "logs.text",
            Field::SnapshotPayload => "snapshots.msg.payload",
            Field::SnapshotReceiver => "snapshots.msg.receiver",
            Field::SnapshotSender => "snapshots.msg.sender",
            Field::SnapshotLog => "snapshots.msg.log",
            Field::SnapshotTopic => "snapshots.msg.topic",
        }
    }

    /// Collection that must be joined before this field can be read.
    pub fn collection(self) -> Option<Collection> {
        match self {
            Field::Id => None,
            Field::StepNodeId | Field::StepNodeName | Field::StepNodeType | Field::StepTopic => {
                Some(Collection::Steps)
            }
            Field::LogText => Some(Collection::Logs),
            _ => Some(Collection::Snapshots),
        }
    }

    fn matches(self, view: &TransactionView, pattern: &Regex) -> bool {
        let snapshot_field = |key: &str| {
            view.snapshots
                .iter()
                .flatten()
                .any(|snapshot| value_matches(snapshot.msg.get(key), pattern))
        };

        match self {
            Field::Id => pattern.is_match(view.id()),
            Field::StepNodeId => view.steps.iter().any(|s| pattern.is_match(&s.node.id)),
            Field::StepNodeName => view.steps.iter().any(|s| pattern.is_match(&s.node.name)),
            Field::StepNodeType => view
                .steps
                .iter()
                .any(|s| pattern.is_match(&s.node.node_type)),
            Field::StepTopic => view.steps.iter().any(|s| pattern.is_match(&s.topic)),
            Field::LogText => view.logs.iter().any(|l| pattern.is_match(&l.text)),
            Field::SnapshotPayload => snapshot_field("payload"),
            Field::SnapshotReceiver => snapshot_field("receiver"),
            Field::SnapshotSender => snapshot_field("sender"),
            Field::SnapshotLog => snapshot_field("log"),
            Field::SnapshotTopic => snapshot_field("topic"),
        }
    }
}

/// Matches scalar leaves anywhere inside `value`.
fn value_matches(value: Option<&Value>, pattern: &Regex) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => pattern.is_match(s),
        Some(Value::Number(n)) => pattern.is_match(&n.to_string()),
        Some(Value::Bool(b)) => pattern.is_match(if *b { "true" } else { "false" }),
        Some(Value::Array(items)) => items.iter().any(|v| value_matches(Some(v), pattern)),
        Some(Value::Object(fields)) => fields.values().any(|v| value_matches(Some(v), pattern)),
    }
}

/// Predicate of a match stage.
#[derive(Debug, Clone)]
pub enum Filter {
    IdEquals(String),
    /// `from <= start < until`
    StartWithin { from: i64, until: i64 },
    /// Case-insensitive regex over any of `fields`.
    AnyFieldMatches { pattern: Regex, fields: Vec<Field> },
}

impl Filter {
    pub fn text(query: &str, fields: &[Field]) -> Result<Self, QueryError> {
        let pattern = RegexBuilder::new(query)
            .case_insensitive(true)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(|err| QueryError::InvalidPattern {
                pattern: query.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Filter::AnyFieldMatches {
            pattern,
            fields: fields.to_vec(),
        })
    }

    pub fn matches(&self, view: &TransactionView) -> bool {
        match self {
            Filter::IdEquals(id) => view.id() == id,
            Filter::StartWithin { from, until } => {
                (*from..*until).contains(&view.transaction.start)
            }
            Filter::AnyFieldMatches { pattern, fields } => {
                fields.iter().any(|field| field.matches(view, pattern))
            }
        }
    }

    fn required_collections(&self) -> Vec<Collection> {
        match self {
            Filter::AnyFieldMatches { fields, .. } => {
                fields.iter().filter_map(|f| f.collection()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Lookup(Collection),
    Match(Filter),
    /// Newest first; ties broken by descending id.
    SortByStartDesc,
    Skip(u64),
    Limit(u64),
}

/// Ordered list of stages to run against the transaction collection.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Validated, executor-friendly view of a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct Plan<'a> {
    pub lookups: Vec<Collection>,
    pub filter: Option<&'a Filter>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Plan<'_> {
    pub fn joins(&self, collection: Collection) -> bool {
        self.lookups.contains(&collection)
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the search pipeline.
    ///
    /// When `snapshot_search` is false (blob-stored snapshots), advanced mode
    /// falls back to the default field set.
    pub fn for_search(search: &TransactionSearch, snapshot_search: bool) -> Result<Self, QueryError> {
        let mut pipeline = Pipeline::new()
            .stage(Stage::Lookup(Collection::Steps))
            .stage(Stage::Lookup(Collection::Logs));

        match search.mode() {
            SearchMode::Day { from, until } => {
                pipeline = pipeline.stage(Stage::Match(Filter::StartWithin { from, until }));
            }
            SearchMode::Advanced if snapshot_search => {
                pipeline = pipeline.stage(Stage::Lookup(Collection::Snapshots));
                if !search.query.is_empty() {
                    pipeline =
                        pipeline.stage(Stage::Match(Filter::text(&search.query, &Field::ADVANCED)?));
                }
            }
            mode => {
                if mode == SearchMode::Advanced {
                    debug!("Snapshot contents are not searchable with blob storage; using default fields");
                }
                if !search.query.is_empty() {
                    pipeline =
                        pipeline.stage(Stage::Match(Filter::text(&search.query, &Field::DEFAULT)?));
                }
            }
        }

        Ok(pipeline
            .stage(Stage::SortByStartDesc)
            .stage(Stage::Skip(search.offset))
            .stage(Stage::Limit(search.count)))
    }

    /// Pipeline for a single transaction with all of its records joined.
    pub fn for_transaction(id: &str) -> Self {
        Pipeline::new()
            .stage(Stage::Lookup(Collection::Steps))
            .stage(Stage::Lookup(Collection::Logs))
            .stage(Stage::Lookup(Collection::Snapshots))
            .stage(Stage::Match(Filter::IdEquals(id.to_string())))
            .stage(Stage::Limit(1))
    }

    /// Validates stage order (lookups, match, sort, skip, limit) and that
    /// every field a filter reads is joined.
    pub fn plan(&self) -> Result<Plan<'_>, QueryError> {
        let mut plan = Plan {
            lookups: Vec::new(),
            filter: None,
            skip: 0,
            limit: None,
        };
        let mut phase = 0u8;

        for stage in &self.stages {
            let stage_phase = match stage {
                Stage::Lookup(_) => 0,
                Stage::Match(_) => 1,
                Stage::SortByStartDesc => 2,
                Stage::Skip(_) => 3,
                Stage::Limit(_) => 4,
            };
            if stage_phase < phase || (stage_phase == phase && stage_phase != 0) {
                return Err(QueryError::InvalidPipeline(format!(
                    "stage {:?} is out of order",
                    stage
                )));
            }
            phase = stage_phase;

            match stage {
                Stage::Lookup(collection) => {
                    if !plan.lookups.contains(collection) {
                        plan.lookups.push(*collection);
                    }
                }
                Stage::Match(filter) => {
                    if let Some(missing) = filter
                        .required_collections()
                        .into_iter()
                        .find(|c| !plan.lookups.contains(c))
                    {
                        return Err(QueryError::InvalidPipeline(format!(
                            "filter reads {:?} which is not joined",
                            missing
                        )));
                    }
                    plan.filter = Some(filter);
                }
                Stage::SortByStartDesc => {}
                Stage::Skip(n) => plan.skip = *n,
                Stage::Limit(n) => plan.limit = Some(*n),
            }
        }

        Ok(plan)
    }
}
