//! Message types carried over the bridge socket.
//!
//! - **Outbound**: [`ProgressUpdate`], one line per update
//! - **Inbound**: free-form command lines, handed to the registered handler

/// Wire value for a field that does not apply to an update.
pub const NOT_APPLICABLE: i64 = -1;

/// Default field delimiter for progress lines.
pub const DEFAULT_DELIMITER: char = '|';

/// A structured report of work completion.
///
/// `None` fields are "not applicable" and go out as [`NOT_APPLICABLE`].
/// Valid values are non-negative, so the sentinel can never collide with one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub description: String,
    pub stage: Option<u64>,
    pub total_stages: Option<u64>,
    pub partial: Option<u64>,
    pub total: Option<u64>,
}

impl ProgressUpdate {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: u64, total_stages: u64) -> Self {
        self.stage = Some(stage);
        self.total_stages = Some(total_stages);
        self
    }

    pub fn with_partial(mut self, partial: u64) -> Self {
        self.partial = Some(partial);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Fields in wire order, sentinel substituted.
    pub(crate) fn wire_fields(&self) -> [i64; 4] {
        [self.stage, self.total_stages, self.partial, self.total].map(to_wire)
    }
}

fn to_wire(value: Option<u64>) -> i64 {
    // Saturate rather than wrap into the sentinel's range.
    value.map_or(NOT_APPLICABLE, |v| i64::try_from(v).unwrap_or(i64::MAX))
}
