use serde::Deserialize;

/// Priority tier of a submitted job.
///
/// Workers always drain `High` before `Normal` and `Normal` before `Low`;
/// jobs within one tier run in submission order.
///
/// # Ordering
///
/// `High > Normal > Low`, derived so priorities can be compared directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Background work that may be delayed by anything else.
    Low,
    #[default]
    Normal,
    /// Work on the critical path of the current frame.
    High,
}

impl JobPriority {
    pub(crate) const COUNT: usize = 3;

    /// Queue tiers in the order workers drain them.
    pub(crate) const DRAIN_ORDER: [JobPriority; Self::COUNT] =
        [JobPriority::High, JobPriority::Normal, JobPriority::Low];

    pub(crate) fn tier(self) -> usize {
        self as usize
    }
}
