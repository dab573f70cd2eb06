/// Hint to the server about how eagerly a write should be persisted and
/// propagated. Passed through as a query parameter, never interpreted by
/// the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPeriod {
    Immediately,
    Sec1,
    Sec5,
    Sec15,
    Sec30,
    Min1,
    Asap,
    /// Resolves to the writer's configured default period.
    Default,
}

impl SyncPeriod {
    /// Wire value used in the `syncPeriod` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediately => "Immediately",
            Self::Sec1 => "Sec1",
            Self::Sec5 => "Sec5",
            Self::Sec15 => "Sec15",
            Self::Sec30 => "Sec30",
            Self::Min1 => "Min1",
            Self::Asap => "Asap",
            Self::Default => "Default",
        }
    }

    /// Replace `Default` with the given configured period.
    pub(crate) fn or_default(self, configured: SyncPeriod) -> SyncPeriod {
        match self {
            Self::Default => configured,
            other => other,
        }
    }
}
