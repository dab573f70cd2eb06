/// Outcome of a conditional write.
///
/// These four codes are the complete outcome space of `replace` and
/// `merge`; a conflict is a result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// The write was applied.
    Ok,
    /// The target row does not exist.
    RecordNotFound,
    /// The row was modified by someone else between the client's read and
    /// its conditional write. The caller refetches and retries.
    RecordChangedConcurrently,
    /// The caller's mutate callback declined to write after inspecting the
    /// current value.
    Canceled,
}

impl OperationResult {
    /// Map the numeric code carried in a `409 Conflict` response body.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::RecordChangedConcurrently),
            2 => Some(Self::RecordNotFound),
            3 => Some(Self::Canceled),
            _ => None,
        }
    }
}
