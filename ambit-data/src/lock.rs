/// Row-lock strength requested for subsequent reads.
///
/// Purely advisory: the transaction layer carries it, query construction
/// decides what (if anything) to emit for the active dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LockIntent {
    #[default]
    None,
    /// Block concurrent writers and lockers (`FOR UPDATE`).
    ForUpdate,
    /// Block concurrent writers, allow other shared lockers (`FOR SHARE`).
    ForShare,
}

impl LockIntent {
    pub fn is_none(self) -> bool {
        self == LockIntent::None
    }

    /// The locking clause keyword, without leading whitespace.
    pub fn clause(self) -> Option<&'static str> {
        match self {
            LockIntent::None => None,
            LockIntent::ForUpdate => Some("FOR UPDATE"),
            LockIntent::ForShare => Some("FOR SHARE"),
        }
    }
}

impl std::fmt::Display for LockIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LockIntent::None => "NONE",
            LockIntent::ForUpdate => "UPDATE",
            LockIntent::ForShare => "SHARE",
        })
    }
}
