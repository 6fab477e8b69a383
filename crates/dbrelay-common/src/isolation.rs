//! Transaction isolation levels.

use std::fmt;

use dbrelay_proto::IsolationLevel as WireIsolationLevel;

/// Transaction isolation level.
///
/// The wire values are fixed: Unspecified=0 through Snapshot=6. Values
/// outside that range map to [`IsolationLevel::Snapshot`], the strictest
/// defined level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Let the native driver choose.
    #[default]
    Unspecified,
    /// Pending changes of more isolated transactions cannot be overwritten.
    Chaos,
    /// Read uncommitted (lowest isolation).
    ReadUncommitted,
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl IsolationLevel {
    /// Maps a wire value, sending unknown values to `Snapshot`.
    pub fn from_wire(value: i32) -> Self {
        WireIsolationLevel::try_from(value)
            .map(Self::from)
            .unwrap_or(IsolationLevel::Snapshot)
    }

    /// Returns the wire value.
    pub fn to_wire(self) -> i32 {
        WireIsolationLevel::from(self) as i32
    }

    /// Returns the SQL representation.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Unspecified => "UNSPECIFIED",
            IsolationLevel::Chaos => "CHAOS",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        }
    }
}

impl From<WireIsolationLevel> for IsolationLevel {
    fn from(level: WireIsolationLevel) -> Self {
        match level {
            WireIsolationLevel::Unspecified => IsolationLevel::Unspecified,
            WireIsolationLevel::Chaos => IsolationLevel::Chaos,
            WireIsolationLevel::ReadUncommitted => IsolationLevel::ReadUncommitted,
            WireIsolationLevel::ReadCommitted => IsolationLevel::ReadCommitted,
            WireIsolationLevel::RepeatableRead => IsolationLevel::RepeatableRead,
            WireIsolationLevel::Serializable => IsolationLevel::Serializable,
            WireIsolationLevel::Snapshot => IsolationLevel::Snapshot,
        }
    }
}

impl From<IsolationLevel> for WireIsolationLevel {
    fn from(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::Unspecified => WireIsolationLevel::Unspecified,
            IsolationLevel::Chaos => WireIsolationLevel::Chaos,
            IsolationLevel::ReadUncommitted => WireIsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted => WireIsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead => WireIsolationLevel::RepeatableRead,
            IsolationLevel::Serializable => WireIsolationLevel::Serializable,
            IsolationLevel::Snapshot => WireIsolationLevel::Snapshot,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [IsolationLevel; 7] = [
        IsolationLevel::Unspecified,
        IsolationLevel::Chaos,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
        IsolationLevel::Snapshot,
    ];

    #[test]
    fn test_wire_values() {
        for (i, level) in ALL.iter().enumerate() {
            assert_eq!(level.to_wire(), i as i32);
            assert_eq!(IsolationLevel::from_wire(i as i32), *level);
        }
    }

    #[test]
    fn test_unknown_maps_to_snapshot() {
        assert_eq!(IsolationLevel::from_wire(99), IsolationLevel::Snapshot);
        assert_eq!(IsolationLevel::from_wire(-1), IsolationLevel::Snapshot);
        assert_eq!(IsolationLevel::from_wire(99).to_wire(), 6);
    }

    #[test]
    fn test_display() {
        assert_eq!(IsolationLevel::ReadCommitted.to_string(), "READ COMMITTED");
        assert_eq!(IsolationLevel::default(), IsolationLevel::Unspecified);
    }
}
