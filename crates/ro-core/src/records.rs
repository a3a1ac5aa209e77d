use serde::{Deserialize, Serialize};
use std::fmt;

/// The record kinds mirrored into the external spreadsheet. The collection
/// name doubles as the sheet name and as the `collection` field of audit
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Users,
    Registrations,
    Payments,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Users,
        RecordKind::Registrations,
        RecordKind::Payments,
    ];

    pub fn collection(self) -> &'static str {
        match self {
            RecordKind::Users => "users",
            RecordKind::Registrations => "registrations",
            RecordKind::Payments => "payments",
        }
    }

    pub fn parse(value: &str) -> Option<RecordKind> {
        match value {
            "users" => Some(RecordKind::Users),
            "registrations" => Some(RecordKind::Registrations),
            "payments" => Some(RecordKind::Payments),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_kind() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.collection()), Some(kind));
        }
    }

    #[test]
    fn parse_rejects_unknown_collection() {
        assert_eq!(RecordKind::parse("invoices"), None);
        assert_eq!(RecordKind::parse(""), None);
    }
}
