//! Record type tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SchemaError, SearchHistoryPolicy};

/// The kind of record stored by the sync core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// A team the server knows about
    Team,
    /// The current user's view of a team (roles, unread state)
    MyTeam,
    /// A user's membership in a team
    TeamMembership,
    /// Recently visited channels of a team
    TeamChannelHistory,
    /// Search terms entered within a team
    TeamSearchHistory,
    /// A slash command registered for a team
    SlashCommand,
}

impl RecordType {
    pub const ALL: [RecordType; 6] = [
        RecordType::Team,
        RecordType::MyTeam,
        RecordType::TeamMembership,
        RecordType::TeamChannelHistory,
        RecordType::TeamSearchHistory,
        RecordType::SlashCommand,
    ];

    /// The type tag, as exposed on committed records
    pub fn name(&self) -> &'static str {
        match self {
            RecordType::Team => "Team",
            RecordType::MyTeam => "MyTeam",
            RecordType::TeamMembership => "TeamMembership",
            RecordType::TeamChannelHistory => "TeamChannelHistory",
            RecordType::TeamSearchHistory => "TeamSearchHistory",
            RecordType::SlashCommand => "SlashCommand",
        }
    }

    /// Names of the fields forming the identity key, in key order
    pub fn identity_fields(&self, search_history: SearchHistoryPolicy) -> &'static [&'static str] {
        match (self, search_history) {
            (RecordType::Team | RecordType::SlashCommand, _) => &["id"],
            (RecordType::MyTeam | RecordType::TeamChannelHistory, _) => &["team_id"],
            (RecordType::TeamMembership, _) => &["team_id", "user_id"],
            (RecordType::TeamSearchHistory, SearchHistoryPolicy::Dedup) => &["team_id", "term"],
            (RecordType::TeamSearchHistory, SearchHistoryPolicy::AppendOnly) => {
                &["team_id", "term", "created_at"]
            }
        }
    }

    /// Fields holding a foreign key, paired with the type they point at
    pub fn reference_fields(&self) -> &'static [(&'static str, RecordType)] {
        match self {
            RecordType::Team => &[],
            _ => &[("team_id", RecordType::Team)],
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecordType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| SchemaError::NotFound(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for t in RecordType::ALL {
            assert_eq!(t.name().parse::<RecordType>().unwrap(), t);
        }
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(
            "team".parse::<RecordType>(),
            Err(SchemaError::NotFound("team".to_string()))
        );
    }

    #[test]
    fn test_only_children_reference_team() {
        assert!(RecordType::Team.reference_fields().is_empty());
        assert_eq!(
            RecordType::TeamMembership.reference_fields(),
            &[("team_id", RecordType::Team)]
        );
    }
}
