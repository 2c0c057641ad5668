use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod back;
pub mod model;

pub use model::{Hist, Quantity, Series, Snapshot, TimeLog, Timeframe};

#[derive(Debug, Error)]
#[error("the market string ({0}) is malformed")]
pub struct InvalidMarket(pub String);

/// Which side of the market-maker split an id belongs to, discriminated by
/// the terminal character of the id (`T` or `P`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketKind {
    Team,
    Player,
}

/// Opaque market identifier of the form `<entity>:<league>:<season><T|P>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn parse(raw: &str) -> Result<Self, InvalidMarket> {
        match raw.chars().last() {
            Some('T') | Some('P') => Ok(Self(raw.to_string())),
            _ => Err(InvalidMarket(raw.to_string())),
        }
    }

    pub fn kind(&self) -> MarketKind {
        if self.0.ends_with('T') {
            MarketKind::Team
        } else {
            MarketKind::Player
        }
    }

    /// League segment of the id, used to batch markets with equal outcome
    /// counts.
    pub fn league(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the rolling history blob paired with this market.
    pub fn hist_key(&self) -> String {
        format!("{}:hist", self.0)
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a list of market ids into runs of consecutive ids sharing a league,
/// preserving order within each run.
pub fn group_by_league(ids: Vec<MarketId>) -> Vec<Vec<MarketId>> {
    let mut groups: Vec<Vec<MarketId>> = Vec::new();
    for id in ids {
        match groups.last_mut() {
            Some(group) if group[0].league() == id.league() => group.push(id),
            _ => groups.push(vec![id]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_team_and_player_ids() {
        let team = MarketId::parse("1:8:17420T").unwrap();
        assert_eq!(team.kind(), MarketKind::Team);
        assert_eq!(team.league(), "8");
        assert_eq!(team.hist_key(), "1:8:17420T:hist");

        let player = MarketId::parse("99:8:17420P").unwrap();
        assert_eq!(player.kind(), MarketKind::Player);
    }

    #[test]
    fn rejects_unknown_terminal_character() {
        assert!(MarketId::parse("1:8:17420X").is_err());
        assert!(MarketId::parse("").is_err());
    }

    #[test]
    fn groups_consecutive_leagues() {
        let ids: Vec<MarketId> = ["1:8:1T", "2:8:1T", "3:9:1T", "4:8:1T"]
            .iter()
            .map(|s| MarketId::parse(s).unwrap())
            .collect();
        let groups = group_by_league(ids);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 1);
        assert_eq!(groups[2].len(), 1);
    }
}
