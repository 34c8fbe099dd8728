//! Pipeline placements.
//!
//! Fifteen fixed stages in three phases:
//! - error: prerollback, rollback, postrollback
//! - get: getresolver, pregetstorage, getstorage, postgetstorage, postgetcleanup
//! - set: setresolver, presetstorage, setstorage, presetcleanup, precommit,
//!   commit, postcommit
//!
//! Each stage holds at most one direct occupant inside a store.

use crate::error::UnknownPlacement;
use std::fmt;
use std::str::FromStr;

/// A stage of the read, write or rollback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placement {
    // error phase
    PreRollback,
    Rollback,
    PostRollback,

    // get phase
    GetResolver,
    PreGetStorage,
    GetStorage,
    PostGetStorage,
    PostGetCleanup,

    // set phase
    SetResolver,
    PreSetStorage,
    SetStorage,
    PreSetCleanup,
    PreCommit,
    Commit,
    PostCommit,
}

impl Placement {
    /// Number of stages, and size of every per-stage table.
    pub const COUNT: usize = 15;

    pub const ALL: [Placement; Self::COUNT] = [
        Self::PreRollback,
        Self::Rollback,
        Self::PostRollback,
        Self::GetResolver,
        Self::PreGetStorage,
        Self::GetStorage,
        Self::PostGetStorage,
        Self::PostGetCleanup,
        Self::SetResolver,
        Self::PreSetStorage,
        Self::SetStorage,
        Self::PreSetCleanup,
        Self::PreCommit,
        Self::Commit,
        Self::PostCommit,
    ];

    /// The name used in `infos/placements` and adapter configuration.
    pub fn name(self) -> &'static str {
        match self {
            Self::PreRollback => "prerollback",
            Self::Rollback => "rollback",
            Self::PostRollback => "postrollback",
            Self::GetResolver => "getresolver",
            Self::PreGetStorage => "pregetstorage",
            Self::GetStorage => "getstorage",
            Self::PostGetStorage => "postgetstorage",
            Self::PostGetCleanup => "postgetcleanup",
            Self::SetResolver => "setresolver",
            Self::PreSetStorage => "presetstorage",
            Self::SetStorage => "setstorage",
            Self::PreSetCleanup => "presetcleanup",
            Self::PreCommit => "precommit",
            Self::Commit => "commit",
            Self::PostCommit => "postcommit",
        }
    }

    /// Returns the phase this stage belongs to.
    pub fn phase(self) -> Phase {
        match self {
            Self::PreRollback | Self::Rollback | Self::PostRollback => Phase::Error,
            Self::GetResolver
            | Self::PreGetStorage
            | Self::GetStorage
            | Self::PostGetStorage
            | Self::PostGetCleanup => Phase::Get,
            Self::SetResolver
            | Self::PreSetStorage
            | Self::SetStorage
            | Self::PreSetCleanup
            | Self::PreCommit
            | Self::Commit
            | Self::PostCommit => Phase::Set,
        }
    }

    /// Position in [`Placement::ALL`], used to index stage tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Placement {
    type Err = UnknownPlacement;

    /// Exact, case-sensitive match against the fixed vocabulary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|placement| placement.name() == s)
            .ok_or_else(|| UnknownPlacement(s.to_string()))
    }
}

/// Pipeline phase. The tag is what the multiplexing adapter records per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Get,
    Set,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Get, Phase::Set, Phase::Error];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.tag() == tag)
    }

    /// Stages of this phase in execution order.
    pub fn stages(self) -> &'static [Placement] {
        match self {
            Self::Get => &[
                Placement::GetResolver,
                Placement::PreGetStorage,
                Placement::GetStorage,
                Placement::PostGetStorage,
                Placement::PostGetCleanup,
            ],
            Self::Set => &[
                Placement::SetResolver,
                Placement::PreSetStorage,
                Placement::SetStorage,
                Placement::PreSetCleanup,
                Placement::PreCommit,
                Placement::Commit,
                Placement::PostCommit,
            ],
            Self::Error => &[
                Placement::PreRollback,
                Placement::Rollback,
                Placement::PostRollback,
            ],
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Parses a whitespace-separated placement list, stopping at the first
/// unknown name.
pub fn parse_placements(list: &str) -> Result<Vec<Placement>, UnknownPlacement> {
    list.split_whitespace().map(str::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_belongs_to_the_phase_that_lists_it() {
        for phase in Phase::ALL {
            for stage in phase.stages() {
                assert_eq!(stage.phase(), phase);
            }
        }
        let listed: usize = Phase::ALL.iter().map(|p| p.stages().len()).sum();
        assert_eq!(listed, Placement::COUNT);
    }

    #[test]
    fn index_matches_position_in_all() {
        for (i, placement) in Placement::ALL.iter().enumerate() {
            assert_eq!(placement.index(), i);
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!("precommit".parse::<Placement>().is_ok());
        assert!("PreCommit".parse::<Placement>().is_err());
        assert!("pre-commit".parse::<Placement>().is_err());
        assert!("precommi".parse::<Placement>().is_err());
    }

    #[test]
    fn parse_list_reports_first_unknown() {
        assert_eq!(
            parse_placements(" getstorage\tsetstorage  "),
            Ok(vec![Placement::GetStorage, Placement::SetStorage])
        );
        assert_eq!(
            parse_placements("getstorage bogus other"),
            Err(UnknownPlacement("bogus".to_string()))
        );
        assert_eq!(parse_placements(""), Ok(vec![]));
    }

    #[test]
    fn phase_tags_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_tag(phase.tag()), Some(phase));
        }
        assert_eq!(Phase::from_tag("commit"), None);
    }
}
