use std::fmt;
use std::str::FromStr;

use crate::error::UnknownCommand;

/// RPC procedures understood by the server, addressed as `/rpc/<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Add,
    Append,
    Cas,
    Check,
    Clear,
    CurDelete,
    CurGet,
    CurGetKey,
    CurGetValue,
    CurJump,
    CurJumpBack,
    CurRemove,
    CurSetValue,
    CurStep,
    CurStepBack,
    Echo,
    Get,
    GetBulk,
    Increment,
    IncrementDouble,
    MatchPrefix,
    MatchRegex,
    PlayScript,
    Remove,
    RemoveBulk,
    Replace,
    Report,
    Set,
    SetBulk,
    Status,
    Synchronize,
    TuneReplication,
    Vacuum,
}

impl Command {
    pub const ALL: [Command; 33] = [
        Command::Add,
        Command::Append,
        Command::Cas,
        Command::Check,
        Command::Clear,
        Command::CurDelete,
        Command::CurGet,
        Command::CurGetKey,
        Command::CurGetValue,
        Command::CurJump,
        Command::CurJumpBack,
        Command::CurRemove,
        Command::CurSetValue,
        Command::CurStep,
        Command::CurStepBack,
        Command::Echo,
        Command::Get,
        Command::GetBulk,
        Command::Increment,
        Command::IncrementDouble,
        Command::MatchPrefix,
        Command::MatchRegex,
        Command::PlayScript,
        Command::Remove,
        Command::RemoveBulk,
        Command::Replace,
        Command::Report,
        Command::Set,
        Command::SetBulk,
        Command::Status,
        Command::Synchronize,
        Command::TuneReplication,
        Command::Vacuum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Add => "add",
            Command::Append => "append",
            Command::Cas => "cas",
            Command::Check => "check",
            Command::Clear => "clear",
            Command::CurDelete => "cur_delete",
            Command::CurGet => "cur_get",
            Command::CurGetKey => "cur_get_key",
            Command::CurGetValue => "cur_get_value",
            Command::CurJump => "cur_jump",
            Command::CurJumpBack => "cur_jump_back",
            Command::CurRemove => "cur_remove",
            Command::CurSetValue => "cur_set_value",
            Command::CurStep => "cur_step",
            Command::CurStepBack => "cur_step_back",
            Command::Echo => "echo",
            Command::Get => "get",
            Command::GetBulk => "get_bulk",
            Command::Increment => "increment",
            Command::IncrementDouble => "increment_double",
            Command::MatchPrefix => "match_prefix",
            Command::MatchRegex => "match_regex",
            Command::PlayScript => "play_script",
            Command::Remove => "remove",
            Command::RemoveBulk => "remove_bulk",
            Command::Replace => "replace",
            Command::Report => "report",
            Command::Set => "set",
            Command::SetBulk => "set_bulk",
            Command::Status => "status",
            Command::Synchronize => "synchronize",
            Command::TuneReplication => "tune_replication",
            Command::Vacuum => "vacuum",
        }
    }

    /// Whether the command addresses a database and so carries `DB`.
    ///
    /// Cursor reads, steps and removals address the cursor, which is bound
    /// to its database by the jump that positioned it.
    pub fn targets_database(self) -> bool {
        !matches!(
            self,
            Command::CurDelete
                | Command::CurGet
                | Command::CurGetKey
                | Command::CurGetValue
                | Command::CurRemove
                | Command::CurSetValue
                | Command::CurStep
                | Command::CurStepBack
                | Command::Echo
                | Command::PlayScript
                | Command::Report
                | Command::TuneReplication
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.name() == s)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}
