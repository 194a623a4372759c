use crate::error::{
    GameError,
    Result,
};
use ethers::types::Address;
use std::{
    fmt,
    str::FromStr,
};

/// On-chain identity of the connected player.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Account(Address);

impl Account {
    pub fn new(address: Address) -> Self {
        Self(address)
    }

    pub fn address(&self) -> Address {
        self.0
    }

    /// `0x1234...abcd`, as shown in the header.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[38..])
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for Account {
    type Err = GameError;

    fn from_str(raw: &str) -> Result<Self> {
        Address::from_str(raw.trim())
            .map(Self)
            .map_err(|_| GameError::InvalidInput(format!("not an address: {raw}")))
    }
}

impl From<Address> for Account {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

/// One of the three moves, encoded as `1..=3` on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    pub const ALL: [Choice; 3] = [Choice::Rock, Choice::Paper, Choice::Scissors];

    pub fn code(self) -> u8 {
        match self {
            Choice::Rock => 1,
            Choice::Paper => 2,
            Choice::Scissors => 3,
        }
    }

    pub fn decode(code: u8) -> Option<Self> {
        match code {
            1 => Some(Choice::Rock),
            2 => Some(Choice::Paper),
            3 => Some(Choice::Scissors),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Choice::Rock => "Rock",
            Choice::Paper => "Paper",
            Choice::Scissors => "Scissors",
        }
    }
}

impl TryFrom<u8> for Choice {
    type Error = GameError;

    fn try_from(code: u8) -> Result<Self> {
        Choice::decode(code).ok_or_else(|| {
            GameError::InvalidInput(format!("choice must be 1, 2 or 3, got {code}"))
        })
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Verdict label stored by the contract.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum GameOutcome {
    Win,
    Lose,
    Draw,
    Other(String),
}

impl GameOutcome {
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "WIN" | "WON" => GameOutcome::Win,
            "LOSE" | "LOSS" | "LOST" => GameOutcome::Lose,
            "DRAW" | "TIE" => GameOutcome::Draw,
            _ => GameOutcome::Other(label.to_string()),
        }
    }
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::Win => write!(f, "WIN"),
            GameOutcome::Lose => write!(f, "LOSE"),
            GameOutcome::Draw => write!(f, "DRAW"),
            GameOutcome::Other(label) => write!(f, "{label}"),
        }
    }
}

/// A persisted game as read back from the ledger.
///
/// Choices keep their wire encoding; decoding happens in the history view so
/// that an unexpected code from the contract is shown rather than dropped.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameRecord {
    pub player: Account,
    pub result: GameOutcome,
    pub player_choice: u8,
    pub house_choice: u8,
    pub timestamp: u64,
}
