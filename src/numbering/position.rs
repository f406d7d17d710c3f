//! Scheme positions as assigned by the numbering engine.

use serde::{Deserialize, Serialize};

use nom::combinator::all_consuming;
use nom::Parser;

use crate::numbering::Error;

/// A canonical residue position: a number plus an optional insertion code.
///
/// Insertion codes accommodate loops longer than the scheme anticipates
/// (`31`, `31A`, `31B`, ...).  Positions order lexicographically by
/// `(number, insertion)`; the blank insertion sorts before `A`.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct Position {
    pub number: u32,
    pub insertion: Option<char>,
}

impl Position {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            insertion: None,
        }
    }

    pub fn with_insertion(number: u32, insertion: char) -> Self {
        Self {
            number,
            insertion: Some(insertion),
        }
    }

    /// The same position with any insertion code removed.
    pub fn canonical(&self) -> Position {
        Position::new(self.number)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number)?;
        if let Some(ins) = self.insertion {
            write!(f, "{}", ins)?;
        }
        Ok(())
    }
}

impl From<Position> for String {
    fn from(pos: Position) -> Self {
        pos.to_string()
    }
}

impl TryFrom<String> for Position {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_position(&value)
    }
}

pub mod parse {
    use nom::{
        character::complete::{digit1, satisfy},
        combinator::{map_res, opt},
        IResult, Parser,
    };

    use super::Position;

    pub fn is_insertion_char(c: char) -> bool {
        c.is_ascii_uppercase()
    }

    pub fn position(input: &str) -> IResult<&str, Position> {
        (
            map_res(digit1, str::parse::<u32>),
            opt(satisfy(is_insertion_char)),
        )
            .parse(input)
            .map(|(rest, (number, insertion))| (rest, Position { number, insertion }))
    }
}

/// Parse a position `str` (`"31"`, `"31A"`) into a real one.
pub fn parse_position(input: &str) -> Result<Position, Error> {
    all_consuming(parse::position)
        .parse(input.trim())
        .map(|(_, pos)| pos)
        .map_err(|_| Error::InvalidPosition(input.to_string()))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{parse_position, Position};

    #[test]
    fn parse_position_simple() -> Result<(), anyhow::Error> {
        assert_eq!(parse_position("1")?, Position::new(1));
        assert_eq!(parse_position("112")?, Position::new(112));
        assert_eq!(parse_position("31A")?, Position::with_insertion(31, 'A'));
        assert_eq!(parse_position(" 35B ")?, Position::with_insertion(35, 'B'));
        Ok(())
    }

    #[test]
    fn parse_position_rejects_malformed() {
        assert!(parse_position("").is_err());
        assert!(parse_position("A31").is_err());
        assert!(parse_position("31a").is_err());
        assert!(parse_position("31AB").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let p31 = Position::new(31);
        let p31a = Position::with_insertion(31, 'A');
        let p31b = Position::with_insertion(31, 'B');
        let p32 = Position::new(32);
        assert!(p31 < p31a);
        assert!(p31a < p31b);
        assert!(p31b < p32);
    }

    #[test]
    fn display_round_trip() -> Result<(), anyhow::Error> {
        for s in ["1", "35A", "112", "100C"] {
            assert_eq!(parse_position(s)?.to_string(), s);
        }
        Ok(())
    }
}
