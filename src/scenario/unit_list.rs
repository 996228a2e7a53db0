//! Compact unit lists such as `"2 infantry, 1 armour, fighter"`

use nom::bytes::complete::take_while1;
use nom::character::complete::{char, digit1, multispace0, multispace1};
use nom::combinator::{all_consuming, map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::{delimited, terminated};
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};

use crate::core::error::{BattleError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCount {
    pub count: u32,
    pub type_name: String,
}

fn count(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)
}

fn type_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

/// `[count] name`, where a missing count means one
fn entry(input: &str) -> IResult<&str, UnitCount> {
    let (input, n) = opt(terminated(count, multispace1)).parse(input)?;
    let (input, name) = type_name(input)?;
    Ok((
        input,
        UnitCount {
            count: n.unwrap_or(1),
            type_name: name.to_string(),
        },
    ))
}

fn unit_list(input: &str) -> IResult<&str, Vec<UnitCount>> {
    let separator = delimited(multispace0, char(','), multispace0);
    all_consuming(delimited(
        multispace0,
        separated_list1(separator, entry),
        multispace0,
    ))
    .parse(input)
}

/// Parse a comma separated unit list. An empty string is an empty list.
pub fn parse_unit_list(input: &str) -> Result<Vec<UnitCount>> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    let (_, entries) =
        unit_list(input).map_err(|e| BattleError::Parse(format!("unit list {:?}: {}", input, e)))?;
    Ok(entries.into_iter().filter(|e| e.count > 0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uc(count: u32, name: &str) -> UnitCount {
        UnitCount {
            count,
            type_name: name.into(),
        }
    }

    #[test]
    fn test_counts_and_names() {
        let parsed = parse_unit_list("2 infantry, 1 armour,fighter").unwrap();
        assert_eq!(parsed, vec![uc(2, "infantry"), uc(1, "armour"), uc(1, "fighter")]);
    }

    #[test]
    fn test_whitespace_and_zero_counts() {
        let parsed = parse_unit_list("  3 aa_gun ,\n 0 bomber  ").unwrap();
        assert_eq!(parsed, vec![uc(3, "aa_gun")]);
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_unit_list("").unwrap().is_empty());
        assert!(parse_unit_list("   ").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lists_rejected() {
        for bad in ["2 infantry,", "2 infantry; 1 armour", ", armour", "2 -tank"] {
            let err = parse_unit_list(bad).unwrap_err();
            assert!(matches!(err, BattleError::Parse(_)), "{bad}");
        }
    }
}
