//! `<database>.<collection>` namespace strings.

use nom::{
    IResult,
    bytes::complete::take_while1,
    character::complete::char,
    combinator::{opt, rest, verify},
    sequence::{pair, preceded},
};

use crate::error::{ClientError, Result};

const ILLEGAL_DB_CHARS: &[char] = &['/', '\\', '"', '$', '*', '<', '>', ':', '|', '?'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace<'a> {
    pub db: &'a str,
    pub collection: Option<&'a str>,
}

fn is_db_char(c: char) -> bool {
    c != '.' && !c.is_whitespace() && !ILLEGAL_DB_CHARS.contains(&c)
}

fn db_name(input: &str) -> IResult<&str, &str> {
    take_while1(is_db_char)(input)
}

fn collection(input: &str) -> IResult<&str, &str> {
    preceded(char('.'), verify(rest, |s: &str| !s.is_empty()))(input)
}

fn namespace(input: &str) -> IResult<&str, Namespace<'_>> {
    let (input, (db, collection)) = pair(db_name, opt(collection))(input)?;
    Ok((input, Namespace { db, collection }))
}

pub fn parse(ns: &str) -> Result<Namespace<'_>> {
    match namespace(ns) {
        Ok(("", parsed)) => Ok(parsed),
        Ok((tail, _)) => Err(ClientError::InvalidNamespace {
            ns: ns.to_string(),
            reason: format!("unexpected trailing: {tail}"),
        }),
        Err(e) => Err(ClientError::InvalidNamespace {
            ns: ns.to_string(),
            reason: format!("parse error: {e}"),
        }),
    }
}

/// Database part of a namespace: everything before the first `.`.
pub fn root(ns: &str) -> &str {
    ns.split_once('.').map_or(ns, |(db, _)| db)
}

/// True if `ns` is `db` itself or a collection inside `db`.
pub fn in_db(ns: &str, db: &str) -> bool {
    match ns.strip_prefix(db) {
        Some("") => true,
        Some(tail) => tail.starts_with('.'),
        None => false,
    }
}
