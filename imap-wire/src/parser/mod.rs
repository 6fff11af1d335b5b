//!
//! Command-side grammar, https://tools.ietf.org/html/rfc9051#section-9
//!
//! All parsers are streaming: running out of input yields
//! `nom::Err::Incomplete` so the decoder knows to read more.
//!

use std::str;

use chrono::{DateTime, FixedOffset, NaiveDate};
use nom::{
    branch::alt,
    bytes::streaming::{take_while1, take_while_m_n},
    character::{is_alphabetic, is_digit, streaming::char},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::types::{Flag, NumRange, SeqSet};

pub mod core;


use self::core::*;

// seq-number = nz-number / "*"
fn seq_number(i: &[u8]) -> IResult<&[u8], u32> {
    alt((nz_number, value(0, char('*'))))(i)
}

// seq-range = seq-number ":" seq-number
fn seq_range(i: &[u8]) -> IResult<&[u8], NumRange> {
    map(
        pair(seq_number, opt(preceded(char(':'), seq_number))),
        |(start, stop)| NumRange {
            start,
            stop: stop.unwrap_or(start),
        },
    )(i)
}

// sequence-set = (seq-number / seq-range) ["," sequence-set]
pub fn seq_set(i: &[u8]) -> IResult<&[u8], SeqSet> {
    map(separated_list1(char(','), seq_range), SeqSet)(i)
}

// flag = "\Answered" / "\Flagged" / "\Deleted" / "\Seen" / "\Draft" /
//        flag-keyword / flag-extension
pub fn flag(i: &[u8]) -> IResult<&[u8], Flag> {
    map_res(
        recognize(pair(opt(char('\\')), take_while1(is_atom_char))),
        |b: &[u8]| str::from_utf8(b).map(|s| Flag::new(s.to_owned())),
    )(i)
}

// date-text = date-day "-" date-month "-" date-year
fn date_text(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    map_res(
        recognize(tuple((
            take_while_m_n(1, 2, is_digit),
            char('-'),
            take_while_m_n(3, 3, is_alphabetic),
            char('-'),
            take_while_m_n(4, 4, is_digit),
        ))),
        |b: &[u8]| {
            let s = str::from_utf8(b).map_err(|_| ())?;
            NaiveDate::parse_from_str(s, "%d-%b-%Y").map_err(|_| ())
        },
    )(i)
}

// date = date-text / DQUOTE date-text DQUOTE
pub fn date(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    alt((date_text, delimited(char('"'), date_text, char('"'))))(i)
}

// date-time = DQUOTE date-day-fixed "-" date-month "-" date-year
//             SP time SP zone DQUOTE
pub fn date_time(i: &[u8]) -> IResult<&[u8], DateTime<FixedOffset>> {
    map_res(quoted, |s: String| {
        DateTime::parse_from_str(s.trim_start(), "%d-%b-%Y %H:%M:%S %z")
    })(i)
}
