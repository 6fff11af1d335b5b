use std::str;

use nom::{
    bytes::streaming::{tag, tag_no_case, take_while, take_while1},
    character::streaming::{char, digit1},
    combinator::{map, map_res, opt, value, verify},
    sequence::{delimited, tuple},
    IResult,
};

use crate::types::LiteralInfo;

// ----- number -----

// number          = 1*DIGIT
//                    ; Unsigned 32-bit integer
//                    ; (0 <= n < 4,294,967,296)
pub fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_res(map_res(digit1, str::from_utf8), str::parse)(i)
}

// same as `number` but 64-bit
pub fn number_64(i: &[u8]) -> IResult<&[u8], u64> {
    map_res(map_res(digit1, str::from_utf8), str::parse)(i)
}

// nz-number       = digit-nz *DIGIT
pub fn nz_number(i: &[u8]) -> IResult<&[u8], u32> {
    verify(number, |n: &u32| *n != 0)(i)
}

// ----- string -----

// quoted = DQUOTE *QUOTED-CHAR DQUOTE
pub fn quoted(i: &[u8]) -> IResult<&[u8], String> {
    map_res(delimited(char('"'), quoted_data, char('"')), unescape)(i)
}

// QUOTED-CHAR = <any TEXT-CHAR except quoted-specials> / "\" quoted-specials
pub fn quoted_data(i: &[u8]) -> IResult<&[u8], &[u8]> {
    // Ideally this should use nom's `escaped` combinator, but it does not
    // stop at a bare CR or LF, which must end the quoted string in error.
    let mut escape = false;
    let mut len = 0;
    for c in i {
        if (*c == b'"' && !escape) || !is_text_char(*c) {
            break;
        }
        len += 1;
        if *c == b'\\' && !escape {
            escape = true
        } else if escape {
            escape = false;
        }
    }
    Ok((&i[len..], &i[..len]))
}

fn unescape(raw: &[u8]) -> Result<String, std::string::FromUtf8Error> {
    let mut out = Vec::with_capacity(raw.len());
    let mut escape = false;
    for &c in raw {
        if c == b'\\' && !escape {
            escape = true;
            continue;
        }
        escape = false;
        out.push(c);
    }
    String::from_utf8(out)
}

// quoted-specials = DQUOTE / "\"
pub fn is_quoted_specials(c: u8) -> bool {
    c == b'"' || c == b'\\'
}

// literal = "{" number64 ["+"] "}" CRLF *CHAR8
//            ; Number represents the number of CHAR8s.
//            ; "+" marks a non-synchronizing literal (RFC 7888).
pub fn literal_header(i: &[u8]) -> IResult<&[u8], LiteralInfo> {
    map(
        tuple((char('{'), number_64, opt(char('+')), char('}'), crlf)),
        |(_, size, plus, _, _)| LiteralInfo {
            size,
            non_sync: plus.is_some(),
        },
    )(i)
}

// ----- astring ----- atom (roughly) or string

// 1*ASTRING-CHAR, the atom branch of astring
pub fn astring_atom(i: &[u8]) -> IResult<&[u8], String> {
    map_res(take_while1(is_astring_char), to_owned_utf8)(i)
}

// ASTRING-CHAR = ATOM-CHAR / resp-specials
pub fn is_astring_char(c: u8) -> bool {
    is_atom_char(c) || is_resp_specials(c)
}

// ATOM-CHAR = <any CHAR except atom-specials>
pub fn is_atom_char(c: u8) -> bool {
    !is_atom_specials(c)
}

// atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials / resp-specials
pub fn is_atom_specials(c: u8) -> bool {
    c == b'('
        || c == b')'
        || c == b'{'
        || c == b' '
        || c < 32
        || c == 0x7f
        || is_list_wildcards(c)
        || is_quoted_specials(c)
        || is_resp_specials(c)
}

// resp-specials = "]"
pub fn is_resp_specials(c: u8) -> bool {
    c == b']'
}

// atom = 1*ATOM-CHAR
pub fn atom(i: &[u8]) -> IResult<&[u8], String> {
    map_res(take_while1(is_atom_char), to_owned_utf8)(i)
}

// ----- list-mailbox -----

// list-mailbox = 1*list-char / string
pub fn list_mailbox_atom(i: &[u8]) -> IResult<&[u8], String> {
    map_res(take_while1(is_list_char), to_owned_utf8)(i)
}

// list-char = ATOM-CHAR / list-wildcards / resp-specials
pub fn is_list_char(c: u8) -> bool {
    is_atom_char(c) || is_list_wildcards(c) || is_resp_specials(c)
}

// list-wildcards = "%" / "*"
pub fn is_list_wildcards(c: u8) -> bool {
    c == b'%' || c == b'*'
}

// nil = "NIL"
pub fn nil(i: &[u8]) -> IResult<&[u8], ()> {
    value((), tag_no_case("NIL"))(i)
}

// ----- text -----

// text = 1*TEXT-CHAR, allowed to be empty here so blank lines can be discarded
pub fn text(i: &[u8]) -> IResult<&[u8], String> {
    map(take_while(is_text_char), |b| {
        String::from_utf8_lossy(b).into_owned()
    })(i)
}

// TEXT-CHAR = <any CHAR except CR and LF>
pub fn is_text_char(c: u8) -> bool {
    c != b'\r' && c != b'\n'
}

// ----- others -----

pub fn sp(i: &[u8]) -> IResult<&[u8], char> {
    char(' ')(i)
}

pub fn crlf(i: &[u8]) -> IResult<&[u8], ()> {
    value((), tag("\r\n"))(i)
}

fn to_owned_utf8(b: &[u8]) -> Result<String, str::Utf8Error> {
    str::from_utf8(b).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_header() {
        match literal_header(b"{3}\r\nXYZ") {
            Ok((rest, info)) => {
                assert_eq!(info, LiteralInfo { size: 3, non_sync: false });
                assert_eq!(rest, b"XYZ");
            }
            rsp => panic!("unexpected response {rsp:?}"),
        }
        match literal_header(b"{4096+}\r\n") {
            Ok((_, info)) => assert_eq!(info, LiteralInfo { size: 4096, non_sync: true }),
            rsp => panic!("unexpected response {rsp:?}"),
        }
    }

    #[test]
    fn test_astring() {
        match astring_atom(b"text ") {
            Ok((_, value)) => {
                assert_eq!(value, "text");
            }
            rsp => panic!("unexpected response {rsp:?}"),
        }
    }

    #[test]
    fn test_quoted_unescapes() {
        match quoted(b"\"a \\\"b\\\\\" ") {
            Ok((rest, value)) => {
                assert_eq!(value, "a \"b\\");
                assert_eq!(rest, b" ");
            }
            rsp => panic!("unexpected response {rsp:?}"),
        }
    }

    #[test]
    fn test_quoted_stops_at_crlf() {
        assert!(matches!(quoted(b"\"abc\r\n"), Err(nom::Err::Error(_))));
        assert!(matches!(quoted(b"\"abc"), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn test_atom_is_streaming() {
        assert!(matches!(atom(b"NOOP"), Err(nom::Err::Incomplete(_))));
        match atom(b"NOOP\r\n") {
            Ok((rest, value)) => {
                assert_eq!(value, "NOOP");
                assert_eq!(rest, b"\r\n");
            }
            rsp => panic!("unexpected response {rsp:?}"),
        }
    }
}
