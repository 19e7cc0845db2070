use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{space0, space1};
use nom::character::is_alphanumeric;
use nom::combinator::{all_consuming, map, map_res, opt, rest, value};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;
use std::str;

use crate::smtp_server::response::{Response, MISSING_PARAMETER, SYNTAX_ERROR};

// Smtp commands sent by the client
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Cmd<'a> {
    Helo { domain: &'a str },
    Ehlo { domain: &'a str },
    Mail { reverse_path: &'a str },
    Rcpt { forward_path: &'a str },
    Data,
    Rset,
    Noop,
    Vrfy,
    Quit,
    AuthPlain(Credentials),
    AuthPlainEmpty,
    AuthUnsupported,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Credentials {
    pub authorization_id: String,
    pub authentication_id: String,
    pub password: String,
}

const VERBS: [&[u8]; 10] = [
    b"helo", b"ehlo", b"mail", b"rcpt", b"data", b"rset", b"noop", b"vrfy", b"quit", b"auth",
];

//----- Parser -----------------------------------------------------------------

/// Parse a command line that has had its line ending removed.
pub(crate) fn parse(line: &[u8]) -> Result<Cmd<'_>, Response> {
    all_consuming(command)(line)
        .map(|(_, cmd)| cmd)
        .map_err(|_| {
            let verb = line.split(|b| *b == b' ').next().unwrap_or_default();
            if VERBS.iter().any(|v| verb.eq_ignore_ascii_case(v)) {
                MISSING_PARAMETER
            } else {
                SYNTAX_ERROR
            }
        })
}

/// Parse the base64 line sent in answer to an auth challenge.
pub(crate) fn parse_auth_response(line: &[u8]) -> Result<Credentials, Response> {
    all_consuming(take_while1(is_base64))(line)
        .map(|(_, encoded)| decode_sasl_plain(encoded))
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| MISSING_PARAMETER)
}

fn command(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    terminated(
        alt((helo, ehlo, mail, rcpt, data, rset, noop, vrfy, quit, auth)),
        space0,
    )(buf)
}

fn hello_domain(buf: &[u8]) -> IResult<&[u8], &str> {
    map_res(is_not(" \t"), str::from_utf8)(buf)
}

fn helo(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    map(preceded(cmd("helo"), hello_domain), |domain| Cmd::Helo {
        domain,
    })(buf)
}

fn ehlo(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    map(preceded(cmd("ehlo"), hello_domain), |domain| Cmd::Ehlo {
        domain,
    })(buf)
}

// The address between angle brackets, possibly empty for the null sender
fn mail_path(buf: &[u8]) -> IResult<&[u8], &str> {
    let address = map_res(
        take_while(|b| !matches!(b, b'<' | b'>' | b' ' | b'\t')),
        str::from_utf8,
    );
    delimited(tag("<"), address, tag(">"))(buf)
}

// ESMTP parameters such as BODY=8BITMIME or SIZE=123 are accepted and ignored
fn esmtp_params(buf: &[u8]) -> IResult<&[u8], ()> {
    value((), opt(preceded(space1, rest)))(buf)
}

fn mail(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    let preamble = pair(cmd("mail"), pair(tag_no_case("from:"), space0));
    let parser = terminated(preceded(preamble, mail_path), esmtp_params);
    map(parser, |reverse_path| Cmd::Mail { reverse_path })(buf)
}

fn rcpt(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    let preamble = pair(cmd("rcpt"), pair(tag_no_case("to:"), space0));
    let parser = terminated(preceded(preamble, mail_path), esmtp_params);
    map(parser, |forward_path| Cmd::Rcpt { forward_path })(buf)
}

fn data(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::Data, tag_no_case("data"))(buf)
}

fn rset(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::Rset, tag_no_case("rset"))(buf)
}

fn noop(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::Noop, pair(tag_no_case("noop"), esmtp_params))(buf)
}

fn vrfy(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::Vrfy, pair(cmd("vrfy"), rest))(buf)
}

fn quit(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::Quit, tag_no_case("quit"))(buf)
}

fn is_base64(chr: u8) -> bool {
    is_alphanumeric(chr) || chr == b'+' || chr == b'/' || chr == b'='
}

fn auth_plain(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    let initial = opt(preceded(space1, take_while1(is_base64)));
    map(preceded(tag_no_case("plain"), initial), |initial| match initial {
        Some(encoded) => Cmd::AuthPlain(decode_sasl_plain(encoded)),
        None => Cmd::AuthPlainEmpty,
    })(buf)
}

fn auth_unsupported(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    value(Cmd::AuthUnsupported, pair(is_not(" \t"), esmtp_params))(buf)
}

fn auth(buf: &[u8]) -> IResult<&[u8], Cmd<'_>> {
    preceded(cmd("auth"), alt((auth_plain, auth_unsupported)))(buf)
}

//---- Helper functions ---------------------------------------------------------

// Return a parser to match the given command followed by whitespace
fn cmd(verb: &'static str) -> impl Fn(&[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    move |buf: &[u8]| pair(tag_no_case(verb), space1)(buf)
}

// Decodes the base64 encoded "authzid\0authcid\0password" triple
pub(crate) fn decode_sasl_plain(param: &[u8]) -> Credentials {
    let Ok(bytes) = STANDARD.decode(param) else {
        return Credentials::default();
    };
    let mut fields = bytes.split(|b| *b == 0u8);
    Credentials {
        authorization_id: next_string(&mut fields),
        authentication_id: next_string(&mut fields),
        password: next_string(&mut fields),
    }
}

fn next_string<'a>(it: &mut impl Iterator<Item = &'a [u8]>) -> String {
    it.next()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default()
}
