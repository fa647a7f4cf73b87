// SPDX-License-Identifier: (GPL-2.0 OR GPL-3.0)
// Copyright (C) 2025-2026 SUSE LLC
//! Parser for shell-style `KEY=value` and `KEY=(a b c)` configuration files.
//!
//! Files are treated as data, never evaluated: no command substitution, no
//! environment lookups, and only `${VAR}` references to keys seen earlier in
//! the same file. A [`KvConf`] built with [`KvConf::with_keys`] only parses
//! the named keys and skips every other line, which allows reading generated
//! shell fragments that may carry arbitrary script around the assignments.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;

use thiserror::Error;

const CONF_LINE_MAX: usize = 1024 * 100;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("missing =")]
    MissingEquals,
    #[error("empty key")]
    EmptyKey,
    #[error("invalid key")]
    InvalidKey,
    #[error("bad escape before {0:?}")]
    BadEscape(String),
    #[error("expected escaped char at split boundary")]
    EscapeBoundary,
    #[error("unexpected whitespace")]
    UnexpectedWhitespace,
    #[error("unexpected content after array")]
    TrailingContent,
    #[error("variables must be wrapped in {{}} braces")]
    VarBraces,
    #[error("no closing brace for variable")]
    VarUnclosed,
    #[error("invalid variable substitution: {0} not seen")]
    VarUnseen(String),
    #[error("line too long")]
    LineTooLong,
    #[error("unterminated quote or array")]
    Unterminated,
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("line {line}: {kind}")]
    Parse { line: usize, kind: ParseError },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KvVal {
    Str(String),
    Array(Vec<String>),
}

impl KvVal {
    // whitespace separated tokens of a string, or the elements of an array
    pub fn words(&self) -> Vec<&str> {
        match self {
            KvVal::Str(s) => s.split_whitespace().collect(),
            KvVal::Array(a) => a
                .iter()
                .map(String::as_str)
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }
}

// arrays are flattened with single space separators, as bash does for "${a[*]}"
impl fmt::Display for KvVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvVal::Str(s) => f.write_str(s),
            KvVal::Array(a) => f.write_str(&a.join(" ")),
        }
    }
}

impl From<&str> for KvVal {
    fn from(s: &str) -> KvVal {
        KvVal::Str(s.to_string())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Quoted {
    No,
    Single,
    Double,
}

// substitute ${VAR} strings with values from previously seen keys in @map.
// no support for env var substitution. No callouts via $(), etc.
fn kv_var_sub(block: &str, map: &HashMap<String, KvVal>) -> Result<String, ParseError> {
    // only support {} wrapped variables that we've already encountered
    let mut varblock = block.split_inclusive(&['{', '}']);
    if varblock.next() != Some("{") {
        return Err(ParseError::VarBraces);
    }
    let key = match varblock.next().and_then(|v| v.strip_suffix('}')) {
        Some(k) => k,
        None => return Err(ParseError::VarUnclosed),
    };

    let subbed = match map.get(key) {
        Some(val) => val.to_string(),
        None => return Err(ParseError::VarUnseen(key.to_string())),
    };
    // need to retain anything that comes after the var-closing '}'
    Ok(varblock.fold(subbed, |a, b| a + b))
}

// parse array elements following the opening '('. Returns None if the
// closing ')' is yet to come, i.e. the array continues on the next line.
fn kv_array_process(
    val: &str,
    map: &HashMap<String, KvVal>,
) -> Result<Option<Vec<String>>, ParseError> {
    let mut elems: Vec<String> = vec![];
    let mut cur = String::new();
    let mut in_elem = false;
    let mut inquote = Quoted::No;
    let mut chars = val.chars();

    while let Some(c) = chars.next() {
        match (c, inquote) {
            ('\\', Quoted::Single) => cur.push(c),
            ('\\', _) => match chars.next() {
                // line continuation
                Some('\n') => {}
                Some(e) => {
                    cur.push(e);
                    in_elem = true;
                }
                None => return Err(ParseError::BadEscape(String::new())),
            },
            ('\'', Quoted::No) => {
                inquote = Quoted::Single;
                in_elem = true;
            }
            ('\'', Quoted::Single) => inquote = Quoted::No,
            ('"', Quoted::No) => {
                inquote = Quoted::Double;
                in_elem = true;
            }
            ('"', Quoted::Double) => inquote = Quoted::No,
            ('$', Quoted::No | Quoted::Double) => {
                if chars.next() != Some('{') {
                    return Err(ParseError::VarBraces);
                }
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => return Err(ParseError::VarUnclosed),
                    }
                }
                match map.get(&key) {
                    Some(v) => cur.push_str(&v.to_string()),
                    None => return Err(ParseError::VarUnseen(key)),
                }
                in_elem = true;
            }
            (' ' | '\t' | '\n', Quoted::No) => {
                if in_elem {
                    elems.push(std::mem::take(&mut cur));
                    in_elem = false;
                }
            }
            ('#', Quoted::No) if !in_elem => {
                // comment runs to the end of the line
                if !chars.by_ref().any(|n| n == '\n') {
                    return Ok(None);
                }
            }
            (')', Quoted::No) => {
                if in_elem {
                    elems.push(cur);
                }
                let rest = chars.as_str().trim_start();
                if !rest.is_empty() && !rest.starts_with('#') {
                    return Err(ParseError::TrailingContent);
                }
                return Ok(Some(elems));
            }
            _ => {
                cur.push(c);
                in_elem = true;
            }
        }
    }

    Ok(None)
}

// process a single conf line.
// Roughly attempts to work similar to Bash variable assignment.
// Doesn't support multiple assignments on a single line.
// @line: line to process
// @map: hashmap to stash any full, valid key+val into
// returns: error or multi-line unprocessed portion of @line
fn kv_process(line: &str, map: &mut HashMap<String, KvVal>) -> Result<Option<String>, ParseError> {
    // ignore empty / comment lines
    if line.trim_start() == "" || line.trim_start().starts_with("#") {
        return Ok(None);
    }

    // split at first '='
    let (key, val) = match line.split_once('=') {
        None => return Err(ParseError::MissingEquals),
        Some((k, v)) => (k.trim_start(), v),
    };

    if key == "" {
        return Err(ParseError::EmptyKey);
    }
    if key.contains(&['\\', '/', '\"', '\'', ' ', '\t', '$', '#', '.', '`', '(', ')']) {
        return Err(ParseError::InvalidKey);
    }

    if let Some(arr) = val.strip_prefix('(') {
        return match kv_array_process(arr, map)? {
            // keep the whole line, the next one gets appended
            None => Ok(Some(line.to_string())),
            Some(elems) => {
                map.insert(key.to_string(), KvVal::Array(elems));
                Ok(None)
            }
        };
    }

    let mut inquote = Quoted::No;
    let mut escape_next = false;
    let mut comment_next = false;
    let mut var_next = false;

    let mut unquoted_val = String::new();
    for mut quoteblock in val.split_inclusive(&['\\', '\"', '\'', ' ', '\t', '$']) {
        if escape_next {
            if quoteblock.starts_with(&['\\', '\"', '\'', ' ', '\t', '$']) {
                // keep as is
            } else if quoteblock.starts_with('\n') && inquote != Quoted::No {
                // multiline
                break;
            } else {
                // bad escape. on bash the \ is kept if quoted, or dropped if not
                return Err(ParseError::BadEscape(quoteblock.to_string()));
            }
            escape_next = false;
            unquoted_val.push_str(quoteblock);

            if quoteblock.len() != 1 {
                return Err(ParseError::EscapeBoundary);
            }
            continue;
        }

        // comment after unquoted space is valid, otherwise invalid
        if comment_next {
            if quoteblock.starts_with("#") {
                break;
            } else if quoteblock.trim_start() == "" {
                continue;
            } else {
                return Err(ParseError::UnexpectedWhitespace);
            }
        }

        let var_got: String;
        if var_next {
            var_got = kv_var_sub(quoteblock, map)?;
            quoteblock = &var_got;
            var_next = false;
        }

        if let Some(q) = quoteblock.strip_suffix('\\').filter(|_| inquote != Quoted::Single) {
            // next special char is escaped, unless single quoted
            escape_next = true;
            unquoted_val.push_str(q);
        } else if let Some(q) = quoteblock.strip_suffix('\"') {
            inquote = match inquote {
                Quoted::No => Quoted::Double,
                Quoted::Double => Quoted::No,
                Quoted::Single => {
                    unquoted_val.push_str(quoteblock);
                    continue;
                }
            };
            unquoted_val.push_str(q);
        } else if let Some(q) = quoteblock.strip_suffix('\'') {
            inquote = match inquote {
                Quoted::No => Quoted::Single,
                Quoted::Single => Quoted::No,
                Quoted::Double => {
                    unquoted_val.push_str(quoteblock);
                    continue;
                }
            };
            unquoted_val.push_str(q);
        } else if let Some(q) = quoteblock
            .strip_suffix(&[' ', '\t'])
            .filter(|_| inquote == Quoted::No)
        {
            comment_next = true;
            unquoted_val.push_str(q);
        } else if let Some(q) = quoteblock.strip_suffix('$').filter(|_| inquote != Quoted::Single) {
            // variable substitution unless single quoted
            var_next = true;
            unquoted_val.push_str(q);
        } else if let Some(q) = quoteblock.strip_suffix('\n') {
            unquoted_val.push_str(q);
        } else {
            // EOF without newline, unquoted space, single quoted '$'
            unquoted_val.push_str(quoteblock);
        }
    }

    // handle multi-line with possible '\' terminator
    if inquote != Quoted::No {
        // newline and any spaces collapsed into one space, unless escaped within "
        let mut push_space = " ";
        let mut ml = line.trim_end();
        if let Some(stripped) = ml.strip_suffix('\\').filter(|_| inquote == Quoted::Double) {
            let l = stripped.len();
            ml = stripped.trim_end();
            if l == ml.len() {
                push_space = "";
            }
        }

        let mut ml_kv = ml.to_string();
        ml_kv.push_str(push_space);
        return Ok(Some(ml_kv));
    }

    map.insert(key.to_string(), KvVal::Str(unquoted_val));
    Ok(None)
}

#[derive(Debug, Default)]
pub struct KvConf {
    map: HashMap<String, KvVal>,
    // only parse assignments to these keys. None parses everything and
    // rejects lines which aren't assignments.
    keys: Option<HashSet<String>>,
}

impl KvConf {
    pub fn new() -> KvConf {
        KvConf::default()
    }

    pub fn with_keys<I, S>(keys: I) -> KvConf
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KvConf {
            map: HashMap::new(),
            keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&KvVal> {
        self.map.get(key)
    }

    pub fn into_map(self) -> HashMap<String, KvVal> {
        self.map
    }

    fn wanted(&self, line: &str) -> bool {
        let keys = match &self.keys {
            None => return true,
            Some(k) => k,
        };
        match line.split_once('=') {
            Some((k, _)) => keys.contains(k.trim_start()),
            None => false,
        }
    }

    //
    // Example:
    // fn main() {
    //     let f = File::open("mkinitcpio.conf").expect("failed to open conf file");
    //     let mut conf = KvConf::with_keys(["MODULES", "HOOKS"]);
    //     let _res = conf.process(io::BufReader::new(f));
    // }
    pub fn process<R: io::BufRead>(&mut self, mut rdr: R) -> Result<(), KvError> {
        let mut buffer = String::new();
        let mut linenum = 0;

        loop {
            linenum += 1;
            match rdr.read_line(&mut buffer)? {
                0 => break, // EOF
                n if n > CONF_LINE_MAX => {
                    return Err(KvError::Parse {
                        line: linenum,
                        kind: ParseError::LineTooLong,
                    });
                }
                _ => {}
            };

            if !self.wanted(&buffer) {
                buffer.clear();
                continue;
            }

            match kv_process(&buffer, &mut self.map) {
                Err(kind) => return Err(KvError::Parse { line: linenum, kind }),
                // remainder may contain multi-line string
                Ok(Some(remainder)) => buffer = remainder,
                Ok(None) => buffer.clear(),
            };
        }

        if !buffer.is_empty() {
            return Err(KvError::Parse {
                line: linenum - 1,
                kind: ParseError::Unterminated,
            });
        }
        Ok(())
    }
}
