//! Line-oriented scanner for Wavefront OBJ text
//!
//! Reads one line at a time into a reused buffer, so memory use is bounded by
//! the longest line rather than the file size. Each line is classified into a
//! [`Directive`]; numeric payloads are parsed here, index resolution is left
//! to the builder because it depends on the pool sizes at the time of the face.

use super::error::GeometryError;
use std::io::{BufRead, Read};

/// One `v[/[vt]/[vn]]` group of a face, exactly as written (1-based or negative)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawIndex {
    pub position: i64,
    pub tex_coord: Option<i64>,
    pub normal: Option<i64>,
}

impl RawIndex {
    pub fn position(position: i64) -> Self {
        Self {
            position,
            tex_coord: None,
            normal: None,
        }
    }
}

/// A classified line
#[derive(Debug, Clone, PartialEq)]
pub enum Directive<'a> {
    Position([f32; 3]),
    Normal([f32; 3]),
    TexCoord([f32; 2]),
    MaterialLibrary(&'a str),
    UseMaterial(&'a str),
    /// `o` or `g`; the name may be empty
    Object(&'a str),
    Face(&'a [RawIndex]),
    /// Blank line, comment, or a keyword outside the supported subset
    Ignored,
}

/// Why a line could not be understood
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub keyword: String,
    pub reason: String,
}

impl Malformed {
    fn new(keyword: &str, reason: impl Into<String>) -> Self {
        Self {
            keyword: keyword.to_string(),
            reason: reason.into(),
        }
    }
}

/// A line read from the source, with its 1-based number
#[derive(Debug)]
pub struct Line<'a> {
    pub number: u64,
    pub directive: Result<Directive<'a>, Malformed>,
}

pub struct Tokenizer<R> {
    reader: R,
    line: Vec<u8>,
    face: Vec<RawIndex>,
    line_number: u64,
    bytes_read: u64,
    max_line_len: usize,
}

impl<R: BufRead> Tokenizer<R> {
    pub fn new(reader: R, max_line_len: usize) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(256),
            face: Vec::with_capacity(8),
            line_number: 0,
            bytes_read: 0,
            max_line_len,
        }
    }

    /// Number of lines read so far
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read and classify the next line; `Ok(None)` at end of input
    pub fn next_line(&mut self) -> Result<Option<Line<'_>>, GeometryError> {
        self.line.clear();

        let limit = (self.max_line_len as u64).saturating_add(1);
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)?;
        if read == 0 {
            return Ok(None);
        }

        self.line_number += 1;
        self.bytes_read += read as u64;

        if read as u64 == limit && self.line.last() != Some(&b'\n') {
            return Err(GeometryError::LineTooLong {
                line: self.line_number,
                max: self.max_line_len,
            });
        }

        let number = self.line_number;
        let Self { line, face, .. } = self;
        let directive = match std::str::from_utf8(trim_line_end(line)) {
            Ok(text) => parse_directive(text, face),
            Err(_) => Err(Malformed::new("", "line is not valid UTF-8")),
        };

        Ok(Some(Line { number, directive }))
    }
}

fn trim_line_end(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = bytes {
        bytes = rest;
    }
    bytes
}

/// Classify one line of text, filling `face` for face directives
pub fn parse_directive<'a>(
    text: &'a str,
    face: &'a mut Vec<RawIndex>,
) -> Result<Directive<'a>, Malformed> {
    let text = text.trim_start();
    let mut tokens = text.split_ascii_whitespace();
    let Some(keyword) = tokens.next() else {
        return Ok(Directive::Ignored);
    };
    if keyword.starts_with('#') {
        return Ok(Directive::Ignored);
    }

    let rest = || text[keyword.len()..].trim();
    let malformed = |reason: String| Malformed::new(keyword, reason);

    match keyword {
        "v" => parse_floats(tokens).map(Directive::Position).map_err(malformed),
        "vn" => parse_floats(tokens).map(Directive::Normal).map_err(malformed),
        "vt" => parse_floats(tokens).map(Directive::TexCoord).map_err(malformed),
        "mtllib" | "usemtl" => {
            let name = rest();
            if name.is_empty() {
                return Err(malformed("missing name".to_string()));
            }
            Ok(if keyword == "mtllib" {
                Directive::MaterialLibrary(name)
            } else {
                Directive::UseMaterial(name)
            })
        }
        "o" | "g" => Ok(Directive::Object(rest())),
        "f" => {
            face.clear();
            for group in tokens {
                face.push(parse_index_group(group).map_err(malformed)?);
            }
            if face.len() < 3 {
                return Err(malformed(format!(
                    "a face needs at least 3 vertices, found {}",
                    face.len()
                )));
            }
            Ok(Directive::Face(face.as_slice()))
        }
        _ => Ok(Directive::Ignored),
    }
}

fn parse_floats<'a, const N: usize>(
    mut tokens: impl Iterator<Item = &'a str>,
) -> Result<[f32; N], String> {
    let mut values = [0.0f32; N];
    for value in values.iter_mut() {
        let token = tokens
            .next()
            .ok_or_else(|| format!("expected {N} numbers"))?;
        *value = token
            .parse()
            .map_err(|_| format!("invalid number '{token}'"))?;
    }
    // Extra components (w, vertex colours) are ignored
    Ok(values)
}

fn parse_index_group(group: &str) -> Result<RawIndex, String> {
    let mut parts = group.split('/');

    let position = match parts.next() {
        Some(part) if !part.is_empty() => parse_index(part)?,
        _ => return Err(format!("missing position index in '{group}'")),
    };
    let tex_coord = parse_optional_index(parts.next())?;
    let normal = parse_optional_index(parts.next())?;

    if parts.next().is_some() {
        return Err(format!("too many components in '{group}'"));
    }

    Ok(RawIndex {
        position,
        tex_coord,
        normal,
    })
}

fn parse_optional_index(part: Option<&str>) -> Result<Option<i64>, String> {
    match part {
        None | Some("") => Ok(None),
        Some(part) => parse_index(part).map(Some),
    }
}

fn parse_index(part: &str) -> Result<i64, String> {
    part.parse()
        .map_err(|_| format!("invalid index '{part}'"))
}
