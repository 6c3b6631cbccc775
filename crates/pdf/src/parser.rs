//! Linear PDF parser.
//!
//! Walks the file front to back: indirect objects (`N G obj … endobj`),
//! cross-reference sections (skipped; the object scan already found every
//! object, including ones a stale xref no longer points at), trailers
//! (merged in file order, so incremental updates win), and the
//! `startxref`/`%%EOF` tail. Streams are consumed as raw bytes, so stream
//! content can never be mistaken for object syntax.
//!
//! Compressed object streams (`/ObjStm`) are not expanded. Their carrier
//! objects parse fine; documents whose catalog hides inside one simply fail
//! flattening later and degrade to the original bytes.

use std::collections::BTreeMap;

use crate::error::PdfError;
use crate::object::{Dict, Object, ObjectId, Stream};

const WHITESPACE: &[u8] = b"\0\t\n\x0c\r ";
const DELIMITERS: &[u8] = b"()<>[]{}/%";

fn is_whitespace(byte: u8) -> bool {
    WHITESPACE.contains(&byte)
}

fn is_delimiter(byte: u8) -> bool {
    DELIMITERS.contains(&byte)
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

pub(crate) struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skip whitespace and `%` comments (which run to end of line).
    pub(crate) fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while let Some(b) = self.peek() {
                    if b == b'\n' || b == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn error(&self, msg: impl Into<String>) -> PdfError {
        PdfError::Invalid(format!("offset {}: {}", self.pos, msg.into()))
    }

    /// Read a bare keyword token (`obj`, `stream`, `true`, `R`, …).
    fn read_keyword(&mut self) -> String {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if is_regular(byte) {
                self.pos += 1;
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.data[start..self.pos]).into_owned()
    }

    fn peek_keyword(&self) -> String {
        let mut end = self.pos;
        while end < self.data.len() && is_regular(self.data[end]) {
            end += 1;
        }
        String::from_utf8_lossy(&self.data[self.pos..end]).into_owned()
    }

    fn expect_keyword(&mut self, expected: &str) -> Result<(), PdfError> {
        self.skip_whitespace();
        let found = self.read_keyword();
        if found == expected {
            Ok(())
        } else {
            Err(self.error(format!("expected `{expected}`, found `{found}`")))
        }
    }

    /// Parse one object, starting at a non-whitespace position.
    pub(crate) fn parse_object(&mut self) -> Result<Object, PdfError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of data")),
            Some(b'<') => {
                if self.peek_at(1) == Some(b'<') {
                    self.pos += 2;
                    let dict = self.parse_dict_body()?;
                    Ok(Object::Dictionary(dict))
                } else {
                    self.pos += 1;
                    self.parse_hex_string()
                }
            }
            Some(b'(') => {
                self.pos += 1;
                self.parse_literal_string()
            }
            Some(b'/') => {
                self.pos += 1;
                Ok(Object::Name(self.parse_name_body()?))
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek() {
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(Object::Array(items));
                        }
                        Some(_) => items.push(self.parse_object()?),
                        None => return Err(self.error("unterminated array")),
                    }
                }
            }
            Some(b) if b == b'+' || b == b'-' || b == b'.' || b.is_ascii_digit() => {
                self.parse_numeric()
            }
            Some(_) => {
                let keyword = self.read_keyword();
                match keyword.as_str() {
                    "true" => Ok(Object::Boolean(true)),
                    "false" => Ok(Object::Boolean(false)),
                    "null" => Ok(Object::Null),
                    other => Err(self.error(format!("unexpected token `{other}`"))),
                }
            }
        }
    }

    fn parse_dict_body(&mut self) -> Result<Dict, PdfError> {
        let mut dict = Dict::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'>') if self.peek_at(1) == Some(b'>') => {
                    self.pos += 2;
                    return Ok(dict);
                }
                Some(b'/') => {
                    self.pos += 1;
                    let key = self.parse_name_body()?;
                    let value = self.parse_object()?;
                    dict.insert(key, value);
                }
                Some(b) => {
                    return Err(self.error(format!("expected name key in dictionary, found {b:#04x}")));
                }
                None => return Err(self.error("unterminated dictionary")),
            }
        }
    }

    /// Name body after the leading slash, decoding `#hh` escapes.
    fn parse_name_body(&mut self) -> Result<String, PdfError> {
        let mut bytes = Vec::new();
        while let Some(byte) = self.peek() {
            if !is_regular(byte) {
                break;
            }
            self.pos += 1;
            if byte == b'#' {
                let hi = self.bump().ok_or_else(|| self.error("truncated name escape"))?;
                let lo = self.bump().ok_or_else(|| self.error("truncated name escape"))?;
                let value = (hex_value(hi).ok_or_else(|| self.error("bad name escape"))? << 4)
                    | hex_value(lo).ok_or_else(|| self.error("bad name escape"))?;
                bytes.push(value);
            } else {
                bytes.push(byte);
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn parse_literal_string(&mut self) -> Result<Object, PdfError> {
        let mut bytes = Vec::new();
        let mut depth = 1usize;
        loop {
            let byte = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match byte {
                b'(' => {
                    depth += 1;
                    bytes.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Object::String(bytes));
                    }
                    bytes.push(byte);
                }
                b'\\' => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated string escape"))?;
                    match escaped {
                        b'n' => bytes.push(b'\n'),
                        b'r' => bytes.push(b'\r'),
                        b't' => bytes.push(b'\t'),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0c),
                        b'(' | b')' | b'\\' => bytes.push(escaped),
                        b'\r' => {
                            // Line continuation; swallow an LF after CR.
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = (escaped - b'0') as u16;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + (d - b'0') as u16;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            bytes.push(value as u8);
                        }
                        other => bytes.push(other),
                    }
                }
                other => bytes.push(other),
            }
        }
    }

    fn parse_hex_string(&mut self) -> Result<Object, PdfError> {
        let mut nibbles = Vec::new();
        loop {
            let byte = self
                .bump()
                .ok_or_else(|| self.error("unterminated hex string"))?;
            if byte == b'>' {
                break;
            }
            if is_whitespace(byte) {
                continue;
            }
            nibbles.push(hex_value(byte).ok_or_else(|| self.error("bad hex string digit"))?);
        }
        if nibbles.len() % 2 == 1 {
            // Odd digit count: the final digit is the high nibble.
            nibbles.push(0);
        }
        let bytes = nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect();
        Ok(Object::String(bytes))
    }

    /// Integer, real, or indirect reference (`N G R`).
    fn parse_numeric(&mut self) -> Result<Object, PdfError> {
        let first = self.parse_number()?;
        if let Object::Integer(number) = first {
            if number >= 0 {
                // Lookahead for `G R`.
                let saved = self.pos;
                self.skip_whitespace();
                if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    if let Ok(Object::Integer(generation)) = self.parse_number() {
                        self.skip_whitespace();
                        if self.peek() == Some(b'R')
                            && !self.peek_at(1).is_some_and(is_regular)
                            && (0..=u16::MAX as i64).contains(&generation)
                            && number <= u32::MAX as i64
                        {
                            self.pos += 1;
                            return Ok(Object::Reference(ObjectId::new(
                                number as u32,
                                generation as u16,
                            )));
                        }
                    }
                }
                self.pos = saved;
            }
        }
        Ok(first)
    }

    fn parse_number(&mut self) -> Result<Object, PdfError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.pos += 1;
        }
        let mut digits = 0usize;
        let mut real = false;
        while let Some(byte) = self.peek() {
            match byte {
                b'0'..=b'9' => {
                    digits += 1;
                    self.pos += 1;
                }
                b'.' if !real => {
                    real = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if digits == 0 {
            return Err(self.error("malformed number"));
        }
        let text = core::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| self.error("malformed number"))?;
        if real {
            text.parse::<f64>()
                .map(Object::Real)
                .map_err(|_| self.error("malformed real"))
        } else {
            text.parse::<i64>()
                .map(Object::Integer)
                .map_err(|_| self.error("integer out of range"))
        }
    }

    /// Stream data following a stream dictionary. Honors a direct integer
    /// `/Length` when it lines up with an `endstream`; otherwise falls back
    /// to scanning (covers indirect lengths without resolving them).
    fn read_stream_data(&mut self, dict: &Dict) -> Result<Vec<u8>, PdfError> {
        // EOL after the `stream` keyword.
        if self.peek() == Some(b'\r') {
            self.pos += 1;
        }
        if self.peek() == Some(b'\n') {
            self.pos += 1;
        }
        let start = self.pos;

        if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
            let length = length.max(0) as usize;
            let end = start.checked_add(length);
            if let Some(end) = end {
                if end <= self.data.len() {
                    let mut probe = Lexer::new(self.data);
                    probe.pos = end;
                    probe.skip_whitespace();
                    if probe.peek_keyword() == "endstream" {
                        self.pos = end;
                        self.expect_keyword("endstream")?;
                        return Ok(self.data[start..end].to_vec());
                    }
                }
            }
        }

        let marker = b"endstream";
        let haystack = &self.data[start..];
        let found = haystack
            .windows(marker.len())
            .position(|window| window == marker)
            .ok_or_else(|| self.error("stream without endstream"))?;
        let mut end = start + found;
        // Trim the EOL that separates data from the keyword.
        if end > start && self.data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && self.data[end - 1] == b'\r' {
            end -= 1;
        }
        let data = self.data[start..end].to_vec();
        self.pos = start + found + marker.len();
        Ok(data)
    }

    /// Skip a classic cross-reference section (subsection headers plus
    /// fixed-width entries). The object scan makes the actual table
    /// redundant.
    fn skip_xref_section(&mut self) -> Result<(), PdfError> {
        loop {
            self.skip_whitespace();
            if !self.peek().is_some_and(|b| b.is_ascii_digit()) {
                return Ok(());
            }
            let Object::Integer(_start) = self.parse_number()? else {
                return Err(self.error("malformed xref subsection"));
            };
            self.skip_whitespace();
            let Object::Integer(count) = self.parse_number()? else {
                return Err(self.error("malformed xref subsection"));
            };
            if count < 0 {
                return Err(self.error("negative xref entry count"));
            }
            for _ in 0..count {
                self.skip_whitespace();
                let _offset = self.parse_number()?;
                self.skip_whitespace();
                let _generation = self.parse_number()?;
                self.skip_whitespace();
                let kind = self.read_keyword();
                if kind != "n" && kind != "f" {
                    return Err(self.error(format!("bad xref entry kind `{kind}`")));
                }
            }
        }
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Parsed document pieces handed back to [`crate::document::Document`].
#[derive(Debug)]
pub(crate) struct ParsedFile {
    pub version: String,
    pub objects: BTreeMap<ObjectId, Object>,
    pub trailer: Dict,
}

/// Parse a whole file.
pub(crate) fn parse_file(data: &[u8]) -> Result<ParsedFile, PdfError> {
    let version = parse_header(data)?;

    let mut lexer = Lexer::new(data);
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut trailer = Dict::new();

    loop {
        lexer.skip_whitespace();
        if lexer.eof() {
            break;
        }
        if lexer.peek().is_some_and(|b| b.is_ascii_digit()) {
            let (id, object) = parse_indirect_object(&mut lexer)?;
            objects.insert(id, object);
            continue;
        }
        let keyword = lexer.read_keyword();
        match keyword.as_str() {
            "xref" => lexer.skip_xref_section()?,
            "trailer" => {
                let Object::Dictionary(dict) = lexer.parse_object()? else {
                    return Err(PdfError::invalid("trailer is not a dictionary"));
                };
                // Later trailers belong to later incremental updates.
                trailer.extend(dict);
            }
            "startxref" => {
                lexer.skip_whitespace();
                let _ = lexer.parse_number()?;
            }
            other => {
                return Err(PdfError::Invalid(format!("unexpected token `{other}`")));
            }
        }
    }

    if objects.is_empty() {
        return Err(PdfError::invalid("no objects"));
    }

    // Cross-reference stream dictionaries stand in for the trailer in
    // xref-stream-only files; their keys fill any gaps.
    for object in objects.values() {
        let Some(stream) = object.as_stream() else {
            continue;
        };
        if Object::dict_name(&stream.dict, "Type") == Some("XRef") {
            for (key, value) in &stream.dict {
                trailer.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    if trailer.contains_key("Encrypt") {
        return Err(PdfError::Encrypted);
    }

    Ok(ParsedFile {
        version,
        objects,
        trailer,
    })
}

fn parse_header(data: &[u8]) -> Result<String, PdfError> {
    const MAGIC: &[u8] = b"%PDF-";
    if !data.starts_with(MAGIC) {
        return Err(PdfError::invalid("missing %PDF- header"));
    }
    let rest = &data[MAGIC.len()..];
    let end = rest
        .iter()
        .position(|&b| is_whitespace(b))
        .unwrap_or(rest.len());
    let version = String::from_utf8_lossy(&rest[..end]).into_owned();
    if !version.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return Err(PdfError::invalid("malformed header version"));
    }
    Ok(version)
}

fn parse_indirect_object(lexer: &mut Lexer<'_>) -> Result<(ObjectId, Object), PdfError> {
    let Object::Integer(number) = lexer.parse_number()? else {
        return Err(PdfError::invalid("malformed object number"));
    };
    lexer.skip_whitespace();
    let Object::Integer(generation) = lexer.parse_number()? else {
        return Err(PdfError::invalid("malformed object generation"));
    };
    if !(0..=u32::MAX as i64).contains(&number) || !(0..=u16::MAX as i64).contains(&generation) {
        return Err(PdfError::invalid("object id out of range"));
    }
    lexer.expect_keyword("obj")?;

    let mut object = lexer.parse_object()?;

    lexer.skip_whitespace();
    if lexer.peek_keyword() == "stream" {
        let Object::Dictionary(dict) = object else {
            return Err(PdfError::invalid("stream keyword without a dictionary"));
        };
        lexer.read_keyword();
        let data = lexer.read_stream_data(&dict)?;
        object = Object::Stream(Stream { dict, data });
    }

    lexer.expect_keyword("endobj")?;
    Ok((ObjectId::new(number as u32, generation as u16), object))
}
