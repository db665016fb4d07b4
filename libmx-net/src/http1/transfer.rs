use tracing::trace;

use super::types::{ParseError, ParseErrorKind, ParseState};
use crate::headers::{HeaderMap, HeaderRegistry, decode_header_text, is_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Identity { remaining: u64 },
    CloseDelimited,
    ChunkPreStart,
    ChunkSize { size: u64 },
    ChunkExtension { size: u64, len: usize },
    ChunkSizeLf { size: u64 },
    ChunkData { remaining: u64 },
    ChunkAfterData,
    ChunkAfterDataLf,
    TrailerStart,
    TrailerLine,
    TrailerLineLf,
    TrailerEndLf,
    Done,
}

/// Removes transfer framing (identity, chunked, or close-delimited) from a body.
#[derive(Debug)]
pub(crate) struct TransferDecoder {
    state: State,
    line: Vec<u8>,
    line_cap: usize,
    header_budget: usize,
    trailers: HeaderMap,
    registry: HeaderRegistry,
    decoded: u64,
}

impl TransferDecoder {
    fn with_state(state: State) -> Self {
        Self {
            state,
            line: Vec::new(),
            line_cap: 0,
            header_budget: 0,
            trailers: HeaderMap::new(),
            registry: HeaderRegistry::empty(),
            decoded: 0,
        }
    }

    pub(crate) fn identity(length: u64) -> Self {
        if length == 0 {
            return Self::with_state(State::Done);
        }
        Self::with_state(State::Identity { remaining: length })
    }

    pub(crate) fn close_delimited() -> Self {
        Self::with_state(State::CloseDelimited)
    }

    /// `header_budget` is what is left of the header block limit for trailers.
    pub(crate) fn chunked(header_budget: usize, line_cap: usize) -> Self {
        Self {
            line_cap,
            header_budget,
            ..Self::with_state(State::ChunkPreStart)
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub(crate) fn decoded_bytes(&self) -> u64 {
        self.decoded
    }

    pub(crate) fn take_trailers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.trailers)
    }

    pub(crate) fn parse_state(&self) -> ParseState {
        match self.state {
            State::Identity { .. } | State::CloseDelimited => ParseState::IdentityBody,
            State::ChunkPreStart => ParseState::ChunkPreStart,
            State::ChunkSize { .. } | State::ChunkExtension { .. } => ParseState::ChunkStart,
            State::ChunkSizeLf { .. } => ParseState::ChunkStartEnding,
            State::ChunkData { .. } => ParseState::ChunkData,
            State::ChunkAfterData | State::ChunkAfterDataLf => ParseState::ChunkAfterData,
            State::TrailerStart
            | State::TrailerLine
            | State::TrailerLineLf
            | State::TrailerEndLf => ParseState::ChunkTrailer,
            State::Done => ParseState::Done,
        }
    }

    /// End of input. Only a close-delimited body may end here.
    pub(crate) fn finish(&mut self, offset: usize) -> Result<(), ParseError> {
        match self.state {
            State::CloseDelimited | State::Done => {
                self.state = State::Done;
                Ok(())
            }
            _ => Err(ParseError::new(ParseErrorKind::UnexpectedEof, offset)),
        }
    }

    /// Consumes framing from `input` and hands payload runs to `sink` with their
    /// absolute offset. Stops once the body is complete; returns the bytes used.
    pub(crate) fn decode<F>(
        &mut self,
        input: &[u8],
        base: usize,
        mut sink: F,
    ) -> Result<usize, ParseError>
    where
        F: FnMut(&[u8], usize) -> Result<(), ParseError>,
    {
        let mut pos = 0;
        while pos < input.len() && self.state != State::Done {
            let offset = base + pos;
            let byte = input[pos];
            match self.state {
                State::Identity { remaining } | State::ChunkData { remaining } => {
                    let take = clamp(remaining, input.len() - pos);
                    sink(&input[pos..pos + take], offset)?;
                    self.decoded += take as u64;
                    pos += take;
                    let remaining = remaining - take as u64;
                    self.state = match (self.state, remaining) {
                        (State::Identity { .. }, 0) => State::Done,
                        (State::Identity { .. }, _) => State::Identity { remaining },
                        (_, 0) => State::ChunkAfterData,
                        _ => State::ChunkData { remaining },
                    };
                    continue;
                }
                State::CloseDelimited => {
                    sink(&input[pos..], offset)?;
                    self.decoded += (input.len() - pos) as u64;
                    pos = input.len();
                    continue;
                }
                State::ChunkPreStart => {
                    let digit = hex_value(byte).ok_or_else(|| framing(offset))?;
                    self.state = State::ChunkSize { size: digit };
                }
                State::ChunkSize { size } => {
                    if let Some(digit) = hex_value(byte) {
                        let size = size
                            .checked_mul(16)
                            .and_then(|size| size.checked_add(digit))
                            .ok_or_else(|| {
                                ParseError::new(ParseErrorKind::ChunkSizeOverflow, offset)
                            })?;
                        self.state = State::ChunkSize { size };
                    } else {
                        match byte {
                            b' ' | b'\t' | b';' => {
                                self.state = State::ChunkExtension { size, len: 1 }
                            }
                            b'\r' => self.state = State::ChunkSizeLf { size },
                            b'\n' => self.begin_chunk(size),
                            _ => return Err(framing(offset)),
                        }
                    }
                }
                State::ChunkExtension { size, len } => match byte {
                    b'\r' => self.state = State::ChunkSizeLf { size },
                    b'\n' => self.begin_chunk(size),
                    _ if len >= self.line_cap => return Err(framing(offset)),
                    _ => self.state = State::ChunkExtension { size, len: len + 1 },
                },
                State::ChunkSizeLf { size } => {
                    if byte != b'\n' {
                        return Err(framing(offset));
                    }
                    self.begin_chunk(size);
                }
                State::ChunkAfterData => match byte {
                    b'\r' => self.state = State::ChunkAfterDataLf,
                    b'\n' => self.state = State::ChunkPreStart,
                    _ => return Err(framing(offset)),
                },
                State::ChunkAfterDataLf => {
                    if byte != b'\n' {
                        return Err(framing(offset));
                    }
                    self.state = State::ChunkPreStart;
                }
                State::TrailerStart => {
                    self.charge(offset)?;
                    match byte {
                        b'\r' => self.state = State::TrailerEndLf,
                        b'\n' => self.state = State::Done,
                        b' ' | b'\t' => return Err(malformed(offset)),
                        _ => {
                            self.line.clear();
                            self.line.push(byte);
                            self.state = State::TrailerLine;
                        }
                    }
                }
                State::TrailerLine => {
                    self.charge(offset)?;
                    match byte {
                        b'\r' => self.state = State::TrailerLineLf,
                        b'\n' => self.end_trailer_line(offset)?,
                        _ if self.line.len() >= self.line_cap => {
                            return Err(ParseError::new(
                                ParseErrorKind::HeaderBlockTooLarge,
                                offset,
                            ));
                        }
                        _ => self.line.push(byte),
                    }
                }
                State::TrailerLineLf => {
                    self.charge(offset)?;
                    if byte != b'\n' {
                        return Err(malformed(offset));
                    }
                    self.end_trailer_line(offset)?;
                }
                State::TrailerEndLf => {
                    self.charge(offset)?;
                    if byte != b'\n' {
                        return Err(malformed(offset));
                    }
                    self.state = State::Done;
                }
                State::Done => break,
            }
            pos += 1;
        }
        Ok(pos)
    }

    fn begin_chunk(&mut self, size: u64) {
        trace!(size, "chunk");
        self.state = if size == 0 {
            State::TrailerStart
        } else {
            State::ChunkData { remaining: size }
        };
    }

    fn charge(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.header_budget == 0 {
            return Err(ParseError::new(
                ParseErrorKind::HeaderBlockTooLarge,
                offset,
            ));
        }
        self.header_budget -= 1;
        Ok(())
    }

    fn end_trailer_line(&mut self, offset: usize) -> Result<(), ParseError> {
        self.state = State::TrailerStart;
        let line = decode_header_text(&self.line);
        let (name, value) = line.split_once(':').ok_or_else(|| malformed(offset))?;
        if !is_token(name) {
            return Err(malformed(offset));
        }
        let value = value.trim_matches([' ', '\t']);
        trace!(header = name, value, "trailer");
        self.trailers
            .insert(&self.registry, name, value)
            .map_err(|_| malformed(offset))
    }
}

/// Frames `data` as a chunked body of `chunk_size` byte chunks, terminator included.
pub fn encode_chunked(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunk_size = chunk_size.max(1);
    let mut out = Vec::with_capacity(data.len() + data.len() / chunk_size * 8 + 5);
    for chunk in data.chunks(chunk_size) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

fn clamp(remaining: u64, available: usize) -> usize {
    usize::try_from(remaining).map_or(available, |remaining| remaining.min(available))
}

fn hex_value(byte: u8) -> Option<u64> {
    (byte as char).to_digit(16).map(u64::from)
}

fn framing(offset: usize) -> ParseError {
    ParseError::new(ParseErrorKind::ChunkFramingError, offset)
}

fn malformed(offset: usize) -> ParseError {
    ParseError::new(ParseErrorKind::MalformedHeader, offset)
}
