use std::io::{self, Read, Write};

use flate2::read::{DeflateDecoder as DeflateReader, GzDecoder as GzReader, ZlibDecoder as ZlibReader};
use flate2::write::{DeflateEncoder, GzDecoder, GzEncoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::CodecError;

pub fn gzip_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input).map_err(compression_error)?;
    encoder.finish().map_err(compression_error)
}

pub fn gzip_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzReader::new(input);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).map_err(compression_error)?;
    Ok(output)
}

pub fn deflate_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input).map_err(compression_error)?;
    encoder.finish().map_err(compression_error)
}

pub fn deflate_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = DeflateReader::new(input);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).map_err(compression_error)?;
    Ok(output)
}

pub fn zlib_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input).map_err(compression_error)?;
    encoder.finish().map_err(compression_error)
}

pub fn zlib_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibReader::new(input);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).map_err(compression_error)?;
    Ok(output)
}

/// Incremental decoder for a gzip or deflate body.
///
/// Input may be split at any byte. Each call to [`StreamDecoder::decode`] returns
/// whatever output became available; [`StreamDecoder::finish`] checks that the
/// compressed stream was complete. Bytes that follow the end of the compressed
/// stream are ignored.
pub struct StreamDecoder {
    inner: Inner,
    ended: bool,
}

enum Inner {
    // "deflate" is zlib-wrapped on most servers and raw on some; decided by the first two bytes
    Sniffing(Vec<u8>),
    Active(Box<dyn Sink + Send>),
}

trait Sink: Write {
    fn drain(&mut self) -> Vec<u8>;
    fn finish_stream(&mut self) -> io::Result<()>;

    fn stream_ended(&self) -> bool {
        false
    }
}

impl Sink for GzDecoder<Vec<u8>> {
    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(self.get_mut())
    }

    fn finish_stream(&mut self) -> io::Result<()> {
        self.try_finish()
    }
}

const INFLATE_CHUNK: usize = 8 * 1024;

/// zlib or raw deflate, driven directly so the final block is observable.
struct Inflate {
    state: Decompress,
    output: Vec<u8>,
    done: bool,
}

impl Inflate {
    fn new(zlib_header: bool) -> Self {
        Self {
            state: Decompress::new(zlib_header),
            output: Vec::new(),
            done: false,
        }
    }
}

impl Write for Inflate {
    fn write(&mut self, input: &[u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let start = self.state.total_in();
        loop {
            let consumed = (self.state.total_in() - start) as usize;
            let produced = self.state.total_out();
            self.output.reserve(INFLATE_CHUNK);
            let status = self
                .state
                .decompress_vec(&input[consumed..], &mut self.output, FlushDecompress::None)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            if status == Status::StreamEnd {
                self.done = true;
                break;
            }
            let used = (self.state.total_in() - start) as usize;
            let stalled = self.state.total_out() == produced;
            let room_left = self.output.len() < self.output.capacity();
            if used == input.len() && (room_left || stalled) {
                break;
            }
            if used == consumed && stalled {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "inflate made no progress"));
            }
        }
        Ok((self.state.total_in() - start) as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Sink for Inflate {
    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    fn finish_stream(&mut self) -> io::Result<()> {
        if self.done {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "deflate stream ended before its final block",
            ))
        }
    }

    fn stream_ended(&self) -> bool {
        self.done
    }
}

impl StreamDecoder {
    pub fn gzip() -> Self {
        Self {
            inner: Inner::Active(Box::new(GzDecoder::new(Vec::new()))),
            ended: false,
        }
    }

    pub fn deflate() -> Self {
        Self {
            inner: Inner::Sniffing(Vec::with_capacity(2)),
            ended: false,
        }
    }

    /// True once the compressed stream signalled its end.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.ended || input.is_empty() {
            return Ok(Vec::new());
        }
        if let Inner::Sniffing(head) = &mut self.inner {
            let needed = 2 - head.len();
            let take = needed.min(input.len());
            head.extend_from_slice(&input[..take]);
            if head.len() < 2 {
                return Ok(Vec::new());
            }
            let head = std::mem::take(head);
            self.inner = Inner::Active(deflate_sink_for(&head));
            let mut output = self.pump(&head)?;
            output.extend(self.pump(&input[take..])?);
            return Ok(output);
        }
        self.pump(input)
    }

    pub fn finish(&mut self) -> Result<Vec<u8>, CodecError> {
        match &mut self.inner {
            Inner::Sniffing(head) if head.is_empty() => Ok(Vec::new()),
            Inner::Sniffing(_) => Err(CodecError::Compression(
                "deflate stream ended inside its header".to_string(),
            )),
            Inner::Active(sink) => {
                sink.finish_stream().map_err(compression_error)?;
                self.ended = true;
                Ok(sink.drain())
            }
        }
    }

    fn pump(&mut self, input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let Inner::Active(sink) = &mut self.inner else {
            return Ok(Vec::new());
        };
        let mut offset = 0;
        while offset < input.len() {
            match sink.write(&input[offset..]) {
                Ok(0) => {
                    self.ended = true;
                    break;
                }
                Ok(written) => offset += written,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(compression_error(err)),
            }
        }
        sink.flush().map_err(compression_error)?;
        if sink.stream_ended() {
            self.ended = true;
        }
        Ok(sink.drain())
    }
}

fn deflate_sink_for(head: &[u8]) -> Box<dyn Sink + Send> {
    Box::new(Inflate::new(is_zlib_header(head[0], head[1])))
}

fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && cmf >> 4 <= 7 && ((u16::from(cmf) << 8) | u16::from(flg)) % 31 == 0
}

fn compression_error(err: io::Error) -> CodecError {
    CodecError::Compression(err.to_string())
}
