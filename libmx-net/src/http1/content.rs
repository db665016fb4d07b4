use libmx_codec::StreamDecoder;
use tracing::debug;

use super::types::{ContentCoding, ParseError, ParseErrorKind};
use crate::body::{AnyBodyParser, BodyError, BodyParser};

/// Content decoding followed by the attached body parser.
///
/// Without a body parser decoded bytes are dropped, so the body is still
/// validated and drained.
#[derive(Default)]
pub(crate) struct BodyPipeline {
    decoder: Option<StreamDecoder>,
    parser: Option<AnyBodyParser>,
}

impl std::fmt::Debug for BodyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyPipeline")
            .field("decoding", &self.decoder.is_some())
            .field("parser", &self.parser)
            .finish()
    }
}

impl BodyPipeline {
    pub(crate) fn set_coding(&mut self, coding: ContentCoding) {
        self.decoder = match coding {
            ContentCoding::Identity => None,
            ContentCoding::Gzip => Some(StreamDecoder::gzip()),
            ContentCoding::Deflate => Some(StreamDecoder::deflate()),
        };
    }

    pub(crate) fn attach(&mut self, parser: AnyBodyParser) {
        self.parser = Some(parser);
    }

    pub(crate) fn parser(&self) -> Option<&AnyBodyParser> {
        self.parser.as_ref()
    }

    pub(crate) fn take_parser(&mut self) -> Option<AnyBodyParser> {
        self.parser.take()
    }

    pub(crate) fn clear(&mut self) {
        self.decoder = None;
        self.parser = None;
    }

    pub(crate) fn feed(&mut self, data: &[u8], offset: usize) -> Result<(), ParseError> {
        match self.decoder.as_mut() {
            Some(decoder) => {
                let decoded = decoder.decode(data).map_err(|err| {
                    debug!(error = %err, "content decoding failed");
                    ParseError::new(ParseErrorKind::ContentDecodeError, offset)
                })?;
                self.deliver(&decoded, offset)
            }
            None => self.deliver(data, offset),
        }
    }

    /// Flushes the decoder and signals end of body to the parser.
    pub(crate) fn finish(&mut self, offset: usize) -> Result<(), ParseError> {
        if let Some(decoder) = self.decoder.as_mut() {
            let tail = decoder
                .finish()
                .map_err(|_| ParseError::new(ParseErrorKind::ContentDecodeError, offset))?;
            self.deliver(&tail, offset)?;
        }
        match self.parser.as_mut() {
            Some(parser) => parser.finish().map_err(|err| rejected(err, offset)),
            None => Ok(()),
        }
    }

    fn deliver(&mut self, data: &[u8], offset: usize) -> Result<(), ParseError> {
        if data.is_empty() {
            return Ok(());
        }
        match self.parser.as_mut() {
            Some(parser) => parser.feed(data).map_err(|err| rejected(err, offset)),
            None => Ok(()),
        }
    }
}

fn rejected(err: BodyError, offset: usize) -> ParseError {
    debug!(error = %err, "body parser rejected the body");
    ParseError::new(ParseErrorKind::BodyParserRejected, offset)
}
