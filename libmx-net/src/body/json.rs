use serde_json::Value;

use super::{BodyError, BodyLimits, BodyParser, EntityFlag, MessageContext};

/// Collects the body and parses it as one JSON document at the end.
#[derive(Debug)]
pub struct JsonBodyParser {
    limits: BodyLimits,
    flag: EntityFlag,
    buffer: Vec<u8>,
    document: Option<Value>,
    finished: bool,
}

impl JsonBodyParser {
    pub fn new(limits: BodyLimits) -> Self {
        Self {
            limits,
            flag: EntityFlag::new(),
            buffer: Vec::new(),
            document: None,
            finished: false,
        }
    }

    /// Parsed document, available after `finish` unless the entity was too large.
    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    pub fn into_document(self) -> Option<Value> {
        self.document
    }
}

impl BodyParser for JsonBodyParser {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError> {
        self.buffer.clear();
        self.document = None;
        self.finished = false;
        if context
            .content_length
            .is_some_and(|length| length > self.limits.max_body_bytes)
        {
            self.flag.mark();
        }
        Ok(())
    }

    fn feed(&mut self, data: &[u8]) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        if self.flag.is_set() {
            return Ok(());
        }
        if (self.buffer.len() + data.len()) as u64 > self.limits.max_body_bytes {
            self.flag.mark();
            self.buffer = Vec::new();
            return Ok(());
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        self.finished = true;
        if self.flag.is_set() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut self.buffer);
        self.document = Some(serde_json::from_slice(&buffer)?);
        Ok(())
    }

    fn entity_flag(&self) -> &EntityFlag {
        &self.flag
    }
}
