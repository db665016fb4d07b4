use super::{BodyError, BodyParser, EntityFlag, MessageContext};

/// Drops the body so the connection can move on to the next message.
#[derive(Debug, Default)]
pub struct DiscardBodyParser {
    flag: EntityFlag,
    discarded: u64,
    finished: bool,
}

impl DiscardBodyParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_discarded(&self) -> u64 {
        self.discarded
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl BodyParser for DiscardBodyParser {
    fn kind(&self) -> &'static str {
        "discard"
    }

    fn initialize(&mut self, _context: &MessageContext<'_>) -> Result<(), BodyError> {
        self.discarded = 0;
        self.finished = false;
        Ok(())
    }

    fn feed(&mut self, data: &[u8]) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        self.discarded += data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        self.finished = true;
        Ok(())
    }

    fn entity_flag(&self) -> &EntityFlag {
        &self.flag
    }
}
