use std::io::{Read, Seek, SeekFrom, Write};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{BodyError, BodyLimits, BodyParser, EntityFlag, MessageContext};

/// Buffers the body in memory and spills to a temporary file past `max_memory_bytes`.
#[derive(Debug)]
pub struct DefaultBodyParser {
    limits: BodyLimits,
    flag: EntityFlag,
    memory: Vec<u8>,
    spill: Option<NamedTempFile>,
    size: u64,
    finished: bool,
}

impl DefaultBodyParser {
    pub fn new(limits: BodyLimits) -> Self {
        Self {
            limits,
            flag: EntityFlag::new(),
            memory: Vec::new(),
            spill: None,
            size: 0,
            finished: false,
        }
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_in_memory(&self) -> bool {
        self.spill.is_none()
    }

    /// Copies up to `buf.len()` bytes starting at `offset`; returns how many were copied.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, BodyError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let available = usize::try_from(self.size - offset)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        match &self.spill {
            None => {
                let start = offset as usize;
                buf[..available].copy_from_slice(&self.memory[start..start + available]);
                Ok(available)
            }
            Some(spill) => {
                let mut file = spill.as_file();
                file.seek(SeekFrom::Start(offset))?;
                let mut copied = 0;
                while copied < available {
                    let read = file.read(&mut buf[copied..available])?;
                    if read == 0 {
                        break;
                    }
                    copied += read;
                }
                Ok(copied)
            }
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, BodyError> {
        let mut body = vec![0u8; usize::try_from(self.size).unwrap_or(usize::MAX)];
        let copied = self.read(0, &mut body)?;
        body.truncate(copied);
        Ok(body)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn to_text(&self) -> Result<String, BodyError> {
        Ok(String::from_utf8_lossy(&self.to_vec()?).into_owned())
    }

    fn spill_to_file(&mut self) -> Result<(), BodyError> {
        let mut file = self.limits.temp_file()?;
        file.write_all(&self.memory)?;
        debug!(bytes = self.memory.len(), path = %file.path().display(), "body spilled to disk");
        self.memory = Vec::new();
        self.spill = Some(file);
        Ok(())
    }
}

impl BodyParser for DefaultBodyParser {
    fn kind(&self) -> &'static str {
        "default"
    }

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError> {
        self.memory.clear();
        self.spill = None;
        self.size = 0;
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
        if self.flag.is_set() || data.is_empty() {
            return Ok(());
        }
        if self.size + data.len() as u64 > self.limits.max_body_bytes {
            self.flag.mark();
            return Ok(());
        }
        if self.spill.is_none() && self.memory.len() + data.len() > self.limits.max_memory_bytes {
            self.spill_to_file()?;
        }
        match &mut self.spill {
            Some(file) => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(data)?;
            }
            None => self.memory.extend_from_slice(data),
        }
        self.size += data.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        self.finished = true;
        if let Some(file) = &mut self.spill {
            file.flush()?;
        }
        Ok(())
    }

    fn entity_flag(&self) -> &EntityFlag {
        &self.flag
    }
}
