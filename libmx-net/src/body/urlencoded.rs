use super::{BodyError, BodyLimits, BodyParser, EntityFlag, FormFields, MessageContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NameStart,
    Name,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    High,
    Low(u8),
}

/// `application/x-www-form-urlencoded` body, decoded as it arrives.
#[derive(Debug)]
pub struct UrlEncodedFormParser {
    limits: BodyLimits,
    flag: EntityFlag,
    state: State,
    escape: Escape,
    name: Vec<u8>,
    value: Vec<u8>,
    fields: FormFields,
    total: usize,
    finished: bool,
}

impl UrlEncodedFormParser {
    pub fn new(limits: BodyLimits) -> Self {
        Self {
            limits,
            flag: EntityFlag::new(),
            state: State::NameStart,
            escape: Escape::None,
            name: Vec::new(),
            value: Vec::new(),
            fields: FormFields::new(),
            total: 0,
            finished: false,
        }
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }

    pub fn into_fields(self) -> FormFields {
        self.fields
    }

    fn consume(&mut self, byte: u8) -> Result<(), BodyError> {
        if !(0x20..=0x7e).contains(&byte) {
            return Err(BodyError::Malformed(format!(
                "invalid byte 0x{byte:02x} in form data"
            )));
        }
        if self.escape != Escape::None {
            return self.decode(byte);
        }
        match self.state {
            State::NameStart => match byte {
                b'&' => Ok(()),
                b'=' => Err(BodyError::Malformed("form field without a name".to_string())),
                _ => {
                    self.state = State::Name;
                    self.decode(byte)
                }
            },
            State::Name => match byte {
                b'&' => self.push_field(),
                b'=' => {
                    self.state = State::Value;
                    Ok(())
                }
                _ => self.decode(byte),
            },
            State::Value => match byte {
                b'&' => self.push_field(),
                _ => self.decode(byte),
            },
        }
    }

    fn decode(&mut self, byte: u8) -> Result<(), BodyError> {
        let decoded = match self.escape {
            Escape::None => match byte {
                b'%' => {
                    self.escape = Escape::High;
                    return Ok(());
                }
                b'+' => b' ',
                other => other,
            },
            Escape::High => {
                self.escape = Escape::Low(hex_value(byte)?);
                return Ok(());
            }
            Escape::Low(high) => {
                self.escape = Escape::None;
                (high << 4) | hex_value(byte)?
            }
        };
        match self.state {
            State::Value => self.value.push(decoded),
            _ => self.name.push(decoded),
        }
        Ok(())
    }

    fn push_field(&mut self) -> Result<(), BodyError> {
        let name = String::from_utf8(std::mem::take(&mut self.name))
            .map_err(|_| BodyError::Malformed("form field name is not UTF-8".to_string()))?;
        let value = String::from_utf8(std::mem::take(&mut self.value))
            .map_err(|_| BodyError::Malformed(format!("value of {name} is not UTF-8")))?;
        self.fields.push(name, value);
        self.state = State::NameStart;
        Ok(())
    }
}

fn hex_value(byte: u8) -> Result<u8, BodyError> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => Err(BodyError::Malformed("incomplete percent escape".to_string())),
    }
}

impl BodyParser for UrlEncodedFormParser {
    fn kind(&self) -> &'static str {
        "urlencoded"
    }

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError> {
        self.state = State::NameStart;
        self.escape = Escape::None;
        self.name.clear();
        self.value.clear();
        self.fields = FormFields::new();
        self.total = 0;
        self.finished = false;
        if context
            .content_length
            .is_some_and(|length| length > self.limits.field_cap() as u64)
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
        if self.total + data.len() > self.limits.field_cap() {
            self.flag.mark();
            return Ok(());
        }
        self.total += data.len();
        for &byte in data {
            self.consume(byte)?;
        }
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
        if self.escape != Escape::None {
            return Err(BodyError::Malformed("incomplete percent escape".to_string()));
        }
        if self.state != State::NameStart {
            self.push_field()?;
        }
        Ok(())
    }

    fn entity_flag(&self) -> &EntityFlag {
        &self.flag
    }
}
