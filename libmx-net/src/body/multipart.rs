use std::io::{BufWriter, Write};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    BodyError, BodyLimits, BodyParser, EntityFlag, FileField, FormFields, MessageContext,
    TempUpload,
};
use crate::headers::{ContentDisposition, ContentType, TypedHeader};

const MAX_PART_HEADER_LINE: usize = 4096;

/// Where the matcher is inside `delimiter` (`CRLF "--" boundary`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    // `bare_lf` means the delimiter started at LF, so the CR was never seen
    MayBeDelimiter { matched: usize, bare_lf: bool },
    AfterDelimiter,
    CloseDash,
    Padding,
    PaddingLf,
    PartHeader,
    PartHeaderLf,
    Epilogue,
}

enum Sink {
    Preamble,
    Skipped,
    Field {
        name: String,
        value: Vec<u8>,
    },
    File {
        name: String,
        filename: String,
        content_type: String,
        writer: BufWriter<NamedTempFile>,
        size: u64,
    },
}

/// `multipart/form-data` body split into text fields and uploaded files.
pub struct MultipartFormParser {
    limits: BodyLimits,
    flag: EntityFlag,
    delimiter: Vec<u8>,
    state: State,
    sink: Sink,
    header_line: Vec<u8>,
    part_headers: Vec<(String, String)>,
    fields: FormFields,
    files: Vec<FileField>,
    finished: bool,
}

impl std::fmt::Debug for MultipartFormParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartFormParser")
            .field("state", &self.state)
            .field("fields", &self.fields)
            .field("files", &self.files.len())
            .finish()
    }
}

impl MultipartFormParser {
    pub fn new(limits: BodyLimits) -> Self {
        Self {
            limits,
            flag: EntityFlag::new(),
            delimiter: Vec::new(),
            state: State::Data,
            sink: Sink::Preamble,
            header_line: Vec::new(),
            part_headers: Vec::new(),
            fields: FormFields::new(),
            files: Vec::new(),
            finished: false,
        }
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }

    pub fn files(&self) -> &[FileField] {
        &self.files
    }

    pub fn into_parts(self) -> (FormFields, Vec<FileField>) {
        (self.fields, self.files)
    }

    fn step(&mut self, data: &[u8], mut pos: usize) -> Result<usize, BodyError> {
        let byte = data[pos];
        match self.state {
            State::Data => {
                let run = data[pos..]
                    .iter()
                    .position(|byte| *byte == b'\r' || *byte == b'\n')
                    .unwrap_or(data.len() - pos);
                self.write_data(&data[pos..pos + run])?;
                pos += run;
                if pos < data.len() {
                    self.state = if data[pos] == b'\r' {
                        State::MayBeDelimiter {
                            matched: 1,
                            bare_lf: false,
                        }
                    } else {
                        State::MayBeDelimiter {
                            matched: 2,
                            bare_lf: true,
                        }
                    };
                    pos += 1;
                }
                return Ok(pos);
            }
            State::MayBeDelimiter { matched, bare_lf } => {
                if byte != self.delimiter[matched] {
                    let start = usize::from(bare_lf);
                    let replay = self.delimiter[start..matched].to_vec();
                    self.write_data(&replay)?;
                    self.state = State::Data;
                    // the mismatching byte may itself open a delimiter
                    return Ok(pos);
                }
                if matched + 1 == self.delimiter.len() {
                    self.close_part()?;
                    self.state = State::AfterDelimiter;
                } else {
                    self.state = State::MayBeDelimiter {
                        matched: matched + 1,
                        bare_lf,
                    };
                }
            }
            State::AfterDelimiter => match byte {
                b'-' => self.state = State::CloseDash,
                b' ' | b'\t' => self.state = State::Padding,
                b'\r' => self.state = State::PaddingLf,
                b'\n' => self.start_part_headers(),
                _ => return Err(malformed("unexpected byte after boundary")),
            },
            State::CloseDash => {
                if byte != b'-' {
                    return Err(malformed("unexpected byte after boundary"));
                }
                debug!(
                    fields = self.fields.len(),
                    files = self.files.len(),
                    "multipart body complete"
                );
                self.state = State::Epilogue;
            }
            State::Padding => match byte {
                b' ' | b'\t' => {}
                b'\r' => self.state = State::PaddingLf,
                b'\n' => self.start_part_headers(),
                _ => return Err(malformed("unexpected byte after boundary")),
            },
            State::PaddingLf => {
                if byte != b'\n' {
                    return Err(malformed("boundary line not terminated"));
                }
                self.start_part_headers();
            }
            State::PartHeader => match byte {
                b'\r' => self.state = State::PartHeaderLf,
                b'\n' => self.end_header_line()?,
                _ => {
                    if self.header_line.len() >= MAX_PART_HEADER_LINE {
                        return Err(malformed("part header line too long"));
                    }
                    self.header_line.push(byte);
                }
            },
            State::PartHeaderLf => {
                if byte != b'\n' {
                    return Err(malformed("part header line not terminated"));
                }
                self.end_header_line()?;
            }
            State::Epilogue => return Ok(data.len()),
        }
        Ok(pos + 1)
    }

    fn start_part_headers(&mut self) {
        self.header_line.clear();
        self.part_headers.clear();
        self.state = State::PartHeader;
    }

    fn end_header_line(&mut self) -> Result<(), BodyError> {
        self.state = State::PartHeader;
        let line = std::mem::take(&mut self.header_line);
        if line.is_empty() {
            return self.begin_part();
        }
        let text = String::from_utf8(line)
            .map_err(|_| malformed("part header is not UTF-8"))?;
        if text.starts_with([' ', '\t']) {
            let Some((_, value)) = self.part_headers.last_mut() else {
                return Err(malformed("continuation before any part header"));
            };
            value.push(' ');
            value.push_str(text.trim());
            return Ok(());
        }
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| malformed("part header without a colon"))?;
        self.part_headers
            .push((name.trim().to_string(), value.trim().to_string()));
        Ok(())
    }

    fn begin_part(&mut self) -> Result<(), BodyError> {
        self.state = State::Data;
        let mut disposition = None;
        let mut content_type = None;
        for (name, value) in &self.part_headers {
            if name.eq_ignore_ascii_case("Content-Disposition") {
                if disposition.is_some() {
                    return Err(malformed("repeated Content-Disposition"));
                }
                let mut header = ContentDisposition::default();
                header
                    .parse(value)
                    .map_err(|err| BodyError::Malformed(err.to_string()))?;
                disposition = Some(header);
            } else if name.eq_ignore_ascii_case("Content-Type") {
                if content_type.is_some() {
                    return Err(malformed("repeated Content-Type"));
                }
                let mut header = ContentType::default();
                header
                    .parse(value)
                    .map_err(|err| BodyError::Malformed(err.to_string()))?;
                content_type = Some(header);
            } else if name.eq_ignore_ascii_case("Content-Transfer-Encoding") {
                let encoding = value.to_ascii_lowercase();
                if !matches!(encoding.as_str(), "7bit" | "8bit" | "binary" | "identity") {
                    return Err(BodyError::Malformed(format!(
                        "unsupported part transfer encoding {value:?}"
                    )));
                }
            }
        }

        let disposition =
            disposition.ok_or_else(|| malformed("part without Content-Disposition"))?;
        if !disposition.is_form_data() {
            return Err(malformed("part is not form-data"));
        }
        let name = match disposition.field_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(malformed("part without a field name")),
        };

        self.sink = match disposition.filename() {
            _ if self.flag.is_set() => Sink::Skipped,
            Some(filename) => {
                if self.files.len() >= self.limits.max_file_count {
                    debug!(field = %name, "too many uploaded files");
                    self.flag.mark();
                    Sink::Skipped
                } else {
                    let file = self.limits.temp_file()?;
                    debug!(
                        field = %name,
                        filename = %filename,
                        path = %file.path().display(),
                        "multipart file part"
                    );
                    Sink::File {
                        name,
                        filename,
                        content_type: content_type
                            .map(|header| header.media_type)
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        writer: BufWriter::new(file),
                        size: 0,
                    }
                }
            }
            None => Sink::Field {
                name,
                value: Vec::new(),
            },
        };
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), BodyError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.flag.is_set() {
            if !matches!(self.sink, Sink::Preamble) {
                self.sink = Sink::Skipped;
            }
            return Ok(());
        }
        match &mut self.sink {
            Sink::Preamble | Sink::Skipped => {}
            Sink::Field { value, .. } => {
                if value.len() + data.len() > self.limits.field_cap() {
                    self.flag.mark();
                    self.sink = Sink::Skipped;
                } else {
                    value.extend_from_slice(data);
                }
            }
            Sink::File { writer, size, .. } => {
                if *size + data.len() as u64 > self.limits.max_file_bytes {
                    self.flag.mark();
                    self.sink = Sink::Skipped;
                } else {
                    writer.write_all(data)?;
                    *size += data.len() as u64;
                }
            }
        }
        Ok(())
    }

    fn close_part(&mut self) -> Result<(), BodyError> {
        match std::mem::replace(&mut self.sink, Sink::Skipped) {
            Sink::Preamble | Sink::Skipped => {}
            Sink::Field { name, value } => {
                let value = String::from_utf8(value)
                    .map_err(|_| BodyError::Malformed(format!("field {name} is not UTF-8")))?;
                self.fields.push(name, value);
            }
            Sink::File {
                name,
                filename,
                content_type,
                writer,
                size,
            } => {
                let file = writer.into_inner().map_err(|err| err.into_error())?;
                let mut upload = TempUpload::new(file);
                upload.flush()?;
                self.files.push(FileField {
                    name,
                    filename,
                    content_type,
                    size,
                    file: upload,
                });
            }
        }
        Ok(())
    }
}

fn malformed(reason: &str) -> BodyError {
    BodyError::Malformed(reason.to_string())
}

impl BodyParser for MultipartFormParser {
    fn kind(&self) -> &'static str {
        "multipart"
    }

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError> {
        let content_type = context
            .content_type()
            .filter(|header| header.is("multipart/form-data"))
            .ok_or_else(|| malformed("not a multipart/form-data body"))?;
        let boundary = content_type
            .boundary()
            .filter(|boundary| !boundary.is_empty() && boundary.len() <= 70)
            .ok_or_else(|| malformed("missing or invalid multipart boundary"))?;

        self.delimiter = [b"\r\n--".as_slice(), boundary.as_bytes()].concat();
        // the first delimiter may open the body, as if a CRLF preceded it
        self.state = State::MayBeDelimiter {
            matched: 2,
            bare_lf: false,
        };
        self.sink = Sink::Preamble;
        self.header_line.clear();
        self.part_headers.clear();
        self.fields = FormFields::new();
        self.files.clear();
        self.finished = false;
        Ok(())
    }

    fn feed(&mut self, data: &[u8]) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        if self.delimiter.is_empty() {
            return Err(BodyError::NotInitialized);
        }
        let mut pos = 0;
        while pos < data.len() {
            pos = self.step(data, pos)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BodyError> {
        if self.finished {
            return Err(BodyError::AlreadyFinished);
        }
        self.finished = true;
        if self.state != State::Epilogue {
            self.sink = Sink::Skipped;
            return Err(BodyError::Truncated);
        }
        Ok(())
    }

    fn entity_flag(&self) -> &EntityFlag {
        &self.flag
    }
}
