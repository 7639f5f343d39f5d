//! Schemaless decoding of JSON streams and YAML multi-document input.
//!
//! Input whose first non-whitespace byte is `{` or `[` is read as a stream of
//! concatenated JSON values (JSON Lines included); anything else is split
//! into YAML documents on `---` separator lines. A top-level JSON array
//! yields each of its elements. A malformed record produces an error and
//! decoding resumes at the next record.
//!
//! Decoding pulls from a [`BufRead`] one record at a time, so each record is
//! handed out as soon as it is complete. A read error ends the stream after
//! everything decoded so far has been emitted.

use std::io::{self, BufRead, Read};
use std::ops::ControlFlow;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid JSON in record {record}: {source}")]
    Json {
        record: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid YAML in document {index}: {source}")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document {index} is not valid UTF-8: {source}")]
    Utf8 {
        index: usize,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

/// Pick the decoder from the first non-whitespace byte.
pub fn sniff_format(buf: &[u8]) -> DocumentFormat {
    match buf.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => DocumentFormat::Json,
        _ => DocumentFormat::Yaml,
    }
}

/// Peek at the first non-whitespace byte of `reader`. Only whole blank lines
/// are consumed, so indentation of the first YAML line survives.
fn sniff_reader<R: BufRead>(reader: &mut R) -> io::Result<DocumentFormat> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(DocumentFormat::Yaml);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let format = sniff_format(&buf[pos..]);
                let blank = buf[..pos]
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |nl| nl + 1);
                reader.consume(blank);
                return Ok(format);
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Decode every record read from `reader`, handing each result to `emit`.
/// Returning `ControlFlow::Break` from `emit` stops decoding early.
pub fn decode_reader<R, F>(mut reader: R, mut emit: F)
where
    R: BufRead,
    F: FnMut(Result<Value, DocumentError>) -> ControlFlow<()>,
{
    let _ = match sniff_reader(&mut reader) {
        Ok(DocumentFormat::Json) => decode_json_stream(reader, &mut emit),
        Ok(DocumentFormat::Yaml) => decode_yaml_stream(reader, &mut emit),
        Err(e) => emit(Err(DocumentError::Io(e))),
    };
}

/// Decode every record in `buf`.
pub fn decode_documents<F>(buf: &[u8], emit: F)
where
    F: FnMut(Result<Value, DocumentError>) -> ControlFlow<()>,
{
    decode_reader(buf, emit)
}

/// Collect every record of `buf`.
pub fn decode_all(buf: &[u8]) -> Vec<Result<Value, DocumentError>> {
    let mut out = Vec::new();
    decode_documents(buf, |result| {
        out.push(result);
        ControlFlow::Continue(())
    });
    out
}

// ─── JSON ───────────────────────────────────────────────────────────────────

/// Remembers whether the last byte handed out ended a line, so that resync
/// after a malformed record knows if it is already at a line start.
struct LineTracker<R> {
    inner: R,
    at_line_start: bool,
}

impl<R: Read> Read for LineTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.at_line_start = buf[n - 1] == b'\n';
        }
        Ok(n)
    }
}

fn decode_json_stream<R, F>(reader: R, emit: &mut F) -> ControlFlow<()>
where
    R: BufRead,
    F: FnMut(Result<Value, DocumentError>) -> ControlFlow<()>,
{
    let mut tracker = LineTracker {
        inner: reader,
        at_line_start: true,
    };
    let mut record = 0;
    loop {
        let mut stream = serde_json::Deserializer::from_reader(&mut tracker).into_iter::<Value>();
        let failure = loop {
            match stream.next() {
                None => return ControlFlow::Continue(()),
                Some(Ok(Value::Array(items))) => {
                    record += 1;
                    for item in items {
                        emit(Ok(item))?;
                    }
                }
                Some(Ok(value)) => {
                    record += 1;
                    emit(Ok(value))?;
                }
                Some(Err(e)) => break e,
            }
        };
        drop(stream);
        record += 1;

        if failure.is_io() {
            return emit(Err(DocumentError::Io(failure.into())));
        }
        emit(Err(DocumentError::Json {
            record,
            source: failure,
        }))?;
        match skip_to_next_record(&mut tracker) {
            Ok(true) => continue,
            Ok(false) => return ControlFlow::Continue(()),
            Err(e) => return emit(Err(DocumentError::Io(e))),
        }
    }
}

/// Discard input up to the next line that opens a top-level JSON value.
/// Returns false at end of input.
fn skip_to_next_record<R: BufRead>(tracker: &mut LineTracker<R>) -> io::Result<bool> {
    let mut discarded = Vec::new();
    if !tracker.at_line_start {
        tracker.inner.read_until(b'\n', &mut discarded)?;
    }
    loop {
        let next = tracker.inner.fill_buf()?.first().copied();
        match next {
            None => return Ok(false),
            Some(b'{') | Some(b'[') => {
                tracker.at_line_start = true;
                return Ok(true);
            }
            Some(_) => {
                discarded.clear();
                tracker.inner.read_until(b'\n', &mut discarded)?;
            }
        }
    }
}

// ─── YAML ───────────────────────────────────────────────────────────────────

/// Accumulate lines until a `---` separator (which opens the next document)
/// or a `...` end marker (which closes the current one).
fn decode_yaml_stream<R, F>(mut reader: R, emit: &mut F) -> ControlFlow<()>
where
    R: BufRead,
    F: FnMut(Result<Value, DocumentError>) -> ControlFlow<()>,
{
    let mut index = 0;
    let mut doc = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return emit(Err(DocumentError::Io(e))),
        }

        let trimmed = line.trim_ascii_end();
        if (trimmed == b"---" || trimmed.starts_with(b"--- ")) && !doc.is_empty() {
            emit_yaml_document(&doc, index, emit)?;
            index += 1;
            doc.clear();
        }
        let ends_document = trimmed == b"...";
        doc.extend_from_slice(&line);
        if ends_document {
            emit_yaml_document(&doc, index, emit)?;
            index += 1;
            doc.clear();
        }
    }
    if doc.is_empty() {
        return ControlFlow::Continue(());
    }
    emit_yaml_document(&doc, index, emit)
}

fn emit_yaml_document<F>(doc: &[u8], index: usize, emit: &mut F) -> ControlFlow<()>
where
    F: FnMut(Result<Value, DocumentError>) -> ControlFlow<()>,
{
    let text = match std::str::from_utf8(doc) {
        Ok(text) => text,
        Err(source) => return emit(Err(DocumentError::Utf8 { index, source })),
    };
    if is_blank_document(text) {
        return ControlFlow::Continue(());
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::Null) => ControlFlow::Continue(()),
        Ok(value) => emit(Ok(value)),
        Err(source) => emit(Err(DocumentError::Yaml { index, source })),
    }
}

fn is_blank_document(doc: &str) -> bool {
    doc.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{BufReader, Cursor};

    fn values(buf: &str) -> (Vec<Value>, usize) {
        let mut ok = Vec::new();
        let mut errors = 0;
        for result in decode_all(buf.as_bytes()) {
            match result {
                Ok(v) => ok.push(v),
                Err(_) => errors += 1,
            }
        }
        (ok, errors)
    }

    #[test]
    fn sniffs_json_and_yaml() {
        assert_eq!(sniff_format(b"  \n{\"a\":1}"), DocumentFormat::Json);
        assert_eq!(sniff_format(b"[1]"), DocumentFormat::Json);
        assert_eq!(sniff_format(b"kind: Event"), DocumentFormat::Yaml);
        assert_eq!(sniff_format(b""), DocumentFormat::Yaml);
    }

    #[test]
    fn json_lines() {
        let (ok, errors) = values("{\"a\":1}\n{\"a\":2}\n\n{\"a\":3}\n");
        assert_eq!(errors, 0);
        assert_eq!(ok, vec![json!({"a":1}), json!({"a":2}), json!({"a":3})]);
    }

    #[test]
    fn json_array_is_unrolled() {
        let (ok, errors) = values("[{\"a\":1},{\"a\":2}]");
        assert_eq!(errors, 0);
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn json_resumes_after_corrupt_line() {
        let (ok, errors) = values("{\"a\":1}\n{\"a\": oops}\n{\"a\":3}\n");
        assert_eq!(errors, 1);
        assert_eq!(ok, vec![json!({"a":1}), json!({"a":3})]);
    }

    #[test]
    fn json_truncated_tail() {
        let (ok, errors) = values("{\"a\":1}\n{\"a\":");
        assert_eq!(ok.len(), 1);
        assert_eq!(errors, 1);
    }

    #[test]
    fn yaml_multi_document() {
        let text = "---\nkind: A\n---\n# comment only\n---\nkind: B\n...\n";
        let (ok, errors) = values(text);
        assert_eq!(errors, 0);
        assert_eq!(ok, vec![json!({"kind": "A"}), json!({"kind": "B"})]);
    }

    #[test]
    fn yaml_bad_document_does_not_poison_the_rest() {
        let text = "kind: A\n---\nkind: [unclosed\n---\nkind: C\n";
        let (ok, errors) = values(text);
        assert_eq!(errors, 1);
        assert_eq!(ok, vec![json!({"kind": "A"}), json!({"kind": "C"})]);
    }

    #[test]
    fn json_resumes_on_the_line_after_an_unterminated_string() {
        let (ok, errors) = values("{\"a\":\"x\n{\"a\":2}\n");
        assert_eq!(errors, 1);
        assert_eq!(ok, vec![json!({"a":2})]);
    }

    #[test]
    fn yaml_invalid_utf8_is_a_document_error() {
        let buf = b"kind: A\n---\nkind: \xff\n---\nkind: C\n";
        let results = decode_all(buf);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &json!({"kind": "A"}));
        assert!(matches!(results[1], Err(DocumentError::Utf8 { index: 1, .. })));
        assert_eq!(results[2].as_ref().unwrap(), &json!({"kind": "C"}));
    }

    /// Serves `data`, then fails like a dropped connection.
    struct FailingTail {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingTail {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("connection reset")),
                n => Ok(n),
            }
        }
    }

    fn decode_failing(data: &str) -> Vec<Result<Value, DocumentError>> {
        let reader = BufReader::new(FailingTail {
            data: Cursor::new(data.as_bytes().to_vec()),
        });
        let mut out = Vec::new();
        decode_reader(reader, |result| {
            out.push(result);
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn read_error_keeps_records_already_decoded() {
        let out = decode_failing("{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"a":1}));
        assert_eq!(out[1].as_ref().unwrap(), &json!({"a":2}));
        assert!(matches!(out[2], Err(DocumentError::Io(_))));

        let out = decode_failing("kind: A\n---\nkind: B\n");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), &json!({"kind": "A"}));
        assert!(matches!(out[1], Err(DocumentError::Io(_))));
    }

    #[test]
    fn indented_yaml_after_blank_lines() {
        let (ok, errors) = values("\n\n  kind: A\n  verb: get\n");
        assert_eq!(errors, 0);
        assert_eq!(ok, vec![json!({"kind": "A", "verb": "get"})]);
    }

    #[test]
    fn emit_can_stop_early() {
        let mut seen = 0;
        decode_documents(b"{\"a\":1}\n{\"a\":2}\n", |_| {
            seen += 1;
            ControlFlow::Break(())
        });
        assert_eq!(seen, 1);
    }
}
