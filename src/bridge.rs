//! Bridge between pull-based sequences and push-based byte streams.
//!
//! Reading: a dedicated thread owns the underlying reader, decodes it into
//! lines, text chunks or byte chunks and pushes them into a bounded channel.
//! The sequence drains that channel with a blocking receive, so items arrive
//! in order and none are dropped. The reader is closed as soon as the stream
//! ends, the consumer drops the sequence, or the pipeline is terminated.
//!
//! Writing: [`SequenceReader`] exposes a sequence as [`std::io::Read`], and
//! the `write_*` terminals drain a sequence into a writer, file or stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};

use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

const CHUNK_SIZE: usize = 8 * 1024;

/// Default bound of the channel between a reader thread and its sequence.
pub const DEFAULT_CAPACITY: usize = 64;

/// How a byte stream is cut into sequence elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// One element per line, without the `\n` or `\r\n` terminator.
    #[default]
    Line,
    /// Decoded UTF-8 chunks as they arrive. Characters are never split.
    Text,
    /// Raw byte chunks. Only the binary readers ([`read_binary`],
    /// [`read_file_binary`]) accept it; text readers reject it.
    Binary,
}

impl std::str::FromStr for ReadMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(ReadMode::Line),
            "text" => Ok(ReadMode::Text),
            "binary" => Ok(ReadMode::Binary),
            other => Err(PipelineError::invalid("read", format!("Unknown mode '{other}'"))),
        }
    }
}

/// Options for turning a byte stream into a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadConfig {
    pub mode: ReadMode,
    /// Coalesce the whole stream into exactly one element once it ends.
    pub single_value: bool,
    /// Bound of the channel between the reader thread and the consumer.
    pub capacity: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::Line,
            single_value: false,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ReadConfig {
    pub fn mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn single_value(mut self, single_value: bool) -> Self {
        self.single_value = single_value;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/// Tracks whether a reader thread has released its underlying handle.
#[derive(Clone, Default)]
pub struct Teardown {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Teardown {
    /// Whether the underlying handle has been closed.
    pub fn is_closed(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the underlying handle is closed.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.state;
        let mut closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*closed {
            closed = cvar.wait(closed).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the handle is closed or `timeout` elapses.
    ///
    /// Returns whether the handle is closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.state;
        let closed = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (closed, _) = cvar
            .wait_timeout_while(closed, timeout, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
        *closed
    }

    fn close(&self) {
        let (lock, cvar) = &*self.state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }
}

impl std::fmt::Debug for Teardown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Teardown")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Producer end handed to the decoding loop of a reader thread.
struct Feed<T> {
    items: Sender<Result<T>>,
    cancel: Receiver<()>,
}

impl<T> Feed<T> {
    /// Push one element. Returns false once nobody is listening anymore.
    fn push(&self, item: Result<T>) -> bool {
        select! {
            send(self.items, item) -> sent => sent.is_ok(),
            recv(self.cancel) -> _ => false,
        }
    }
}

/// Start a reader thread and return the sequence draining it.
fn spawn_reader<T, R, F>(
    label: &'static str,
    mut reader: R,
    capacity: usize,
    decode: F,
) -> (Sequence<T>, Teardown)
where
    T: Send + 'static,
    R: Read + Send + 'static,
    F: FnOnce(&mut R, &Feed<T>) -> io::Result<()> + Send + 'static,
{
    let (items_tx, items_rx) = crossbeam_channel::bounded(capacity.max(1));
    let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
    let teardown = Teardown::default();
    let closed = teardown.clone();

    let feed = Feed {
        items: items_tx,
        cancel: cancel_rx,
    };
    let spawned = thread::Builder::new()
        .name(format!("seqpipe-{label}"))
        .spawn(move || {
            if let Err(err) = decode(&mut reader, &feed) {
                feed.push(Err(err.into()));
            }
            drop(reader);
            closed.close();
            tracing::debug!(source = label, "stream closed");
        });
    if let Err(err) = spawned {
        teardown.close();
        return (Sequence::failed(err.into()), teardown);
    }

    let seq = Sequence::root(label, std::iter::from_fn(move || items_rx.recv().ok()));
    seq.handle().on_release(move || drop(cancel_tx));
    (seq, teardown)
}

fn decode_lines<R: Read>(reader: &mut R, feed: &Feed<String>) -> io::Result<()> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        tracing::trace!(bytes = line.len(), "line read");
        if !feed.push(Ok(String::from_utf8_lossy(&line).into_owned())) {
            return Ok(());
        }
    }
}

/// Split off the longest prefix of `pending` that is complete UTF-8.
fn take_complete_text(pending: &mut Vec<u8>) -> String {
    let cut = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(cut);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}

fn decode_text<R: Read>(reader: &mut R, feed: &Feed<String>) -> io::Result<()> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut pending = Vec::new();
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            if !pending.is_empty() {
                feed.push(Ok(String::from_utf8_lossy(&pending).into_owned()));
            }
            return Ok(());
        }
        pending.extend_from_slice(&chunk[..read]);
        let text = take_complete_text(&mut pending);
        if !text.is_empty() && !feed.push(Ok(text)) {
            return Ok(());
        }
    }
}

fn decode_chunks<R: Read>(reader: &mut R, feed: &Feed<Vec<u8>>) -> io::Result<()> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            return Ok(());
        }
        tracing::trace!(bytes = read, "chunk read");
        if !feed.push(Ok(chunk[..read].to_vec())) {
            return Ok(());
        }
    }
}

/// Read a text stream as a sequence and keep track of its teardown.
///
/// A [`ReadMode::Binary`] config yields a single
/// [`PipelineError::InvalidArgument`] and closes `reader` unread.
pub fn read_stream_tracked<R>(reader: R, config: &ReadConfig) -> (Sequence<String>, Teardown)
where
    R: Read + Send + 'static,
{
    if config.mode == ReadMode::Binary {
        drop(reader);
        let teardown = Teardown::default();
        teardown.close();
        return (Sequence::failed(binary_on_text("read")), teardown);
    }
    if config.single_value {
        return spawn_reader("read", reader, 1, |reader, feed| {
            let mut all = Vec::new();
            reader.read_to_end(&mut all)?;
            feed.push(Ok(String::from_utf8_lossy(&all).into_owned()));
            Ok(())
        });
    }
    match config.mode {
        ReadMode::Line => spawn_reader("read", reader, config.capacity, decode_lines),
        ReadMode::Text | ReadMode::Binary => {
            spawn_reader("read", reader, config.capacity, decode_text)
        }
    }
}

/// The error a text reader reports when handed [`ReadMode::Binary`].
pub(crate) fn binary_on_text(operator: &'static str) -> PipelineError {
    PipelineError::invalid(
        operator,
        "Binary mode yields byte chunks; use the binary variant of this reader",
    )
}

/// Read a text stream as a sequence.
///
/// Fails with [`PipelineError::InvalidArgument`] for [`ReadMode::Binary`];
/// use [`read_binary`] for raw bytes.
pub fn read_stream<R>(reader: R, config: &ReadConfig) -> Sequence<String>
where
    R: Read + Send + 'static,
{
    read_stream_tracked(reader, config).0
}

/// Read a byte stream as a sequence of chunks and keep track of its teardown.
///
/// Bytes are passed through untouched whatever `config.mode` says.
pub fn read_binary_tracked<R>(reader: R, config: &ReadConfig) -> (Sequence<Vec<u8>>, Teardown)
where
    R: Read + Send + 'static,
{
    if config.single_value {
        return spawn_reader("read_binary", reader, 1, |reader, feed| {
            let mut all = Vec::new();
            reader.read_to_end(&mut all)?;
            feed.push(Ok(all));
            Ok(())
        });
    }
    spawn_reader("read_binary", reader, config.capacity, decode_chunks)
}

/// Read a byte stream as a sequence of chunks.
pub fn read_binary<R>(reader: R, config: &ReadConfig) -> Sequence<Vec<u8>>
where
    R: Read + Send + 'static,
{
    read_binary_tracked(reader, config).0
}

/// Open `path` and read it as text.
pub fn read_file(path: impl AsRef<Path>, config: &ReadConfig) -> Result<Sequence<String>> {
    let file = File::open(path.as_ref())?;
    tracing::debug!(path = %path.as_ref().display(), "opened file for reading");
    Ok(read_stream(file, config))
}

/// Open `path` and read it as raw byte chunks.
pub fn read_file_binary(path: impl AsRef<Path>, config: &ReadConfig) -> Result<Sequence<Vec<u8>>> {
    let file = File::open(path.as_ref())?;
    tracing::debug!(path = %path.as_ref().display(), "opened file for binary reading");
    Ok(read_binary(file, config))
}

/// How values are turned into bytes on the push side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Text as is.
    Text,
    /// Text followed by a newline.
    #[default]
    Line,
}

/// A value that can be written to a byte stream.
pub trait Emit {
    /// The bytes to write, or `None` to skip this value.
    ///
    /// Binary values ignore `mode` and are written verbatim.
    fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>>;
}

fn text_bytes(text: String, mode: WriteMode) -> Vec<u8> {
    let mut bytes = text.into_bytes();
    if mode == WriteMode::Line {
        bytes.push(b'\n');
    }
    bytes
}

impl Emit for String {
    fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>> {
        Some(text_bytes(self, mode))
    }
}

impl Emit for &str {
    fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>> {
        Some(text_bytes(self.to_string(), mode))
    }
}

impl Emit for Vec<u8> {
    fn into_bytes(self, _mode: WriteMode) -> Option<Vec<u8>> {
        Some(self)
    }
}

impl Emit for serde_json::Value {
    fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>> {
        let text = match self {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        Some(text_bytes(text, mode))
    }
}

impl<T: Emit> Emit for Option<T> {
    fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>> {
        self.and_then(|value| value.into_bytes(mode))
    }
}

macro_rules! emit_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Emit for $ty {
                fn into_bytes(self, mode: WriteMode) -> Option<Vec<u8>> {
                    Some(text_bytes(self.to_string(), mode))
                }
            }
        )*
    };
}

emit_display!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);

/// A sequence exposed as [`std::io::Read`].
///
/// Values are pulled only when the reader needs more bytes.
pub struct SequenceReader<T> {
    sequence: Sequence<T>,
    mode: WriteMode,
    pending: Vec<u8>,
    offset: usize,
}

impl<T: Emit + Send + 'static> Read for SequenceReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.sequence.next() {
                None => return Ok(0),
                Some(Err(err)) => return Err(io::Error::other(err)),
                Some(Ok(value)) => {
                    if let Some(bytes) = value.into_bytes(self.mode) {
                        self.pending = bytes;
                        self.offset = 0;
                    }
                }
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl<T: Emit + Send + 'static> Sequence<T> {
    /// The push-style endpoint of this sequence.
    pub fn reader(self, mode: WriteMode) -> SequenceReader<T> {
        SequenceReader {
            sequence: self,
            mode,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// Drain the sequence into `writer`.
    pub fn write_to<W: Write>(self, mut writer: W, mode: WriteMode) -> Result<()> {
        self.for_each(|value| {
            if let Some(bytes) = value.into_bytes(mode) {
                writer.write_all(&bytes)?;
            }
            Ok(())
        })?;
        writer.flush()?;
        Ok(())
    }

    /// Drain the sequence to standard output, one value per line.
    pub fn stdout(self) -> Result<()> {
        self.write_to(io::stdout().lock(), WriteMode::Line)
    }

    /// Drain the sequence into a new file at `path`, one value per line.
    ///
    /// The file is created before the first value is pulled.
    pub fn write_file(self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "writing file");
        self.write_to(BufWriter::new(file), WriteMode::Line)
    }

    /// Like [`write_file`](Self::write_file) but buffers every value first.
    ///
    /// This allows a pipeline to read a file and rewrite it in place.
    pub fn write_file_final(self, path: impl AsRef<Path>) -> Result<()> {
        let values = self.values()?;
        Sequence::from_collection(values).write_file(path)
    }
}

impl Sequence<String> {
    /// A sequence over the lines of `reader`.
    pub fn from_stream(reader: impl Read + Send + 'static) -> Self {
        read_stream(reader, &ReadConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    #[test]
    fn test_lines_strip_terminators() {
        let seq = Sequence::from_stream(Cursor::new(b"a\r\nb\n\nc".to_vec()));
        assert_eq!(seq.values().unwrap(), vec!["a", "b", "", "c"]);
    }

    #[test]
    fn test_text_mode_keeps_multibyte_chars() {
        // The leading ASCII byte puts a two-byte character across every chunk boundary.
        let text = format!("a{}", "é".repeat(CHUNK_SIZE));
        let seq = read_stream(
            Cursor::new(text.clone().into_bytes()),
            &ReadConfig::default().mode(ReadMode::Text),
        );
        let chunks = seq.values().unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_single_value_coalesces() {
        let seq = read_stream(
            Cursor::new(b"one\ntwo\n".to_vec()),
            &ReadConfig::default().single_value(true),
        );
        assert_eq!(seq.values().unwrap(), vec!["one\ntwo\n"]);
    }

    #[test]
    fn test_binary_chunks_preserve_bytes() {
        let data: Vec<u8> = (0..=255).cycle().take(CHUNK_SIZE * 2 + 7).collect();
        let chunks = read_binary(Cursor::new(data.clone()), &ReadConfig::default())
            .values()
            .unwrap();
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_text_reader_rejects_binary_mode() {
        let (seq, teardown) = read_stream_tracked(
            Cursor::new(vec![0xff, 0xfe, 0x00, 0x01]),
            &ReadConfig::default().mode(ReadMode::Binary),
        );
        assert!(teardown.is_closed());
        let err = seq.values().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument { operator: "read", .. }));
    }

    #[test]
    fn test_binary_file_keeps_invalid_utf8() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0xff, 0xfe, 0x00, 0x01]).unwrap();

        let chunks = read_file_binary(file.path(), &ReadConfig::default().mode(ReadMode::Binary))
            .unwrap()
            .values()
            .unwrap();
        assert_eq!(chunks.concat(), vec![255, 254, 0, 1]);
    }

    #[test]
    fn test_handle_closed_after_full_read() {
        let (seq, teardown) =
            read_stream_tracked(Cursor::new(b"x\ny\n".to_vec()), &ReadConfig::default());
        assert_eq!(seq.values().unwrap().len(), 2);
        assert!(teardown.wait_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn test_handle_closed_after_early_termination() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..10_000 {
            writeln!(file, "line {i}").unwrap();
        }
        let reader = File::open(file.path()).unwrap();
        let (seq, teardown) =
            read_stream_tracked(reader, &ReadConfig::default().capacity(2));

        let first = seq.first(1).unwrap().values().unwrap();
        assert_eq!(first, vec!["line 0"]);
        assert!(teardown.wait_timeout(Duration::from_secs(2)));
        assert!(teardown.is_closed());
    }

    #[test]
    fn test_handle_closed_when_sequence_dropped() {
        let data = "row\n".repeat(10_000);
        let (mut seq, teardown) = read_stream_tracked(
            Cursor::new(data.into_bytes()),
            &ReadConfig::default().capacity(1),
        );
        assert!(seq.next().is_some());
        drop(seq);
        assert!(teardown.wait_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn test_reader_modes() {
        let mut out = String::new();
        Sequence::from_collection(vec!["a", "b"])
            .reader(WriteMode::Line)
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "a\nb\n");

        let mut raw = String::new();
        Sequence::from_collection(vec!["a", "b"])
            .reader(WriteMode::Text)
            .read_to_string(&mut raw)
            .unwrap();
        assert_eq!(raw, "ab");
    }

    #[test]
    fn test_reader_skips_none_and_forwards_binary() {
        let mut out = Vec::new();
        Sequence::from_collection(vec![Some(vec![1u8, 2]), None, Some(vec![3])])
            .reader(WriteMode::Line)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_write_to_numbers_and_json() {
        let mut out = Vec::new();
        Sequence::from_collection(vec![1, 2, 3])
            .write_to(&mut out, WriteMode::Line)
            .unwrap();
        assert_eq!(out, b"1\n2\n3\n");

        let mut json = Vec::new();
        Sequence::from_collection(vec![serde_json::json!("s"), serde_json::json!({"k": 1})])
            .write_to(&mut json, WriteMode::Line)
            .unwrap();
        assert_eq!(String::from_utf8(json).unwrap(), "s\n{\"k\":1}\n");
    }

    #[test]
    fn test_write_file_final_rewrites_source() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "b\na\n").unwrap();

        read_file(file.path(), &ReadConfig::default())
            .unwrap()
            .sort()
            .write_file_final(file.path())
            .unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_write_error_surfaces_pipeline_error() {
        let err = Sequence::<String>::failed(PipelineError::custom("upstream"))
            .write_to(Vec::new(), WriteMode::Line)
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream");
    }

    #[test]
    fn test_read_mode_parse() {
        assert_eq!("BINARY".parse::<ReadMode>().unwrap(), ReadMode::Binary);
        assert!("words".parse::<ReadMode>().is_err());
    }
}
