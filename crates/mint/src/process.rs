//! Child process supervision and line-buffered output demultiplexing.
//!
//! Each child stream is pumped through a [`StreamBuffer`], which flushes
//! only complete lines to the shared parent writer. With several jobs
//! running concurrently, interleaved output therefore never splits a line.

use std::{
    io::{Read, Write},
    process::{Command, Stdio},
    sync::{Arc, Mutex, mpsc::Sender},
    thread::JoinHandle,
};

/// Shared destination for job output; one lock acquisition per flushed
/// chunk of whole lines.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

/// A writer that appends to a shared byte buffer; used by tests and by the
/// build driver to capture job output.
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().expect("output lock poisoned");
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("output lock poisoned").extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Buffers one child stream, writing only complete lines to the sink and
/// retaining the partial last line until more data (or EOF) arrives.
pub struct StreamBuffer {
    buffer: Vec<u8>,
    sink: OutputSink,
}

impl StreamBuffer {
    #[must_use]
    pub fn new(sink: OutputSink) -> Self {
        Self {
            buffer: Vec::new(),
            sink,
        }
    }

    /// Appends a chunk and flushes every complete line.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        if let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') {
            let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
            let mut out = self.sink.lock().expect("output lock poisoned");
            let _ = out.write_all(&complete);
            let _ = out.flush();
        }
    }

    /// Flushes any trailing partial line; called at EOF.
    pub fn finish(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut trailing = std::mem::take(&mut self.buffer);
        trailing.push(b'\n');
        let mut out = self.sink.lock().expect("output lock poisoned");
        let _ = out.write_all(&trailing);
        let _ = out.flush();
    }
}

/// Completion notice delivered to the scheduler's event channel.
#[derive(Debug, Clone, Copy)]
pub struct ProcessExit {
    pub job: usize,
    pub success: bool,
}

/// A running child with its pump threads.
pub struct ProcessHandle {
    pumps: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Waits for the stream pumps to drain; called after the exit event.
    pub fn join_pumps(self) {
        for pump in self.pumps {
            let _ = pump.join();
        }
    }
}

fn pump_stream(mut stream: impl Read, mut buffer: StreamBuffer) {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(_) => break,
        }
    }
    buffer.finish();
}

/// Spawns a child process with both output streams line-buffered into
/// `sink`. The exit status arrives on `events` tagged with `job`.
pub fn spawn(
    job: usize,
    program: &str,
    args: &[String],
    cwd: &str,
    sink: &OutputSink,
    events: &Sender<ProcessExit>,
) -> std::io::Result<ProcessHandle> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let buffer = StreamBuffer::new(Arc::clone(sink));
        pumps.push(std::thread::spawn(move || pump_stream(stdout, buffer)));
    }
    if let Some(stderr) = child.stderr.take() {
        let buffer = StreamBuffer::new(Arc::clone(sink));
        pumps.push(std::thread::spawn(move || pump_stream(stderr, buffer)));
    }

    let events = events.clone();
    pumps.push(std::thread::spawn(move || {
        let success = child.wait().map(|s| s.success()).unwrap_or(false);
        let _ = events.send(ProcessExit { job, success });
    }));

    Ok(ProcessHandle { pumps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_lines_are_held_back() {
        let captured = CapturedOutput::new();
        let sink: OutputSink = Arc::new(Mutex::new(captured.clone()));
        let mut buffer = StreamBuffer::new(sink);
        buffer.push(b"hel");
        assert_eq!(captured.contents(), "");
        buffer.push(b"lo\nwor");
        assert_eq!(captured.contents(), "hello\n");
        buffer.finish();
        assert_eq!(captured.contents(), "hello\nwor\n");
    }

    #[test]
    fn interleaved_half_lines_stay_whole() {
        let captured = CapturedOutput::new();
        let sink: OutputSink = Arc::new(Mutex::new(captured.clone()));
        let mut a = StreamBuffer::new(Arc::clone(&sink));
        let mut b = StreamBuffer::new(Arc::clone(&sink));
        // Two jobs alternate half-lines; output must contain whole lines
        // only.
        a.push(b"alpha ");
        b.push(b"beta ");
        a.push(b"one\n");
        b.push(b"two\n");
        a.finish();
        b.finish();
        let out = captured.contents();
        for line in out.lines() {
            assert!(
                line == "alpha one" || line == "beta two",
                "line was split across jobs: {line:?}"
            );
        }
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn multiple_lines_flush_in_one_chunk() {
        let captured = CapturedOutput::new();
        let sink: OutputSink = Arc::new(Mutex::new(captured.clone()));
        let mut buffer = StreamBuffer::new(sink);
        buffer.push(b"a\nb\nc");
        assert_eq!(captured.contents(), "a\nb\n");
        buffer.push(b"\n");
        assert_eq!(captured.contents(), "a\nb\nc\n");
    }
}
