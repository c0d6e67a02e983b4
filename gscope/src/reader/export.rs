//! # JSON Lines Export
//!
//! Records go through a bounded channel to a writer thread, one JSON object
//! per line. The channel blocks when full, so a slow disk slows the poll loop
//! instead of losing records.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};

use super::records::Record;
use crate::domain::ExportError;

const EXPORT_QUEUE_LEN: usize = 1024;

pub struct JsonLinesExporter {
    tx: Option<Sender<Record>>,
    writer: Option<JoinHandle<Result<u64, ExportError>>>,
}

impl JsonLinesExporter {
    /// Start a writer thread over `out`
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        let (tx, rx) = bounded::<Record>(EXPORT_QUEUE_LEN);
        let writer = std::thread::spawn(move || -> Result<u64, ExportError> {
            let mut out = BufWriter::new(out);
            let mut written = 0u64;
            for record in rx {
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            out.flush()?;
            Ok(written)
        });
        Self { tx: Some(tx), writer: Some(writer) }
    }

    /// # Errors
    /// [`ExportError::Io`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, ExportError> {
        Ok(Self::new(File::create(path)?))
    }

    /// Queue one record, waiting while the queue is full
    ///
    /// # Errors
    /// [`ExportError::WriterGone`] once the writer thread has stopped (it
    /// stops on its first write error, reported by [`Self::finish`]).
    pub fn send(&self, record: Record) -> Result<(), ExportError> {
        let tx = self.tx.as_ref().ok_or(ExportError::WriterGone)?;
        tx.send(record).map_err(|_| ExportError::WriterGone)
    }

    /// Close the queue, wait for the writer and return how many records it wrote
    ///
    /// # Errors
    /// The writer's first serialization or I/O error.
    pub fn finish(mut self) -> Result<u64, ExportError> {
        self.tx.take();
        match self.writer.take() {
            Some(handle) => handle.join().map_err(|_| ExportError::WriterPanicked)?,
            None => Ok(0),
        }
    }
}

impl Drop for JsonLinesExporter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContextId, ThreadId};

    #[test]
    fn test_writes_one_line_per_record() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let exporter = JsonLinesExporter::create(file.path()).unwrap();
        for i in 0..3 {
            exporter
                .send(Record::RunqSteal {
                    thread: ThreadId(i),
                    stealing: ContextId(0),
                    stolen: ContextId(1),
                })
                .unwrap();
        }
        assert_eq!(exporter.finish().unwrap(), 3);

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["kind"], "runq_steal");
        assert_eq!(last["thread"], 2);
    }
}
