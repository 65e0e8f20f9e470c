use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

use crate::error::Result;
use crate::reasoner::IntervalSnapshot;

/// Destination for closed intervals in offline runs, called in close order.
pub trait ReportSink {
    fn report(&mut self, interval: &IntervalSnapshot) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ReportSink for Vec<IntervalSnapshot> {
    fn report(&mut self, interval: &IntervalSnapshot) -> Result<()> {
        self.push(interval.clone());
        Ok(())
    }
}

/// Appends one `<model> <start> <end> <peak> <rise>` line per interval.
pub struct FileReporter<W: Write> {
    writer: W,
}

impl FileReporter<BufWriter<File>> {
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> FileReporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ReportSink for FileReporter<W> {
    fn report(&mut self, interval: &IntervalSnapshot) -> Result<()> {
        writeln!(self.writer, "{}", interval.report_line())?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
