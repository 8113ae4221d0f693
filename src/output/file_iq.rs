//! Raw IQ file recorder: 32-bit float CF32, interleaved (spec §6).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use num_complex::Complex32;

use crate::error::OutputResult;

#[derive(Debug, Clone)]
pub struct FileIqConfig {
    pub output_dir: PathBuf,
    pub filename_template: String,
    pub label: String,
    pub freq_hz: i64,
}

pub struct FileIqSink {
    config: FileIqConfig,
    writer: Option<BufWriter<File>>,
}

impl FileIqSink {
    pub fn new(config: FileIqConfig) -> Self {
        Self {
            config,
            writer: None,
        }
    }

    fn ensure_open(&mut self) -> OutputResult<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let now = Utc::now();
        let mut name = self.config.filename_template.clone();
        name = name.replace("${freq}", &self.config.freq_hz.to_string());
        name = name.replace("${label}", &self.config.label);
        name = name.replace("${start:%Y%m%d-%H}", &now.format("%Y%m%d-%H").to_string());
        let path = self.config.output_dir.join(now.format("%Y/%m/%d").to_string()).join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.writer = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    pub fn write_block(&mut self, iq: &[Complex32]) -> OutputResult<()> {
        self.ensure_open()?;
        let w = self.writer.as_mut().expect("opened above");
        for sample in iq {
            w.write_all(&sample.re.to_le_bytes())?;
            w.write_all(&sample.im.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> OutputResult<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
        }
        Ok(())
    }
}
