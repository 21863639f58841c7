//! Progress bars for long-running operations

use cartflash_core::Progress;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

fn bar_style(phase: &str) -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
            phase
        ))?
        .progress_chars("#>-"))
}

fn spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    phase: &'static str,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            phase: "",
        }
    }

    fn start_bar(&mut self, total: u64, phase: &'static str) {
        self.finish();
        self.phase = phase;
        let pb = ProgressBar::new(total);
        pb.set_style(bar_style(phase).unwrap_or_else(|_| ProgressStyle::default_bar()));
        self.current_bar = Some(self.multi.add(pb));
    }

    fn start_spinner(&mut self, message: String) {
        self.finish();
        self.phase = "Erasing";
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for IndicatifProgress {
    fn reading(&mut self, total_bytes: usize) {
        self.start_bar(total_bytes as u64, "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_read as u64);
        }
    }

    fn erasing(&mut self, sectors: usize) {
        let message = if sectors == 1 {
            "Erasing...".to_string()
        } else {
            format!("Erasing {} sectors...", sectors)
        };
        self.start_spinner(message);
    }

    fn erase_progress(&mut self, sectors_erased: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!("Erased {} sector(s)...", sectors_erased));
        }
    }

    fn writing(&mut self, total_bytes: usize) {
        self.start_bar(total_bytes as u64, "Writing");
    }

    fn write_progress(&mut self, bytes_written: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(bytes_written as u64);
        }
    }

    fn complete(&mut self) {
        self.finish();
    }
}

impl Drop for IndicatifProgress {
    fn drop(&mut self) {
        // leave an aborted bar where it stopped
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}
