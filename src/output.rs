use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::db::StoreCounts;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

/// Snapshot printed by `kira-ri status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database: Utf8PathBuf,
    pub checkpoint_path: Utf8PathBuf,
    pub checkpoint: Option<String>,
    pub counts: StoreCounts,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Human-readable output; progress lines go to stderr so stdout stays clean.
pub struct TextOutput;

impl TextOutput {
    pub fn print_run(summary: &RunSummary) {
        let green = "\x1b[32m";
        let yellow = "\x1b[33m";
        let cyan = "\x1b[36m";
        let red = "\x1b[31m";
        let reset = "\x1b[0m";

        let elapsed = summary.finished_at - summary.started_at;
        println!("{cyan}kira-ri run summary{reset}");
        println!(
            "{green}stored reads: {} ({} hits){reset}",
            summary.processed, summary.hits_stored
        );
        println!("{green}already stored: {}{reset}", summary.duplicates);
        println!("{cyan}search calls: {}{reset}", summary.search_calls);
        println!("{yellow}rejected hits: {}{reset}", summary.hits_rejected);
        for rejected in &summary.rejected {
            println!(
                "{yellow}  {} {}: {}{reset}",
                rejected.header, rejected.accession, rejected.reason
            );
        }
        println!("{red}failed reads: {}{reset}", summary.failed.len());
        for failed in &summary.failed {
            println!(
                "{red}  {} ({}): {}{reset}",
                failed.header, failed.stage, failed.reason
            );
        }
        if let Some(halted) = &summary.halted {
            println!("{red}halted at {}{reset}", halted.header);
        }
        println!(
            "{cyan}finished in {}s{reset}",
            elapsed.num_seconds().max(0)
        );
    }

    pub fn print_status(report: &StatusReport) {
        println!("database: {}", report.database);
        println!(
            "checkpoint: {} ({})",
            report.checkpoint.as_deref().unwrap_or("none"),
            report.checkpoint_path
        );
        println!("reads: {}", report.counts.reads);
        println!("organisms: {}", report.counts.organisms);
        println!("proteins: {}", report.counts.proteins);
        println!("hits: {}", report.counts.hits);
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
