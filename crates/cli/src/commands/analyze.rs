// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;
use sift_core::protocol::Completion;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, warn};

use crate::cli::OutputFormat;
use crate::config::ClientConfig;
use crate::demux::{Narrative, SessionEvent};
use crate::error::{Error, Result};
use crate::session::{AnalyzeRequest, Client};
use crate::transfer::UploadFile;

/// Upload `files` with `prompt` and stream the analysis to the terminal.
pub fn run(
    config: ClientConfig,
    prompt: String,
    files: Vec<PathBuf>,
    output: OutputFormat,
) -> Result<()> {
    let request = read_request(prompt, &files)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(analyze(config, request, output))
}

/// Reads every input file. Files are uploaded under their base name.
pub(crate) fn read_request(prompt: String, paths: &[PathBuf]) -> Result<AnalyzeRequest> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let data = fs::read(path).map_err(|source| Error::ReadInput {
            path: path.display().to_string(),
            source,
        })?;
        files.push(UploadFile::new(upload_name(path), data));
    }
    Ok(AnalyzeRequest::new(prompt, files))
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

async fn analyze(config: ClientConfig, request: AnalyzeRequest, output: OutputFormat) -> Result<()> {
    let mut client = Client::new(config.connection_config(), config.session_options());
    let (tx, rx) = unbounded_channel();
    let printer = tokio::spawn(print_events(rx, output));

    let handle = client.disconnect_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, disconnecting");
            handle.disconnect();
        }
    });

    let result = client.analyze(&request, tx).await;
    interrupt.abort();
    client.disconnect().await;

    // The sender is gone with the session, so the printer drains and ends.
    let narrative = printer.await.unwrap_or_default();
    let completion = result?;

    match output {
        OutputFormat::Text => {
            if !narrative.content.is_empty() && !narrative.content.ends_with('\n') {
                println!();
            }
            if let Some(summary) = completion.verbal_summary.as_deref() {
                println!("\nSummary: {}", summary);
            }
            eprintln!("{}", artifact_summary(&completion));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json_report(&narrative, &completion))?);
        }
    }
    Ok(())
}

async fn print_events(mut rx: UnboundedReceiver<SessionEvent>, output: OutputFormat) -> Narrative {
    let mut narrative = Narrative::default();
    while let Some(event) = rx.recv().await {
        if output == OutputFormat::Text {
            match &event {
                SessionEvent::State(state) => debug!("session {}", state),
                SessionEvent::Status(label) => eprintln!("[{}]", label),
                SessionEvent::Content(text) => {
                    print!("{}", text);
                    if let Err(e) = std::io::stdout().flush() {
                        debug!("stdout flush failed: {}", e);
                    }
                }
                SessionEvent::Summary(_) | SessionEvent::Completed => {}
                SessionEvent::Failed(reason) => debug!("session failed: {}", reason),
            }
        }
        narrative.apply(&event);
    }
    narrative
}

/// One-line description of the report artifacts.
pub(crate) fn artifact_summary(completion: &Completion) -> String {
    let mut parts = vec![
        format!("html report {} bytes", completion.html_report.len()),
        format!("pdf report {} bytes", completion.pdf_report.len()),
    ];
    match completion.images.len() {
        0 => {}
        1 => parts.push("1 image".to_string()),
        n => parts.push(format!("{} images", n)),
    }
    if let Some(audio) = &completion.audio {
        parts.push(format!("audio {} bytes", audio.len()));
    }
    format!("completed: {}", parts.join(", "))
}

/// Structured result for `--output json`.
pub(crate) fn json_report(narrative: &Narrative, completion: &Completion) -> serde_json::Value {
    json!({
        "status": "completed",
        "narrative": narrative.content,
        "summary": completion
            .verbal_summary
            .clone()
            .unwrap_or_else(|| narrative.summary.clone()),
        "html_report": completion.html_report,
        "pdf_report_bytes": completion.pdf_report.len(),
        "images": completion.images.keys().collect::<Vec<_>>(),
        "audio_bytes": completion.audio.as_ref().map(Vec::len),
    })
}

#[cfg(test)]
#[path = "analyze_tests.rs"]
mod tests;
