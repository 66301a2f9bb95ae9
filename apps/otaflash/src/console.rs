//! Terminal presentation for the upload workflow.

use std::io::{BufRead, Write};

use otaflash_upload::{CallbackSink, PresentationEvent, StatusKind};

/// Sink that prints session updates to the terminal.
pub fn sink() -> CallbackSink {
    CallbackSink::new(print_event)
}

/// Prints one session update: errors to stderr, the rest to stdout.
fn print_event(event: PresentationEvent) {
    let Some(line) = render(&event) else {
        tracing::trace!(?event, "presentation update");
        return;
    };

    match event {
        PresentationEvent::Status {
            kind: StatusKind::Error,
            ..
        } => eprintln!("{line}"),
        PresentationEvent::Status {
            kind: StatusKind::Uploading,
            ..
        } => {
            // Overwrite the previous progress line in place.
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\r{line}");
            let _ = out.flush();
        }
        _ => println!("\n{line}"),
    }
}

/// Text for events that produce terminal output.
///
/// Countdown ticks and control toggles are carried by the status lines.
fn render(event: &PresentationEvent) -> Option<String> {
    match event {
        PresentationEvent::Status { message, kind } => Some(match kind {
            StatusKind::Error => format!("error: {message}"),
            _ => message.clone(),
        }),
        PresentationEvent::ConfirmationRequired(prompt) => Some(prompt.message()),
        PresentationEvent::SubmitEnabled(_)
        | PresentationEvent::RetryEnabled(_)
        | PresentationEvent::Progress { .. }
        | PresentationEvent::Countdown { .. } => None,
    }
}

/// Asks a yes/no question on the terminal. Anything but `y`/`yes` is no.
pub async fn ask_yes_no(question: &str) -> anyhow::Result<bool> {
    let question = question.to_string();
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut out = std::io::stdout().lock();
        write!(out, "\n{question} [y/N] ")?;
        out.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    })
    .await??;

    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
