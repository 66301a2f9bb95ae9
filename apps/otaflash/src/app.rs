//! Wires the firmware file, session, transport and terminal together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use otaflash_firmware::FirmwareFile;
use otaflash_http::HttpTransport;
use otaflash_upload::{Phase, PresentationSink, UpdateOrchestrator, UploadSession};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::console;

/// Runs one firmware update to completion.
///
/// Returns an error when the upload is cancelled or finally fails.
pub async fn run(config: Config, path: PathBuf) -> anyhow::Result<()> {
    let file = FirmwareFile::load(&path)?;
    let sink: Arc<dyn PresentationSink> = Arc::new(console::sink());

    let mut session = UploadSession::new(config.session_config(), sink);
    session.select_file(file)?;
    session.request_confirmation()?;

    if !console::ask_yes_no("Proceed with the update?").await? {
        tracing::info!("update declined");
        return Ok(());
    }

    let transport = Arc::new(HttpTransport::new(config.transport_config())?);
    let mut orchestrator = UpdateOrchestrator::new(session, transport);

    // First Ctrl-C cancels the upload, a second one exits.
    let interrupted = CancellationToken::new();
    let upload_cancel = orchestrator.cancel_token();
    let signal = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling upload");
            signal.cancel();
            upload_cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let mut phase = if config.auto_retry {
        orchestrator.upload_with_auto_retry().await?
    } else {
        orchestrator.upload().await?
    };

    loop {
        match phase {
            Phase::Succeeded => {
                orchestrator.session_mut().wait_for_restart().await;
                println!();
                tracing::info!("firmware update finished");
                return Ok(());
            }
            _ if interrupted.is_cancelled() => bail!("firmware update cancelled"),
            Phase::RetryAvailable if !config.auto_retry => {
                let session = orchestrator.session();
                let question = format!(
                    "Retry the upload? ({} of {} retries used)",
                    session.retry_count(),
                    session.max_retries()
                );
                let answer = console::ask_yes_no(&question).await?;
                retry_go_ahead(answer, &interrupted)?;
                phase = orchestrator.retry().await?;
            }
            Phase::Idle | Phase::AwaitingConfirmation | Phase::RetryAvailable => {
                bail!("firmware update cancelled")
            }
            _ => bail!(
                "firmware update failed after {} attempts",
                orchestrator.session().attempts().len()
            ),
        }
    }
}

/// Decides whether a retry may start once the prompt has been answered.
///
/// Ctrl-C pressed while the prompt was open wins over a yes.
fn retry_go_ahead(answer: bool, interrupted: &CancellationToken) -> anyhow::Result<()> {
    if interrupted.is_cancelled() {
        bail!("firmware update cancelled");
    }
    if !answer {
        bail!("firmware update abandoned");
    }
    Ok(())
}
