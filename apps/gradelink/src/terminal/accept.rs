use crate::acceptor::{Acceptor, Camera, CaptureError, CapturePipeline, StillImageCamera};
use crate::store::SharedStore;
use crate::terminal::cli::AcceptArgs;
use crate::terminal::error::CliError;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub async fn run(store: SharedStore, args: AcceptArgs) -> Result<(), CliError> {
    let camera: Arc<dyn Camera> = Arc::new(StillImageCamera::new(&args.photo));
    let acceptor = Acceptor::new(store, camera);
    let pipeline = acceptor.load(&args.url).await?;
    capture_and_submit(&pipeline, args.retries).await
}

pub(super) async fn capture_and_submit(
    pipeline: &CapturePipeline,
    retries: u32,
) -> Result<(), CliError> {
    println!("📋 {}", pipeline.context().headline());
    pipeline.open_camera().await?;
    let image = pipeline.capture()?;
    println!(
        "📸 Captured {}x{} photo ({} KB)",
        image.width,
        image.height,
        image.size_bytes.div_ceil(1024)
    );
    submit_with_retries(pipeline, retries).await?;
    println!("✅ Submitted. Check your computer for the result.");
    Ok(())
}

async fn submit_with_retries(pipeline: &CapturePipeline, retries: u32) -> Result<(), CaptureError> {
    let mut attempt = 0;
    loop {
        match pipeline.submit().await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(
                    target: "gradelink::cli",
                    session_id = %pipeline.session_id(),
                    attempt,
                    error = %err,
                    "resubmitting photo"
                );
                eprintln!("⚠️  {} (retry {attempt}/{retries})", err.user_message());
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
}
