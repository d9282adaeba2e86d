use tokio::sync::watch;

/// Create the process-wide shutdown flag. Sending `true` asks every loop
/// holding a receiver to stop.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown is requested or every sender is gone.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
