use tokio::sync::watch;

/// Resolves once `true` has been sent, or once the sender is gone.
pub async fn signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}
