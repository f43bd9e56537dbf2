use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Install a ctrl-c handler that cancels the returned token instead of exiting immediately.
pub(super) fn create_shutdown_token() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();

    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        handle.cancel();
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(token)
}
