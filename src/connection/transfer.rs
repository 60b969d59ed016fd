//! scp sink protocol.
//!
//! Pushes one file to a remote `scp -t` receiver over a session's stdin:
//!
//! 1. header `C<mode> <size> <name>\n`
//! 2. exactly `size` bytes of content
//! 3. a single `0x00` byte
//!
//! stdin is closed afterwards whether or not the transfer succeeded, which
//! is what lets the remote receiver exit.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::session::Stdin;
use super::{ConnectionError, ConnectionResult};
use crate::context::ExecContext;

/// Mode used when a file action does not set one.
pub const DEFAULT_FILE_MODE: &str = "0644";

/// Check that `mode` is 3 or 4 octal digits.
pub fn validate_mode(mode: &str) -> Result<(), String> {
    let valid_len = matches!(mode.len(), 3 | 4);
    if valid_len && mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        Ok(())
    } else {
        Err(format!(
            "invalid file mode {:?}: expected 3 or 4 octal digits",
            mode
        ))
    }
}

/// Receiver command for a file landing in `dir`.
pub fn receiver_command(dir: &str) -> String {
    format!("scp -qt {}", shell_words::quote(dir))
}

/// Protocol header for one file.
pub fn header(mode: &str, size: u64, name: &str) -> String {
    format!("C{} {} {}\n", mode, size, name)
}

/// Stream `source` to the remote receiver, then close `stdin`.
///
/// Fails if `source` yields fewer than `size` bytes or if the context ends
/// mid-transfer.
pub async fn send_file<R>(
    ctx: &ExecContext,
    stdin: &Stdin,
    source: R,
    size: u64,
    mode: &str,
    name: &str,
) -> ConnectionResult<()>
where
    R: AsyncRead + Unpin + Send,
{
    let result = match check_name(name).and(validate_mode(mode)) {
        Ok(()) => ctx
            .run(write_file(stdin, source, size, mode, name))
            .await
            .unwrap_or_else(|cause| Err(ConnectionError::Cancelled(cause))),
        Err(message) => Err(ConnectionError::TransferFailed(message)),
    };

    let closed = stdin.close().await.map_err(|e| {
        ConnectionError::TransferFailed(format!("failed to close remote stdin: {}", e))
    });

    result.and(closed)
}

async fn write_file<R>(
    stdin: &Stdin,
    source: R,
    size: u64,
    mode: &str,
    name: &str,
) -> ConnectionResult<()>
where
    R: AsyncRead + Unpin + Send,
{
    stdin
        .write_all(header(mode, size, name).as_bytes())
        .await
        .map_err(|e| ConnectionError::TransferFailed(format!("failed to create remote file: {}", e)))?;

    let mut body = source.take(size);
    let copied = stdin.copy_from(&mut body).await.map_err(|e| {
        ConnectionError::TransferFailed(format!("failed to write remote file contents: {}", e))
    })?;
    if copied != size {
        return Err(ConnectionError::TransferFailed(format!(
            "source ended after {} of {} bytes",
            copied, size
        )));
    }

    stdin
        .write_all(&[0])
        .await
        .map_err(|e| ConnectionError::TransferFailed(format!("failed to finish remote file: {}", e)))?;
    stdin.flush().await?;

    debug!(name = %name, size, "File streamed to remote receiver");
    Ok(())
}

fn check_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.contains('/') || name.contains('\n') {
        Err(format!("invalid remote file name {:?}", name))
    } else {
        Ok(())
    }
}
