//! Virtual matrix device task
//!
//! Runs a [`VirtualMatrix`] behind one end of an in-memory duplex stream. The
//! other end behaves like an opened serial port: command bytes written to it
//! are decoded, applied, and any reply is written back.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use matrix_protocol::{CommandCodec, ProtocolCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::{debug, info};

use crate::VirtualMatrix;

/// Virtual matrix shared between the device task and the test/UI side
pub type SharedMatrix = Arc<Mutex<VirtualMatrix>>;

/// Buffer size of the in-memory "cable"
const LINE_BUFFER: usize = 4096;

fn lock(shared: &SharedMatrix) -> MutexGuard<'_, VirtualMatrix> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Start a device task and return the host end of the stream
///
/// Must be called from within a tokio runtime.
pub fn spawn_virtual_matrix(shared: SharedMatrix) -> DuplexStream {
    let (host, device) = tokio::io::duplex(LINE_BUFFER);
    tokio::spawn(async move {
        if let Err(e) = run_virtual_matrix_task(device, shared).await {
            debug!("Virtual matrix task ended: {}", e);
        }
    });
    host
}

/// "Open the port" of a virtual matrix
///
/// Fails with `NotFound` while the matrix is unplugged.
pub fn connect(shared: &SharedMatrix) -> io::Result<DuplexStream> {
    if lock(shared).is_unplugged() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "virtual matrix is unplugged",
        ));
    }
    Ok(spawn_virtual_matrix(Arc::clone(shared)))
}

/// Run the virtual matrix device loop
///
/// Returns when the host end is dropped, or with `BrokenPipe` once the
/// matrix has been unplugged.
pub async fn run_virtual_matrix_task<S>(mut stream: S, shared: SharedMatrix) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = CommandCodec::new();
    let mut buf = [0u8; 256];

    info!("Starting virtual matrix ({})", lock(&shared).size());

    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            debug!("Virtual matrix stream closed");
            break;
        }

        if lock(&shared).is_unplugged() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "virtual matrix unplugged",
            ));
        }

        codec.push_bytes(&buf[..n]);
        while let Some((cmd, raw)) = codec.next_command_with_bytes() {
            debug!("Virtual matrix received {:?}", cmd);
            let reply = {
                let mut matrix = lock(&shared);
                matrix.record(cmd.clone(), raw);
                matrix.handle(&cmd)
            };

            if let Some(reply) = reply {
                stream.write_all(&reply).await?;
                stream.flush().await?;
            }
        }
    }

    Ok(())
}
