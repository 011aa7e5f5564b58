//! Driver process lifecycle.
//!
//! Spawns the automation driver as a subprocess and wires its stdio pipes
//! into a [`Connection`]. One process, one transport, one connection per
//! session; all registry state dies with the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::driver::find_driver_executable;
use crate::error::{Error, Result};
use crate::transport::PipeTransport;

/// A running driver subprocess.
#[derive(Debug)]
pub struct DriverProcess {
    process: Child,
}

impl DriverProcess {
    /// Launches the driver in RPC mode with piped stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotFound`] if the driver cannot be located and
    /// [`Error::LaunchFailed`] if the process does not start or exits
    /// immediately.
    pub async fn launch() -> Result<Self> {
        let driver = find_driver_executable()?;

        let mut cmd = Command::new(&driver);
        cmd.arg("run-driver")
            .env("DROVER_CLIENT_NAME", "rust")
            .env("DROVER_CLIENT_VERSION", env!("CARGO_PKG_VERSION"))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("failed to spawn driver: {e}")))?;

        // Catch drivers that die on startup before handing the pipes out.
        tokio::time::sleep(Duration::from_millis(100)).await;
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(Error::LaunchFailed(format!(
                    "driver exited immediately with status: {status}"
                )));
            }
            Ok(None) => {}
            Err(e) => {
                return Err(Error::LaunchFailed(format!(
                    "failed to check driver status: {e}"
                )));
            }
        }

        Ok(Self { process: child })
    }

    /// Takes the stdio pipe ends for the transport. Can only succeed once.
    pub fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout)> {
        let stdin = self
            .process
            .stdin
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdin already taken".to_string()))?;
        let stdout = self
            .process
            .stdout
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdout already taken".to_string()))?;
        Ok((stdin, stdout))
    }

    /// Terminates the driver: closes stdin so it can exit on its own, then
    /// kills it and waits with a bound.
    pub async fn shutdown(mut self) -> Result<()> {
        drop(self.process.stdin.take());

        self.process
            .kill()
            .await
            .map_err(|e| Error::LaunchFailed(format!("failed to kill driver: {e}")))?;

        match tokio::time::timeout(Duration::from_secs(5), self.process.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::LaunchFailed(format!(
                "failed to wait for driver: {e}"
            ))),
            Err(_) => {
                let _ = self.process.start_kill();
                Err(Error::LaunchFailed(
                    "driver did not exit within 5 seconds".to_string(),
                ))
            }
        }
    }
}

/// A live session: driver process, transport, connection, and the running
/// dispatch loop.
pub struct DriverSession {
    connection: Arc<Connection>,
    process: DriverProcess,
    run_task: JoinHandle<()>,
}

impl DriverSession {
    /// Launches the driver and brings the session up. The connection's
    /// handshake request is already on the wire when this returns; callers
    /// can issue requests immediately and they will flow once the driver
    /// answers with the root create event.
    pub async fn launch() -> Result<Self> {
        let mut process = DriverProcess::launch().await?;
        let (stdin, stdout) = process.take_stdio()?;

        let (transport, message_rx) = PipeTransport::new(stdin, stdout);
        let connection = Arc::new(Connection::new(transport.into_transport_parts(message_rx)));

        let run_connection = Arc::clone(&connection);
        let run_task = tokio::spawn(async move { run_connection.run().await });

        Ok(Self {
            connection,
            process,
            run_task,
        })
    }

    /// The session's connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Tears the session down: stops the dispatch loop and shuts the driver
    /// process down.
    pub async fn close(self) -> Result<()> {
        self.run_task.abort();
        self.process.shutdown().await
    }
}
