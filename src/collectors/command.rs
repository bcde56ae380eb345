use crate::error::ProbeError;
use log::debug;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run an external tool and return its stdout.
///
/// The child is killed if it does not finish within `timeout`, so a hung
/// tool can never stall a periodic loop.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProbeError::NotFound(program.to_string())
            } else {
                ProbeError::Io(e)
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ProbeError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("{} {:?} failed: {}", program, args, stderr.trim());
        return Err(ProbeError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
