// pkd-core/src/process.rs
use std::ffi::OsString;
use std::process::{Command, Output, Stdio};

use tracing::{debug, error};

/// Runs an external command to completion and captures its output.
///
/// A non-zero exit is not an error here; callers inspect `status`.
pub fn run_command(program: &str, args: &[OsString]) -> std::io::Result<Output> {
    debug!("Running command: {} {:?}", program, args);
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    match cmd.output() {
        Ok(output) => {
            if output.status.success() {
                debug!("Command {} finished successfully.", program);
            } else {
                debug!("Command {} failed with status: {}", program, output.status);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.trim().is_empty() {
                    debug!("Stdout:\n{}", stdout.trim());
                }
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute {}: {}", program, e);
            Err(e)
        }
    }
}

/// Prefixes `program` with `sudo` when `use_sudo` is set.
pub fn privileged(use_sudo: bool, program: &str, args: Vec<OsString>) -> (String, Vec<OsString>) {
    if use_sudo {
        let mut sudo_args = Vec::with_capacity(args.len() + 1);
        sudo_args.push(OsString::from(program));
        sudo_args.extend(args);
        ("sudo".to_string(), sudo_args)
    } else {
        (program.to_string(), args)
    }
}

pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_prefix_keeps_arguments_in_order() {
        let (program, args) = privileged(
            true,
            "installer",
            vec!["-pkg".into(), "Demo.pkg".into()],
        );
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["installer", "-pkg", "Demo.pkg"]);

        let (program, args) = privileged(false, "pkgutil", vec!["--forget".into()]);
        assert_eq!(program, "pkgutil");
        assert_eq!(args, vec!["--forget"]);
    }

    #[cfg(unix)]
    #[test]
    fn captures_failure_status_and_stderr() {
        let output = run_command(
            "sh",
            &["-c".into(), "echo oops >&2; exit 3".into()],
        )
        .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(stderr_text(&output), "oops");
    }
}
