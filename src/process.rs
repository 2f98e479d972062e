//! Subprocess helpers shared by the shell-backed capabilities.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

/// Substitute `{name}` placeholders in every argument.
pub(crate) fn render(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Run an argv to completion with its output discarded.
pub(crate) async fn run(argv: &[String]) -> io::Result<ExitStatus> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let template = vec!["fuser".to_string(), "-k".to_string(), "{port}/tcp".to_string()];
        assert_eq!(render(&template, &[("port", "80")]), vec!["fuser", "-k", "80/tcp"]);

        let template = vec!["deploy".to_string(), "{id}:{host}{path}".to_string()];
        assert_eq!(
            render(&template, &[("id", "dd-web"), ("host", "a.com"), ("path", "/api")]),
            vec!["deploy", "dd-web:a.com/api"]
        );
    }

    #[tokio::test]
    async fn run_rejects_empty_command() {
        let err = run(&[]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
