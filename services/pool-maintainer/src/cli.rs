//! Operator surface: run mode selection and the interactive console
//!
//! The first positional argument picks the mode; there are no flags.
//!
//! ```text
//! pool-maintainer               # run (default): maintenance loop until SIGINT/SIGTERM
//! pool-maintainer status        # print one health report
//! pool-maintainer verify        # one verification pass
//! pool-maintainer purge         # purge with the manual retention window
//! pool-maintainer interactive   # line-oriented console
//! ```

use std::str::FromStr;

use account_pool::{CycleSummary, HealthReport, Maintainer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{Error, Result};

/// Top-level run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Status,
    Verify,
    Purge,
    Interactive,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(Mode::Run),
            "status" => Ok(Mode::Status),
            "verify" => Ok(Mode::Verify),
            "purge" => Ok(Mode::Purge),
            "interactive" => Ok(Mode::Interactive),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}

impl Mode {
    /// Mode from the process arguments (program name already skipped).
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        match args.next() {
            Some(arg) => arg.parse(),
            None => Ok(Mode::Run),
        }
    }
}

/// One console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Verify,
    Clean,
    Auto,
    Help,
    Exit,
    Unknown(String),
}

impl Command {
    /// Parse a console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim().to_ascii_lowercase();
        let command = match word.as_str() {
            "" => return None,
            "status" => Command::Status,
            "verify" => Command::Verify,
            "clean" => Command::Clean,
            "auto" => Command::Auto,
            "help" | "?" => Command::Help,
            "exit" | "quit" => Command::Exit,
            _ => Command::Unknown(word),
        };
        Some(command)
    }
}

const HELP: &str = "\
commands:
  status  show pool health
  verify  verify every active account once
  clean   purge long-expired accounts
  auto    run the maintenance loop until Ctrl-C
  help    show this help
  exit    leave the console
";

/// Human-readable health report.
pub fn render_report(report: &HealthReport) -> String {
    let mut out = format!(
        "total: {}\nactive: {} (min {}, max {})\nexpired: {}\nblocked: {}\n",
        report.total,
        report.active,
        report.min_pool_size,
        report.max_pool_size,
        report.expired,
        report.blocked,
    );
    for (status, count) in &report.by_status {
        if !matches!(status.as_str(), "active" | "expired" | "blocked") {
            out.push_str(&format!("{status}: {count}\n"));
        }
    }
    if report.shortfall {
        out.push_str(&format!(
            "warning: pool is short by {} active accounts\n",
            report.min_pool_size - report.active
        ));
    }
    if report.over_capacity {
        out.push_str(&format!(
            "warning: pool exceeds maximum by {} active accounts\n",
            report.active - report.max_pool_size
        ));
    }
    out
}

/// Human-readable verification pass summary.
pub fn render_summary(summary: &CycleSummary) -> String {
    format!(
        "verified {}: {} healthy, {} low quota, {} deferred, {} failed\n",
        summary.total, summary.healthy, summary.low_quota, summary.deferred, summary.failed
    )
}

/// Read commands from `input` until `exit`, end of input, or `shutdown`.
///
/// `auto` runs the maintenance loop against `shutdown`, so the signal that
/// stops it also ends the console.
pub async fn interactive<R, W>(
    maintainer: &Maintainer,
    input: R,
    output: &mut W,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    output.write_all(b"pool maintenance console, type `help` for commands\n").await?;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        let reply = match command {
            Command::Status => match maintainer.health_report().await {
                Ok(report) => render_report(&report),
                Err(e) => failure("status", &e),
            },
            Command::Verify => match maintainer.verify_all().await {
                Ok(summary) => render_summary(&summary),
                Err(e) => failure("verify", &e),
            },
            Command::Clean => {
                let days = maintainer.settings().manual_retention_days;
                match maintainer.purge(days).await {
                    Ok(deleted) => format!("purged {deleted} accounts expired for over {days} days\n"),
                    Err(e) => failure("clean", &e),
                }
            }
            Command::Auto => {
                output.write_all(b"maintenance loop running, Ctrl-C to stop\n").await?;
                output.flush().await?;
                maintainer.run(shutdown).await;
                String::from("maintenance loop stopped\n")
            }
            Command::Help => HELP.to_string(),
            Command::Exit => break,
            Command::Unknown(word) => format!("unknown command `{word}`, type `help`\n"),
        };
        output.write_all(reply.as_bytes()).await?;
    }

    output.write_all(b"bye\n").await?;
    output.flush().await?;
    Ok(())
}

fn failure(command: &str, e: &account_pool::Error) -> String {
    error!(command, error = %e, "console command failed");
    format!("{command} failed: {e}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_pool::{
        AccountStatus, AccountStore, MaintenanceSettings, NewAccount, QuotaClient, StatusCounts,
    };
    use common::Secret;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use token_auth::RefreshClient;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn mode_defaults_to_run() {
        assert_eq!(Mode::from_args(args(&[])).unwrap(), Mode::Run);
    }

    #[test]
    fn mode_from_first_argument() {
        assert_eq!(Mode::from_args(args(&["status"])).unwrap(), Mode::Status);
        assert_eq!(Mode::from_args(args(&["verify"])).unwrap(), Mode::Verify);
        assert_eq!(Mode::from_args(args(&["purge"])).unwrap(), Mode::Purge);
        assert_eq!(
            Mode::from_args(args(&["interactive", "ignored"])).unwrap(),
            Mode::Interactive
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = Mode::from_args(args(&["--daemon"])).unwrap_err();
        assert!(matches!(err, Error::UnknownMode(m) if m == "--daemon"));
    }

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(Command::parse("  STATUS \n"), Some(Command::Status));
        assert_eq!(Command::parse("quit"), Some(Command::Exit));
        assert_eq!(Command::parse("?"), Some(Command::Help));
        assert_eq!(Command::parse("   "), None);
        assert_eq!(
            Command::parse("reboot"),
            Some(Command::Unknown("reboot".into()))
        );
    }

    #[test]
    fn report_lists_counts_and_shortfall() {
        let mut by_status = BTreeMap::new();
        by_status.insert("active".to_string(), 20);
        by_status.insert("frozen".to_string(), 2);
        let report = HealthReport::from_counts(
            StatusCounts {
                total: 22,
                by_status,
            },
            25,
            60,
        );

        let text = render_report(&report);
        assert!(text.contains("total: 22"));
        assert!(text.contains("active: 20 (min 25, max 60)"));
        assert!(text.contains("frozen: 2"));
        assert!(text.contains("short by 5"));
    }

    #[test]
    fn summary_lists_every_outcome() {
        let text = render_summary(&CycleSummary {
            total: 4,
            healthy: 1,
            low_quota: 1,
            deferred: 1,
            failed: 1,
        });
        assert_eq!(
            text,
            "verified 4: 1 healthy, 1 low quota, 1 deferred, 1 failed\n"
        );
    }

    /// Maintainer whose upstreams are unreachable. Only used with pools that
    /// have no active accounts, so no request is ever made.
    async fn offline_maintainer(dir: &tempfile::TempDir) -> (Maintainer, AccountStore) {
        let store = AccountStore::open(dir.path().join("accounts.db"), Duration::from_secs(5))
            .await
            .unwrap();
        let http = reqwest::Client::new();
        let refresher = RefreshClient::new(
            http.clone(),
            "http://127.0.0.1:1/v1/token",
            vec![Secret::from("key")],
            Duration::from_secs(1),
        )
        .unwrap();
        let quota = QuotaClient::new(http, "http://127.0.0.1:1/graphql/v2", Duration::from_secs(1));
        let settings = MaintenanceSettings {
            min_pool_size: 1,
            pacing_delay: Duration::ZERO,
            ..MaintenanceSettings::default()
        };
        let maintainer = Maintainer::new(store.clone(), Arc::new(refresher), Arc::new(quota), &settings);
        (maintainer, store)
    }

    async fn run_console(maintainer: &Maintainer, script: &str) -> String {
        let mut output = Vec::new();
        interactive(
            maintainer,
            script.as_bytes(),
            &mut output,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn console_runs_commands_until_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (maintainer, store) = offline_maintainer(&dir).await;
        store
            .insert(&NewAccount {
                status: AccountStatus::Blocked,
                ..NewAccount::new("blocked@example.com", "rt")
            })
            .await
            .unwrap();

        let out = run_console(&maintainer, "status\n\nverify\nclean\nbogus\nexit\nstatus\n").await;

        assert!(out.contains("total: 1"), "got:\n{out}");
        assert!(out.contains("blocked: 1"));
        assert!(out.contains("short by 1"));
        assert!(out.contains("verified 0:"));
        assert!(out.contains("purged 0 accounts"));
        assert!(out.contains("unknown command `bogus`"));
        assert!(out.ends_with("bye\n"));
        assert_eq!(out.matches("total:").count(), 1, "commands after exit must not run");
    }

    #[tokio::test]
    async fn console_ends_at_end_of_input() {
        let dir = tempfile::tempdir().unwrap();
        let (maintainer, _store) = offline_maintainer(&dir).await;

        let out = run_console(&maintainer, "help\n").await;
        assert!(out.contains("auto    run the maintenance loop"));
        assert!(out.ends_with("bye\n"));
    }

    #[tokio::test]
    async fn auto_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (maintainer, _store) = offline_maintainer(&dir).await;
        let shutdown = CancellationToken::new();

        let stopper = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                shutdown.cancel();
            })
        };

        let mut output = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            interactive(&maintainer, "auto\nstatus\n".as_bytes(), &mut output, &shutdown),
        )
        .await
        .expect("console did not stop")
        .unwrap();
        stopper.await.unwrap();

        let out = String::from_utf8(output).unwrap();
        assert!(out.contains("maintenance loop stopped"), "got:\n{out}");
        assert!(!out.contains("total:"), "console must exit once shut down");
    }
}
