//! A minimal interactive transport: prompts on stderr, reads decisions from
//! stdin. One prompt is shown at a time; concurrent requests queue on the
//! stdin lock. This is the default binding for running the proxy without an
//! external approval UI.

use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::io::Stdin;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ApprovalDecision;
use super::ApprovalPrompt;
use super::ApprovalTransport;

pub struct TerminalTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    timeout: Duration,
}

impl TerminalTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
            timeout,
        }
    }

    fn print_prompt(prompt: &ApprovalPrompt<'_>) {
        eprintln!();
        eprintln!(
            "approval needed: {} {} {}",
            prompt.host, prompt.method_label, prompt.resource
        );
        eprintln!("  y        allow once");
        eprintln!("  n        reject once");
        for (i, option) in prompt.options.iter().enumerate() {
            eprintln!(
                "  {:<2}/ !{:<2}  allow / reject forever: {}  ({})",
                i + 1,
                i + 1,
                option.pattern,
                option.description
            );
        }
        eprint!("> ");
    }

    fn parse_line(line: &str, prompt: &ApprovalPrompt<'_>) -> Option<ApprovalDecision> {
        let line = line.trim();
        match line {
            "y" | "Y" => return Some(ApprovalDecision::AllowOnce),
            "n" | "N" => return Some(ApprovalDecision::RejectOnce),
            _ => {}
        }
        let (reject, number) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let index = number.parse::<usize>().ok()?.checked_sub(1)?;
        let option = prompt.options.get(index)?;
        Some(if reject {
            ApprovalDecision::RejectForever(option.pattern.clone())
        } else {
            ApprovalDecision::AllowForever(option.pattern.clone())
        })
    }
}

#[async_trait::async_trait]
impl ApprovalTransport for TerminalTransport {
    async fn request(
        &self,
        prompt: ApprovalPrompt<'_>,
        cancel: CancellationToken,
    ) -> ApprovalDecision {
        let deadline = Instant::now() + self.timeout;
        let mut lines = tokio::select! {
            guard = self.lines.lock() => guard,
            _ = cancel.cancelled() => return ApprovalDecision::RejectOnce,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    host = prompt.host,
                    resource = prompt.resource,
                    "approval timeout while waiting for the terminal"
                );
                return ApprovalDecision::RejectOnce;
            }
        };
        Self::print_prompt(&prompt);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    eprintln!("(cancelled)");
                    return ApprovalDecision::RejectOnce;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    eprintln!("(timed out)");
                    tracing::warn!(
                        host = prompt.host,
                        resource = prompt.resource,
                        "approval timeout"
                    );
                    return ApprovalDecision::RejectOnce;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => match Self::parse_line(&line, &prompt) {
                            Some(decision) => return decision,
                            None => {
                                eprintln!("unrecognized answer; y, n, <n> or !<n>");
                                eprint!("> ");
                            }
                        },
                        // stdin closed: nobody can approve anything anymore.
                        Ok(None) | Err(_) => return ApprovalDecision::RejectOnce,
                    }
                }
            }
        }
    }
}
