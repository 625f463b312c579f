// ABOUTME: Terminal formatting for session messages, session status and preview state

use colored::*;

use livebuild_preview::PreviewState;
use livebuild_session::{ChatMessage, MessageKind, MessageRole, SessionStatus};

pub fn message_line(message: &ChatMessage) -> String {
    let label = match (message.role, message.kind) {
        (_, MessageKind::Brief) => "brief".blue().bold(),
        (MessageRole::User, _) => "you".blue().bold(),
        (MessageRole::System, _) => "system".red().bold(),
        (MessageRole::Assistant, _) => message
            .node
            .as_deref()
            .unwrap_or("assistant")
            .green()
            .bold(),
    };

    let mut line = format!("[{}] {}", label, message.content.trim_end());
    if message.kind != MessageKind::Error {
        if let Some(error) = &message.error {
            line.push_str(&format!("\n{} {}", "error:".red().bold(), error));
        }
    }
    line
}

pub fn status_line(status: SessionStatus) -> String {
    let text = status.as_str();
    let text = match status {
        SessionStatus::Completed => text.green().bold(),
        SessionStatus::Error => text.red().bold(),
        _ => text.yellow(),
    };
    format!("Build {}", text)
}

pub fn state_line(state: &PreviewState) -> String {
    match state {
        PreviewState::Ready { url } => {
            format!("{} {}", "Preview ready at".green().bold(), url.underline())
        }
        PreviewState::Error {
            message,
            recoverable,
        } => {
            let hint = if *recoverable {
                "run `livebuild preview` to try again"
            } else {
                "this environment cannot run previews"
            };
            format!("{} {} ({})", "Preview failed:".red().bold(), message, hint)
        }
        other => format!("{}...", other.as_str().yellow()),
    }
}
