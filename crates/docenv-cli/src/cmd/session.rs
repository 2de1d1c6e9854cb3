use crate::cmd::action::{self, open_url, ActionCommand};
use clap::Parser;
use docenv_core::dispatch::{self, Action};
use docenv_core::session::Session;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One line typed at the session prompt.
#[derive(Parser, Debug)]
#[command(name = "docenv", no_binary_name = true, disable_version_flag = true)]
struct SessionLine {
    #[command(subcommand)]
    command: ActionCommand,
}

/// What to do with one line of input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Blank,
    Quit,
    Run(Action),
    Invalid(String),
}

fn parse_line(line: &str) -> Input {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.first().copied() {
        None => Input::Blank,
        Some("exit" | "quit") => Input::Quit,
        Some(_) => match SessionLine::try_parse_from(words) {
            Ok(parsed) => Input::Run(parsed.command.into()),
            Err(e) => Input::Invalid(e.render().to_string()),
        },
    }
}

/// Read commands from stdin until `exit`, `quit`, EOF or Ctrl-C. State carries
/// over between lines; a server still running at the end is stopped.
pub async fn run(session: &Arc<Session>, json: bool) -> anyhow::Result<()> {
    println!(
        "docenv session for {} ('help' lists commands, 'exit' quits)",
        session.root().display()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_line(&line) {
            Input::Blank => {}
            Input::Quit => break,
            Input::Invalid(message) => print!("{message}"),
            Input::Run(action) => {
                let name = action.name();
                let ok = action::perform(session, action, json).await?;
                tracing::debug!(command = name, ok, "session command finished");
            }
        }
    }

    if session.state().server().is_some() {
        dispatch::run(session, Action::Stop, &open_url).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_words_quit() {
        assert_eq!(parse_line("exit"), Input::Quit);
        assert_eq!(parse_line("  quit  "), Input::Quit);
        assert_eq!(parse_line("   "), Input::Blank);
    }

    #[test]
    fn commands_parse_like_the_cli() {
        assert_eq!(
            parse_line("serve 8010"),
            Input::Run(Action::Serve {
                port: Some("8010".into())
            })
        );
        assert_eq!(parse_line("venv-activate"), Input::Run(Action::VenvActivate));
        assert_eq!(parse_line("status"), Input::Run(Action::Status));
    }

    #[test]
    fn unknown_command_is_invalid() {
        assert!(matches!(parse_line("deploy"), Input::Invalid(_)));
        assert!(matches!(parse_line("stop now"), Input::Invalid(_)));
    }
}
