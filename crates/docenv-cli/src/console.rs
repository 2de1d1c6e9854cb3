use docenv_core::notify::{Level, Notifier, Stream};

/// Prints notifications to the terminal. Info goes to stdout, warnings and
/// errors to stderr; command output is tagged with its job name.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info => println!("{message}"),
            Level::Warn => eprintln!("warning: {message}"),
            Level::Error => eprintln!("error: {message}"),
        }
    }

    fn output(&self, job: &str, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => println!("[{job}] {line}"),
            Stream::Stderr => eprintln!("[{job}] {line}"),
        }
    }
}
