// User-facing console output for the CLI.

use std::env;

/// ANSI color codes for console output.
struct Colors;

impl Colors {
    const SUCCESS: &'static str = "\x1b[32m";
    const ERROR: &'static str = "\x1b[31m";
    const WARNING: &'static str = "\x1b[33m";
    const INFO: &'static str = "\x1b[36m";
    const DIM: &'static str = "\x1b[2m";
    const RESET: &'static str = "\x1b[0m";
}

/// Console logger used for all operator-visible output. Debug messages are
/// only shown when WEFT_DEBUG is set; colors are suppressed under NO_COLOR.
pub struct ConsoleLogger;

impl ConsoleLogger {
    fn colored(color: &str, symbol: &str, message: &str) -> String {
        if env::var("NO_COLOR").is_ok() {
            format!("{} {}", symbol, message)
        } else {
            format!("{}{} {}{}", color, symbol, message, Colors::RESET)
        }
    }

    pub fn success(message: &str) {
        println!("{}", Self::colored(Colors::SUCCESS, "✓", message));
    }

    pub fn error(message: &str) {
        eprintln!("{}", Self::colored(Colors::ERROR, "✗", message));
    }

    pub fn warning(message: &str) {
        println!("{}", Self::colored(Colors::WARNING, "!", message));
    }

    pub fn info(message: &str) {
        println!("{}", Self::colored(Colors::INFO, "ℹ", message));
    }

    pub fn progress(message: &str) {
        println!("{}", Self::colored(Colors::INFO, "→", message));
    }

    pub fn item(message: &str) {
        println!("  {}", Self::colored(Colors::DIM, "•", message));
    }

    pub fn debug(message: &str) {
        if env::var("WEFT_DEBUG").is_ok() {
            println!("{}", Self::colored(Colors::DIM, "·", message));
        }
    }

    pub fn separator() {
        println!("{}", "─".repeat(50));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_methods_dont_panic() {
        ConsoleLogger::success("test");
        ConsoleLogger::error("test");
        ConsoleLogger::warning("test");
        ConsoleLogger::info("test");
        ConsoleLogger::progress("test");
        ConsoleLogger::item("test");
        ConsoleLogger::debug("test");
        ConsoleLogger::separator();
    }
}
