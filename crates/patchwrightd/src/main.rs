use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match patchwrightd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if writeln!(io::stderr().lock(), "patchwrightd: {error}").is_err() {
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}
