mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use crossterm::style::Stylize;
use intersection_core::roads::LightState;
use session::{Response, Session, TranscriptProfile, board_label};

fn main() -> io::Result<()> {
    let profile = parse_profile().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: intersection-emulator [--profile <density|emergency|starvation>] | intersection-emulator <density|emergency|starvation>"
        );
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(profile)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Intersection Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "[{}] > ", session.now())?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            print_response(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn print_response<W: Write>(writer: &mut W, response: &Response) -> io::Result<()> {
    match response {
        Response::Text(text) => writeln!(writer, "{text}"),
        Response::Board(lights) => {
            for (road, state) in lights.iter() {
                let label = board_label(state);
                match state {
                    LightState::Open => {
                        writeln!(writer, "  {road} Traffic Light: {}", label.green().bold())?;
                    }
                    LightState::Closed => {
                        writeln!(writer, "  {road} Traffic Light: {}", label.red())?;
                    }
                }
            }
            Ok(())
        }
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_profile() -> Result<TranscriptProfile, String> {
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            TranscriptProfile::from_tag(value)
        } else if arg == "--profile" {
            if let Some(value) = args.next() {
                TranscriptProfile::from_tag(&value)
            } else {
                Err("Expected value after --profile".to_string())
            }
        } else {
            TranscriptProfile::from_tag(&arg)
        }
    } else {
        Ok(TranscriptProfile::Density)
    }
}
