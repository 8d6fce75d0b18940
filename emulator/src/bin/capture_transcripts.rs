use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Density)?;
    record_profile(TranscriptProfile::Emergency)?;
    record_profile(TranscriptProfile::Starvation)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile)?;
    match profile {
        TranscriptProfile::Density => record_density(&mut session),
        TranscriptProfile::Emergency => record_emergency(&mut session),
        TranscriptProfile::Starvation => record_starvation(&mut session),
    }
}

fn complete(session: &mut Session, buffer: &str) -> io::Result<()> {
    session.handle_completion(buffer, buffer.len()).map(|_| ())
}

fn run(session: &mut Session, commands: &[&str]) -> io::Result<()> {
    for command in commands {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}

fn record_density(session: &mut Session) -> io::Result<()> {
    complete(session, "fe")?;
    complete(session, "feed ")?;
    complete(session, "feed road2 ")?;
    complete(session, "feed road2 c")?;

    run(
        session,
        &[
            "feed road3 car=5",
            "feed road1 car=20",
            "feed road2 car=35",
            "advance 15s",
            "status",
            "feed road1 car=90",
            "advance 5s",
            "advance 10s",
            "status",
        ],
    )
}

fn record_emergency(session: &mut Session) -> io::Result<()> {
    complete(session, "feed road1 a")?;
    complete(session, "config ")?;

    run(
        session,
        &[
            "feed road1 car=10",
            "advance 10s",
            "feed road2 police=2 car=1",
            "feed road3 ambulance=1",
            "feed road3 ambulance=0",
            "feed road2 police=0 car=1",
            "advance 5s",
            "status",
            "advance 10s",
            "status",
        ],
    )
}

fn record_starvation(session: &mut Session) -> io::Result<()> {
    complete(session, "config st")?;
    complete(session, "help ")?;

    run(
        session,
        &[
            "config",
            "feed road2 car=30",
            "feed road1 car=10 congestion=50",
            "advance 10s",
            "advance 115s",
            "status",
            "config starvation 60s",
            "config overdue-wait 90s",
            "config starvation 0s",
            "config",
            "help feed",
        ],
    )
}
