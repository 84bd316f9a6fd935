use clap::{App, Arg};
use flint::logging;
use gamecore::config::GameConfig;
use gamecore::server::GameWorld;
use std::io::{self, BufRead, Write};
use std::process;

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let matches = App::new("gamerunner")
        .version("0.1.0")
        .about("Session-oriented game server runtime")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("Path to the TOML configuration file"),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => GameConfig::load(path),
        None => GameConfig::default(),
    };

    let log = logging::terminal(&config.log_level);

    let mut world = match GameWorld::start(&config, &log) {
        Ok(world) => world,
        Err(err) => {
            logging::crit!(log, "startup failed"; "context" => "main", "error" => ?err);
            return 1;
        }
    };

    logging::info!(log, "server running, type 'status' or 'quit'"; "context" => "main");
    console_loop(&world);

    world.stop();
    0
}

/// Operator console: blocks on stdin until `quit`.
fn console_loop(world: &GameWorld) {
    let stdin = io::stdin();

    loop {
        print!("> ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // stdin closed
            Ok(_) => {}
            Err(_) => break,
        }

        match line.trim() {
            "quit" | "exit" => break,
            "status" => {
                let stats = world.stats();
                println!(
                    "sessions: {}  accepts: {}  rejected: {}  recv: {}  sent: {}  pending connects: {}",
                    stats.sessions,
                    stats.accept_total,
                    stats.rejected,
                    stats.recv_msgs,
                    stats.sent_msgs,
                    stats.pending_connects
                );
            }
            "" => {}
            other => {
                println!("unknown command '{}'; available: status, quit", other);
            }
        }
    }
}
